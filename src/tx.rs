//! The transmit path.
//!
//! A frame occupies one or more descriptors of its TX ring. The first segment of the first
//! descriptor always points at a per descriptor head buffer in coherent memory, which holds the
//! TXWI followed by a copy of the 802.11 header padded to four bytes. The rest of the frame is
//! mapped in place and packed two segments per descriptor.

use core::sync::atomic::Ordering;

use alloc::vec::Vec;
use heapless::Deque;
use ieee80211::macro_bits::check_bit;

use crate::{
    bus::{Bus, CoherentRegion, DmaError, DmaSegment, ScatterList},
    device::{Device, DeviceState},
    frame::{FrameHeader, FrameKind, OutboundFrame, DURATION_OFFSET, SEQUENCE_OFFSET},
    locked,
    mac::{MacLayer, TxCompletion, TxStatus},
    node::NodeRef,
    phy::{ack_duration, derive_phy_params, packet_id, retry_count, Rate},
    regs::*,
    ring::{Descriptor, Ring, RingError, SDL0_LAST_SEGMENT, SDL1_LAST_SEGMENT},
    station::{WCID_MULTICAST, WCID_NONE},
    stats::Stats,
    wi::{encode_phy, TxWi, TX_ACK, TX_MIMOPS, TX_NSEQ, TX_TS, WI_SIZE},
    MAX_SCATTER, OUTPUT_QUEUE_LEN, TX_RING_COUNT,
};

/// Amount of TX rings.
pub(crate) const TX_QUEUE_COUNT: usize = 6;
/// Space reserved in coherent memory for the TXWI and the header of every descriptor.
const HEAD_SIZE: usize = 64;
/// Seconds a TX ring may stay busy without completions, before the device is reset.
pub(crate) const TX_WATCHDOG_SECONDS: u8 = 5;
/// Maximum amount of entries drained from the TX status FIFO at once.
const TX_STATUS_FIFO_DEPTH: usize = 16;

const QSEL_MGMT: u32 = 0 << 1;
const QSEL_HCCA: u32 = 1 << 1;
const QSEL_EDCA: u32 = 2 << 1;
const DESCRIPTOR_QSEL_SHIFT: u32 = 24;

const BAR_CONTROL_COMPRESSED: u16 = 1 << 2;
const BAR_CONTROL_TID_SHIFT: u16 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// A hardware transmit queue.
pub enum TxQueue {
    /// Background.
    Ac0,
    /// Best effort.
    Ac1,
    /// Video.
    Ac2,
    /// Voice.
    Ac3,
    /// HCCA.
    Hcca,
    /// Management frames.
    Mgmt,
}
impl TxQueue {
    /// All queues in the order of their hardware index.
    pub const ALL: [Self; TX_QUEUE_COUNT] = [
        Self::Ac0,
        Self::Ac1,
        Self::Ac2,
        Self::Ac3,
        Self::Hcca,
        Self::Mgmt,
    ];
    /// All queues in descending priority.
    pub(crate) const PRIORITY: [Self; TX_QUEUE_COUNT] = [
        Self::Mgmt,
        Self::Hcca,
        Self::Ac3,
        Self::Ac2,
        Self::Ac1,
        Self::Ac0,
    ];
    /// The hardware index of the queue.
    pub const fn index(self) -> usize {
        self as usize
    }
    const fn qsel(self) -> u32 {
        match self {
            Self::Mgmt => QSEL_MGMT,
            Self::Hcca => QSEL_HCCA,
            _ => QSEL_EDCA,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The reason a frame couldn't be queued for transmission.
pub enum TxError {
    /// Not enough descriptors are free. The frame can be retried later.
    RingFull,
    /// The device isn't running.
    Down,
    /// Memory for mapping or linearizing the frame couldn't be allocated.
    OutOfMemory,
    /// The frame couldn't be mapped even after linearizing it, or had no valid header.
    TransmitError,
}

#[derive(Debug, PartialEq, Eq)]
/// A failed transmission.
///
/// If the failure is recoverable, the frame is handed back.
pub enum TxFailure {
    /// See [TxError::RingFull].
    RingFull(OutboundFrame),
    /// See [TxError::Down].
    Down(OutboundFrame),
    /// See [TxError::OutOfMemory]. The frame was dropped.
    OutOfMemory,
    /// See [TxError::TransmitError]. The frame was dropped.
    TransmitError,
}
impl TxFailure {
    /// The kind of failure.
    pub fn error(&self) -> TxError {
        match self {
            Self::RingFull(_) => TxError::RingFull,
            Self::Down(_) => TxError::Down,
            Self::OutOfMemory => TxError::OutOfMemory,
            Self::TransmitError => TxError::TransmitError,
        }
    }
    /// Take back the frame, if it wasn't dropped.
    pub fn into_frame(self) -> Option<OutboundFrame> {
        match self {
            Self::RingFull(frame) | Self::Down(frame) => Some(frame),
            _ => None,
        }
    }
}

/// What's kept for a frame while the hardware owns it.
pub(crate) struct TxSlot {
    pub frame: OutboundFrame,
    pub node: NodeRef,
    pub mapping: ScatterList,
}

/// A TX ring together with its head buffers.
pub(crate) struct TxRing {
    pub ring: Ring<TxSlot>,
    heads: CoherentRegion,
}
impl TxRing {
    pub fn allocate<B: Bus + ?Sized>(bus: &B) -> Result<Self, RingError> {
        let ring = Ring::allocate(bus, TX_RING_COUNT)?;
        match bus.alloc_coherent(TX_RING_COUNT * HEAD_SIZE) {
            Ok(heads) => Ok(Self { ring, heads }),
            Err(err) => {
                ring.free(bus);
                Err(err.into())
            }
        }
    }
    pub fn free<B: Bus + ?Sized>(self, bus: &B) -> Vec<TxSlot> {
        bus.free_coherent(self.heads);
        self.ring.free(bus)
    }
    fn head_segment(&self, index: usize, length: usize) -> DmaSegment {
        DmaSegment {
            address: self.heads.address + (index * HEAD_SIZE) as u32,
            length: length as u16,
        }
    }
}

type OutputEntry = (TxQueue, OutboundFrame, NodeRef);

/// The software output queue in front of the TX rings.
pub(crate) struct OutputQueue {
    frames: Deque<OutputEntry, OUTPUT_QUEUE_LEN>,
    /// Set while a ring is full. Cleared by the TX done task.
    active: bool,
}
impl OutputQueue {
    pub const fn new() -> Self {
        Self {
            frames: Deque::new(),
            active: false,
        }
    }
    pub fn clear_active(&mut self) {
        self.active = false;
    }
    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active
    }
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

/// A frame, which was rejected by a full ring.
struct Rejected {
    frame: OutboundFrame,
    mapping: ScatterList,
}

impl<B: Bus, M: MacLayer> Device<B, M> {
    fn select_rate(&self, header: &FrameHeader, frame: &OutboundFrame, node: &NodeRef) -> Rate {
        let config = self.config();
        if header.is_multicast() {
            config.multicast_rate
        } else if header.kind != FrameKind::Data || frame.is_eapol(header) {
            config.management_rate
        } else {
            config.fixed_rate.unwrap_or_else(|| node.current_rate())
        }
    }

    /// Build the contents of the head buffer for `frame`.
    ///
    /// Returns the head, its length and the TID of the aggregation session the frame belongs
    /// to. The sequence number of such a frame is only filled in by [Self::commit_sequence].
    fn build_head(
        &self,
        header: &FrameHeader,
        frame: &OutboundFrame,
        node: &NodeRef,
    ) -> ([u8; HEAD_SIZE], usize, Option<u8>) {
        let config = self.config();
        let rate = self.select_rate(header, frame, node);
        let params = derive_phy_params(rate, node.ht_capabilities(), &config);
        let unicast_data = header.kind == FrameKind::Data && !header.is_multicast();

        let mut txwi = TxWi {
            phy: encode_phy(&params),
            wcid: if unicast_data {
                node.station_id()
            } else if header.is_multicast() {
                WCID_MULTICAST
            } else {
                WCID_NONE
            },
            ..Default::default()
        };
        // The MPDU length excludes the header padding.
        txwi.set_length(frame.len());
        if unicast_data {
            txwi.set_pid(packet_id(params.mcs));
        }
        if header.expects_ack() {
            txwi.xflags |= TX_ACK;
        }
        if header.qos.is_none() {
            txwi.xflags |= TX_NSEQ;
        }
        if header.is_probe_response() {
            txwi.flags |= TX_TS;
        }
        if params.mimo_ps {
            txwi.flags |= TX_MIMOPS;
        }

        let aggregation_eligible =
            unicast_data && node.ht_capabilities().ht && !frame.is_eapol(header);
        let ampdu_tid = header
            .tid()
            .filter(|_| aggregation_eligible)
            .filter(|tid| match node.aggregation_session(*tid) {
                Some(session) => {
                    txwi.set_ampdu(session.mpdu_density, session.window_size);
                    true
                }
                None => false,
            });

        let mut head = [0u8; HEAD_SIZE];
        head[..WI_SIZE].copy_from_slice(&txwi.to_bytes());
        head[WI_SIZE..WI_SIZE + header.length].copy_from_slice(&frame.head()[..header.length]);
        if header.expects_ack() {
            let offset = WI_SIZE + DURATION_OFFSET;
            head[offset..offset + 2].copy_from_slice(&ack_duration(&params).to_le_bytes());
        }
        trace!(
            "TXWI: wcid {} phy {:#x} len {} pid {}",
            txwi.wcid,
            txwi.phy,
            txwi.length(),
            txwi.pid()
        );
        (head, WI_SIZE + header.padded_length(), ampdu_tid)
    }

    /// Take the next sequence number of the aggregation session and write it into `head`.
    fn commit_sequence(head: &mut [u8; HEAD_SIZE], node: &NodeRef, tid: u8) {
        if let Some((_, sequence)) = node.next_ampdu_sequence(tid) {
            let offset = WI_SIZE + SEQUENCE_OFFSET;
            head[offset..offset + 2].copy_from_slice(&(sequence << 4).to_le_bytes());
        }
    }

    /// Map the payload of `frame`, linearizing it once if it has too many fragments.
    fn map_payload(
        &self,
        frame: &mut OutboundFrame,
        header_length: usize,
    ) -> Result<ScatterList, TxFailure> {
        match self.bus.dma_map(&frame.body(header_length)) {
            Ok(mapping) => return Ok(mapping),
            Err(DmaError::NoResources) => {
                Stats::bump(&self.stats.tx_out_of_memory);
                return Err(TxFailure::OutOfMemory);
            }
            Err(DmaError::TooManySegments) => {}
        }
        Stats::bump(&self.stats.tx_defrag);
        if frame.linearize().is_err() {
            Stats::bump(&self.stats.tx_out_of_memory);
            return Err(TxFailure::OutOfMemory);
        }
        self.bus.dma_map(&frame.body(header_length)).map_err(|err| {
            error!("Mapping a linearized frame failed: {:?}", err);
            Stats::bump(&self.stats.tx_transmit_errors);
            TxFailure::TransmitError
        })
    }

    /// Queue `frame` for transmission to `node` on `queue`.
    ///
    /// On success the frame and the node reference are kept until the hardware processed the
    /// frame. They're handed back through [MacLayer::tx_complete] afterwards.
    pub fn transmit(
        &self,
        queue: TxQueue,
        mut frame: OutboundFrame,
        node: NodeRef,
    ) -> Result<(), TxFailure> {
        if self.state() != DeviceState::Running {
            return Err(TxFailure::Down(frame));
        }
        let Some(header) = FrameHeader::parse(frame.head()) else {
            Stats::bump(&self.stats.tx_transmit_errors);
            return Err(TxFailure::TransmitError);
        };
        let (mut head, head_length, ampdu_tid) = self.build_head(&header, &frame, &node);
        let mapping = self.map_payload(&mut frame, header.length)?;
        let descriptor_count = 1 + mapping.len() / 2;

        let result = locked(&self.tx_rings[queue.index()], |tx_ring| {
            let Some(tx_ring) = tx_ring.as_mut() else {
                return Err(Rejected { frame, mapping });
            };
            let Ok(start) = tx_ring.ring.try_reserve(descriptor_count) else {
                return Err(Rejected { frame, mapping });
            };
            // Sequence numbers of rejected frames would leave a hole in the block ack window.
            if let Some(tid) = ampdu_tid {
                Self::commit_sequence(&mut head, &node, tid);
            }
            self.bus
                .write_coherent(&tx_ring.heads, start * HEAD_SIZE, &head[..head_length]);

            let segments = core::iter::once(tx_ring.head_segment(start, head_length))
                .chain(mapping.iter().copied())
                .collect::<heapless::Vec<DmaSegment, { MAX_SCATTER + 1 }>>();
            let capacity = tx_ring.ring.capacity();
            let last = (start + descriptor_count - 1) % capacity;
            for (i, pair) in segments.chunks(2).enumerate() {
                let index = (start + i) % capacity;
                let mut descriptor = Descriptor {
                    sdp0: pair[0].address,
                    sdl0: pair[0].length,
                    flags: queue.qsel() << DESCRIPTOR_QSEL_SHIFT,
                    ..Default::default()
                };
                if let Some(second) = pair.get(1) {
                    descriptor.sdp1 = second.address;
                    descriptor.sdl1 = second.length;
                }
                if index == last {
                    if pair.len() == 2 {
                        descriptor.sdl1 |= SDL1_LAST_SEGMENT;
                    } else {
                        descriptor.sdl0 |= SDL0_LAST_SEGMENT;
                    }
                }
                tx_ring.ring.write_descriptor(&self.bus, index, &descriptor);
            }
            *tx_ring.ring.slot_mut(last) = Some(TxSlot {
                frame,
                node,
                mapping,
            });
            self.bus.write32(
                tx_ctx_idx(queue.index()),
                tx_ring.ring.produce_index() as u32,
            );
            Ok(())
        });
        if let Err(Rejected { frame, mapping }) = result {
            self.bus.dma_unmap(&mapping);
            Stats::bump(&self.stats.tx_ring_full[queue.index()]);
            trace!("TX ring {:?} is full.", queue);
            return Err(TxFailure::RingFull(frame));
        }
        self.tx_timer.store(TX_WATCHDOG_SECONDS, Ordering::Relaxed);
        Stats::bump(&self.stats.tx_queued);
        Ok(())
    }

    /// Send a block ack request for `tid` to `node` on the management queue.
    ///
    /// The starting sequence number is taken from the aggregation session of `tid`.
    pub fn send_bar(&self, node: &NodeRef, tid: u8) -> Result<(), TxFailure> {
        let start_sequence = node
            .aggregation_session(tid)
            .map(|session| session.next_sequence)
            .unwrap_or_default();
        let control = BAR_CONTROL_COMPRESSED | (tid as u16 & 0xf) << BAR_CONTROL_TID_SHIFT;

        let mut bar = Vec::new();
        bar.try_reserve_exact(20)
            .map_err(|_| TxFailure::OutOfMemory)?;
        bar.extend_from_slice(&[0x84, 0x00, 0x00, 0x00]);
        bar.extend_from_slice(&node.address().0);
        bar.extend_from_slice(&self.calibration.mac_address.0);
        bar.extend_from_slice(&control.to_le_bytes());
        bar.extend_from_slice(&(start_sequence << 4).to_le_bytes());
        debug!("Sending BAR for TID {} with SSN {}.", tid, start_sequence);
        self.transmit(TxQueue::Mgmt, OutboundFrame::new(bar), node.clone())
    }

    /// Put a frame into the output queue and start output.
    ///
    /// Frames in the output queue are transmitted in order. If a ring is full, output pauses
    /// until the next TX done task. If the queue is full, the frame is handed back.
    pub fn enqueue_output(
        &self,
        queue: TxQueue,
        frame: OutboundFrame,
        node: NodeRef,
    ) -> Result<(), OutboundFrame> {
        let start = locked(&self.output, |output| {
            output
                .frames
                .push_back((queue, frame, node))
                .map(|_| !output.active)
                .map_err(|(_, frame, _)| frame)
        })?;
        if start {
            self.start_output();
        }
        Ok(())
    }

    fn requeue_output(&self, entry: OutputEntry, pause: bool) {
        locked(&self.output, |output| {
            output.active |= pause;
            if output.frames.push_front(entry).is_err() {
                Stats::bump(&self.stats.tx_errors);
            }
        })
    }

    /// Transmit frames from the output queue, until it's empty or a ring is full.
    pub(crate) fn start_output(&self) {
        loop {
            let Some((queue, frame, node)) = locked(&self.output, |output| {
                if output.active {
                    None
                } else {
                    output.frames.pop_front()
                }
            }) else {
                break;
            };
            match self.transmit(queue, frame, node.clone()) {
                Ok(()) => {}
                Err(TxFailure::RingFull(frame)) => {
                    self.requeue_output((queue, frame, node), true);
                    break;
                }
                Err(TxFailure::Down(frame)) => {
                    self.requeue_output((queue, frame, node), false);
                    break;
                }
                Err(failure) => debug!("Dropped queued frame: {:?}", failure.error()),
            }
        }
    }

    /// Hand every frame in the output queue back to the MAC layer as flushed.
    pub(crate) fn flush_output(&self) {
        locked(&self.output, OutputQueue::clear_active);
        while let Some((queue, frame, node)) =
            locked(&self.output, |output| output.frames.pop_front())
        {
            self.mac
                .tx_complete(queue, frame, node, TxCompletion::Flushed);
        }
    }

    fn hand_back(&self, queue: TxQueue, slot: TxSlot, completion: TxCompletion) {
        self.bus.dma_unmap(&slot.mapping);
        self.mac
            .tx_complete(queue, slot.frame, slot.node, completion);
    }

    /// Reclaim all descriptors of `queue`, which the hardware finished.
    ///
    /// Completions are reported in ring order.
    pub(crate) fn tx_reclaim(&self, queue: TxQueue) {
        loop {
            let slot = locked(&self.tx_rings[queue.index()], |tx_ring| {
                let ring = &mut tx_ring.as_mut()?.ring;
                let dma_index = self.bus.read32(tx_dtx_idx(queue.index())) as usize % ring.capacity();
                while ring.consume_index() != dma_index && ring.queued() != 0 {
                    if let Some(slot) = ring.advance_consumer() {
                        return Some(slot);
                    }
                }
                None
            });
            let Some(slot) = slot else {
                break;
            };
            Stats::bump(&self.stats.tx_completed);
            self.hand_back(queue, slot, TxCompletion::Transmitted);
        }
    }

    /// Check if no frames are in flight on any ring.
    pub(crate) fn tx_rings_idle(&self) -> bool {
        self.tx_rings.iter().all(|tx_ring| {
            locked(tx_ring, |tx_ring| {
                tx_ring.as_ref().is_none_or(|tx_ring| tx_ring.ring.queued() == 0)
            })
        })
    }

    /// Reset `queue`, flushing every frame still in it, and program its registers.
    pub(crate) fn reset_tx_ring(&self, queue: TxQueue) {
        let index = queue.index();
        let slots = locked(&self.tx_rings[index], |tx_ring| {
            let Some(tx_ring) = tx_ring.as_mut() else {
                return Vec::new();
            };
            let slots = tx_ring.ring.reset_and_reclaim(&self.bus);
            self.bus.write32(tx_base_ptr(index), tx_ring.ring.base_address());
            self.bus
                .write32(tx_max_cnt(index), tx_ring.ring.capacity() as u32);
            self.bus.write32(tx_ctx_idx(index), 0);
            slots
        });
        if !slots.is_empty() {
            debug!("Flushing {} frames from {:?}.", slots.len(), queue);
        }
        for slot in slots {
            self.hand_back(queue, slot, TxCompletion::Flushed);
        }
    }
    pub(crate) fn reset_tx_rings(&self) {
        for queue in TxQueue::ALL {
            self.reset_tx_ring(queue);
        }
    }
    pub(crate) fn free_tx_rings(&self) {
        for queue in TxQueue::ALL {
            let slots = locked(&self.tx_rings[queue.index()], Option::take)
                .map(|tx_ring| tx_ring.free(&self.bus))
                .unwrap_or_default();
            for slot in slots {
                self.hand_back(queue, slot, TxCompletion::Flushed);
            }
        }
    }

    /// Feed the entries of the TX status FIFO into rate control.
    ///
    /// Returns `true`, if the FIFO might still hold entries.
    pub(crate) fn drain_tx_status_fifo(&self) -> bool {
        for _ in 0..TX_STATUS_FIFO_DEPTH {
            let word = self.bus.read32(TX_STA_FIFO);
            if !check_bit!(word, TX_STA_FIFO_VALID) {
                return false;
            }
            let pid = ((word >> TX_STA_FIFO_PID_SHIFT) & TX_STA_FIFO_PID_MASK) as u8;
            let wcid = ((word >> TX_STA_FIFO_WCID_SHIFT) & TX_STA_FIFO_WCID_MASK) as u8;
            let mcs = ((word >> TX_STA_FIFO_MCS_SHIFT) & TX_STA_FIFO_MCS_MASK) as u8;
            let success = check_bit!(word, TX_STA_FIFO_TX_OK);
            if success {
                Stats::bump(&self.stats.tx_packets);
            } else {
                Stats::bump(&self.stats.tx_errors);
            }
            // Frames without a packet ID don't take part in rate control.
            if pid == 0 {
                continue;
            }
            let Some(node) = locked(&self.stations, |stations| stations.get(wcid).cloned()) else {
                continue;
            };
            self.mac.rate_control_tx_status(
                &node,
                TxStatus {
                    success,
                    retries: retry_count(pid, mcs),
                    mcs,
                    aggregated: check_bit!(word, TX_STA_FIFO_AGG),
                },
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::{
        frame::tests::{data, qos_data, STA},
        node::AggregationSession,
        testing::{associated_node, device, ht_node, node, running_device},
        wi::TX_AMPDU,
    };

    fn frame(payload: u8) -> OutboundFrame {
        OutboundFrame::new(data(STA, &[payload; 8]))
    }

    #[test]
    fn ring_admission_and_headroom() {
        let device = running_device();
        let node = associated_node(&device, 1);
        for i in 0..254 {
            device.transmit(TxQueue::Ac0, frame(i as u8), node.clone()).unwrap();
        }
        let rejected = device.transmit(TxQueue::Ac0, frame(0xff), node.clone());
        assert_eq!(rejected, Err(TxFailure::RingFull(frame(0xff))));
        assert_eq!(Stats::get(&device.stats.tx_ring_full[0]), 1);
        assert_eq!(device.bus.reg(tx_ctx_idx(0)), 254);
        // A rejected frame leaves no mapping behind.
        assert_eq!(device.bus.live_mappings(), 254);

        assert_eq!(device.bus.hw_transmit(TxQueue::Ac0, 10).len(), 10);
        device.tx_reclaim(TxQueue::Ac0);
        let completions = device.mac.completions();
        assert_eq!(completions.len(), 10);
        for (i, (queue, frame, completion)) in completions.into_iter().enumerate() {
            assert_eq!(queue, TxQueue::Ac0);
            assert_eq!(frame, self::frame(i as u8));
            assert_eq!(completion, TxCompletion::Transmitted);
        }
        assert_eq!(Stats::get(&device.stats.tx_completed), 10);

        for i in 0..10 {
            device.transmit(TxQueue::Ac0, frame(i), node.clone()).unwrap();
        }
        assert!(matches!(
            device.transmit(TxQueue::Ac0, frame(0), node.clone()),
            Err(TxFailure::RingFull(_))
        ));
        // Other queues are unaffected.
        device.transmit(TxQueue::Ac1, frame(0), node).unwrap();
    }

    #[test]
    fn aggregated_qos_data_layout() {
        let device = running_device();
        let node = ht_node(&device, 3);
        node.replace_aggregation_session(
            6,
            Some(AggregationSession {
                window_size: 32,
                mpdu_density: 5,
                next_sequence: 0x123,
            }),
        );
        let payload = [0x5a; 100];
        let mpdu = qos_data(6, &payload);
        device
            .transmit(TxQueue::Ac3, OutboundFrame::new(mpdu.clone()), node.clone())
            .unwrap();
        let transmitted = device.bus.hw_transmit(TxQueue::Ac3, 1);
        let bytes = &transmitted[0];

        let txwi = TxWi::from_bytes(&bytes[..WI_SIZE]);
        assert_eq!(txwi.wcid, node.station_id());
        assert_eq!(txwi.length(), mpdu.len());
        // Rate control picked MCS 7 for the node.
        assert_eq!(txwi.pid(), packet_id(7));
        assert_eq!(txwi.flags, TX_AMPDU | 5 << 5);
        assert_eq!(txwi.xflags, TX_ACK | 32 << 2);

        let header = &bytes[WI_SIZE..WI_SIZE + 26];
        assert_eq!(u16::from_le_bytes([header[2], header[3]]), 36);
        assert_eq!(u16::from_le_bytes([header[22], header[23]]), 0x123 << 4);
        assert_eq!(header[4..22], mpdu[4..22]);
        // The header is padded to 28 bytes, the payload follows.
        assert_eq!(bytes[WI_SIZE + 28..], payload);
        assert_eq!(
            node.aggregation_session(6).map(|session| session.next_sequence),
            Some(0x124)
        );
    }

    #[test]
    fn rejected_frames_keep_their_sequence_number() {
        let device = running_device();
        let node = ht_node(&device, 3);
        node.replace_aggregation_session(
            6,
            Some(AggregationSession {
                window_size: 64,
                mpdu_density: 0,
                next_sequence: 100,
            }),
        );
        for i in 0..254 {
            device.transmit(TxQueue::Ac3, frame(i as u8), node.clone()).unwrap();
        }
        let mpdu = qos_data(6, &[0x11; 16]);
        let rejected = device.transmit(TxQueue::Ac3, OutboundFrame::new(mpdu.clone()), node.clone());
        assert!(matches!(rejected, Err(TxFailure::RingFull(_))));
        assert_eq!(
            node.aggregation_session(6).map(|session| session.next_sequence),
            Some(100)
        );

        assert_eq!(device.bus.hw_transmit(TxQueue::Ac3, 1).len(), 1);
        device.tx_reclaim(TxQueue::Ac3);
        device
            .transmit(TxQueue::Ac3, OutboundFrame::new(mpdu), node.clone())
            .unwrap();
        let transmitted = device.bus.hw_transmit(TxQueue::Ac3, 254);
        let header = &transmitted[253][WI_SIZE..];
        assert_eq!(u16::from_le_bytes([header[22], header[23]]), 100 << 4);
        assert_eq!(
            node.aggregation_session(6).map(|session| session.next_sequence),
            Some(101)
        );
    }

    #[test]
    fn multicast_and_management_frames() {
        let device = running_device();
        let node = associated_node(&device, 1);
        device
            .transmit(TxQueue::Ac1, OutboundFrame::new(data([0xff; 6], &[1; 4])), node.clone())
            .unwrap();
        let mut probe_response = vec![0x50, 0x00, 0, 0];
        probe_response.extend_from_slice(&STA);
        probe_response.extend_from_slice(&[0; 14]);
        device
            .transmit(TxQueue::Mgmt, OutboundFrame::new(probe_response), node)
            .unwrap();

        let multicast = TxWi::from_bytes(&device.bus.hw_transmit(TxQueue::Ac1, 1)[0][..WI_SIZE]);
        assert_eq!(multicast.wcid, WCID_MULTICAST);
        assert_eq!(multicast.xflags & TX_ACK, 0);
        assert_eq!(multicast.pid(), 0);

        let management = TxWi::from_bytes(&device.bus.hw_transmit(TxQueue::Mgmt, 1)[0][..WI_SIZE]);
        assert_eq!(management.wcid, WCID_NONE);
        assert_ne!(management.flags & TX_TS, 0);
        assert_ne!(management.xflags & TX_ACK, 0);
        assert_ne!(management.xflags & TX_NSEQ, 0);
    }

    #[test]
    fn fragmented_frame_is_linearized_once() {
        let device = running_device();
        let node = associated_node(&device, 1);
        device.bus.set_max_segments(2);
        let fragments = vec![data(STA, &[1]), vec![2, 3], vec![4], vec![5, 6]];
        device
            .transmit(TxQueue::Ac0, OutboundFrame::from_fragments(fragments), node.clone())
            .unwrap();
        assert_eq!(Stats::get(&device.stats.tx_defrag), 1);
        let transmitted = device.bus.hw_transmit(TxQueue::Ac0, 1);
        assert_eq!(transmitted[0][WI_SIZE + 24..], [1, 2, 3, 4, 5, 6]);

        device.bus.set_max_segments(0);
        let fragments = vec![data(STA, &[1]), vec![2]];
        assert_eq!(
            device.transmit(TxQueue::Ac0, OutboundFrame::from_fragments(fragments), node),
            Err(TxFailure::TransmitError)
        );
        assert_eq!(Stats::get(&device.stats.tx_defrag), 2);
        assert_eq!(Stats::get(&device.stats.tx_transmit_errors), 1);
    }

    #[test]
    fn many_segments_are_packed_in_pairs() {
        let device = running_device();
        let node = associated_node(&device, 1);
        let fragments = vec![data(STA, &[1]), vec![2], vec![3], vec![4]];
        device
            .transmit(TxQueue::Ac2, OutboundFrame::from_fragments(fragments), node)
            .unwrap();
        // Head and four payload segments take three descriptors.
        assert_eq!(device.bus.reg(tx_ctx_idx(TxQueue::Ac2.index())), 3);
        let transmitted = device.bus.hw_transmit(TxQueue::Ac2, 1);
        assert_eq!(transmitted[0][WI_SIZE + 24..], [1, 2, 3, 4]);
    }

    #[test]
    fn mapping_failure_drops_the_frame() {
        let device = running_device();
        let node = associated_node(&device, 1);
        device.bus.fail_mappings(1);
        assert_eq!(
            device.transmit(TxQueue::Ac0, frame(0), node.clone()),
            Err(TxFailure::OutOfMemory)
        );
        assert_eq!(Stats::get(&device.stats.tx_out_of_memory), 1);
        assert_eq!(device.bus.live_mappings(), 0);
        device.transmit(TxQueue::Ac0, frame(0), node).unwrap();
    }

    #[test]
    fn invalid_header_is_rejected() {
        let device = running_device();
        let node = associated_node(&device, 1);
        assert_eq!(
            device.transmit(TxQueue::Ac0, OutboundFrame::new(vec![0x08, 0x02]), node),
            Err(TxFailure::TransmitError)
        );
    }

    #[test]
    fn stopped_device_hands_frames_back() {
        let device = device();
        let node = node(1, false);
        let failure = device.transmit(TxQueue::Ac0, frame(1), node).unwrap_err();
        assert_eq!(failure.error(), TxError::Down);
        assert_eq!(failure.into_frame(), Some(frame(1)));
    }

    #[test]
    fn status_fifo_feeds_rate_control() {
        let device = running_device();
        let node = associated_node(&device, 4);
        let word = |pid: u32, ok: bool, wcid: u32, mcs: u32| {
            TX_STA_FIFO_VALID
                | pid << TX_STA_FIFO_PID_SHIFT
                | if ok { TX_STA_FIFO_TX_OK } else { 0 }
                | wcid << TX_STA_FIFO_WCID_SHIFT
                | mcs << TX_STA_FIFO_MCS_SHIFT
        };
        device.bus.push_tx_status(word(8, true, 4, 5));
        device.bus.push_tx_status(word(0, true, 4, 0));
        device.bus.push_tx_status(word(3, false, 4, 2));
        device.bus.push_tx_status(word(3, true, 99, 2));
        assert!(!device.drain_tx_status_fifo());

        assert_eq!(Stats::get(&device.stats.tx_packets), 3);
        assert_eq!(Stats::get(&device.stats.tx_errors), 1);
        let statuses = device.mac.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].0, node.address());
        assert_eq!(
            statuses[0].1,
            TxStatus {
                success: true,
                retries: 2,
                mcs: 5,
                aggregated: false
            }
        );
        assert!(!statuses[1].1.success);
    }

    #[test]
    fn status_fifo_drain_is_bounded() {
        let device = running_device();
        for _ in 0..20 {
            device.bus.push_tx_status(TX_STA_FIFO_VALID | TX_STA_FIFO_TX_OK);
        }
        assert!(device.drain_tx_status_fifo());
        assert_eq!(Stats::get(&device.stats.tx_packets), 16);
        assert!(!device.drain_tx_status_fifo());
    }

    #[test]
    fn block_ack_request() {
        let device = running_device();
        let node = ht_node(&device, 2);
        node.replace_aggregation_session(
            3,
            Some(AggregationSession {
                window_size: 64,
                mpdu_density: 0,
                next_sequence: 42,
            }),
        );
        device.send_bar(&node, 3).unwrap();
        let bar = &device.bus.hw_transmit(TxQueue::Mgmt, 1)[0];
        let txwi = TxWi::from_bytes(&bar[..WI_SIZE]);
        assert_eq!(txwi.length(), 20);
        let bar = &bar[WI_SIZE..];
        assert_eq!(bar[0], 0x84);
        assert_eq!(bar[4..10], node.address().0);
        assert_eq!(u16::from_le_bytes([bar[16], bar[17]]), 3 << 12 | 1 << 2);
        assert_eq!(u16::from_le_bytes([bar[18], bar[19]]), 42 << 4);
    }

    #[test]
    fn output_queue_pauses_while_ring_is_full() {
        let device = running_device();
        let node = associated_node(&device, 1);
        for i in 0..254 {
            device.transmit(TxQueue::Ac0, frame(i as u8), node.clone()).unwrap();
        }
        device.enqueue_output(TxQueue::Ac0, frame(1), node.clone()).unwrap();
        device.enqueue_output(TxQueue::Ac1, frame(2), node.clone()).unwrap();
        assert!(locked(&device.output, |output| output.is_active()));
        assert_eq!(locked(&device.output, |output| output.len()), 2);

        device.bus.hw_transmit(TxQueue::Ac0, 1);
        device.tx_reclaim(TxQueue::Ac0);
        locked(&device.output, OutputQueue::clear_active);
        device.start_output();
        assert_eq!(locked(&device.output, |output| output.len()), 0);
        assert_eq!(device.bus.reg(tx_ctx_idx(1)), 1);
    }

    #[test]
    fn reset_flushes_outstanding_frames() {
        let device = running_device();
        let node = associated_node(&device, 1);
        for i in 0..3 {
            device.transmit(TxQueue::Hcca, frame(i), node.clone()).unwrap();
        }
        device.reset_tx_ring(TxQueue::Hcca);
        let completions = device.mac.completions();
        assert_eq!(completions.len(), 3);
        assert!(completions
            .iter()
            .all(|(_, _, completion)| *completion == TxCompletion::Flushed));
        assert_eq!(device.bus.live_mappings(), 0);
        assert!(device.tx_rings_idle());
        assert_eq!(device.bus.reg(tx_ctx_idx(TxQueue::Hcca.index())), 0);
    }
}
