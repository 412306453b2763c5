//! The hardware station table.
//!
//! The RT2860 identifies peers by a wireless client ID (WCID), which indexes a table of MAC
//! addresses in the MAC. Slot `0` is reserved, `1..=253` are handed out to associated nodes,
//! `254` is used for multicast and `255` means "no station".

use core::{array, sync::atomic::Ordering};

use ieee80211::macro_bits::{bit, check_bit};
use portable_atomic::AtomicU32;

use crate::{
    bus::Bus,
    device::{Device, DeviceError},
    io::RegisterIo,
    locked,
    mac::MacLayer,
    node::{AggregationSession, NodeRef, TID_COUNT},
    regs::{wcid_entry, wcid_rx_ba_bit},
    stats::Stats,
    tx::TxError,
};

/// The reserved WCID.
pub(crate) const WCID_RESERVED: u8 = 0;
/// The WCID used for multicast frames.
pub(crate) const WCID_MULTICAST: u8 = 254;
/// The WCID of frames, which don't belong to any station.
pub(crate) const WCID_NONE: u8 = 255;

/// Hands out WCIDs first fit.
pub(crate) struct StationIdAllocator {
    /// A bit mask indicating, which IDs are taken.
    used: [u32; 8],
}
impl StationIdAllocator {
    pub const fn new() -> Self {
        let mut used = [0u32; 8];
        used[0] = bit!(WCID_RESERVED);
        used[7] = bit!(WCID_MULTICAST % 32) | bit!(WCID_NONE % 32);
        Self { used }
    }
    fn is_used(&self, id: u8) -> bool {
        check_bit!(self.used[id as usize / 32], bit!(id % 32))
    }
    fn mark_used(&mut self, id: u8) {
        self.used[id as usize / 32] |= bit!(id % 32);
    }
    /// Allocate a station ID.
    ///
    /// `preferred` is taken if it's free, otherwise the lowest free ID is returned.
    pub fn allocate_station_id(&mut self, preferred: u8) -> Option<u8> {
        let id = if !self.is_used(preferred) {
            preferred
        } else {
            (1..WCID_MULTICAST).find(|id| !self.is_used(*id))?
        };
        self.mark_used(id);
        Some(id)
    }
    /// Release a station ID.
    ///
    /// The reserved IDs can't be released.
    pub fn release_station_id(&mut self, id: u8) {
        if matches!(id, WCID_RESERVED | WCID_MULTICAST | WCID_NONE) {
            return;
        }
        self.used[id as usize / 32] &= !bit!(id % 32);
    }
}

/// The station table, which maps WCIDs to nodes.
pub(crate) struct StationTable {
    allocator: StationIdAllocator,
    nodes: [Option<NodeRef>; 256],
}
impl StationTable {
    pub fn new() -> Self {
        Self {
            allocator: StationIdAllocator::new(),
            nodes: array::from_fn(|_| None),
        }
    }
    /// Enter `node` into the table.
    ///
    /// Returns the WCID assigned to the node.
    pub fn insert(&mut self, node: NodeRef) -> Option<u8> {
        let id = self
            .allocator
            .allocate_station_id((node.association_id() & 0xff) as u8)?;
        node.set_station_id(id);
        self.nodes[id as usize] = Some(node);
        Some(id)
    }
    /// Remove the node with `id` from the table.
    pub fn remove(&mut self, id: u8) -> Option<NodeRef> {
        let node = self.nodes.get_mut(id as usize)?.take()?;
        self.allocator.release_station_id(id);
        node.set_station_id(WCID_NONE);
        Some(node)
    }
    pub fn get(&self, id: u8) -> Option<&NodeRef> {
        self.nodes[id as usize].as_ref()
    }
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.iter().flatten()
    }
}

impl<B: Bus, M: MacLayer> Device<B, M> {
    fn write_station_entry(&self, id: u8, address: [u8; 6]) {
        let entry = wcid_entry(id);
        self.bus.write32(
            entry,
            u32::from_le_bytes([address[0], address[1], address[2], address[3]]),
        );
        self.bus
            .write32(entry + 4, u32::from_le_bytes([address[4], address[5], 0, 0]));
    }

    /// Enter `node` into the hardware station table.
    ///
    /// The WCID is chosen from the association ID, if possible. Returns the assigned WCID.
    pub fn associate_node(&self, node: NodeRef) -> Result<u8, DeviceError> {
        let address = node.address().0;
        let id = locked(&self.stations, |stations| stations.insert(node))
            .ok_or(DeviceError::StationTableFull)?;
        self.write_station_entry(id, address);
        debug!("Node got WCID {}.", id);
        Ok(id)
    }

    /// Remove `node` from the hardware station table and end all of its aggregation sessions.
    pub fn disassociate_node(&self, node: &NodeRef) {
        let id = node.station_id();
        if id == WCID_NONE {
            return;
        }
        for tid in 0..TID_COUNT as u8 {
            self.ampdu_tx_stop(node, tid);
        }
        let rx_sessions = (self.bus.read32(wcid_entry(id) + 4) >> 16).count_ones();
        for _ in 0..rx_sessions {
            self.close_session(&self.ampdu_rx_sessions);
        }
        locked(&self.stations, |stations| stations.remove(id));
        self.write_station_entry(id, [0; 6]);
    }

    fn session_violation(&self) {
        warn!("Closing an aggregation session, while none is open.");
        Stats::bump(&self.stats.ampdu_session_violations);
    }
    /// Decrement a session counter, without letting it go negative.
    fn close_session(&self, counter: &AtomicU32) {
        if counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .is_err()
        {
            self.session_violation();
        }
    }

    /// The amount of open transmit and receive aggregation sessions.
    pub fn aggregation_session_counts(&self) -> (u32, u32) {
        (
            self.ampdu_tx_sessions.load(Ordering::Relaxed),
            self.ampdu_rx_sessions.load(Ordering::Relaxed),
        )
    }

    /// Accept A-MPDUs from `node` for `tid`.
    ///
    /// Starting a session, which is already open, does nothing.
    pub fn ampdu_rx_start(&self, node: &NodeRef, tid: u8) -> Result<(), DeviceError> {
        let id = node.station_id();
        if id == WCID_NONE || tid as usize >= TID_COUNT {
            return Err(DeviceError::InvalidState);
        }
        let entry = wcid_entry(id) + 4;
        if self.bus.read32(entry) & wcid_rx_ba_bit(tid) != 0 {
            return Ok(());
        }
        self.bus.set32(entry, wcid_rx_ba_bit(tid));
        self.ampdu_rx_sessions.fetch_add(1, Ordering::AcqRel);
        debug!("Started RX aggregation for TID {} on WCID {}.", tid, id);
        Ok(())
    }
    /// Stop accepting A-MPDUs from `node` for `tid`.
    pub fn ampdu_rx_stop(&self, node: &NodeRef, tid: u8) {
        let id = node.station_id();
        if id == WCID_NONE || tid as usize >= TID_COUNT {
            self.session_violation();
            return;
        }
        let entry = wcid_entry(id) + 4;
        if self.bus.read32(entry) & wcid_rx_ba_bit(tid) == 0 {
            self.session_violation();
            return;
        }
        self.bus.clear32(entry, wcid_rx_ba_bit(tid));
        self.close_session(&self.ampdu_rx_sessions);
    }

    /// Start transmitting A-MPDUs to `node` for `tid` and send the initial block ack request.
    pub fn ampdu_tx_start(
        &self,
        node: &NodeRef,
        tid: u8,
        window_size: u8,
        start_sequence: u16,
    ) -> Result<(), TxError> {
        if !node.ht_capabilities().ht || tid as usize >= TID_COUNT {
            return Err(TxError::TransmitError);
        }
        let session = AggregationSession {
            window_size,
            mpdu_density: node.ht_capabilities().mpdu_density,
            next_sequence: start_sequence & 0xfff,
        };
        if node.replace_aggregation_session(tid, Some(session)).is_none() {
            self.ampdu_tx_sessions.fetch_add(1, Ordering::AcqRel);
        }
        self.send_bar(node, tid).map_err(|failure| failure.error())
    }
    /// End the transmit aggregation session of `node` for `tid`.
    pub fn ampdu_tx_stop(&self, node: &NodeRef, tid: u8) {
        if node.replace_aggregation_session(tid, None).is_some() {
            self.close_session(&self.ampdu_tx_sessions);
        }
    }
}
