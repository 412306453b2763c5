//! The receive path.
//!
//! Every RX descriptor always owns a mapped buffer. Once the hardware filled one, the buffer is
//! swapped with a fresh one, before the descriptor is handed back. If no replacement can be
//! allocated, the received frame is dropped and the old buffer stays in place, so the ring never
//! runs dry.

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use ieee80211::macro_bits::{bit, check_bit};

use crate::{
    bus::{Bus, DmaSegment},
    config::Calibration,
    device::Device,
    frame::{FrameHeader, RxFrame, RxInfo, FC1_PROTECTED},
    locked,
    mac::{MacLayer, RxTarget},
    regs::*,
    ring::{Descriptor, Ring, RingError},
    stats::Stats,
    wi::{RxWi, WI_SIZE},
    RX_BUFFER_SIZE, RX_RING_COUNT,
};

// RX descriptor flags.
pub(crate) const RX_MYBSS: u32 = bit!(7);
pub(crate) const RX_CRC_ERR: u32 = bit!(8);
pub(crate) const RX_CIPHER_ERR_SHIFT: u32 = 9;
pub(crate) const RX_AMSDU: u32 = bit!(11);
pub(crate) const RX_L2PAD: u32 = bit!(14);
pub(crate) const RX_AMPDU: u32 = bit!(15);
pub(crate) const RX_DECRYPTED: u32 = bit!(16);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The decryption status reported in the RX descriptor.
enum CipherStatus {
    Ok,
    Icv,
    Mic,
    InvalidKey,
}
impl CipherStatus {
    const fn from_flags(flags: u32) -> Self {
        match (flags >> RX_CIPHER_ERR_SHIFT) & 0x3 {
            0 => Self::Ok,
            1 => Self::Icv,
            2 => Self::Mic,
            _ => Self::InvalidKey,
        }
    }
}

/// The noise floor reported to the MAC layer in dBm.
pub(crate) const NOISE_FLOOR: i8 = -95;
/// The signal strength reported for a chain, which didn't receive anything.
const RSSI_NONE_DBM: i8 = -99;

/// A buffer owned by the RX ring.
pub(crate) struct RxSlot {
    buffer: Vec<u8>,
    segment: DmaSegment,
}
impl RxSlot {
    fn allocate<B: Bus + ?Sized>(bus: &B) -> Option<Self> {
        let mut buffer = bus.alloc_buffer(RX_BUFFER_SIZE)?;
        let segment = bus.dma_map_rx(&mut buffer).ok()?;
        Some(Self { buffer, segment })
    }
    fn discard<B: Bus + ?Sized>(self, bus: &B) {
        bus.dma_unmap(&[self.segment]);
    }
    fn descriptor(&self) -> Descriptor {
        Descriptor {
            sdp0: self.segment.address,
            sdl0: RX_BUFFER_SIZE as u16,
            ..Default::default()
        }
    }
}

/// Allocate the RX ring and a buffer for every descriptor.
pub(crate) fn allocate_rx_ring<B: Bus + ?Sized>(bus: &B) -> Result<Ring<RxSlot>, RingError> {
    let mut ring = Ring::allocate(bus, RX_RING_COUNT)?;
    for index in 0..ring.capacity() {
        let Some(slot) = RxSlot::allocate(bus) else {
            error!("Couldn't allocate RX buffer {}.", index);
            free_rx_ring(bus, ring);
            return Err(RingError::OutOfMemory);
        };
        ring.write_descriptor(bus, index, &slot.descriptor());
        *ring.slot_mut(index) = Some(slot);
    }
    Ok(ring)
}

pub(crate) fn free_rx_ring<B: Bus + ?Sized>(bus: &B, ring: Ring<RxSlot>) {
    for slot in ring.free(bus) {
        slot.discard(bus);
    }
}

/// The outcome of taking one descriptor from the RX ring.
enum RxStep {
    /// No more descriptors were completed by the hardware.
    Empty,
    /// The frame was received into the buffer.
    Received(Vec<u8>, Descriptor),
    /// The frame was dropped, because no replacement buffer was available.
    Dropped,
}

/// Convert the raw RSSI of `chain` to dBm.
pub(crate) fn rssi_to_dbm(raw: u8, chain: usize, channel: u8, calibration: &Calibration) -> i8 {
    if raw == 0 {
        return RSSI_NONE_DBM;
    }
    let chain = chain.min(2);
    let delta = if channel > 14 {
        let sub_band = match channel {
            0..=64 => 1,
            65..=128 => 2,
            _ => 3,
        };
        calibration.rssi_5ghz[chain] as i32 - calibration.lna[sub_band] as i32
    } else {
        calibration.rssi_2ghz[chain] as i32 - calibration.lna[0] as i32
    };
    (-12 - delta - raw as i32).clamp(i8::MIN as i32, i8::MAX as i32) as i8
}

/// The signal strength above the noise floor in units of 0.5 dB.
pub(crate) fn relative_rssi(dbm: i8) -> u8 {
    (2 * (dbm as i32 - NOISE_FLOOR as i32)).clamp(0, 127) as u8
}

impl<B: Bus, M: MacLayer> Device<B, M> {
    /// Hand the current descriptor back to the hardware, receiving into `spare` if possible.
    fn take_rx_descriptor(&self, spare: &mut Option<RxSlot>) -> RxStep {
        locked(&self.rx_ring, |ring| {
            let Some(ring) = ring.as_mut() else {
                return RxStep::Empty;
            };
            let index = ring.consume_index();
            let dma_index = self.bus.read32(RX_DRX_IDX) as usize % ring.capacity();
            if index == dma_index {
                return RxStep::Empty;
            }
            let completed = ring.read_descriptor(&self.bus, index);
            if !completed.is_done() {
                return RxStep::Empty;
            }

            let (step, descriptor) = match (spare.take(), ring.slot_mut(index).as_mut()) {
                (Some(replacement), Some(slot)) => {
                    self.bus.dma_sync_for_cpu(&slot.segment, &mut slot.buffer);
                    self.bus.dma_unmap(&[slot.segment]);
                    let descriptor = replacement.descriptor();
                    let received = core::mem::replace(slot, replacement);
                    (RxStep::Received(received.buffer, completed), descriptor)
                }
                (replacement, slot) => {
                    *spare = replacement;
                    let descriptor = slot.map(|slot| slot.descriptor()).unwrap_or(Descriptor {
                        sdl0: RX_BUFFER_SIZE as u16,
                        ..completed
                    });
                    (RxStep::Dropped, descriptor)
                }
            };
            // Writing the length clears the done flag.
            ring.write_descriptor(&self.bus, index, &descriptor);
            ring.advance_cursor();
            step
        })
    }

    /// Process up to `limit` received frames.
    ///
    /// Returns `true` if the limit was exhausted.
    pub(crate) fn receive_batch(&self, limit: usize) -> bool {
        let promiscuous = self.config().promiscuous;
        let mut spare = None;
        let mut remaining = limit;
        while remaining > 0 {
            if spare.is_none() {
                spare = RxSlot::allocate(&self.bus);
            }
            match self.take_rx_descriptor(&mut spare) {
                RxStep::Empty => break,
                RxStep::Received(buffer, descriptor) => {
                    self.process_rx(buffer, descriptor.flags, promiscuous)
                }
                RxStep::Dropped => {
                    Stats::bump(&self.stats.rx_alloc_failures);
                    Stats::bump(&self.stats.rx_dropped);
                }
            }
            remaining -= 1;
        }
        if let Some(spare) = spare {
            spare.discard(&self.bus);
        }
        locked(&self.rx_ring, |ring| {
            if let Some(ring) = ring.as_ref() {
                let capacity = ring.capacity();
                self.bus.write32(
                    RX_CALC_IDX,
                    ((ring.consume_index() + capacity - 1) % capacity) as u32,
                );
            }
        });
        remaining == 0
    }

    fn drop_rx(&self, counter: &portable_atomic::AtomicU32) {
        Stats::bump(counter);
        Stats::bump(&self.stats.rx_dropped);
    }

    /// Validate a received frame and hand it to the MAC layer.
    fn process_rx(&self, mut buffer: Vec<u8>, flags: u32, promiscuous: bool) {
        let Some(wi) = buffer.first_chunk::<WI_SIZE>() else {
            self.drop_rx(&self.stats.rx_length_errors);
            return;
        };
        let rxwi = RxWi::from_bytes(wi);
        let padded = check_bit!(flags, RX_L2PAD);
        let length = rxwi.length() + if padded { 2 } else { 0 };
        if WI_SIZE + length > buffer.len() {
            self.drop_rx(&self.stats.rx_length_errors);
            return;
        }
        buffer.truncate(WI_SIZE + length);
        buffer.drain(..WI_SIZE);
        let mut data = buffer;

        let Some(header) = FrameHeader::parse(&data) else {
            self.drop_rx(&self.stats.rx_length_errors);
            return;
        };
        if padded {
            if data.len() < header.length + 2 {
                self.drop_rx(&self.stats.rx_length_errors);
                return;
            }
            data.drain(header.length..header.length + 2);
        }

        let crc_error = check_bit!(flags, RX_CRC_ERR);
        if crc_error {
            trace!("Received frame with FCS error.");
            if !promiscuous {
                self.drop_rx(&self.stats.rx_crc_errors);
                return;
            }
            Stats::bump(&self.stats.rx_crc_errors);
        }

        let mut decrypted = false;
        let mut cipher_error = false;
        if header.is_protected() && check_bit!(flags, RX_DECRYPTED) {
            match CipherStatus::from_flags(flags) {
                CipherStatus::Ok => {
                    data[1] &= !FC1_PROTECTED;
                    decrypted = true;
                }
                CipherStatus::Mic => {
                    Stats::bump(&self.stats.rx_mic_failures);
                    cipher_error = true;
                    if check_bit!(flags, RX_MYBSS) {
                        let node = header
                            .transmitter
                            .and_then(|address| self.mac.find_node(&address));
                        // The key ID is in the top bits of the fourth IV byte.
                        let key_index = data.get(header.length + 3).map_or(0, |byte| byte >> 6);
                        warn!("Michael MIC failure, key index {}.", key_index);
                        self.mac.notify_mic_failure(node.as_ref(), &data, key_index);
                    }
                }
                CipherStatus::Icv | CipherStatus::InvalidKey => {
                    Stats::bump(&self.stats.rx_cipher_errors);
                    cipher_error = true;
                }
            }
            if cipher_error && !promiscuous {
                Stats::bump(&self.stats.rx_dropped);
                return;
            }
        }
        if header.is_protected() && !decrypted && !cipher_error {
            if !promiscuous {
                self.drop_rx(&self.stats.rx_undecrypted);
                return;
            }
            Stats::bump(&self.stats.rx_undecrypted);
        }

        let ampdu = check_bit!(flags, RX_AMPDU);
        if ampdu && header.is_retry() {
            Stats::bump(&self.stats.rx_ampdu_retries);
        }

        let channel = self.channel.load(Ordering::Relaxed);
        let chains = (self.config().rx_chains as usize).clamp(1, rxwi.rssi.len());
        let (chain, raw) = rxwi.rssi[..chains]
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0), |best, (chain, raw)| if raw > best.1 { (chain, raw) } else { best });
        let rssi_dbm = rssi_to_dbm(raw, chain, channel, &self.calibration);
        if check_bit!(flags, RX_MYBSS) {
            self.update_average_rssi(rssi_dbm);
        }

        let info = RxInfo {
            rssi_dbm,
            phy_mode: rxwi.phy_mode(),
            mcs: rxwi.mcs(),
            bandwidth_40: rxwi.bandwidth_40(),
            short_gi: rxwi.short_gi(),
            stbc: rxwi.stbc(),
            snr: rxwi.snr,
            channel,
            tid: rxwi.tid(),
            sequence: rxwi.sequence(),
            fragment: rxwi.fragment(),
            decrypted,
            ampdu,
            amsdu: check_bit!(flags, RX_AMSDU),
            crc_error,
            cipher_error,
        };
        let target = header
            .transmitter
            .and_then(|address| self.mac.find_node(&address))
            .map_or(RxTarget::Broadcast, RxTarget::Node);
        Stats::bump(&self.stats.rx_packets);
        self.mac.deliver_frame(
            target,
            RxFrame::new(data, info),
            relative_rssi(rssi_dbm),
            NOISE_FLOOR,
        );
    }

    /// Reset the RX ring and program its registers.
    ///
    /// The buffers stay in place.
    pub(crate) fn reset_rx_ring(&self) {
        locked(&self.rx_ring, |ring| {
            let Some(ring) = ring.as_mut() else {
                return;
            };
            ring.reset_in_place(&self.bus);
            let capacity = ring.capacity();
            self.bus.write32(RX_BASE_PTR, ring.base_address());
            self.bus.write32(RX_MAX_CNT, capacity as u32);
            self.bus.write32(RX_CALC_IDX, (capacity - 1) as u32);
        })
    }
}
