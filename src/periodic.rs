//! Periodic maintenance.
//!
//! The periodic task runs every 100 ms and drains the TX status FIFO. Every tenth run it also
//! updates the hardware counters, flushes stuck hardware queues, retunes the receiver gain and
//! lets rate control update every node. The TX watchdog ticks once a second and resets the
//! device, once it expires.

use core::sync::atomic::Ordering;

use alloc::vec::Vec;

use crate::{
    bus::Bus,
    device::{Device, DeviceError, DeviceState},
    io::RegisterIo,
    locked,
    mac::MacLayer,
    regs::*,
    stats::Stats,
    task::{Task, TaskResult},
};

/// Periodic rounds per second.
pub(crate) const ROUNDS_PER_SECOND: u32 = 10;
/// How many consecutive checks a hardware queue has to be non empty, before it's flushed.
const STUCK_QUEUE_CHECKS: u8 = 2;
/// The average RSSI in dBm, above which the receiver gain is lowered.
const R66_HIGH_RSSI_THRESHOLD: i32 = -70;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PeriodicState {
    round: u32,
    /// Consecutive checks, in which the TX0 and TX1 hardware queues weren't empty.
    queue_not_empty: [u8; 2],
    /// Exponential moving average of the RSSI of frames from our BSS, in dBm.
    pub average_rssi: Option<i32>,
    /// The value last written to R66.
    pub r66: Option<u8>,
}
impl PeriodicState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Compute the receiver gain for the given channel and average signal strength.
pub(crate) fn r66_value(channel: u8, average_rssi: i32, lna: &[i8; 4]) -> u8 {
    let mut value = if channel <= 14 {
        0x2e + lna[0] as i32
    } else {
        let lna = match channel {
            0..=64 => lna[1],
            65..=128 => lna[2],
            _ => lna[3],
        };
        0x32 + lna as i32 * 5 / 3
    };
    if average_rssi > R66_HIGH_RSSI_THRESHOLD {
        value += 0x10;
    }
    value.clamp(0, u8::MAX as i32) as u8
}

impl<B: Bus, M: MacLayer> Device<B, M> {
    /// Feed the RSSI of a frame from our BSS into the average.
    pub(crate) fn update_average_rssi(&self, rssi_dbm: i8) {
        locked(&self.periodic, |periodic| {
            let sample = rssi_dbm as i32;
            periodic.average_rssi = Some(
                periodic
                    .average_rssi
                    .map_or(sample, |average| (average * 7 + sample) / 8),
            );
        });
    }

    pub(crate) fn periodic_task(&self) -> TaskResult {
        if self.state() != DeviceState::Running {
            return TaskResult::Done;
        }
        self.drain_tx_status_fifo();
        let once_a_second = locked(&self.periodic, |periodic| {
            periodic.round = periodic.round.wrapping_add(1);
            periodic.round % ROUNDS_PER_SECOND == 0
        });
        if once_a_second {
            self.update_hw_counters();
            self.flush_stuck_queues();
            if let Err(err) = self.tune_r66() {
                warn!("Failed to tune R66: {:?}", err);
            }
            self.update_rates();
        }
        TaskResult::Done
    }

    /// Accumulate the read to clear hardware counters into the stats.
    fn update_hw_counters(&self) {
        let stats = &self.stats;
        for (offset, low, high) in [
            (RX_STA_CNT0, &stats.hw_rx_crc_errors, &stats.hw_rx_phy_errors),
            (RX_STA_CNT1, &stats.hw_false_cca, &stats.hw_plcp_errors),
            (RX_STA_CNT2, &stats.hw_rx_duplicates, &stats.hw_rx_fifo_overflows),
            (TX_STA_CNT0, &stats.hw_tx_failures, &stats.hw_tx_beacons),
            (TX_STA_CNT1, &stats.hw_tx_successes, &stats.hw_tx_retries),
            (TX_STA_CNT2, &stats.hw_tx_zero_length, &stats.hw_tx_underflows),
        ] {
            let (low_count, high_count) = self.bus.read_counter_pair(offset);
            Stats::add(low, low_count);
            Stats::add(high, high_count);
        }
    }

    /// Flush the TX0 and TX1 hardware queues, if they stayed non empty for too long.
    fn flush_stuck_queues(&self) {
        let counts = self.bus.read32(PBF_TXRXQ_PCNT);
        let stuck = locked(&self.periodic, |periodic| {
            let mut stuck = [false; 2];
            for (i, shift) in [TX0Q_PCNT_SHIFT, TX1Q_PCNT_SHIFT].into_iter().enumerate() {
                if (counts >> shift) & QUEUE_PCNT_MASK == 0 {
                    periodic.queue_not_empty[i] = 0;
                    continue;
                }
                periodic.queue_not_empty[i] += 1;
                if periodic.queue_not_empty[i] >= STUCK_QUEUE_CHECKS {
                    periodic.queue_not_empty[i] = 0;
                    stuck[i] = true;
                }
            }
            stuck
        });
        for (flush, value) in stuck
            .into_iter()
            .zip([PBF_CFG_FLUSH_TX0Q, PBF_CFG_FLUSH_TX1Q])
        {
            if flush {
                warn!("Flushing stuck hardware queue, counts: {:#x}.", counts);
                self.bus.write32(PBF_CFG, value);
                self.bus.write32(PBF_CFG, PBF_CFG_DEFAULT);
                Stats::bump(&self.stats.queue_flushes);
            }
        }
    }

    /// Adjust the receiver gain to the average signal strength.
    fn tune_r66(&self) -> Result<(), DeviceError> {
        let channel = self.channel();
        let Some(value) = locked(&self.periodic, |periodic| {
            let value = r66_value(channel, periodic.average_rssi?, &self.calibration.lna);
            (periodic.r66 != Some(value)).then_some(value)
        }) else {
            return Ok(());
        };
        debug!("Setting R66 to {:#x}.", value);
        self.bus.bbp_write(BBP_R66, value)?;
        locked(&self.periodic, |periodic| periodic.r66 = Some(value));
        Ok(())
    }

    /// Let rate control update every node in the station table.
    fn update_rates(&self) {
        let nodes = locked(&self.stations, |stations| {
            stations.nodes().cloned().collect::<Vec<_>>()
        });
        for node in nodes {
            self.mac.rate_control_update(&node);
        }
    }

    /// Queue the periodic task, if the timers are armed.
    pub(crate) fn periodic_tick(&self) {
        if self.timers_armed.load(Ordering::Acquire) {
            self.enqueue_task(Task::Periodic);
        }
    }

    /// Advance the TX watchdog by a second.
    ///
    /// If frames were in flight without completions for too long, the device is restarted.
    pub(crate) fn watchdog_tick(&self) {
        if !self.timers_armed.load(Ordering::Acquire) {
            return;
        }
        let expired = self
            .tx_timer
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |timer| timer.checked_sub(1))
            .is_ok_and(|previous| previous == 1);
        if !expired {
            return;
        }
        error!("TX watchdog expired, restarting the device.");
        Stats::bump(&self.stats.tx_timeouts);
        if let Err(err) = self.restart() {
            error!("Restart after TX timeout failed: {:?}", err);
        }
    }
}
