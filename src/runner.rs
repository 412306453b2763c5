//! This module implements the background runner of the device.
//!
//! The runner is the deferred task worker. It waits for tasks to be queued and drives the
//! periodic and watchdog timers.

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Ticker};

use crate::{
    bus::Bus,
    device::Device,
    mac::MacLayer,
    periodic::ROUNDS_PER_SECOND,
};

/// The interval of the periodic task.
const PERIODIC_INTERVAL: Duration = Duration::from_millis(1000 / ROUNDS_PER_SECOND as u64);

/// The background runner of a [Device].
pub struct DeviceRunner<'d, B, M> {
    device: &'d Device<B, M>,
    ticks: u32,
}
impl<'d, B: Bus, M: MacLayer> DeviceRunner<'d, B, M> {
    pub(crate) fn new(device: &'d Device<B, M>) -> Self {
        Self { device, ticks: 0 }
    }
    fn tick(&mut self) {
        self.device.periodic_tick();
        self.ticks += 1;
        if self.ticks == ROUNDS_PER_SECOND {
            self.ticks = 0;
            self.device.watchdog_tick();
        }
    }
    /// Run the background task.
    ///
    /// This has to be polled continuously for the data path to work.
    pub async fn run(&mut self) -> ! {
        debug!("RT2860 runner active.");
        let mut ticker = Ticker::every(PERIODIC_INTERVAL);
        loop {
            if let Either::Second(()) = select(self.device.task_signal.wait(), ticker.next()).await
            {
                self.tick();
            }
            self.device.run_tasks();
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;
    use embassy_time::Timer;

    use super::*;
    use crate::{
        regs::INT_RX_DONE,
        stats::Stats,
        testing::{hw_receive_data, running_device},
    };

    #[test]
    fn runner_drives_tasks_and_timers() {
        let device = running_device();
        hw_receive_data(&device, &[1]);
        device.bus.raise_interrupt(INT_RX_DONE);
        device.handle_interrupt();
        device.bus.set_reg(crate::regs::RX_STA_CNT0, 7);

        let mut runner = device.runner();
        block_on(select(runner.run(), Timer::after_millis(1500)));

        assert_eq!(device.mac.deliveries().len(), 1);
        // At least one second passed, so the counters were read.
        assert_eq!(Stats::get(&device.stats.hw_rx_crc_errors), 7);
        assert!(device.tasks.is_empty());
    }

    #[test]
    fn ticks_drive_the_watchdog_once_a_second() {
        let device = running_device();
        let mut runner = device.runner();
        device.tx_timer.store(2, core::sync::atomic::Ordering::Relaxed);
        for _ in 0..ROUNDS_PER_SECOND {
            runner.tick();
        }
        assert_eq!(device.tx_timer.load(core::sync::atomic::Ordering::Relaxed), 1);
    }
}
