//! The device and its lifecycle.
//!
//! A [Device] moves through [DeviceState]s:
//!
//! ```text
//! Uninitialized --attach--> Attached --init--> Running --stop--> Stopped --init--> Running
//!                                                                   |
//!                  Attached, Running and Stopped --detach--> Detached
//! ```
//!
//! Attach acquires everything, that only has to be set up once: the bus, the DMA rings and the
//! interrupt handler. Init brings up the MCU, MAC and BBP and enables the DMA engines, while stop
//! quiesces the hardware again. Rings are reset on every init, but never reallocated.

use core::{array, sync::atomic::Ordering};

use alloc::vec::Vec;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use portable_atomic::{AtomicBool, AtomicU32, AtomicU8};

use crate::{
    bus::{Bus, BusError},
    config::{Calibration, DeviceConfig},
    intr::{InterruptMask, INT_ENABLE_DEFAULT},
    io::RegisterIo,
    locked,
    mac::MacLayer,
    periodic::PeriodicState,
    regs::*,
    ring::{Ring, RingError},
    runner::DeviceRunner,
    rx::{allocate_rx_ring, free_rx_ring, RxSlot},
    station::StationTable,
    stats::Stats,
    task::{Task, TaskQueue},
    tx::{OutputQueue, TxRing, TxQueue, TX_QUEUE_COUNT},
    CsMutex,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The lifecycle state of a [Device].
pub enum DeviceState {
    /// The device was just created.
    Uninitialized,
    /// All resources are allocated, but the hardware isn't running.
    Attached,
    /// The hardware is up and the data path is active.
    Running,
    /// The hardware was stopped, but the resources are still allocated.
    Stopped,
    /// All resources were released. This is terminal.
    Detached,
    /// Attach failed and everything acquired was released again, or the hardware couldn't be
    /// stopped after a failed init.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The hardware condition a bounded wait was waiting for.
pub enum WaitTarget {
    /// A valid MAC revision being readable.
    MacRevision,
    /// Both DMA engines being idle.
    DmaIdle,
    /// The MAC being neither in TX nor RX.
    MacIdle,
    /// The host to MCU mailbox being free.
    Mailbox,
    /// The BBP agent being free.
    Bbp,
    /// The BBP responding after reset.
    BbpWakeup,
    /// The RF serial interface being free.
    Rf,
    /// The MCU signalling that it's ready.
    McuReady,
    /// The deferred task worker finishing its current task.
    TaskWorker,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// An error returned by a control path operation.
pub enum DeviceError {
    /// The hardware didn't reach the expected condition in time.
    Timeout(WaitTarget),
    /// The operation isn't possible in the current [DeviceState].
    InvalidState,
    /// Another lifecycle operation is in progress.
    Busy,
    /// The bus reported an error.
    Bus(BusError),
    /// A DMA ring couldn't be set up.
    Ring(RingError),
    /// The firmware image is malformed.
    Firmware,
    /// No station table entry is free.
    StationTableFull,
}
impl From<BusError> for DeviceError {
    fn from(value: BusError) -> Self {
        Self::Bus(value)
    }
}
impl From<RingError> for DeviceError {
    fn from(value: RingError) -> Self {
        Self::Ring(value)
    }
}

/// How often the BBP is polled after reset.
const BBP_WAKEUP_TRIES: usize = 20;
/// Milliseconds stop waits for the worker to leave a task.
const WORKER_DRAIN_MS: usize = 100;

/// The RX filter used outside of promiscuous mode.
const RX_FILTER_DEFAULT: u32 = DROP_CRC_ERR
    | DROP_PHY_ERR
    | DROP_UC_NOME
    | DROP_VER_ERR
    | DROP_DUPL
    | DROP_CFACK
    | DROP_CFEND
    | DROP_ACK
    | DROP_CTS
    | DROP_RTS
    | DROP_PSPOLL
    | DROP_BA
    | DROP_CTRL_RSV;

/// The maximum MPDU length.
const MAX_MPDU_LENGTH: u32 = 0x0fff;
const MAX_LEN_CFG_DEFAULT: u32 = 0x1000 | MAX_MPDU_LENGTH;

/// An RT2860 device.
///
/// This owns the bus, all DMA rings and the link to the MAC layer. Everything except for the
/// lifecycle operations may be called concurrently, including from interrupt context for
/// [Device::handle_interrupt].
pub struct Device<B, M> {
    pub(crate) bus: B,
    pub(crate) mac: M,
    config: CsMutex<DeviceConfig>,
    pub(crate) calibration: Calibration,
    firmware: Vec<u8>,

    state: CsMutex<DeviceState>,
    lifecycle_busy: AtomicBool,
    firmware_loaded: AtomicBool,
    mac_revision: AtomicU32,

    pub(crate) tx_rings: [CsMutex<Option<TxRing>>; TX_QUEUE_COUNT],
    pub(crate) rx_ring: CsMutex<Option<Ring<RxSlot>>>,
    pub(crate) output: CsMutex<OutputQueue>,
    pub(crate) stations: CsMutex<StationTable>,

    pub(crate) interrupt_mask: CsMutex<InterruptMask>,
    pub(crate) pending_recovery: AtomicU32,
    pub(crate) tasks: TaskQueue,
    pub(crate) task_signal: Signal<CriticalSectionRawMutex, ()>,
    pub(crate) worker_active: AtomicBool,

    pub(crate) periodic: CsMutex<PeriodicState>,
    pub(crate) timers_armed: AtomicBool,
    /// Seconds until the TX watchdog fires. Zero while disarmed.
    pub(crate) tx_timer: AtomicU8,
    pub(crate) channel: AtomicU8,
    pub(crate) ampdu_tx_sessions: AtomicU32,
    pub(crate) ampdu_rx_sessions: AtomicU32,

    pub(crate) stats: Stats,
}

impl<B: Bus, M: MacLayer> Device<B, M> {
    /// Create a new device.
    ///
    /// `firmware` is the MCU microcode, which is loaded during the first [Device::init].
    pub fn new(
        bus: B,
        mac: M,
        config: DeviceConfig,
        calibration: Calibration,
        firmware: Vec<u8>,
    ) -> Self {
        Self {
            bus,
            mac,
            config: CsMutex::new(core::cell::RefCell::new(config)),
            calibration,
            firmware,
            state: CsMutex::new(core::cell::RefCell::new(DeviceState::Uninitialized)),
            lifecycle_busy: AtomicBool::new(false),
            firmware_loaded: AtomicBool::new(false),
            mac_revision: AtomicU32::new(0),
            tx_rings: array::from_fn(|_| CsMutex::new(core::cell::RefCell::new(None))),
            rx_ring: CsMutex::new(core::cell::RefCell::new(None)),
            output: CsMutex::new(core::cell::RefCell::new(OutputQueue::new())),
            stations: CsMutex::new(core::cell::RefCell::new(StationTable::new())),
            interrupt_mask: CsMutex::new(core::cell::RefCell::new(InterruptMask::default())),
            pending_recovery: AtomicU32::new(0),
            tasks: TaskQueue::new(),
            task_signal: Signal::new(),
            worker_active: AtomicBool::new(false),
            periodic: CsMutex::new(core::cell::RefCell::new(PeriodicState::default())),
            timers_armed: AtomicBool::new(false),
            tx_timer: AtomicU8::new(0),
            channel: AtomicU8::new(1),
            ampdu_tx_sessions: AtomicU32::new(0),
            ampdu_rx_sessions: AtomicU32::new(0),
            stats: Stats::default(),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> DeviceState {
        locked(&self.state, |state| *state)
    }
    fn set_state(&self, new: DeviceState) {
        let old = locked(&self.state, |state| core::mem::replace(state, new));
        debug!("Device state: {:?} -> {:?}", old, new);
    }
    /// The current runtime configuration.
    pub fn config(&self) -> DeviceConfig {
        locked(&self.config, |config| *config)
    }
    /// Replace the runtime configuration.
    ///
    /// The RX filter is only reprogrammed on the next [Device::init].
    pub fn set_config(&self, config: DeviceConfig) {
        locked(&self.config, |current| *current = config);
    }
    /// The event counters.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }
    /// The MAC revision read during attach.
    pub fn mac_revision(&self) -> u32 {
        self.mac_revision.load(Ordering::Relaxed)
    }
    /// The channel the device is tuned to.
    pub fn channel(&self) -> u8 {
        self.channel.load(Ordering::Relaxed)
    }
    /// The bus the device is attached to.
    pub fn bus(&self) -> &B {
        &self.bus
    }
    /// The MAC layer on top of the device.
    pub fn mac_layer(&self) -> &M {
        &self.mac
    }
    /// Get a runner, which drives the deferred tasks and timers of the device.
    pub fn runner(&self) -> DeviceRunner<'_, B, M> {
        DeviceRunner::new(self)
    }

    /// Run a lifecycle operation, rejecting concurrent ones.
    fn exclusive<R>(&self, f: impl FnOnce() -> Result<R, DeviceError>) -> Result<R, DeviceError> {
        if self.lifecycle_busy.swap(true, Ordering::AcqRel) {
            return Err(DeviceError::Busy);
        }
        let result = f();
        self.lifecycle_busy.store(false, Ordering::Release);
        result
    }

    /// Acquire the bus, check the MAC revision, allocate all rings and register the interrupt
    /// handler.
    ///
    /// On failure everything acquired is released and the device is [DeviceState::Failed].
    pub fn attach(&self) -> Result<(), DeviceError> {
        self.exclusive(|| {
            if !matches!(
                self.state(),
                DeviceState::Uninitialized | DeviceState::Failed
            ) {
                return Err(DeviceError::InvalidState);
            }
            match self.acquire_resources() {
                Ok(()) => {
                    self.set_state(DeviceState::Attached);
                    info!(
                        "Attached RT2860 with MAC revision {:#x}.",
                        self.mac_revision()
                    );
                    Ok(())
                }
                Err(err) => {
                    error!("Attach failed: {:?}", err);
                    self.set_state(DeviceState::Failed);
                    Err(err)
                }
            }
        })
    }
    fn acquire_resources(&self) -> Result<(), DeviceError> {
        self.bus.acquire()?;
        let result = self.setup_resources();
        if result.is_err() {
            self.free_rings();
            self.bus.release();
        }
        result
    }
    fn setup_resources(&self) -> Result<(), DeviceError> {
        let revision = self
            .bus
            .poll32(MAC_CSR0, 100, 10, WaitTarget::MacRevision, |value| {
                value != 0 && value != 0xffff_ffff
            })?;
        self.mac_revision.store(revision, Ordering::Relaxed);
        self.allocate_rings()?;
        self.bus.setup_interrupt()?;
        Ok(())
    }
    fn allocate_rings(&self) -> Result<(), DeviceError> {
        for queue in TxQueue::ALL {
            let tx_ring = TxRing::allocate(&self.bus)?;
            locked(&self.tx_rings[queue.index()], |slot| *slot = Some(tx_ring));
        }
        let rx_ring = allocate_rx_ring(&self.bus)?;
        locked(&self.rx_ring, |slot| *slot = Some(rx_ring));
        Ok(())
    }
    fn free_rings(&self) {
        self.free_tx_rings();
        if let Some(rx_ring) = locked(&self.rx_ring, Option::take) {
            free_rx_ring(&self.bus, rx_ring);
        }
    }

    /// Bring up the hardware and start the data path.
    ///
    /// This loads the firmware, if that didn't happen yet, resets the MAC and BBP, resets all
    /// rings, programs the RX filter and enables the interrupts and DMA engines. If the device is
    /// already running, nothing happens. On failure the hardware is stopped again.
    pub fn init(&self) -> Result<(), DeviceError> {
        self.exclusive(|| self.init_locked())
    }
    fn init_locked(&self) -> Result<(), DeviceError> {
        match self.state() {
            DeviceState::Running => return Ok(()),
            DeviceState::Attached | DeviceState::Stopped => {}
            _ => return Err(DeviceError::InvalidState),
        }
        if let Err(err) = self.bring_up() {
            error!("Init failed: {:?}", err);
            let state = match self.quiesce() {
                Ok(()) => DeviceState::Stopped,
                Err(_) => DeviceState::Failed,
            };
            self.set_state(state);
            return Err(err);
        }
        Ok(())
    }
    fn bring_up(&self) -> Result<(), DeviceError> {
        self.bus.write32(WPDMA_RST_IDX, 0xffff_ffff);
        let glo_cfg = self.bus.wait_dma_idle(100)?;
        self.bus
            .write32(WPDMA_GLO_CFG, (glo_cfg & 0xff0) | TX_WB_DDONE);

        self.bus.write32(PBF_SYS_CTRL, 0x0e1f);
        self.bus.write32(PBF_SYS_CTRL, 0x0e00);
        if !self.firmware_loaded.load(Ordering::Relaxed) {
            self.bus.load_firmware(&self.firmware)?;
            self.firmware_loaded.store(true, Ordering::Relaxed);
        }

        self.bus.write32(SYS_CTRL, MAC_SRST | BBP_HRST);
        self.bus.write32(SYS_CTRL, 0);
        for (offset, value) in DEFAULT_MAC_REGISTERS {
            self.bus.write32(*offset, *value);
        }
        self.bus.wait_mac_idle()?;
        self.bus.write32(H2M_BBPAGENT, 0);
        self.bus.write32(H2M_MAILBOX, 0);
        self.bus.mcu_cmd(MCU_CMD_RFRESET, 0, 0)?;
        self.bus.delay_us(1000);
        self.bbp_init()?;

        self.reset_tx_rings();
        self.reset_rx_ring();
        self.bus.write32(MAX_LEN_CFG, MAX_LEN_CFG_DEFAULT);
        self.bus.wait_dma_idle(100)?;
        self.bus.write32(DELAY_INT_CFG, 0);
        self.bus.write32(INT_STATUS, 0xffff_ffff);

        locked(&self.periodic, PeriodicState::reset);
        self.pending_recovery.store(0, Ordering::Relaxed);
        self.with_interrupt_mask(|mask| {
            mask.reset();
            mask.enable(INT_ENABLE_DEFAULT);
        });
        self.tasks.unblock();
        self.txrx_enable()?;
        let channel = self.channel();
        self.tune_rf(channel)?;

        self.timers_armed.store(true, Ordering::Release);
        self.set_state(DeviceState::Running);
        info!("Device is running on channel {}.", channel);
        self.start_output();
        Ok(())
    }
    fn bbp_init(&self) -> Result<(), DeviceError> {
        let mut awake = false;
        for _ in 0..BBP_WAKEUP_TRIES {
            let version = self.bus.bbp_read(0)?;
            if version != 0 && version != 0xff {
                awake = true;
                break;
            }
            self.bus.delay_us(1000);
        }
        if !awake {
            error!("BBP didn't wake up.");
            return Err(DeviceError::Timeout(WaitTarget::BbpWakeup));
        }
        for (reg, value) in DEFAULT_BBP_REGISTERS
            .iter()
            .chain(self.calibration.bbp_overrides.iter())
        {
            self.bus.bbp_write(*reg, *value)?;
        }
        Ok(())
    }
    /// Enable the DMA engines.
    pub(crate) fn enable_dma(&self) {
        self.bus.set32(
            WPDMA_GLO_CFG,
            TX_DMA_ENABLE | RX_DMA_ENABLE | TX_WB_DDONE | WPDMA_BT_SIZE64 << WPDMA_BT_SIZE_SHIFT,
        );
    }
    fn txrx_enable(&self) -> Result<(), DeviceError> {
        self.bus.write32(SYS_CTRL, TX_ENABLE);
        let glo_cfg = self.bus.wait_dma_idle(200)?;
        self.bus
            .write32(WPDMA_GLO_CFG, (glo_cfg & 0xff0) | TX_WB_DDONE);
        self.enable_dma();
        let filter = if self.config().promiscuous {
            0
        } else {
            RX_FILTER_DEFAULT
        };
        self.bus.write32(RX_FILTER_CFG, filter);
        self.bus.write32(SYS_CTRL, RX_ENABLE | TX_ENABLE);
        Ok(())
    }
    fn tune_rf(&self, channel: u8) -> Result<(), DeviceError> {
        let Some((_, values)) = self
            .calibration
            .rf_channels
            .iter()
            .find(|(rf_channel, _)| *rf_channel == channel)
        else {
            return Ok(());
        };
        for (reg, value) in values.iter().enumerate() {
            self.bus.rf_write(reg as u8, *value)?;
        }
        Ok(())
    }
    /// Tune the device to `channel`.
    ///
    /// The RF registers are only written while the device is running, otherwise the channel is
    /// applied on the next [Device::init].
    pub fn set_channel(&self, channel: u8) -> Result<(), DeviceError> {
        self.channel.store(channel, Ordering::Relaxed);
        // R66 depends on the band.
        locked(&self.periodic, |periodic| periodic.r66 = None);
        if self.state() == DeviceState::Running {
            self.tune_rf(channel)?;
        }
        Ok(())
    }

    /// Mask all interrupts, cancel the timers and wait for the task worker to go idle.
    ///
    /// If the worker doesn't finish in time, the data path is resumed.
    fn drain_worker(&self) -> Result<(), DeviceError> {
        let saved = self.with_interrupt_mask(core::mem::take);
        self.timers_armed.store(false, Ordering::Release);
        self.tasks.block();
        for _ in 0..WORKER_DRAIN_MS {
            if !self.worker_active.load(Ordering::Acquire) {
                self.tx_timer.store(0, Ordering::Relaxed);
                return Ok(());
            }
            self.bus.delay_us(1000);
        }
        warn!("The task worker didn't finish within {}ms.", WORKER_DRAIN_MS);
        if self.state() == DeviceState::Running {
            self.with_interrupt_mask(|mask| *mask = saved);
            self.tasks.unblock();
            self.timers_armed.store(true, Ordering::Release);
            // Blocking the queue dropped the tasks owning the deferred bits.
            for (bits, task) in [
                (INT_RX_DONE, Task::RxDone),
                (INT_TX_DONE_ALL, Task::TxDone),
                (INT_FIFO_STA_FULL, Task::FifoStats),
            ] {
                if saved.pending(bits) != 0 {
                    self.enqueue_task(task);
                }
            }
            if self.pending_recovery.load(Ordering::Acquire) != 0 {
                self.enqueue_task(Task::Recover);
            }
        }
        Err(DeviceError::Timeout(WaitTarget::TaskWorker))
    }

    /// Stop the hardware without touching the bus or the rings.
    ///
    /// Fails without touching the hardware, if the task worker is still busy.
    fn quiesce(&self) -> Result<(), DeviceError> {
        self.drain_worker()?;
        self.shutdown_hardware();
        Ok(())
    }
    fn shutdown_hardware(&self) {
        self.bus.clear32(SYS_CTRL, TX_ENABLE | RX_ENABLE);
        self.bus.clear32(WPDMA_GLO_CFG, TX_DMA_ENABLE | RX_DMA_ENABLE);
        self.bus.write32(SYS_CTRL, MAC_SRST | BBP_HRST);
        self.bus.write32(SYS_CTRL, 0);
        self.bus.write32(INT_STATUS, 0xffff_ffff);
        self.reset_tx_rings();
        self.reset_rx_ring();
        self.pending_recovery.store(0, Ordering::Relaxed);
        locked(&self.output, OutputQueue::clear_active);
    }

    /// Stop the hardware.
    ///
    /// Interrupts are masked, the task queue is drained and every frame still in a TX ring is
    /// flushed. Stopping a stopped device does nothing.
    pub fn stop(&self) -> Result<(), DeviceError> {
        self.exclusive(|| self.stop_locked())
    }
    fn stop_locked(&self) -> Result<(), DeviceError> {
        match self.state() {
            DeviceState::Stopped => Ok(()),
            DeviceState::Running => {
                self.quiesce()?;
                self.set_state(DeviceState::Stopped);
                info!("Device stopped.");
                Ok(())
            }
            _ => Err(DeviceError::InvalidState),
        }
    }

    /// Stop and reinitialize the hardware.
    pub(crate) fn restart(&self) -> Result<(), DeviceError> {
        self.exclusive(|| {
            self.stop_locked()?;
            self.init_locked()
        })
    }

    /// Release all resources.
    ///
    /// Frames still waiting in the output queue are handed back as flushed. The interrupt
    /// handler is unregistered before the hardware is touched, so it can't race with the
    /// teardown.
    pub fn detach(&self) -> Result<(), DeviceError> {
        self.exclusive(|| {
            let state = self.state();
            if !matches!(
                state,
                DeviceState::Attached | DeviceState::Running | DeviceState::Stopped
            ) {
                return Err(DeviceError::InvalidState);
            }
            if state == DeviceState::Running {
                self.drain_worker()?;
            }
            self.bus.teardown_interrupt();
            if state == DeviceState::Running {
                self.shutdown_hardware();
            }
            self.tasks.block();
            self.flush_output();
            self.free_rings();
            locked(&self.stations, |stations| *stations = StationTable::new());
            self.bus.release();
            self.set_state(DeviceState::Detached);
            info!("Device detached.");
            Ok(())
        })
    }
}
