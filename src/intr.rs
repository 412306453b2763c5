//! Interrupt dispatch.
//!
//! The handler only reads and acknowledges the status register, updates the interrupt mask and
//! queues tasks. Data path interrupts are masked until the task owning them ran, which is tracked
//! by [InterruptMask].

use core::sync::atomic::Ordering;

use crate::{
    bus::Bus,
    device::Device,
    io::RegisterIo,
    locked,
    mac::MacLayer,
    regs::*,
    stats::Stats,
    task::Task,
    tx::TxQueue,
};

/// All interrupts signalling a DMA coherence error.
pub(crate) const INT_COHERENT: u32 = INT_TX_COHERENT | INT_RX_COHERENT | INT_TXRX_COHERENT;
/// The interrupts enabled while the device is running.
pub(crate) const INT_ENABLE_DEFAULT: u32 = 0x0003_fffc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// The software view of the interrupt mask.
///
/// The hardware mask is `enabled & !disabled`. Bits are disabled while the task, which handles
/// them, is pending.
pub(crate) struct InterruptMask {
    enabled: u32,
    disabled: u32,
    pending: u32,
}
impl InterruptMask {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
    pub fn enable(&mut self, bits: u32) {
        self.enabled |= bits;
    }
    /// Disable `bits` and record them as pending.
    ///
    /// Returns `true` if any of the bits wasn't disabled already.
    pub fn mask_for_defer(&mut self, bits: u32) -> bool {
        let newly_disabled = bits & !self.disabled;
        self.disabled |= bits;
        self.pending |= bits;
        newly_disabled != 0
    }
    /// Clear `bits` from the pending set, returning those that were pending.
    pub fn take_pending(&mut self, bits: u32) -> u32 {
        let taken = self.pending & bits;
        self.pending &= !bits;
        taken
    }
    pub fn pending(&self, bits: u32) -> u32 {
        self.pending & bits
    }
    /// Enable those of `bits` again, which are disabled but not pending.
    pub fn unmask_after_defer(&mut self, bits: u32) {
        self.disabled &= !(bits & !self.pending);
    }
    pub fn hardware_mask(&self) -> u32 {
        self.enabled & !self.disabled
    }
}

impl<B: Bus, M: MacLayer> Device<B, M> {
    /// Update the interrupt mask, while keeping the hardware in sync.
    pub(crate) fn with_interrupt_mask<R>(&self, f: impl FnOnce(&mut InterruptMask) -> R) -> R {
        locked(&self.interrupt_mask, |mask| {
            let result = f(mask);
            self.bus.write32(INT_MASK, mask.hardware_mask());
            result
        })
    }
    fn defer(&self, bits: u32, task: Task) {
        if self.with_interrupt_mask(|mask| mask.mask_for_defer(bits)) {
            self.enqueue_task(task);
        }
    }
    pub(crate) fn take_pending(&self, bits: u32) -> u32 {
        locked(&self.interrupt_mask, |mask| mask.take_pending(bits))
    }

    /// Stop both DMA engines and schedule the recovery of all rings.
    fn halt_dma(&self, bits: u32) {
        self.bus
            .clear32(WPDMA_GLO_CFG, TX_DMA_ENABLE | RX_DMA_ENABLE | TX_WB_DDONE);
        self.pending_recovery.fetch_or(bits, Ordering::AcqRel);
        warn!("DMA coherence lost, status: {:#x}.", bits);
        self.enqueue_task(Task::Recover);
    }

    /// The interrupt handler.
    ///
    /// This has to be called by the host, whenever the interrupt line of the device is raised.
    pub fn handle_interrupt(&self) {
        let status = self.bus.read32(INT_STATUS);
        // All ones are read, if the device is gone.
        if status == 0 || status == 0xffff_ffff {
            return;
        }
        self.bus.write32(INT_STATUS, status);
        Stats::bump(&self.stats.interrupts);
        trace!("Interrupt status: {:#x}", status);

        if status & INT_COHERENT != 0 {
            self.halt_dma(status & INT_COHERENT);
        }
        if status & INT_FIFO_STA_FULL != 0 {
            self.defer(INT_FIFO_STA_FULL, Task::FifoStats);
        }
        if status & INT_TX_MGMT_DONE != 0 {
            self.defer(INT_TX_MGMT_DONE, Task::TxDone);
        }
        if status & INT_RX_DONE != 0 {
            self.defer(INT_RX_DONE, Task::RxDone);
        }
        if status & INT_RX_DELAY_DONE != 0 {
            Stats::bump(&self.stats.rx_delay_interrupts);
        }
        for queue in [
            TxQueue::Hcca,
            TxQueue::Ac3,
            TxQueue::Ac2,
            TxQueue::Ac1,
            TxQueue::Ac0,
        ] {
            let bit = int_tx_done(queue.index());
            if status & bit != 0 {
                self.defer(bit, Task::TxDone);
            }
        }
        if status & INT_TX_DELAY_DONE != 0 {
            Stats::bump(&self.stats.tx_delay_interrupts);
        }
        for (bit, counter) in [
            (INT_PRE_TBTT, &self.stats.pre_tbtt_interrupts),
            (INT_TBTT, &self.stats.tbtt_interrupts),
            (INT_MCU_CMD, &self.stats.mcu_cmd_interrupts),
            (INT_AUTO_WAKEUP, &self.stats.auto_wakeup_interrupts),
            (INT_GP_TIMER, &self.stats.gp_timer_interrupts),
        ] {
            if status & bit != 0 {
                Stats::bump(counter);
            }
        }
    }
}
