//! The deferred task queue.
//!
//! Data path work is deferred out of interrupt context into tasks, which run one at a time on a
//! single worker in FIFO order. A task is queued at most once, so enqueueing an already pending
//! task is a no-op. Tasks report through [TaskResult], whether they want to run again.

use core::sync::atomic::Ordering;

use heapless::Deque;

use crate::{
    bus::Bus,
    device::{Device, DeviceState},
    io::RegisterIo,
    locked,
    mac::MacLayer,
    regs::*,
    stats::Stats,
    tx::{OutputQueue, TxQueue},
    CsMutex,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// A unit of deferred work.
pub(crate) enum Task {
    RxDone,
    TxDone,
    FifoStats,
    Periodic,
    Recover,
}
impl Task {
    const COUNT: usize = 5;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// What the scheduler does with a task after it ran.
pub(crate) enum TaskResult {
    Done,
    Reschedule,
}

struct TaskQueueState {
    queue: Deque<Task, { Task::COUNT }>,
    blocked: bool,
}

pub(crate) struct TaskQueue {
    state: CsMutex<TaskQueueState>,
}
impl TaskQueue {
    pub const fn new() -> Self {
        Self {
            state: CsMutex::new(core::cell::RefCell::new(TaskQueueState {
                queue: Deque::new(),
                blocked: false,
            })),
        }
    }
    /// Queue `task`, unless it's already pending or the queue is blocked.
    ///
    /// Returns `true` if the task was queued.
    pub fn enqueue(&self, task: Task) -> bool {
        locked(&self.state, |state| {
            if state.blocked || state.queue.iter().any(|pending| *pending == task) {
                return false;
            }
            state.queue.push_back(task).is_ok()
        })
    }
    pub fn pop(&self) -> Option<Task> {
        locked(&self.state, |state| state.queue.pop_front())
    }
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        locked(&self.state, |state| state.queue.is_empty())
    }
    /// Reject all further tasks and drop the pending ones.
    pub fn block(&self) {
        locked(&self.state, |state| {
            state.blocked = true;
            state.queue.clear();
        })
    }
    pub fn unblock(&self) {
        locked(&self.state, |state| state.blocked = false)
    }
}

impl<B: Bus, M: MacLayer> Device<B, M> {
    /// Queue `task` and wake the worker.
    pub(crate) fn enqueue_task(&self, task: Task) {
        if self.tasks.enqueue(task) {
            self.task_signal.signal(());
        }
    }

    /// Run the tasks, which are currently queued.
    ///
    /// Tasks asking to be rescheduled are queued again and wake the worker, so that a
    /// continuously busy task can't starve the caller.
    pub(crate) fn run_tasks(&self) {
        if self.worker_active.swap(true, Ordering::AcqRel) {
            return;
        }
        for _ in 0..Task::COUNT {
            let Some(task) = self.tasks.pop() else {
                break;
            };
            trace!("Running task {:?}.", task);
            let result = match task {
                Task::RxDone => self.rx_done_task(),
                Task::TxDone => self.tx_done_task(),
                Task::FifoStats => self.fifo_stats_task(),
                Task::Periodic => self.periodic_task(),
                Task::Recover => self.recover_task(),
            };
            if result == TaskResult::Reschedule {
                self.enqueue_task(task);
            }
        }
        self.worker_active.store(false, Ordering::Release);
    }

    /// Unmask `bits`, unless they became pending again.
    ///
    /// Returns the result for the task owning them.
    fn finish_deferred(&self, bits: u32, more_work: bool) -> TaskResult {
        self.with_interrupt_mask(|mask| {
            if more_work || mask.pending(bits) != 0 {
                TaskResult::Reschedule
            } else {
                mask.unmask_after_defer(bits);
                TaskResult::Done
            }
        })
    }

    fn rx_done_task(&self) -> TaskResult {
        self.take_pending(INT_RX_DONE);
        let exhausted = self.receive_batch(self.config().rx_process_limit);
        self.finish_deferred(INT_RX_DONE, exhausted)
    }

    fn tx_done_task(&self) -> TaskResult {
        let pending = self.take_pending(INT_TX_DONE_ALL);
        for queue in TxQueue::PRIORITY {
            if pending & int_tx_done(queue.index()) != 0 {
                self.tx_reclaim(queue);
            }
        }
        let result = self.with_interrupt_mask(|mask| {
            mask.unmask_after_defer(INT_TX_DONE_ALL);
            if mask.pending(INT_TX_DONE_ALL) != 0 {
                TaskResult::Reschedule
            } else {
                TaskResult::Done
            }
        });
        locked(&self.output, OutputQueue::clear_active);
        self.start_output();
        if self.tx_rings_idle() {
            self.tx_timer.store(0, Ordering::Relaxed);
        }
        result
    }

    fn fifo_stats_task(&self) -> TaskResult {
        self.take_pending(INT_FIFO_STA_FULL);
        let more = self.drain_tx_status_fifo();
        self.finish_deferred(INT_FIFO_STA_FULL, more)
    }

    /// Reinitialize the DMA engines halted by a coherent interrupt.
    fn recover_task(&self) -> TaskResult {
        let status = self.pending_recovery.swap(0, Ordering::AcqRel);
        if status == 0 || self.state() != DeviceState::Running {
            return TaskResult::Done;
        }
        let tx = status & (INT_TX_COHERENT | INT_TXRX_COHERENT) != 0;
        let rx = status & (INT_RX_COHERENT | INT_TXRX_COHERENT) != 0;
        if let Err(err) = self.bus.wait_dma_idle(100) {
            warn!("DMA didn't go idle for recovery: {:?}", err);
        }
        // Every ring is reprogrammed, regardless of which engine lost coherence.
        self.reset_tx_rings();
        self.reset_rx_ring();
        self.bus.write32(WPDMA_RST_IDX, 0x3f | 1 << 16);
        if tx {
            Stats::bump(&self.stats.tx_coherent_recoveries);
        }
        if rx {
            Stats::bump(&self.stats.rx_coherent_recoveries);
        }
        self.enable_dma();
        info!("Recovered from DMA coherence error, TX: {} RX: {}.", tx, rx);
        self.start_output();
        TaskResult::Done
    }
}
