use core::sync::atomic::Ordering;

use portable_atomic::AtomicU32;

use crate::tx::TX_QUEUE_COUNT;

macro_rules! counters {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        /// Event counters of a [Device](crate::Device).
        ///
        /// All counters wrap around on overflow.
        #[derive(Default)]
        pub struct Stats {
            $(
                $(#[$meta])*
                pub $name: AtomicU32,
            )*
            /// Frames rejected, because their TX ring was full, per queue.
            pub tx_ring_full: [AtomicU32; TX_QUEUE_COUNT],
        }
    };
}
counters! {
    /// Interrupts handled.
    interrupts,
    /// Frames delivered to the MAC layer.
    rx_packets,
    /// Received frames dropped for any reason.
    rx_dropped,
    /// Frames with an FCS error.
    rx_crc_errors,
    /// Frames with an ICV or key error.
    rx_cipher_errors,
    /// Frames with a Michael MIC failure.
    rx_mic_failures,
    /// Protected frames, which weren't decrypted by the hardware.
    rx_undecrypted,
    /// RX buffer replacements, which couldn't be allocated or mapped.
    rx_alloc_failures,
    /// Descriptors with a length, that doesn't fit the buffer.
    rx_length_errors,
    /// Retransmitted MPDUs received within an A-MPDU.
    rx_ampdu_retries,
    /// Frames handed to the hardware.
    tx_queued,
    /// Frames reclaimed from a TX ring after the hardware processed them.
    tx_completed,
    /// Frames reported as successfully transmitted by the status FIFO.
    tx_packets,
    /// Frames reported as failed by the status FIFO.
    tx_errors,
    /// Frames dropped, since no memory was available.
    tx_out_of_memory,
    /// Frames linearized, because they had too many fragments.
    tx_defrag,
    /// Frames dropped, since they couldn't be mapped or had no valid header.
    tx_transmit_errors,
    /// Expired TX watchdogs.
    tx_timeouts,
    /// TX ring recoveries after a coherent interrupt.
    tx_coherent_recoveries,
    /// RX ring recoveries after a coherent interrupt.
    rx_coherent_recoveries,
    /// Stuck hardware queues, that were flushed.
    queue_flushes,
    /// Aggregation session counters, that would have gone negative.
    ampdu_session_violations,
    /// RX delay interrupts.
    rx_delay_interrupts,
    /// TX delay interrupts.
    tx_delay_interrupts,
    /// Pre-TBTT interrupts.
    pre_tbtt_interrupts,
    /// TBTT interrupts.
    tbtt_interrupts,
    /// MCU command interrupts.
    mcu_cmd_interrupts,
    /// Auto wakeup interrupts.
    auto_wakeup_interrupts,
    /// General purpose timer interrupts.
    gp_timer_interrupts,
    /// FCS errors counted by the hardware.
    hw_rx_crc_errors,
    /// PHY errors counted by the hardware.
    hw_rx_phy_errors,
    /// False CCAs counted by the hardware.
    hw_false_cca,
    /// PLCP errors counted by the hardware.
    hw_plcp_errors,
    /// Duplicates counted by the hardware.
    hw_rx_duplicates,
    /// RX FIFO overflows counted by the hardware.
    hw_rx_fifo_overflows,
    /// Beacons sent, as counted by the hardware.
    hw_tx_beacons,
    /// Failed transmissions counted by the hardware.
    hw_tx_failures,
    /// Retries counted by the hardware.
    hw_tx_retries,
    /// Successful transmissions counted by the hardware.
    hw_tx_successes,
    /// TX underflows counted by the hardware.
    hw_tx_underflows,
    /// Zero length frames counted by the hardware.
    hw_tx_zero_length,
}
impl Stats {
    pub(crate) fn bump(counter: &AtomicU32) {
        Self::add(counter, 1);
    }
    pub(crate) fn add(counter: &AtomicU32, value: u32) {
        counter.fetch_add(value, Ordering::Relaxed);
    }
    /// Read a counter.
    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::Relaxed)
    }
}
