//! Register map of the RT2860 MAC, as far as the ring protocol and the control path need it.
//!
//! All offsets are relative to the start of the memory mapped register window.

use ieee80211::macro_bits::bit;

// Scheduler/DMA block.
pub const INT_STATUS: u32 = 0x0200;
pub const INT_MASK: u32 = 0x0204;
pub const WPDMA_GLO_CFG: u32 = 0x0208;
pub const WPDMA_RST_IDX: u32 = 0x020c;
pub const DELAY_INT_CFG: u32 = 0x0210;
pub const WMM_AIFSN_CFG: u32 = 0x0214;
pub const WMM_CWMIN_CFG: u32 = 0x0218;
pub const WMM_CWMAX_CFG: u32 = 0x021c;

/// Base address of the descriptor block of TX ring `queue`.
pub const fn tx_base_ptr(queue: usize) -> u32 {
    0x0230 + (queue as u32) * 16
}
/// Descriptor count of TX ring `queue`.
pub const fn tx_max_cnt(queue: usize) -> u32 {
    0x0234 + (queue as u32) * 16
}
/// CPU index of TX ring `queue`. Writing it is the doorbell for that queue.
pub const fn tx_ctx_idx(queue: usize) -> u32 {
    0x0238 + (queue as u32) * 16
}
/// DMA index of TX ring `queue`, the next descriptor the hardware will process.
pub const fn tx_dtx_idx(queue: usize) -> u32 {
    0x023c + (queue as u32) * 16
}

pub const RX_BASE_PTR: u32 = 0x0290;
pub const RX_MAX_CNT: u32 = 0x0294;
pub const RX_CALC_IDX: u32 = 0x0298;
pub const RX_DRX_IDX: u32 = 0x029c;

// WPDMA_GLO_CFG bits.
pub const TX_DMA_ENABLE: u32 = bit!(0);
pub const TX_DMA_BUSY: u32 = bit!(1);
pub const RX_DMA_ENABLE: u32 = bit!(2);
pub const RX_DMA_BUSY: u32 = bit!(3);
pub const WPDMA_BT_SIZE_SHIFT: u32 = 4;
pub const WPDMA_BT_SIZE64: u32 = 2;
pub const TX_WB_DDONE: u32 = bit!(6);

// Packet buffer block.
pub const PBF_SYS_CTRL: u32 = 0x0400;
pub const H2M_HOST_CMD: u32 = 0x0404;
pub const PBF_CFG: u32 = 0x0408;
pub const PBF_MAX_PCNT: u32 = 0x040c;
pub const PBF_TXRXQ_PCNT: u32 = 0x0438;
pub const BCN_OFFSET0: u32 = 0x042c;

// PBF_SYS_CTRL bits.
pub const MCU_RESET: u32 = bit!(0);
pub const MCU_READY: u32 = bit!(7);
pub const HST_PM_SEL: u32 = bit!(16);

// PBF_TXRXQ_PCNT fields.
pub const TX0Q_PCNT_SHIFT: u32 = 0;
pub const TX1Q_PCNT_SHIFT: u32 = 8;
pub const QUEUE_PCNT_MASK: u32 = 0xff;

// PBF_CFG values used for flushing stuck hardware queues.
pub const PBF_CFG_DEFAULT: u32 = 0x00f4_0006;
pub const PBF_CFG_FLUSH_TX0Q: u32 = 0x00f4_0012;
pub const PBF_CFG_FLUSH_TX1Q: u32 = 0x00f4_000a;

// MAC block.
pub const MAC_CSR0: u32 = 0x1000;
pub const SYS_CTRL: u32 = 0x1004;
pub const MAX_LEN_CFG: u32 = 0x1018;
pub const RF_CSR_CFG0: u32 = 0x1020;
pub const LED_CFG: u32 = 0x102c;
pub const XIFS_TIME_CFG: u32 = 0x1100;
pub const BKOFF_SLOT_CFG: u32 = 0x1104;
pub const MAC_STATUS: u32 = 0x1200;
pub const PWR_PIN_CFG: u32 = 0x1204;
pub const TX_SW_CFG0: u32 = 0x1330;
pub const TX_SW_CFG1: u32 = 0x1334;
pub const TXOP_CTRL_CFG: u32 = 0x1340;
pub const TX_RTS_CFG: u32 = 0x1344;
pub const TX_TIMEOUT_CFG: u32 = 0x1348;
pub const TX_RTY_CFG: u32 = 0x134c;
pub const TX_LINK_CFG: u32 = 0x1350;
pub const CCK_PROT_CFG: u32 = 0x1364;
pub const OFDM_PROT_CFG: u32 = 0x1368;
pub const MM20_PROT_CFG: u32 = 0x136c;
pub const MM40_PROT_CFG: u32 = 0x1370;
pub const GF20_PROT_CFG: u32 = 0x1374;
pub const GF40_PROT_CFG: u32 = 0x1378;
pub const EXP_ACK_TIME: u32 = 0x1380;
pub const RX_FILTER_CFG: u32 = 0x1400;
pub const AUTO_RSP_CFG: u32 = 0x1404;
pub const LEGACY_BASIC_RATE: u32 = 0x1408;
pub const HT_BASIC_RATE: u32 = 0x140c;
pub const TXOP_HLDR_ET: u32 = 0x1608;

// SYS_CTRL bits.
pub const MAC_SRST: u32 = bit!(0);
pub const BBP_HRST: u32 = bit!(1);
pub const TX_ENABLE: u32 = bit!(2);
pub const RX_ENABLE: u32 = bit!(3);

// MAC_STATUS bits.
pub const TX_STATUS_BUSY: u32 = bit!(0);
pub const RX_STATUS_BUSY: u32 = bit!(1);

// H2M_BBPAGENT fields.
pub const BBP_VAL_MASK: u32 = 0xff;
pub const BBP_REG_SHIFT: u32 = 8;
pub const BBP_CSR_READ: u32 = bit!(16);
pub const BBP_CSR_BUSY: u32 = bit!(17);
pub const BBP_RW_MODE_PARALLEL: u32 = bit!(19);

// RF_CSR_CFG0 fields.
pub const RF_BUSY: u32 = bit!(31);
pub const RF_BITS_SHIFT: u32 = 24;

// RX_FILTER_CFG bits.
pub const DROP_CRC_ERR: u32 = bit!(0);
pub const DROP_PHY_ERR: u32 = bit!(1);
pub const DROP_UC_NOME: u32 = bit!(2);
pub const DROP_VER_ERR: u32 = bit!(4);
pub const DROP_DUPL: u32 = bit!(7);
pub const DROP_CFACK: u32 = bit!(8);
pub const DROP_CFEND: u32 = bit!(9);
pub const DROP_ACK: u32 = bit!(10);
pub const DROP_CTS: u32 = bit!(11);
pub const DROP_RTS: u32 = bit!(12);
pub const DROP_PSPOLL: u32 = bit!(13);
pub const DROP_BA: u32 = bit!(14);
pub const DROP_CTRL_RSV: u32 = bit!(16);

// Statistic counters. All of them are cleared on read.
pub const RX_STA_CNT0: u32 = 0x1700;
pub const RX_STA_CNT1: u32 = 0x1704;
pub const RX_STA_CNT2: u32 = 0x1708;
pub const TX_STA_CNT0: u32 = 0x170c;
pub const TX_STA_CNT1: u32 = 0x1710;
pub const TX_STA_CNT2: u32 = 0x1714;
pub const TX_STA_FIFO: u32 = 0x1718;

// TX_STA_FIFO fields.
pub const TX_STA_FIFO_VALID: u32 = bit!(0);
pub const TX_STA_FIFO_PID_SHIFT: u32 = 1;
pub const TX_STA_FIFO_PID_MASK: u32 = 0xf;
pub const TX_STA_FIFO_TX_OK: u32 = bit!(5);
pub const TX_STA_FIFO_AGG: u32 = bit!(6);
pub const TX_STA_FIFO_WCID_SHIFT: u32 = 8;
pub const TX_STA_FIFO_WCID_MASK: u32 = 0xff;
pub const TX_STA_FIFO_MCS_SHIFT: u32 = 16;
pub const TX_STA_FIFO_MCS_MASK: u32 = 0x7f;

/// Base of the hardware station (WCID) table. Every entry is eight bytes wide.
pub const WCID_BASE: u32 = 0x1800;
/// Address of the WCID table entry for `wcid`.
pub const fn wcid_entry(wcid: u8) -> u32 {
    WCID_BASE + (wcid as u32) * 8
}
/// Bit in the second word of a WCID entry, which enables RX block ack for `tid`.
pub const fn wcid_rx_ba_bit(tid: u8) -> u32 {
    0x1_0000 << tid
}

// Host to MCU mailbox.
pub const H2M_MAILBOX: u32 = 0x7010;
pub const H2M_BBPAGENT: u32 = 0x7028;
pub const H2M_BUSY: u32 = bit!(24);
pub const H2M_TOKEN_SHIFT: u32 = 16;

/// Start of the MCU microcode RAM.
pub const MCU_UCODE_BASE: u32 = 0x2000;
/// Size of the MCU microcode RAM.
pub const MCU_UCODE_MAX_SIZE: usize = 0x2000;

// MCU commands.
pub const MCU_CMD_RFRESET: u8 = 0x72;
pub const MCU_CMD_BBP: u8 = 0x80;

// Interrupt status/mask bits.
pub const INT_RX_DELAY_DONE: u32 = bit!(0);
pub const INT_TX_DELAY_DONE: u32 = bit!(1);
pub const INT_RX_DONE: u32 = bit!(2);
pub const INT_TX_AC0_DONE: u32 = bit!(3);
pub const INT_TX_AC1_DONE: u32 = bit!(4);
pub const INT_TX_AC2_DONE: u32 = bit!(5);
pub const INT_TX_AC3_DONE: u32 = bit!(6);
pub const INT_TX_HCCA_DONE: u32 = bit!(7);
pub const INT_TX_MGMT_DONE: u32 = bit!(8);
pub const INT_MCU_CMD: u32 = bit!(9);
pub const INT_TXRX_COHERENT: u32 = bit!(10);
pub const INT_TBTT: u32 = bit!(11);
pub const INT_PRE_TBTT: u32 = bit!(12);
pub const INT_FIFO_STA_FULL: u32 = bit!(13);
pub const INT_AUTO_WAKEUP: u32 = bit!(14);
pub const INT_GP_TIMER: u32 = bit!(15);
pub const INT_RX_COHERENT: u32 = bit!(16);
pub const INT_TX_COHERENT: u32 = bit!(17);

/// The TX done interrupt bit of `queue`.
pub const fn int_tx_done(queue: usize) -> u32 {
    INT_TX_AC0_DONE << queue
}
/// All TX done interrupt bits.
pub const INT_TX_DONE_ALL: u32 = INT_TX_AC0_DONE
    | INT_TX_AC1_DONE
    | INT_TX_AC2_DONE
    | INT_TX_AC3_DONE
    | INT_TX_HCCA_DONE
    | INT_TX_MGMT_DONE;

/// Default values for the MAC registers, written on every init.
pub const DEFAULT_MAC_REGISTERS: &[(u32, u32)] = &[
    (BCN_OFFSET0, 0xf8f0_e8e0),
    (LEGACY_BASIC_RATE, 0x0000_013f),
    (HT_BASIC_RATE, 0x0000_8003),
    (SYS_CTRL, 0x0000_0000),
    (BKOFF_SLOT_CFG, 0x0000_0209),
    (TX_SW_CFG0, 0x0000_0000),
    (TX_SW_CFG1, 0x0008_0606),
    (TX_LINK_CFG, 0x0000_1020),
    (TX_TIMEOUT_CFG, 0x000a_2090),
    (LED_CFG, 0x7f03_1e46),
    (WMM_AIFSN_CFG, 0x0000_2273),
    (WMM_CWMIN_CFG, 0x0000_2344),
    (WMM_CWMAX_CFG, 0x0000_34aa),
    (PBF_MAX_PCNT, 0x1f3f_bf9f),
    (TX_RTY_CFG, 0x47d0_1f0f),
    (AUTO_RSP_CFG, 0x0000_0013),
    (CCK_PROT_CFG, 0x0574_0003),
    (OFDM_PROT_CFG, 0x0574_0003),
    (GF20_PROT_CFG, 0x0174_4004),
    (GF40_PROT_CFG, 0x03f4_4084),
    (MM20_PROT_CFG, 0x0174_4004),
    (MM40_PROT_CFG, 0x03f5_4084),
    (TXOP_CTRL_CFG, 0x0000_583f),
    (TXOP_HLDR_ET, 0x0000_0002),
    (TX_RTS_CFG, 0x0009_2b20),
    (EXP_ACK_TIME, 0x0024_00ca),
    (XIFS_TIME_CFG, 0x33a4_1010),
    (PWR_PIN_CFG, 0x0000_0003),
];

/// Default values for the BBP registers, written after the BBP woke up.
pub const DEFAULT_BBP_REGISTERS: &[(u8, u8)] = &[
    (65, 0x2c),
    (66, 0x38),
    (69, 0x12),
    (70, 0x0a),
    (73, 0x10),
    (81, 0x37),
    (82, 0x62),
    (83, 0x6a),
    (84, 0x98),
    (86, 0x00),
    (91, 0x04),
    (92, 0x00),
    (103, 0x00),
    (105, 0x05),
];

/// The BBP register, which controls the receiver gain (R66).
pub const BBP_R66: u8 = 66;
