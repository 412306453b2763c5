//! The wireless information headers.
//!
//! Every frame the RT2860 transmits is prefixed with a TX wireless information (TXWI) header,
//! which tells the hardware how to send it. Received frames are prefixed with an RX wireless
//! information (RXWI) header, which describes how they were received. Both are 16 bytes long and
//! little endian.

use ieee80211::macro_bits::{bit, check_bit};

use crate::phy::{PhyMode, PhyParams};

/// Size of a TXWI or RXWI header.
pub(crate) const WI_SIZE: usize = 16;

// TXWI flags byte.
pub(crate) const TX_MIMOPS: u8 = bit!(1);
pub(crate) const TX_TS: u8 = bit!(3);
pub(crate) const TX_AMPDU: u8 = bit!(4);
pub(crate) const TX_MPDU_DSITY_SHIFT: u8 = 5;

// TXWI xflags byte.
pub(crate) const TX_ACK: u8 = bit!(0);
pub(crate) const TX_NSEQ: u8 = bit!(1);
pub(crate) const TX_BAWINSIZE_SHIFT: u8 = 2;

// TXWI length field.
pub(crate) const TX_PID_SHIFT: u16 = 12;
pub(crate) const TX_LENGTH_MASK: u16 = 0xfff;

// PHY field shared by TXWI and RXWI.
pub(crate) const PHY_MODE_SHIFT: u16 = 14;
pub(crate) const PHY_STBC_SHIFT: u16 = 9;
pub(crate) const PHY_SGI: u16 = bit!(8);
pub(crate) const PHY_BW40: u16 = bit!(7);
pub(crate) const PHY_MCS_MASK: u16 = 0x7f;
pub(crate) const PHY_SHPRE: u16 = bit!(3);

/// Encode the PHY parameters into the PHY field.
pub(crate) fn encode_phy(params: &PhyParams) -> u16 {
    let mut phy = (params.mode as u16) << PHY_MODE_SHIFT | params.mcs as u16 & PHY_MCS_MASK;
    if params.mode == PhyMode::Cck && params.short_preamble {
        phy |= PHY_SHPRE;
    }
    if params.bandwidth_40 {
        phy |= PHY_BW40;
    }
    if params.short_gi {
        phy |= PHY_SGI;
    }
    if params.stbc {
        phy |= 1 << PHY_STBC_SHIFT;
    }
    phy
}

/// The TX wireless information header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct TxWi {
    pub flags: u8,
    pub txop: u8,
    pub phy: u16,
    pub xflags: u8,
    pub wcid: u8,
    /// Packet ID in the upper four bits, MPDU length in the lower twelve.
    pub len: u16,
    pub iv: u32,
    pub eiv: u32,
}
impl TxWi {
    pub fn set_length(&mut self, length: usize) {
        self.len = (self.len & !TX_LENGTH_MASK) | (length as u16 & TX_LENGTH_MASK);
    }
    pub fn set_pid(&mut self, pid: u8) {
        self.len = (self.len & TX_LENGTH_MASK) | (pid as u16 & 0xf) << TX_PID_SHIFT;
    }
    pub fn set_ampdu(&mut self, density: u8, window_size: u8) {
        self.flags |= TX_AMPDU | (density & 0x7) << TX_MPDU_DSITY_SHIFT;
        self.xflags |= (window_size & 0x3f) << TX_BAWINSIZE_SHIFT;
    }
    pub fn pid(&self) -> u8 {
        (self.len >> TX_PID_SHIFT) as u8
    }
    pub fn length(&self) -> usize {
        (self.len & TX_LENGTH_MASK) as usize
    }
    pub fn to_bytes(&self) -> [u8; WI_SIZE] {
        let mut bytes = [0u8; WI_SIZE];
        bytes[0] = self.flags;
        bytes[1] = self.txop;
        bytes[2..4].copy_from_slice(&self.phy.to_le_bytes());
        bytes[4] = self.xflags;
        bytes[5] = self.wcid;
        bytes[6..8].copy_from_slice(&self.len.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.iv.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.eiv.to_le_bytes());
        bytes
    }
    #[cfg(test)]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            flags: bytes[0],
            txop: bytes[1],
            phy: u16::from_le_bytes([bytes[2], bytes[3]]),
            xflags: bytes[4],
            wcid: bytes[5],
            len: u16::from_le_bytes([bytes[6], bytes[7]]),
            iv: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            eiv: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }
}

/// The RX wireless information header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RxWi {
    pub wcid: u8,
    /// Key index in the lower two bits, BSS index and UDF above.
    pub keyidx: u8,
    /// TID in the upper four bits, MPDU length in the lower twelve.
    pub len: u16,
    /// Sequence number in the upper twelve bits, fragment number in the lower four.
    pub seq: u16,
    pub phy: u16,
    pub rssi: [u8; 3],
    pub snr: [u8; 2],
}
impl RxWi {
    pub fn from_bytes(bytes: &[u8; WI_SIZE]) -> Self {
        Self {
            wcid: bytes[0],
            keyidx: bytes[1],
            len: u16::from_le_bytes([bytes[2], bytes[3]]),
            seq: u16::from_le_bytes([bytes[4], bytes[5]]),
            phy: u16::from_le_bytes([bytes[6], bytes[7]]),
            rssi: [bytes[8], bytes[9], bytes[10]],
            snr: [bytes[12], bytes[13]],
        }
    }
    #[cfg(test)]
    pub fn to_bytes(&self) -> [u8; WI_SIZE] {
        let mut bytes = [0u8; WI_SIZE];
        bytes[0] = self.wcid;
        bytes[1] = self.keyidx;
        bytes[2..4].copy_from_slice(&self.len.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.seq.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.phy.to_le_bytes());
        bytes[8..11].copy_from_slice(&self.rssi);
        bytes[12..14].copy_from_slice(&self.snr);
        bytes
    }
    pub fn length(&self) -> usize {
        (self.len & 0xfff) as usize
    }
    pub fn tid(&self) -> u8 {
        (self.len >> 12) as u8
    }
    pub fn sequence(&self) -> u16 {
        self.seq >> 4
    }
    pub fn fragment(&self) -> u8 {
        (self.seq & 0xf) as u8
    }
    pub fn phy_mode(&self) -> PhyMode {
        PhyMode::from_bits((self.phy >> PHY_MODE_SHIFT) as u8)
    }
    pub fn mcs(&self) -> u8 {
        (self.phy & PHY_MCS_MASK) as u8
    }
    pub fn bandwidth_40(&self) -> bool {
        check_bit!(self.phy, PHY_BW40)
    }
    pub fn short_gi(&self) -> bool {
        check_bit!(self.phy, PHY_SGI)
    }
    pub fn stbc(&self) -> bool {
        (self.phy >> PHY_STBC_SHIFT) & 0x3 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txwi_fields() {
        let mut txwi = TxWi {
            wcid: 7,
            xflags: TX_ACK,
            ..Default::default()
        };
        txwi.set_length(1500);
        txwi.set_pid(5);
        txwi.set_ampdu(4, 32);
        let bytes = txwi.to_bytes();
        assert_eq!(bytes[0], TX_AMPDU | 4 << 5);
        assert_eq!(bytes[4], TX_ACK | 32 << 2);
        assert_eq!(bytes[5], 7);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 5 << 12 | 1500);
        let parsed = TxWi::from_bytes(&bytes);
        assert_eq!(parsed.pid(), 5);
        assert_eq!(parsed.length(), 1500);
    }

    #[test]
    fn phy_field_encoding() {
        let params = PhyParams {
            mode: PhyMode::HtMixed,
            mcs: 15,
            bandwidth_40: true,
            short_gi: true,
            stbc: false,
            short_preamble: true,
            mimo_ps: false,
        };
        assert_eq!(encode_phy(&params), 2 << 14 | PHY_BW40 | PHY_SGI | 15);
        let cck = PhyParams {
            mode: PhyMode::Cck,
            mcs: 3,
            short_preamble: true,
            ..params
        };
        assert_eq!(encode_phy(&cck), PHY_BW40 | PHY_SGI | PHY_SHPRE | 3);
    }

    #[test]
    fn rxwi_accessors() {
        let mut bytes = [0u8; WI_SIZE];
        bytes[0] = 3;
        bytes[2..4].copy_from_slice(&(5u16 << 12 | 0x123).to_le_bytes());
        bytes[4..6].copy_from_slice(&(0x456u16 << 4 | 2).to_le_bytes());
        bytes[6..8].copy_from_slice(&(2u16 << 14 | 1 << 9 | PHY_BW40 | 9).to_le_bytes());
        bytes[8..11].copy_from_slice(&[30, 40, 50]);
        let rxwi = RxWi::from_bytes(&bytes);
        assert_eq!(rxwi.wcid, 3);
        assert_eq!(rxwi.length(), 0x123);
        assert_eq!(rxwi.tid(), 5);
        assert_eq!(rxwi.sequence(), 0x456);
        assert_eq!(rxwi.fragment(), 2);
        assert_eq!(rxwi.phy_mode(), PhyMode::HtMixed);
        assert_eq!(rxwi.mcs(), 9);
        assert!(rxwi.bandwidth_40() && rxwi.stbc() && !rxwi.short_gi());
        assert_eq!(rxwi.rssi, [30, 40, 50]);
        assert_eq!(rxwi.to_bytes(), bytes);
    }
}
