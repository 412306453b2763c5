//! Frame buffers.
//!
//! Outbound frames come from the MAC layer as a chain of fragments, of which the first one holds
//! at least the complete 802.11 header. Received frames are handed out as a single contiguous
//! buffer together with the metadata gathered from the RXWI and the RX descriptor.

use alloc::vec::Vec;

use ieee80211::{
    mac_parser::MACAddress,
    macro_bits::{bit, check_bit},
};

use crate::phy::PhyMode;

/// Frame types, as encoded in the frame control field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Management,
    Control,
    Data,
}

pub(crate) const FC1_TO_DS: u8 = bit!(0);
pub(crate) const FC1_FROM_DS: u8 = bit!(1);
pub(crate) const FC1_RETRY: u8 = bit!(3);
pub(crate) const FC1_PROTECTED: u8 = bit!(6);
pub(crate) const FC1_ORDER: u8 = bit!(7);

pub(crate) const SUBTYPE_PROBE_RESPONSE: u8 = 5;
pub(crate) const SUBTYPE_QOS: u8 = bit!(3);

/// Offset of the duration field.
pub(crate) const DURATION_OFFSET: usize = 2;
/// Offset of the sequence control field.
pub(crate) const SEQUENCE_OFFSET: usize = 22;

const QOS_ACK_POLICY_NO_ACK: u8 = 0b01 << 5;
const EAPOL_LLC_SNAP: [u8; 8] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8e];

/// The parsed 802.11 MAC header of a frame.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameHeader {
    pub kind: FrameKind,
    pub subtype: u8,
    pub flags: u8,
    pub length: usize,
    pub receiver: MACAddress,
    pub transmitter: Option<MACAddress>,
    /// The QoS control field, if present.
    pub qos: Option<u16>,
}
impl FrameHeader {
    /// Parse the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let fc0 = *bytes.first()?;
        let flags = *bytes.get(1)?;
        if fc0 & 0x3 != 0 {
            return None;
        }
        let subtype = fc0 >> 4;
        let kind = match (fc0 >> 2) & 0x3 {
            0 => FrameKind::Management,
            1 => FrameKind::Control,
            2 => FrameKind::Data,
            _ => return None,
        };
        let four_address = check_bit!(flags, FC1_TO_DS) && check_bit!(flags, FC1_FROM_DS);
        let is_qos = kind == FrameKind::Data && check_bit!(subtype, SUBTYPE_QOS);
        let length = match kind {
            FrameKind::Control => match subtype {
                // ACK and CTS only carry the receiver address.
                12 | 13 => 10,
                _ => 16,
            },
            FrameKind::Management => 24,
            FrameKind::Data => 24 + if four_address { 6 } else { 0 } + if is_qos { 2 } else { 0 },
        } + if check_bit!(flags, FC1_ORDER) && (is_qos || kind == FrameKind::Management) {
            4
        } else {
            0
        };
        if bytes.len() < length {
            return None;
        }
        let address_at = |offset: usize| {
            let mut address = [0u8; 6];
            address.copy_from_slice(&bytes[offset..offset + 6]);
            MACAddress::new(address)
        };
        let qos_offset = if four_address { 30 } else { 24 };
        Some(Self {
            kind,
            subtype,
            flags,
            length,
            receiver: address_at(4),
            transmitter: (length >= 16).then(|| address_at(10)),
            qos: is_qos.then(|| u16::from_le_bytes([bytes[qos_offset], bytes[qos_offset + 1]])),
        })
    }
    pub fn is_protected(&self) -> bool {
        check_bit!(self.flags, FC1_PROTECTED)
    }
    pub fn is_retry(&self) -> bool {
        check_bit!(self.flags, FC1_RETRY)
    }
    pub fn is_multicast(&self) -> bool {
        self.receiver.is_multicast()
    }
    pub fn is_probe_response(&self) -> bool {
        self.kind == FrameKind::Management && self.subtype == SUBTYPE_PROBE_RESPONSE
    }
    pub fn tid(&self) -> Option<u8> {
        self.qos.map(|qos| (qos & 0xf) as u8)
    }
    /// Check if the receiver is expected to acknowledge the frame.
    pub fn expects_ack(&self) -> bool {
        if self.is_multicast() || self.kind == FrameKind::Control {
            return false;
        }
        self.qos
            .is_none_or(|qos| (qos as u8) & (0b11 << 5) != QOS_ACK_POLICY_NO_ACK)
    }
    /// Length of the header padded to a multiple of four bytes.
    pub fn padded_length(&self) -> usize {
        self.length.next_multiple_of(4)
    }
}

/// A frame queued for transmission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundFrame {
    fragments: Vec<Vec<u8>>,
}
impl OutboundFrame {
    /// Create a frame from a contiguous buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self::from_fragments(alloc::vec![bytes])
    }
    /// Create a frame from a chain of fragments.
    ///
    /// The first fragment has to contain the complete MAC header.
    pub fn from_fragments(fragments: Vec<Vec<u8>>) -> Self {
        Self { fragments }
    }
    /// Total length of the frame in bytes.
    pub fn len(&self) -> usize {
        self.fragments.iter().map(Vec::len).sum()
    }
    /// Check if the frame has no contents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Amount of fragments in the chain.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
    /// The fragments of the frame.
    pub fn fragments(&self) -> impl Iterator<Item = &[u8]> {
        self.fragments.iter().map(Vec::as_slice)
    }
    /// The first fragment, which holds the MAC header.
    pub(crate) fn head(&self) -> &[u8] {
        self.fragments.first().map(Vec::as_slice).unwrap_or_default()
    }
    /// The fragments, with the first `skip` bytes of the head left out.
    pub(crate) fn body(&self, skip: usize) -> Vec<&[u8]> {
        self.fragments()
            .enumerate()
            .map(|(i, fragment)| {
                if i == 0 {
                    &fragment[skip.min(fragment.len())..]
                } else {
                    fragment
                }
            })
            .filter(|fragment| !fragment.is_empty())
            .collect()
    }
    /// Check if the frame is an EAPOL frame.
    pub(crate) fn is_eapol(&self, header: &FrameHeader) -> bool {
        header.kind == FrameKind::Data
            && self
                .head()
                .get(header.length..header.length + EAPOL_LLC_SNAP.len())
                .is_some_and(|llc| llc == EAPOL_LLC_SNAP)
    }
    /// Merge all fragments into one.
    ///
    /// Fails, if the merged buffer couldn't be allocated.
    pub(crate) fn linearize(&mut self) -> Result<(), ()> {
        if self.fragments.len() <= 1 {
            return Ok(());
        }
        let mut merged = Vec::new();
        merged.try_reserve_exact(self.len()).map_err(|_| ())?;
        for fragment in self.fragments.iter() {
            merged.extend_from_slice(fragment);
        }
        self.fragments.clear();
        self.fragments.push(merged);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Metadata of a received frame.
pub struct RxInfo {
    /// The signal strength of the strongest chain in dBm.
    pub rssi_dbm: i8,
    /// The PHY mode the frame was received with.
    pub phy_mode: PhyMode,
    /// The MCS the frame was received with.
    pub mcs: u8,
    /// The frame was received with 40 MHz bandwidth.
    pub bandwidth_40: bool,
    /// The frame was received with the short guard interval.
    pub short_gi: bool,
    /// The frame was received with STBC.
    pub stbc: bool,
    /// The per antenna SNR values reported by the hardware.
    pub snr: [u8; 2],
    /// The channel the frame was received on.
    pub channel: u8,
    /// The TID, as reported by the hardware.
    pub tid: u8,
    /// The sequence number.
    pub sequence: u16,
    /// The fragment number.
    pub fragment: u8,
    /// The frame was decrypted by the hardware.
    pub decrypted: bool,
    /// The frame was part of an A-MPDU.
    pub ampdu: bool,
    /// The frame contains an A-MSDU.
    pub amsdu: bool,
    /// The FCS check failed. Only ever set in promiscuous mode.
    pub crc_error: bool,
    /// Decryption failed. Only ever set in promiscuous mode.
    pub cipher_error: bool,
}

/// A received frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxFrame {
    data: Vec<u8>,
    info: RxInfo,
}
impl RxFrame {
    pub(crate) fn new(data: Vec<u8>, info: RxInfo) -> Self {
        Self { data, info }
    }
    /// The MPDU, starting with the MAC header.
    pub fn mpdu(&self) -> &[u8] {
        &self.data
    }
    /// The metadata of the frame.
    pub fn info(&self) -> &RxInfo {
        &self.info
    }
    /// Take the buffer out of the frame.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}
