//! Peers, as far as the data path is concerned.

use core::{array, sync::atomic::Ordering};

use alloc::sync::Arc;
use ieee80211::mac_parser::MACAddress;
use portable_atomic::AtomicU8;

use crate::{locked, phy::Rate, station::WCID_NONE, CsMutex};

/// Amount of traffic identifiers, which can have an aggregation session.
pub const TID_COUNT: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The channel width negotiated with a peer.
pub enum Bandwidth {
    #[default]
    /// 20 MHz.
    Mhz20,
    /// 40 MHz.
    Mhz40,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The spatial multiplexing power save mode of a peer.
pub enum SmPowerSave {
    #[default]
    /// All receive chains are active.
    Disabled,
    /// Only a single receive chain is active.
    Static,
    /// The peer enables its other chains after receiving an RTS.
    Dynamic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The HT capabilities negotiated with a peer.
pub struct HtCapabilities {
    /// The peer is HT capable.
    pub ht: bool,
    /// The negotiated bandwidth.
    pub bandwidth: Bandwidth,
    /// The peer supports the short guard interval at 20 MHz.
    pub short_gi_20: bool,
    /// The peer supports the short guard interval at 40 MHz.
    pub short_gi_40: bool,
    /// The peer can receive STBC.
    pub rx_stbc: bool,
    /// The peer supports HT greenfield.
    pub greenfield: bool,
    /// The SM power save mode of the peer.
    pub sm_power_save: SmPowerSave,
    /// The minimum MPDU start spacing of the peer, in the encoding of the HT capabilities.
    pub mpdu_density: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// An active transmit aggregation session.
pub struct AggregationSession {
    /// The block ack window size.
    pub window_size: u8,
    /// The MPDU density used for the A-MPDUs.
    pub mpdu_density: u8,
    /// The sequence number of the next MPDU sent within the session.
    pub next_sequence: u16,
}

/// A shared reference to a [Node].
pub type NodeRef = Arc<Node>;

/// A peer station.
///
/// Nodes are created by the MAC layer and handed to the core as [NodeRef]s. The core keeps a
/// reference for every frame, that was queued for transmission to the node.
pub struct Node {
    address: MACAddress,
    association_id: u16,
    station_id: AtomicU8,
    current_rate: AtomicU8,
    ht_capabilities: HtCapabilities,
    aggregation_sessions: CsMutex<[Option<AggregationSession>; TID_COUNT]>,
}
impl Node {
    /// Create a new node.
    pub fn new(address: MACAddress, association_id: u16, ht_capabilities: HtCapabilities) -> Self {
        Self {
            address,
            association_id,
            station_id: AtomicU8::new(WCID_NONE),
            current_rate: AtomicU8::new(Rate::Legacy(2).to_raw()),
            ht_capabilities,
            aggregation_sessions: CsMutex::new(core::cell::RefCell::new(array::from_fn(|_| None))),
        }
    }
    /// The MAC address of the node.
    pub fn address(&self) -> MACAddress {
        self.address
    }
    /// The association ID of the node.
    pub fn association_id(&self) -> u16 {
        self.association_id
    }
    /// The hardware station table slot (WCID) of the node.
    ///
    /// This is `255` if the node has no slot.
    pub fn station_id(&self) -> u8 {
        self.station_id.load(Ordering::Relaxed)
    }
    /// Set the hardware station table slot.
    pub fn set_station_id(&self, station_id: u8) {
        self.station_id.store(station_id, Ordering::Relaxed);
    }
    /// The rate currently chosen by rate control.
    pub fn current_rate(&self) -> Rate {
        Rate::from_raw(self.current_rate.load(Ordering::Relaxed))
    }
    /// Set the rate used for unicast data to this node.
    pub fn set_current_rate(&self, rate: Rate) {
        self.current_rate.store(rate.to_raw(), Ordering::Relaxed);
    }
    /// The negotiated HT capabilities.
    pub fn ht_capabilities(&self) -> &HtCapabilities {
        &self.ht_capabilities
    }
    /// The transmit aggregation session for `tid`, if one is active.
    pub fn aggregation_session(&self, tid: u8) -> Option<AggregationSession> {
        locked(&self.aggregation_sessions, |sessions| {
            sessions.get(tid as usize).copied().flatten()
        })
    }
    /// Replace the aggregation session of `tid`.
    ///
    /// Returns the previous session.
    pub(crate) fn replace_aggregation_session(
        &self,
        tid: u8,
        session: Option<AggregationSession>,
    ) -> Option<AggregationSession> {
        locked(&self.aggregation_sessions, |sessions| {
            sessions
                .get_mut(tid as usize)
                .and_then(|slot| core::mem::replace(slot, session))
        })
    }
    /// Take the next sequence number of the session for `tid`.
    pub(crate) fn next_ampdu_sequence(&self, tid: u8) -> Option<(AggregationSession, u16)> {
        locked(&self.aggregation_sessions, |sessions| {
            let session = sessions.get_mut(tid as usize)?.as_mut()?;
            let sequence = session.next_sequence;
            session.next_sequence = (sequence + 1) & 0xfff;
            Some((*session, sequence))
        })
    }
}
impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("association_id", &self.association_id)
            .field("station_id", &self.station_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new(MACAddress::new([2, 0, 0, 0, 0, 1]), 1, HtCapabilities::default())
    }

    #[test]
    fn sequence_numbers_wrap() {
        let node = node();
        assert_eq!(node.next_ampdu_sequence(0), None);
        node.replace_aggregation_session(
            0,
            Some(AggregationSession {
                window_size: 64,
                mpdu_density: 0,
                next_sequence: 0xffe,
            }),
        );
        assert_eq!(node.next_ampdu_sequence(0).map(|(_, seq)| seq), Some(0xffe));
        assert_eq!(node.next_ampdu_sequence(0).map(|(_, seq)| seq), Some(0xfff));
        assert_eq!(node.next_ampdu_sequence(0).map(|(_, seq)| seq), Some(0));
        assert_eq!(node.next_ampdu_sequence(1), None);
        assert!(node.replace_aggregation_session(0, None).is_some());
        assert_eq!(node.aggregation_session(0), None);
        assert_eq!(node.aggregation_session(9), None);
    }

    #[test]
    fn fresh_node_has_no_station() {
        let node = node();
        assert_eq!(node.station_id(), WCID_NONE);
        node.set_current_rate(Rate::Ht(4));
        assert_eq!(node.current_rate(), Rate::Ht(4));
    }
}
