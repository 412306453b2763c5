//! The interface to the 802.11 MAC layer.

use ieee80211::mac_parser::MACAddress;

use crate::{
    frame::{OutboundFrame, RxFrame},
    node::NodeRef,
    tx::TxQueue,
};

/// The recipient of a received frame.
#[derive(Clone, Debug)]
pub enum RxTarget {
    /// The frame was sent by a known node.
    Node(NodeRef),
    /// The transmitter is unknown, so the frame is handed to every interested party.
    Broadcast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// What happened to a frame queued for transmission.
pub enum TxCompletion {
    /// The hardware processed the frame.
    Transmitted,
    /// The frame was dropped, because the ring was reset.
    Flushed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The outcome of a transmission, as reported by the TX status FIFO.
pub struct TxStatus {
    /// The frame was acknowledged, or didn't require an acknowledgement.
    pub success: bool,
    /// Amount of retries at a lower rate.
    pub retries: u8,
    /// The MCS the frame was finally sent with.
    pub mcs: u8,
    /// The frame was part of an A-MPDU.
    pub aggregated: bool,
}

/// The MAC layer, which sits on top of the core.
///
/// All methods are called from the deferred task context, never from interrupt context.
pub trait MacLayer: Sync {
    /// Hand a received frame to the MAC layer.
    ///
    /// `rssi` is the signal strength relative to `noise_floor`, in units of 0.5 dB.
    fn deliver_frame(&self, target: RxTarget, frame: RxFrame, rssi: u8, noise_floor: i8);
    /// A TKIP Michael MIC failure was detected for a received frame.
    fn notify_mic_failure(&self, node: Option<&NodeRef>, mpdu: &[u8], key_index: u8);
    /// Look up a node by its MAC address.
    fn find_node(&self, address: &MACAddress) -> Option<NodeRef>;
    /// A frame queued with [Device::transmit](crate::Device::transmit) left the ring.
    fn tx_complete(
        &self,
        queue: TxQueue,
        frame: OutboundFrame,
        node: NodeRef,
        completion: TxCompletion,
    );
    /// Feed the outcome of a transmission into rate control.
    fn rate_control_tx_status(&self, node: &NodeRef, status: TxStatus);
    /// Let rate control choose a new rate for `node`.
    ///
    /// This is called once a second for every node in the station table.
    fn rate_control_update(&self, node: &NodeRef);
}
