use ieee80211::mac_parser::MACAddress;

use crate::{phy::Rate, RX_PROCESS_LIMIT};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Runtime configuration of a [Device](crate::Device).
pub struct DeviceConfig {
    /// Deliver frames, which failed validation, instead of dropping them.
    pub promiscuous: bool,
    /// The rate used for multicast frames.
    pub multicast_rate: Rate,
    /// The rate used for management frames and EAPOL.
    pub management_rate: Rate,
    /// If set, unicast data is always sent at this rate, instead of the rate chosen by rate
    /// control.
    pub fixed_rate: Option<Rate>,
    /// Allow transmitting with STBC.
    pub stbc: bool,
    /// Allow transmitting with the short guard interval.
    pub short_gi: bool,
    /// Use the short preamble for CCK rates above 1 Mbit/s.
    pub short_preamble: bool,
    /// Allow transmitting in HT greenfield mode.
    pub greenfield: bool,
    /// Amount of transmit chains.
    pub tx_chains: u8,
    /// Amount of receive chains.
    pub rx_chains: u8,
    /// Amount of RX descriptors handled per RX done task invocation.
    pub rx_process_limit: usize,
}
impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            promiscuous: false,
            multicast_rate: Rate::Legacy(2),
            management_rate: Rate::Legacy(2),
            fixed_rate: None,
            stbc: false,
            short_gi: false,
            short_preamble: false,
            greenfield: false,
            tx_chains: 1,
            rx_chains: 1,
            rx_process_limit: RX_PROCESS_LIMIT,
        }
    }
}

#[derive(Clone, Debug)]
/// Calibration data read from the EEPROM.
pub struct Calibration {
    /// The MAC address of the device.
    pub mac_address: MACAddress,
    /// Per chain RSSI offsets for the 2.4 GHz band.
    pub rssi_2ghz: [i8; 3],
    /// Per chain RSSI offsets for the 5 GHz band.
    pub rssi_5ghz: [i8; 3],
    /// LNA gains for the 2.4 GHz band and the three 5 GHz sub-bands.
    pub lna: [i8; 4],
    /// Vendor specific BBP register values, written after the defaults.
    pub bbp_overrides: heapless::Vec<(u8, u8), 8>,
    /// The RF register values R1 to R4 for every supported channel.
    pub rf_channels: heapless::Vec<(u8, [u32; 4]), 48>,
}
impl Default for Calibration {
    fn default() -> Self {
        Self {
            mac_address: MACAddress::new([0x00, 0x0c, 0x43, 0x28, 0x60, 0x00]),
            rssi_2ghz: [0; 3],
            rssi_5ghz: [0; 3],
            lna: [0; 4],
            bbp_overrides: heapless::Vec::new(),
            rf_channels: heapless::Vec::new(),
        }
    }
}
