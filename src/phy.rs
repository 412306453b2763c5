//! Rates and PHY parameters.

use crate::{
    config::DeviceConfig,
    node::{Bandwidth, HtCapabilities, SmPowerSave},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// A transmit rate.
pub enum Rate {
    /// A legacy (CCK or OFDM) rate in units of 500 kbit/s.
    Legacy(u8),
    /// An HT MCS index.
    Ht(u8),
}
impl Rate {
    const HT_FLAG: u8 = 0x80;

    /// Decode a rate from its net80211 style byte representation.
    ///
    /// HT rates have the upper bit set.
    pub const fn from_raw(raw: u8) -> Self {
        if raw & Self::HT_FLAG != 0 {
            Self::Ht(raw & !Self::HT_FLAG)
        } else {
            Self::Legacy(raw)
        }
    }
    /// Encode the rate into a single byte.
    pub const fn to_raw(self) -> u8 {
        match self {
            Self::Legacy(rate) => rate & !Self::HT_FLAG,
            Self::Ht(mcs) => mcs | Self::HT_FLAG,
        }
    }
    /// Check if this is a CCK rate.
    pub const fn is_cck(self) -> bool {
        matches!(self, Self::Legacy(2 | 4 | 11 | 22))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// The PHY mode of a frame, using the hardware encoding.
pub enum PhyMode {
    /// DSSS/CCK.
    Cck = 0,
    /// Legacy OFDM.
    Ofdm = 1,
    /// HT mixed mode.
    HtMixed = 2,
    /// HT greenfield.
    HtGreenfield = 3,
}
impl PhyMode {
    /// Decode the two bit mode field.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::Cck,
            1 => Self::Ofdm,
            2 => Self::HtMixed,
            _ => Self::HtGreenfield,
        }
    }
    /// Check if this is one of the HT modes.
    pub const fn is_ht(self) -> bool {
        matches!(self, Self::HtMixed | Self::HtGreenfield)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The parameters, a frame is transmitted with.
pub struct PhyParams {
    /// The PHY mode.
    pub mode: PhyMode,
    /// The MCS. For legacy modes this is the index into the rate table of the modulation.
    pub mcs: u8,
    /// Transmit with 40 MHz bandwidth.
    pub bandwidth_40: bool,
    /// Use the short guard interval.
    pub short_gi: bool,
    /// Use space time block coding.
    pub stbc: bool,
    /// Use the short preamble. Only relevant for CCK.
    pub short_preamble: bool,
    /// The receiver is in dynamic SM power save and has to be woken up with RTS/CTS.
    pub mimo_ps: bool,
}

/// CCK rates in 500 kbit/s, indexed by MCS.
const CCK_RATES: [u8; 4] = [2, 4, 11, 22];
/// OFDM rates in 500 kbit/s, indexed by MCS.
const OFDM_RATES: [u8; 8] = [12, 18, 24, 36, 48, 72, 96, 108];

/// Map a legacy rate in 500 kbit/s to the MCS of its modulation.
pub(crate) fn rate2mcs(rate: u8) -> Option<u8> {
    CCK_RATES
        .iter()
        .chain(OFDM_RATES.iter())
        .position(|r| *r == rate)
        .map(|index| {
            if index < CCK_RATES.len() {
                index as u8
            } else {
                (index - CCK_RATES.len()) as u8
            }
        })
}

/// The legacy rate of a CCK or OFDM frame, in 500 kbit/s.
pub(crate) fn legacy_rate(params: &PhyParams) -> Option<u8> {
    match params.mode {
        PhyMode::Cck => CCK_RATES.get(params.mcs as usize).copied(),
        PhyMode::Ofdm => OFDM_RATES.get(params.mcs as usize).copied(),
        _ => None,
    }
}

/// Determine the PHY parameters for transmitting at `rate` to a peer with `caps`.
///
/// HT rates towards a peer, that isn't HT capable, fall back to 6 Mbit/s OFDM. Unknown legacy
/// rates are treated the same way.
pub fn derive_phy_params(rate: Rate, caps: &HtCapabilities, config: &DeviceConfig) -> PhyParams {
    let legacy = |mode, mcs, short_preamble| PhyParams {
        mode,
        mcs,
        bandwidth_40: false,
        short_gi: false,
        stbc: false,
        short_preamble,
        mimo_ps: false,
    };
    match rate {
        Rate::Legacy(rate) if Rate::Legacy(rate).is_cck() => {
            let mcs = rate2mcs(rate).unwrap_or_default();
            // 1 Mbit/s is always sent with the long preamble.
            legacy(PhyMode::Cck, mcs, config.short_preamble && rate != 2)
        }
        Rate::Legacy(rate) => legacy(PhyMode::Ofdm, rate2mcs(rate).unwrap_or_default(), false),
        Rate::Ht(_) if !caps.ht => legacy(PhyMode::Ofdm, 0, false),
        Rate::Ht(mcs) => {
            let mcs = if caps.sm_power_save == SmPowerSave::Static {
                mcs.min(7)
            } else {
                mcs
            };
            let bandwidth_40 = caps.bandwidth == Bandwidth::Mhz40;
            let short_gi = config.short_gi
                && if bandwidth_40 {
                    caps.short_gi_40
                } else {
                    caps.short_gi_20
                };
            PhyParams {
                mode: if config.greenfield && caps.greenfield {
                    PhyMode::HtGreenfield
                } else {
                    PhyMode::HtMixed
                },
                mcs,
                bandwidth_40,
                short_gi,
                stbc: config.stbc && mcs <= 7 && caps.rx_stbc && config.tx_chains > 1,
                short_preamble: false,
                mimo_ps: caps.sm_power_save == SmPowerSave::Dynamic,
            }
        }
    }
}

const SIFS_CCK: u16 = 10;
const SIFS_OFDM: u16 = 16;
const ACK_LENGTH: u32 = 14;

/// The rate a control response to a frame sent at `rate` is sent with.
fn control_response_rate(rate: u8) -> u8 {
    match rate {
        2 => 2,
        4 | 11 | 22 => 4,
        12 | 18 => 12,
        24 | 36 => 24,
        _ => 48,
    }
}

/// The air time of an ACK at `rate`, including the SIFS preceding it.
fn ack_time(rate: u8, short_preamble: bool) -> u16 {
    let bits = ACK_LENGTH * 8;
    if Rate::Legacy(rate).is_cck() {
        // Long preamble and PLCP header take 192us, the short ones half of that.
        let preamble = if short_preamble && rate != 2 { 96 } else { 192 };
        SIFS_CCK + preamble + (bits * 2).div_ceil(rate as u32) as u16
    } else {
        // 16 service bits and 6 tail bits are added to the PSDU.
        let bits_per_symbol = rate as u32 * 2;
        let symbols = (16 + bits + 6).div_ceil(bits_per_symbol) as u16;
        SIFS_OFDM + 16 + 4 + symbols * 4
    }
}

/// The value of the duration field of a unicast frame, which expects an ACK.
pub(crate) fn ack_duration(params: &PhyParams) -> u16 {
    match legacy_rate(params) {
        // SIFS + preamble + signal + one symbol for the ACK.
        None => 16 + 4 + 6 + 10,
        Some(rate) => ack_time(control_response_rate(rate), params.short_preamble),
    }
}

/// The amount of retries the hardware made before transmitting a frame.
///
/// The packet ID of a frame is set to its initial MCS plus one and the hardware reports the MCS
/// it finally used, so the difference is the amount of rate fallbacks.
pub(crate) fn retry_count(pid: u8, mcs: u8) -> u8 {
    pid.saturating_sub(mcs.saturating_add(1))
}

/// The packet ID used for a frame sent with `mcs`.
pub(crate) fn packet_id(mcs: u8) -> u8 {
    if mcs < 15 { mcs + 1 } else { mcs }
}
