#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
//! # rt2860
//! A data- and control-path core for the Ralink RT2860 family of IEEE 802.11n PCI chipsets.
//!
//! The crate implements everything between the bus and the 802.11 MAC layer: DMA ring
//! management, interrupt dispatch, the transmit and receive pipelines, deferred task scheduling
//! and the device lifecycle. It doesn't implement any MAC layer functionality itself
//! (association, key negotiation, rate control policy or beacon construction), but calls into a
//! [MacLayer] supplied by the user.
//!
//! ## Structure
//! All state is owned by a single [Device]. The bus, DMA and interrupt plumbing of the host is
//! abstracted through the [Bus] trait, so the core runs on anything that can map memory for the
//! RT2860 to access.
//!
//! Component | Module | Description
//! -- | -- | --
//! Register I/O | `io` | MAC register access and the indirect BBP, RF and MCU protocols.
//! DMA rings | `ring` | Descriptor rings shared with the hardware. One RX ring and six TX rings.
//! Transmit path | `tx` | TXWI construction, descriptor chains and doorbells.
//! Receive path | `rx` | Validation and delivery of received frames and buffer recycling.
//! Interrupt dispatch | `intr` | Decodes the interrupt status and defers the data path work.
//! Deferred tasks | `task` | A serialized work queue, which is driven by the [DeviceRunner].
//! Periodic work | `periodic` | Hardware counters, receiver gain tuning and the TX watchdog.
//! Station table | `station` | WCID assignment and aggregation sessions.
//! Lifecycle | `device` | Attach, init, stop and detach.
//!
//! ## Usage
//! After constructing a [Device], call [Device::attach] and [Device::init]. The interrupt handler
//! of the host has to call [Device::handle_interrupt] and a [DeviceRunner] has to be polled for
//! the deferred work and timers to run.
//!
//! ## Configuration
//! The ring sizes and some other limits are configured at compile time through `esp-config`.
//!
//! Option | Default
//! -- | --
//! `RT2860_CONFIG_RX_RING_COUNT` | 128
//! `RT2860_CONFIG_TX_RING_COUNT` | 256
//! `RT2860_CONFIG_MAX_SCATTER` | 10
//! `RT2860_CONFIG_RX_PROCESS_LIMIT` | 100
//! `RT2860_CONFIG_OUTPUT_QUEUE_LEN` | 64
//! `RT2860_CONFIG_RX_BUFFER_SIZE` | 4096

use core::cell::RefCell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use esp_config::esp_config_int;

#[macro_use]
extern crate defmt_or_log;
extern crate alloc;

mod bus;
mod config;
mod device;
mod frame;
mod intr;
mod io;
mod mac;
mod node;
mod periodic;
mod phy;
mod regs;
mod ring;
mod runner;
mod rx;
mod station;
mod stats;
mod task;
mod tx;
mod wi;

#[cfg(test)]
mod testing;

pub use bus::{Bus, BusError, CoherentRegion, DmaError, DmaSegment, ScatterList};
pub use config::{Calibration, DeviceConfig};
pub use device::{Device, DeviceError, DeviceState, WaitTarget};
pub use frame::{OutboundFrame, RxFrame, RxInfo};
pub use mac::{MacLayer, RxTarget, TxCompletion, TxStatus};
pub use node::{
    AggregationSession, Bandwidth, HtCapabilities, Node, NodeRef, SmPowerSave, TID_COUNT,
};
pub use phy::{derive_phy_params, PhyMode, PhyParams, Rate};
pub use ring::RingError;
pub use runner::DeviceRunner;
pub use stats::Stats;
pub use tx::{TxError, TxFailure, TxQueue};

/// Amount of descriptors in the RX ring.
pub const RX_RING_COUNT: usize = esp_config_int!(usize, "RT2860_CONFIG_RX_RING_COUNT");
/// Amount of descriptors in every TX ring.
pub const TX_RING_COUNT: usize = esp_config_int!(usize, "RT2860_CONFIG_TX_RING_COUNT");
/// Maximum amount of DMA segments a TX payload may be mapped into.
pub const MAX_SCATTER: usize = esp_config_int!(usize, "RT2860_CONFIG_MAX_SCATTER");
/// The default amount of RX descriptors handled per RX done task invocation.
pub const RX_PROCESS_LIMIT: usize = esp_config_int!(usize, "RT2860_CONFIG_RX_PROCESS_LIMIT");
/// Amount of frames the software output queue can hold.
pub const OUTPUT_QUEUE_LEN: usize = esp_config_int!(usize, "RT2860_CONFIG_OUTPUT_QUEUE_LEN");
/// Size of a single RX buffer in bytes.
pub const RX_BUFFER_SIZE: usize = esp_config_int!(usize, "RT2860_CONFIG_RX_BUFFER_SIZE");

// Descriptor indices are 12 bit wide and segment lengths 14 bit.
const _: () = assert!(RX_RING_COUNT > 2 && RX_RING_COUNT < 0x1000);
const _: () = assert!(TX_RING_COUNT > 2 && TX_RING_COUNT < 0x1000);
const _: () = assert!(RX_BUFFER_SIZE < 0x4000);

/// A lock, which may be taken from interrupt context.
pub(crate) type CsMutex<T> = CriticalSectionMutex<RefCell<T>>;

/// Run `f` with exclusive access to the contents of `mutex`.
///
/// The closure must not lock the same mutex again.
pub(crate) fn locked<T, R>(mutex: &CsMutex<T>, f: impl FnOnce(&mut T) -> R) -> R {
    mutex.lock(|cell| f(&mut cell.borrow_mut()))
}
