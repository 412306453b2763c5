//! The interface to the host bus.
//!
//! The RT2860 is a bus master, which reads its descriptors from memory shared with the CPU and
//! DMAs frames in and out of buffers mapped for it. Everything the core needs from the host for
//! this is collected in [Bus].

use alloc::vec::Vec;

use crate::MAX_SCATTER;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// An error reported by the host bus.
pub enum BusError {
    /// The bus resources (register window, bus mastering) couldn't be acquired.
    ResourceUnavailable,
    /// No coherent memory of the requested size could be allocated.
    NoCoherentMemory,
    /// The interrupt handler couldn't be registered.
    InterruptSetup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// An error, which occurred while mapping a buffer for DMA.
pub enum DmaError {
    /// The buffers would need more than [MAX_SCATTER] segments.
    TooManySegments,
    /// The bus ran out of mapping resources.
    NoResources,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// A contiguous piece of memory, as seen by the device.
pub struct DmaSegment {
    /// The bus address of the segment.
    pub address: u32,
    /// The length of the segment in bytes.
    pub length: u16,
}

/// The segments a buffer was mapped into.
pub type ScatterList = heapless::Vec<DmaSegment, MAX_SCATTER>;

#[derive(Debug, PartialEq, Eq)]
/// A block of memory, which is visible to both the CPU and the device without any
/// synchronization.
///
/// The contents are only accessed through [Bus::read_coherent] and [Bus::write_coherent].
pub struct CoherentRegion {
    /// The bus address of the region.
    pub address: u32,
    /// The length of the region in bytes.
    pub length: usize,
    /// An opaque handle chosen by the bus implementation.
    pub handle: usize,
}

/// The host bus, the RT2860 is attached to.
///
/// Register offsets are relative to the start of the memory mapped register window. All methods
/// may be called from interrupt context, except for the allocation functions and
/// [Bus::delay_us].
pub trait Bus: Sync {
    /// Acquire the bus resources, i.e. map the register window and enable bus mastering.
    fn acquire(&self) -> Result<(), BusError>;
    /// Release all resources acquired with [Bus::acquire].
    fn release(&self);

    /// Read a 32-bit register.
    fn read32(&self, offset: u32) -> u32;
    /// Write a 32-bit register.
    fn write32(&self, offset: u32, value: u32);
    /// Read an 8-bit register.
    fn read8(&self, offset: u32) -> u8 {
        (self.read32(offset & !3) >> ((offset & 3) * 8)) as u8
    }
    /// Write an 8-bit register.
    fn write8(&self, offset: u32, value: u8) {
        let shift = (offset & 3) * 8;
        let word = self.read32(offset & !3) & !(0xff << shift);
        self.write32(offset & !3, word | (value as u32) << shift);
    }
    /// Busy wait for `us` microseconds.
    fn delay_us(&self, us: u32);

    /// Allocate a zeroed block of coherent memory.
    fn alloc_coherent(&self, length: usize) -> Result<CoherentRegion, BusError>;
    /// Free a block of coherent memory.
    fn free_coherent(&self, region: CoherentRegion);
    /// Copy data out of a coherent region.
    fn read_coherent(&self, region: &CoherentRegion, offset: usize, buffer: &mut [u8]);
    /// Copy data into a coherent region.
    fn write_coherent(&self, region: &CoherentRegion, offset: usize, data: &[u8]);

    /// Map the buffers for the device to read from.
    ///
    /// Empty buffers don't produce a segment. If more than [MAX_SCATTER] segments would be
    /// required, [DmaError::TooManySegments] is returned.
    fn dma_map(&self, buffers: &[&[u8]]) -> Result<ScatterList, DmaError>;
    /// Map a buffer for the device to write into.
    fn dma_map_rx(&self, buffer: &mut [u8]) -> Result<DmaSegment, DmaError>;
    /// Unmap segments previously returned by [Bus::dma_map] or [Bus::dma_map_rx].
    fn dma_unmap(&self, segments: &[DmaSegment]);
    /// Make data written by the device to `segment` visible in `buffer`.
    fn dma_sync_for_cpu(&self, segment: &DmaSegment, buffer: &mut [u8]);

    /// Allocate a buffer of `length` zeroed bytes.
    ///
    /// Returns [None] if the allocation failed.
    fn alloc_buffer(&self, length: usize) -> Option<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(length).ok()?;
        buffer.resize(length, 0);
        Some(buffer)
    }

    /// Register [Device::handle_interrupt](crate::Device::handle_interrupt) as the interrupt
    /// handler of the device.
    fn setup_interrupt(&self) -> Result<(), BusError>;
    /// Unregister the interrupt handler.
    fn teardown_interrupt(&self);
}
