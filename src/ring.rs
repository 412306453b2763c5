//! DMA descriptor rings.
//!
//! A ring is a block of descriptors in coherent memory, which the RT2860 walks, and a parallel
//! array of software slots, which holds whatever belongs to a descriptor while the hardware owns
//! it. TX rings hold at most one outbound frame per slot, which is bound to the last descriptor
//! the frame occupies. The RX ring keeps a mapped buffer in every slot at all times.

use alloc::vec::Vec;

use ieee80211::macro_bits::{bit, check_bit};

use crate::bus::{Bus, BusError, CoherentRegion};

/// Size of a TX or RX descriptor in bytes.
pub(crate) const DESCRIPTOR_SIZE: usize = 16;

/// The hardware finished processing the descriptor.
pub(crate) const SDL0_DDONE: u16 = bit!(15);
/// The first segment of the descriptor is the last segment of the frame.
pub(crate) const SDL0_LAST_SEGMENT: u16 = bit!(14);
/// The second segment of the descriptor is the last segment of the frame.
pub(crate) const SDL1_LAST_SEGMENT: u16 = bit!(14);
/// Mask of the length part of `sdl0` and `sdl1`.
#[cfg(test)]
pub(crate) const SDL_LENGTH_MASK: u16 = 0x3fff;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// A descriptor, as it's laid out in memory.
///
/// TX and RX descriptors share this layout. A TX descriptor names up to two segments, while an
/// RX descriptor only uses the first one.
pub(crate) struct Descriptor {
    pub sdp0: u32,
    pub sdl1: u16,
    pub sdl0: u16,
    pub sdp1: u32,
    pub flags: u32,
}
impl Descriptor {
    pub fn from_bytes(bytes: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let u32_at = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };
        Self {
            sdp0: u32_at(0),
            sdl1: u16::from_le_bytes([bytes[4], bytes[5]]),
            sdl0: u16::from_le_bytes([bytes[6], bytes[7]]),
            sdp1: u32_at(8),
            flags: u32_at(12),
        }
    }
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        bytes[0..4].copy_from_slice(&self.sdp0.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.sdl1.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.sdl0.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.sdp1.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.flags.to_le_bytes());
        bytes
    }
    pub fn is_done(&self) -> bool {
        check_bit!(self.sdl0, SDL0_DDONE)
    }
    /// Length of the first segment.
    #[cfg(test)]
    pub fn length0(&self) -> u16 {
        self.sdl0 & SDL_LENGTH_MASK
    }
    /// Length of the second segment.
    #[cfg(test)]
    pub fn length1(&self) -> u16 {
        self.sdl1 & SDL_LENGTH_MASK
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// An error related to a DMA ring.
pub enum RingError {
    /// The software slots couldn't be allocated.
    OutOfMemory,
    /// The bus couldn't provide the memory for the descriptors.
    Bus(BusError),
    /// Not enough descriptors are free.
    RingFull,
}
impl From<BusError> for RingError {
    fn from(value: BusError) -> Self {
        Self::Bus(value)
    }
}

/// A descriptor ring with software slots of type `S`.
pub(crate) struct Ring<S> {
    region: CoherentRegion,
    slots: Vec<Option<S>>,
    produce: usize,
    consume: usize,
    queued: usize,
}
impl<S> Ring<S> {
    /// The amount of descriptors, which are never handed out.
    ///
    /// This keeps the producer from catching up with the consumer, so that a full ring can be
    /// told apart from an empty one by the indices alone.
    pub const RESERVED_SLACK: usize = 2;

    /// Allocate a ring with `capacity` descriptors.
    pub fn allocate<B: Bus + ?Sized>(bus: &B, capacity: usize) -> Result<Self, RingError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| RingError::OutOfMemory)?;
        slots.resize_with(capacity, || None);
        let region = bus.alloc_coherent(capacity * DESCRIPTOR_SIZE)?;
        trace!(
            "Allocated ring with {} descriptors at {:#x}.",
            capacity,
            region.address
        );
        Ok(Self {
            region,
            slots,
            produce: 0,
            consume: 0,
            queued: 0,
        })
    }
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
    /// The bus address of the first descriptor.
    pub fn base_address(&self) -> u32 {
        self.region.address
    }
    pub fn produce_index(&self) -> usize {
        self.produce
    }
    pub fn consume_index(&self) -> usize {
        self.consume
    }
    pub fn queued(&self) -> usize {
        self.queued
    }
    #[cfg(test)]
    pub fn is_full(&self) -> bool {
        self.queued == self.capacity().saturating_sub(Self::RESERVED_SLACK)
    }
    /// The index following `index`.
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    pub fn read_descriptor<B: Bus + ?Sized>(&self, bus: &B, index: usize) -> Descriptor {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        bus.read_coherent(&self.region, index * DESCRIPTOR_SIZE, &mut bytes);
        Descriptor::from_bytes(&bytes)
    }
    pub fn write_descriptor<B: Bus + ?Sized>(
        &self,
        bus: &B,
        index: usize,
        descriptor: &Descriptor,
    ) {
        bus.write_coherent(
            &self.region,
            index * DESCRIPTOR_SIZE,
            &descriptor.to_bytes(),
        );
    }
    pub fn slot_mut(&mut self, index: usize) -> &mut Option<S> {
        &mut self.slots[index]
    }

    /// Reserve `count` descriptors at the producer index.
    ///
    /// Returns the index of the first reserved descriptor. If not enough descriptors are free,
    /// the ring is left untouched.
    pub fn try_reserve(&mut self, count: usize) -> Result<usize, RingError> {
        if self.queued + count > self.capacity().saturating_sub(Self::RESERVED_SLACK) {
            return Err(RingError::RingFull);
        }
        let start = self.produce;
        self.produce = (self.produce + count) % self.capacity();
        self.queued += count;
        Ok(start)
    }
    /// Hand the descriptor at the consumer index back to software.
    ///
    /// Returns the contents of its slot, if any.
    pub fn advance_consumer(&mut self) -> Option<S> {
        if self.queued == 0 {
            return None;
        }
        let slot = self.slots[self.consume].take();
        self.consume = self.next_index(self.consume);
        self.queued -= 1;
        slot
    }
    /// Move the cursor of a ring, which is filled by the hardware.
    ///
    /// The producer and consumer index of such a ring always coincide.
    pub fn advance_cursor(&mut self) {
        self.consume = self.next_index(self.consume);
        self.produce = self.consume;
    }

    fn rewind<B: Bus + ?Sized>(&mut self, bus: &B) {
        for index in 0..self.capacity() {
            let mut descriptor = self.read_descriptor(bus, index);
            descriptor.sdl0 &= !SDL0_DDONE;
            self.write_descriptor(bus, index, &descriptor);
        }
        self.produce = 0;
        self.consume = 0;
        self.queued = 0;
    }
    /// Clear the done flag of all descriptors, zero the indices and hand back every occupied slot.
    pub fn reset_and_reclaim<B: Bus + ?Sized>(&mut self, bus: &B) -> Vec<S> {
        self.rewind(bus);
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
    /// Clear the done flag of all descriptors and zero the indices, keeping the slots in place.
    pub fn reset_in_place<B: Bus + ?Sized>(&mut self, bus: &B) {
        self.rewind(bus);
    }
    /// Free the descriptor memory.
    ///
    /// Returns whatever was still left in the slots.
    pub fn free<B: Bus + ?Sized>(self, bus: &B) -> Vec<S> {
        bus.free_coherent(self.region);
        self.slots.into_iter().flatten().collect()
    }
}
