//! DMA descriptor ring and line buffers.
//!
//! Two line buffers of [`BUFFER_SLOT_COUNT`] slots each are sent by a closed
//! ring of `2 * TOTAL_PERIOD_COUNT` descriptors. Within one buffer the
//! descriptors visit the slots in the order of [`DESCRIPTOR_SLOTS`]: the eight
//! bit planes from the highest down, with the idle slot split in two halves
//! and the extended-light slot repeated so the high planes stay lit longer.
//! Only the last descriptor of each buffer raises end-of-frame, giving one
//! interrupt per scan line.
//!
//! # Safety
//! Descriptors hold raw pointers into the line buffers and to each other.
//! Both live in heap allocations owned by [`DmaResources`], so they stay put
//! when the resources are moved; the ring must not be handed to hardware past
//! the lifetime of the resources that built it.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem::offset_of;
use core::mem::size_of;

use bitfield::bitfield;

use crate::config::PanelGeometry;
use crate::word::columns;
use crate::word::OutputWord;
use crate::word::IDLE_PAIR;
use crate::Hub75Error;
use crate::BUFFER_SLOT_COUNT;
use crate::TOTAL_PERIOD_COUNT;

/// Descriptors in the whole ring.
pub const RING_LENGTH: usize = 2 * TOTAL_PERIOD_COUNT;

/// Start of every descriptor of one buffer, in half slots.
pub const DESCRIPTOR_SLOTS: [u8; TOTAL_PERIOD_COUNT] =
    [16, 1, 18, 18, 18, 14, 18, 12, 10, 8, 6, 4, 2, 0];

/// Successor of every descriptor.
pub const NEXT: [u8; RING_LENGTH] = adjacency();

const fn adjacency() -> [u8; RING_LENGTH] {
    let mut next = [0u8; RING_LENGTH];
    let mut i = 0;
    while i < RING_LENGTH {
        next[i] = ((i + 1) % RING_LENGTH) as u8;
        i += 1;
    }
    next
}

/// Descriptors that cover only half a slot.
const fn is_half_slot(position: usize) -> bool {
    position == 1 || position == TOTAL_PERIOD_COUNT - 1
}

bitfield! {
    /// First word of a DMA descriptor.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct DescriptorFlags(u32);
    impl Debug;
    /// Descriptor belongs to the DMA engine.
    pub owner, set_owner: 31;
    /// Raise end-of-frame after this descriptor.
    pub suc_eof, set_suc_eof: 30;
    /// Bytes to transfer.
    pub length, set_length: 23, 12;
    /// Size of the buffer.
    pub size, set_size: 11, 0;
}

#[cfg(feature = "defmt")]
impl defmt::Format for DescriptorFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "DescriptorFlags({=u32:#x})", self.0)
    }
}

/// Linked list entry as read by the DMA engine.
#[repr(C)]
#[derive(Debug)]
pub struct DmaDescriptor {
    /// Size, length and flags.
    pub flags: DescriptorFlags,
    /// Data to send.
    pub buffer: *const u8,
    /// Following descriptor.
    pub next: *const DmaDescriptor,
}

// SAFETY: the pointers are only dereferenced by the DMA engine.
unsafe impl Send for DmaDescriptor {}

const _: () = {
    assert!(offset_of!(DmaDescriptor, flags) == 0);
    assert!(offset_of!(DmaDescriptor, buffer) == size_of::<usize>());
    assert!(offset_of!(DmaDescriptor, next) == 2 * size_of::<usize>());
    assert!(size_of::<DmaDescriptor>() == 3 * size_of::<usize>());
};

#[cfg(target_pointer_width = "32")]
const _: () = assert!(size_of::<DmaDescriptor>() == 12);

/// One of the two line buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferId {
    /// Buffer sent by descriptors `0..TOTAL_PERIOD_COUNT`.
    Front,
    /// Buffer sent by the second half of the ring.
    Back,
}

impl BufferId {
    /// Position in the buffer pair.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            BufferId::Front => 0,
            BufferId::Back => 1,
        }
    }

    /// The other buffer of the pair.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            BufferId::Front => BufferId::Back,
            BufferId::Back => BufferId::Front,
        }
    }

    const fn of_descriptor(index: usize) -> Self {
        if index < TOTAL_PERIOD_COUNT {
            BufferId::Front
        } else {
            BufferId::Back
        }
    }
}

/// Scan line storage, two bus words per `u32`.
pub struct LineBuffer {
    words: Box<[u32]>,
    pairs_per_slot: usize,
}

impl LineBuffer {
    fn allocate(geometry: &PanelGeometry) -> Result<Self, Hub75Error> {
        let pairs_per_slot = geometry.pairs_per_slot();
        let len = pairs_per_slot * BUFFER_SLOT_COUNT;
        let mut words = Vec::new();
        words.try_reserve_exact(len)?;
        words.resize(len, IDLE_PAIR);
        Ok(Self {
            words: words.into_boxed_slice(),
            pairs_per_slot,
        })
    }

    /// Whole buffer.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Whole buffer, writable.
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Column pairs per slot.
    #[must_use]
    pub fn pairs_per_slot(&self) -> usize {
        self.pairs_per_slot
    }

    /// Words of one slot.
    #[must_use]
    pub fn slot(&self, slot: usize) -> &[u32] {
        let start = slot * self.pairs_per_slot;
        &self.words[start..start + self.pairs_per_slot]
    }

    /// Overwrites every word of a slot.
    pub fn fill_slot(&mut self, slot: usize, pair: u32) {
        let start = slot * self.pairs_per_slot;
        self.words[start..start + self.pairs_per_slot].fill(pair);
    }

    /// Bus word sent for `column` of `slot`.
    #[must_use]
    pub fn column(&self, slot: usize, column: usize) -> OutputWord {
        let (even, odd) = columns(self.slot(slot)[column / 2]);
        if column % 2 == 0 {
            even
        } else {
            odd
        }
    }

    /// Replaces the bus word sent for `column` of `slot`.
    pub fn set_column(&mut self, slot: usize, column: usize, value: u16) {
        let word = &mut self.words[slot * self.pairs_per_slot + column / 2];
        if column % 2 == 0 {
            *word = (*word & 0x0000_FFFF) | u32::from(value) << 16;
        } else {
            *word = (*word & 0xFFFF_0000) | u32::from(value);
        }
    }

    fn half_slot_ptr(&self, half_slots: usize) -> *const u8 {
        let offset = half_slots * self.pairs_per_slot / 2;
        self.words[offset..].as_ptr().cast()
    }
}

impl core::fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LineBuffer")
            .field("pairs_per_slot", &self.pairs_per_slot)
            .field("len", &self.words.len())
            .finish_non_exhaustive()
    }
}

/// The closed descriptor chain.
#[derive(Debug)]
pub struct DescriptorRing {
    descriptors: Box<[DmaDescriptor]>,
}

impl DescriptorRing {
    fn build(buffers: &[LineBuffer; 2], width: usize) -> Result<Self, Hub75Error> {
        let mut descriptors = Vec::new();
        descriptors.try_reserve_exact(RING_LENGTH)?;
        for index in 0..RING_LENGTH {
            let position = index % TOTAL_PERIOD_COUNT;
            let buffer = &buffers[BufferId::of_descriptor(index).index()];
            let bytes = if is_half_slot(position) {
                width
            } else {
                width * 2
            };
            let mut flags = DescriptorFlags(0);
            flags.set_size(bytes as u32);
            flags.set_length(bytes as u32);
            flags.set_suc_eof(position == TOTAL_PERIOD_COUNT - 1);
            flags.set_owner(true);
            descriptors.push(DmaDescriptor {
                flags,
                buffer: buffer.half_slot_ptr(usize::from(DESCRIPTOR_SLOTS[position])),
                next: core::ptr::null(),
            });
        }
        let mut descriptors = descriptors.into_boxed_slice();
        let base = descriptors.as_mut_ptr();
        for (index, descriptor) in descriptors.iter_mut().enumerate() {
            // SAFETY: NEXT only holds indices below RING_LENGTH.
            descriptor.next = unsafe { base.add(usize::from(NEXT[index])) };
        }
        Ok(Self { descriptors })
    }

    /// First descriptor, where DMA starts.
    #[must_use]
    pub fn head(&self) -> *const DmaDescriptor {
        self.descriptors.as_ptr()
    }

    /// Descriptor at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> &DmaDescriptor {
        &self.descriptors[index]
    }

    /// Address range of the ring for the interrupt handler.
    #[must_use]
    pub fn layout(&self) -> RingLayout {
        RingLayout {
            base: self.head() as usize,
        }
    }
}

/// Maps descriptor addresses back to line buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingLayout {
    base: usize,
}

impl RingLayout {
    /// Address of descriptor `index`.
    #[must_use]
    pub const fn address_of(&self, index: usize) -> usize {
        self.base + index * size_of::<DmaDescriptor>()
    }

    /// Buffer sent by the descriptor at `address`, if it belongs to the ring.
    #[must_use]
    pub fn buffer_of(&self, address: usize) -> Option<BufferId> {
        let offset = address.checked_sub(self.base)?;
        if offset % size_of::<DmaDescriptor>() != 0 {
            return None;
        }
        let index = offset / size_of::<DmaDescriptor>();
        (index < RING_LENGTH).then(|| BufferId::of_descriptor(index))
    }
}

/// Everything the DMA engine reads while the refresh runs.
#[derive(Debug)]
pub struct DmaResources {
    buffers: [LineBuffer; 2],
    ring: DescriptorRing,
}

impl DmaResources {
    /// Allocates both line buffers, filled with the idle word, and links the
    /// descriptor ring over them.
    ///
    /// # Errors
    /// [`Hub75Error::Allocation`] when any allocation fails; nothing is kept.
    pub fn build(geometry: &PanelGeometry) -> Result<Self, Hub75Error> {
        let buffers = [
            LineBuffer::allocate(geometry)?,
            LineBuffer::allocate(geometry)?,
        ];
        let ring = DescriptorRing::build(&buffers, geometry.width())?;
        Ok(Self { buffers, ring })
    }

    /// The descriptor ring.
    #[must_use]
    pub fn ring(&self) -> &DescriptorRing {
        &self.ring
    }

    /// A line buffer.
    #[must_use]
    pub fn buffer(&self, id: BufferId) -> &LineBuffer {
        &self.buffers[id.index()]
    }

    /// A line buffer, writable.
    pub fn buffer_mut(&mut self, id: BufferId) -> &mut LineBuffer {
        &mut self.buffers[id.index()]
    }
}
