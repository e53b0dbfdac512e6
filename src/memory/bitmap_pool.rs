//! Fixed-block slab pool with one bitmap word per slab.
//!
//! Each slab holds exactly `W::BITS` slots (32 or 64). Renting scans the
//! slab's word for its lowest clear bit, a single `trailing_zeros` on the
//! complement, instead of chasing a free-list pointer.
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────┬─────────────────────┬─────────────────────┬─────┐
//! │ SlabHeader   │ ┌───────┬─────────┐ │ ┌───────┬─────────┐ │     │
//! │ next, prev,  │ │ idx 0 │ slot 0  │ │ │ idx 1 │ slot 1  │ │ ... │
//! │ bitmap word  │ └───────┴─────────┘ │ └───────┴─────────┘ │     │
//! └──────────────┴─────────────────────┴─────────────────────┴─────┘
//! ```
//!
//! The index word in front of each slot is written once at format time and
//! never changes, so a returned slot finds its bit and its slab base with
//! plain arithmetic.

use super::align::{
    WORD_ALIGN, WORD_SIZE, align_up, checked_align_up, checked_span, validate_alignment,
};
use super::bitmap::BitmapWord;
use super::defaults;
use super::pool::{PoolCapacity, PoolStats};
use super::raw::{RawAllocator, SystemAllocator};
use super::ring::{SlabFormat, SlabHeader, SlabRing};
use crate::error::{Error, Result};
use std::alloc::Layout;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

/// Shape of a [`BitmapSlabPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapPoolConfig {
    /// Payload bytes per slot.
    pub length: usize,
    /// Payload alignment; raised to at least word alignment.
    pub alignment: usize,
    /// Empty slabs kept for reuse.
    pub max_free_slabs: usize,
}

impl Default for BitmapPoolConfig {
    fn default() -> Self {
        Self {
            length: WORD_SIZE,
            alignment: WORD_ALIGN,
            max_free_slabs: defaults::MAX_FREE_SLABS,
        }
    }
}

impl BitmapPoolConfig {
    /// Config for `length`-byte slots with default shape otherwise.
    pub fn new(length: usize) -> Self {
        Self {
            length,
            ..Self::default()
        }
    }

    /// Set payload alignment.
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the free-slab cache bound.
    pub fn with_max_free_slabs(mut self, max_free_slabs: usize) -> Self {
        self.max_free_slabs = max_free_slabs;
        self
    }

    /// Check the shape before anything is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.length == 0 {
            return Err(Error::invalid("length must be > 0"));
        }
        validate_alignment(self.alignment)
    }
}

pub(crate) struct BitmapFormat<W: BitmapWord> {
    slot_header: usize,
    stride: usize,
    data_offset: usize,
    layout: Layout,
    _word: PhantomData<W>,
}

impl<W: BitmapWord> BitmapFormat<W> {
    fn new(config: &BitmapPoolConfig) -> Result<Self> {
        let align = config.alignment.max(WORD_ALIGN);
        let slot_header = align_up(WORD_SIZE, align);
        let stride = slot_header
            .checked_add(config.length)
            .and_then(|n| checked_align_up(n, align))
            .ok_or_else(|| Error::LayoutOverflow(format!("slot of {} bytes", config.length)))?;
        let data_offset = align_up(mem::size_of::<SlabHeader<W>>(), align);
        let total = checked_span(W::BITS, stride, data_offset)?;
        let layout = Layout::from_size_align(total, align.max(mem::align_of::<SlabHeader<W>>()))
            .map_err(|e| Error::LayoutOverflow(e.to_string()))?;

        Ok(Self {
            slot_header,
            stride,
            data_offset,
            layout,
            _word: PhantomData,
        })
    }

    #[inline]
    fn slot(&self, slab: NonNull<SlabHeader<W>>, index: usize) -> NonNull<u8> {
        debug_assert!(index < W::BITS);
        // SAFETY: slot `index` lies inside the slab layout.
        unsafe {
            NonNull::new_unchecked(
                slab.as_ptr()
                    .cast::<u8>()
                    .add(self.data_offset + index * self.stride + self.slot_header),
            )
        }
    }
}

unsafe impl<W: BitmapWord> SlabFormat for BitmapFormat<W> {
    type State = W;
    const KIND: &'static str = if W::BITS == 32 { "bitmap32" } else { "bitmap64" };

    fn layout(&self) -> Layout {
        self.layout
    }

    unsafe fn format(&self, slab: NonNull<SlabHeader<W>>) {
        for index in 0..W::BITS {
            let slot = self.slot(slab, index);
            // SAFETY: the index word sits in the slot header, word aligned.
            unsafe { slot.as_ptr().sub(WORD_SIZE).cast::<usize>().write(index) };
        }
        // SAFETY: header lies at the start of the slab.
        unsafe { ptr::addr_of_mut!((*slab.as_ptr()).state).write(W::EMPTY) };
    }
}

/// A pool of fixed-size slots tracked by one bitmap word per slab.
///
/// Use the [`BitmapPool32`] / [`BitmapPool64`] aliases. Not synchronized.
///
/// # Example
///
/// ```rust
/// use slabkit::memory::BitmapPool64;
///
/// let mut pool = BitmapPool64::new(32, 1).unwrap();
/// let slots: Vec<_> = (0..65).map(|_| pool.rent().unwrap()).collect();
/// assert_eq!(pool.slabs(), 2);
///
/// for slot in slots {
///     unsafe { pool.return_slot(slot) };
/// }
/// assert_eq!(pool.free_slabs(), 1);
/// ```
pub struct BitmapSlabPool<W: BitmapWord, A: RawAllocator = SystemAllocator> {
    ring: SlabRing<BitmapFormat<W>, A>,
    config: BitmapPoolConfig,
    in_use: usize,
}

/// Bitmap pool with 32 slots per slab.
pub type BitmapPool32<A = SystemAllocator> = BitmapSlabPool<u32, A>;

/// Bitmap pool with 64 slots per slab.
pub type BitmapPool64<A = SystemAllocator> = BitmapSlabPool<u64, A>;

impl<W: BitmapWord> BitmapSlabPool<W> {
    /// Pool of word-aligned `length`-byte slots.
    pub fn new(length: usize, max_free_slabs: usize) -> Result<Self> {
        Self::with_config(
            BitmapPoolConfig::new(length).with_max_free_slabs(max_free_slabs),
            SystemAllocator,
        )
    }

    /// Pool whose slots are aligned to `alignment`.
    pub fn aligned(length: usize, max_free_slabs: usize, alignment: usize) -> Result<Self> {
        Self::with_config(
            BitmapPoolConfig::new(length)
                .with_max_free_slabs(max_free_slabs)
                .with_alignment(alignment),
            SystemAllocator,
        )
    }
}

impl<W: BitmapWord, A: RawAllocator> BitmapSlabPool<W, A> {
    /// Slots per slab.
    pub const SLOTS_PER_SLAB: usize = W::BITS;

    /// Pool with an explicit config and allocator. Allocates the first slab.
    pub fn with_config(config: BitmapPoolConfig, allocator: A) -> Result<Self> {
        config.validate()?;
        let format = BitmapFormat::new(&config)?;
        let ring = SlabRing::new(format, allocator, config.max_free_slabs)?;
        Ok(Self {
            ring,
            config,
            in_use: 0,
        })
    }

    /// Rent one slot.
    pub fn rent(&mut self) -> Result<NonNull<u8>> {
        let mut slab = self.ring.sentinel();
        // SAFETY: ring slabs are live for the lifetime of the ring.
        if unsafe { slab.as_ref() }.state == W::FULL {
            slab = self.ring.advance();
            if unsafe { slab.as_ref() }.state == W::FULL {
                slab = self.ring.grow()?;
            }
        }

        // SAFETY: `slab` is live and its word has a clear bit.
        let index = unsafe {
            let bits = &mut (*slab.as_ptr()).state;
            let index = bits.lowest_clear();
            *bits = bits.with_set(index);
            index
        };
        self.in_use += 1;
        Ok(self.ring.format().slot(slab, index))
    }

    /// Return a slot to its slab.
    ///
    /// # Safety
    ///
    /// `slot` must come from [`rent`](Self::rent) on this pool and must not
    /// have been returned already. Misuse is not detected.
    pub unsafe fn return_slot(&mut self, slot: NonNull<u8>) {
        debug_assert!(self.in_use > 0, "return without outstanding rent");
        let format = self.ring.format();
        // SAFETY: caller guarantees `slot` is outstanding, so its index word
        // is intact and locates the slab base.
        let (slab, empty) = unsafe {
            let index = slot.as_ptr().sub(WORD_SIZE).cast::<usize>().read();
            debug_assert!(index < W::BITS);
            let base = slot
                .as_ptr()
                .sub(format.slot_header + index * format.stride + format.data_offset);
            let slab = base.cast::<SlabHeader<W>>();
            let bits = &mut (*slab).state;
            debug_assert!(bits.is_set(index), "slot returned twice");
            *bits = bits.with_cleared(index);
            (NonNull::new_unchecked(slab), *bits == W::EMPTY)
        };
        self.in_use -= 1;

        if empty {
            // SAFETY: no slot of this slab is outstanding.
            unsafe { self.ring.retire(slab) };
        }
    }

    /// Slabs in the active ring.
    pub fn slabs(&self) -> usize {
        self.ring.slabs()
    }

    /// Empty slabs in the free-slab cache.
    pub fn free_slabs(&self) -> usize {
        self.ring.cached()
    }

    /// Bound on cached empty slabs.
    pub fn max_free_slabs(&self) -> usize {
        self.ring.max_cached()
    }

    /// Requested payload bytes per slot.
    pub fn length(&self) -> usize {
        self.config.length
    }

    /// Effective slot alignment.
    pub fn alignment(&self) -> usize {
        self.config.alignment.max(WORD_ALIGN)
    }

    /// Slots currently rented.
    pub fn in_use(&self) -> usize {
        self.in_use
    }
}

impl<W: BitmapWord, A: RawAllocator> PoolCapacity for BitmapSlabPool<W, A> {
    fn ensure_capacity(&mut self, count: usize) -> Result<usize> {
        self.ring.ensure_cached(count)
    }

    fn trim_excess(&mut self, keep: usize) -> usize {
        self.ring.trim_cached(keep)
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.ring.slabs() * W::BITS,
            in_use: self.in_use,
            slabs: self.ring.slabs(),
            cached: self.ring.cached(),
        }
    }
}

impl<W: BitmapWord, A: RawAllocator> std::fmt::Debug for BitmapSlabPool<W, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapSlabPool")
            .field("slots_per_slab", &W::BITS)
            .field("config", &self.config)
            .field("slabs", &self.slabs())
            .field("free_slabs", &self.free_slabs())
            .field("in_use", &self.in_use)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::raw::TrackingAllocator;
    use std::collections::HashSet;

    fn slot_index(slot: NonNull<u8>) -> usize {
        unsafe { slot.as_ptr().sub(WORD_SIZE).cast::<usize>().read() }
    }

    #[test]
    fn test_full_word_forces_new_slab_32() {
        let mut pool = BitmapPool32::new(16, 1).unwrap();
        let slots: Vec<_> = (0..32).map(|_| pool.rent().unwrap()).collect();
        assert_eq!(pool.slabs(), 1);
        for (expected, slot) in slots.iter().enumerate() {
            assert_eq!(slot_index(*slot), expected);
        }

        let extra = pool.rent().unwrap();
        assert_eq!(pool.slabs(), 2);
        assert_eq!(slot_index(extra), 0);

        for slot in slots {
            unsafe { pool.return_slot(slot) };
        }
        unsafe { pool.return_slot(extra) };
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 1);
    }

    #[test]
    fn test_indices_stay_in_bounds_64() {
        let mut pool = BitmapPool64::new(8, 0).unwrap();
        let slots: Vec<_> = (0..200).map(|_| pool.rent().unwrap()).collect();
        let mut seen = HashSet::new();
        for slot in &slots {
            assert!(slot_index(*slot) < 64);
            assert!(seen.insert(slot.as_ptr() as usize));
        }
        assert_eq!(pool.slabs(), 4);
        assert_eq!(pool.stats().in_use, 200);
        for slot in slots {
            unsafe { pool.return_slot(slot) };
        }
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_slabs(), 0);
    }

    #[test]
    fn test_lowest_bit_reused_first() {
        let mut pool = BitmapPool32::new(8, 0).unwrap();
        let a = pool.rent().unwrap();
        let b = pool.rent().unwrap();
        let _c = pool.rent().unwrap();
        unsafe { pool.return_slot(b) };
        assert_eq!(pool.rent().unwrap(), b);
        unsafe { pool.return_slot(a) };
        assert_eq!(pool.rent().unwrap(), a);
    }

    #[test]
    fn test_round_trip_preserves_counters() {
        let mut pool = BitmapPool64::new(100, 2).unwrap();
        let before = pool.stats();
        let slot = pool.rent().unwrap();
        unsafe { pool.return_slot(slot) };
        assert_eq!(pool.stats(), before);
    }

    #[test]
    fn test_alignment_and_payload_integrity() {
        let mut pool = BitmapPool32::aligned(48, 1, 64).unwrap();
        let slots: Vec<_> = (0..40).map(|_| pool.rent().unwrap()).collect();
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.as_ptr() as usize % 64, 0);
            unsafe { slot.as_ptr().write_bytes(i as u8, 48) };
        }
        for (i, slot) in slots.iter().enumerate() {
            let bytes = unsafe { std::slice::from_raw_parts(slot.as_ptr(), 48) };
            assert!(bytes.iter().all(|&b| b == i as u8));
        }
        for slot in slots {
            unsafe { pool.return_slot(slot) };
        }
    }

    #[test]
    fn test_capacity_management_and_drop() {
        let tracking: TrackingAllocator = TrackingAllocator::default();
        {
            let config = BitmapPoolConfig::new(16).with_max_free_slabs(2);
            let mut pool = BitmapPool32::with_config(config, &tracking).unwrap();
            assert_eq!(pool.ensure_capacity(5).unwrap(), 2);
            assert_eq!(tracking.live_blocks(), 3);
            assert_eq!(pool.trim_excess(0), 2);
            assert_eq!(tracking.live_blocks(), 1);
        }
        assert_eq!(tracking.live_blocks(), 0);
    }

    #[test]
    fn test_invalid_config() {
        assert!(BitmapPool32::new(0, 1).is_err());
        assert!(BitmapPool64::aligned(8, 1, 3).is_err());
    }
}
