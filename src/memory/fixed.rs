//! Flat fixed-capacity pools.
//!
//! One contiguous buffer of `capacity` equally sized elements plus a stack of
//! free indices. Nothing grows: a full pool simply returns `None`.
//!
//! Two flavors share the same core:
//!
//! | Pool                   | Return           | Misuse                        |
//! |------------------------|------------------|-------------------------------|
//! | [`FixedSizePool`]      | safe, `Result`   | reported, pool unchanged      |
//! | [`FixedSizeStackPool`] | `unsafe`         | undefined                     |
//!
//! The checked pool keeps an [`OccupancyBitmap`] so it can tell a foreign
//! address ([`Error::ReturnMismatch`]) from a second return of the same
//! element ([`Error::DuplicateReturn`]).

use super::align::{WORD_ALIGN, checked_span, validate_alignment};
use super::bitmap::OccupancyBitmap;
use super::pool::{PoolCapacity, PoolStats};
use super::raw::{RawAllocator, SystemAllocator};
use crate::error::{Error, Result};
use std::alloc::Layout;
use std::ptr::NonNull;
use tracing::{debug, warn};

/// Buffer and free-index stack shared by both flat pools.
struct FlatCore<A: RawAllocator> {
    base: NonNull<u8>,
    layout: Layout,
    stride: usize,
    capacity: usize,
    free: Vec<usize>,
    allocator: A,
}

impl<A: RawAllocator> FlatCore<A> {
    fn new(element_size: usize, capacity: usize, alignment: usize, allocator: A) -> Result<Self> {
        if element_size == 0 {
            return Err(Error::invalid("element size must be non-zero"));
        }
        if capacity == 0 {
            return Err(Error::invalid("capacity must be non-zero"));
        }
        validate_alignment(alignment)?;

        let stride = element_size
            .checked_next_multiple_of(alignment)
            .ok_or_else(|| Error::LayoutOverflow(format!("element size {element_size}")))?;
        let total = checked_span(capacity, stride, 0)?;
        let layout = Layout::from_size_align(total, alignment)
            .map_err(|e| Error::LayoutOverflow(e.to_string()))?;
        let base = allocator.allocate(layout)?;

        debug!(
            element_size,
            stride,
            capacity,
            bytes = total,
            "allocated flat pool buffer"
        );

        Ok(Self {
            base,
            layout,
            stride,
            capacity,
            // Reversed so index 0 is handed out first.
            free: (0..capacity).rev().collect(),
            allocator,
        })
    }

    fn pop(&mut self) -> Option<(usize, NonNull<u8>)> {
        let index = self.free.pop()?;
        Some((index, self.element(index)))
    }

    fn element(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity, so the offset stays inside the buffer.
        unsafe { self.base.add(index * self.stride) }
    }

    /// Index of the element starting exactly at `ptr`.
    fn index_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.base.as_ptr() as usize)?;
        if offset >= self.layout.size() || offset % self.stride != 0 {
            return None;
        }
        Some(offset / self.stride)
    }

    fn contains(&self, ptr: NonNull<u8>) -> bool {
        let offset = (ptr.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize);
        offset < self.layout.size()
    }

    fn available(&self) -> usize {
        self.free.len()
    }

    fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            in_use: self.in_use(),
            slabs: 1,
            cached: 0,
        }
    }
}

impl<A: RawAllocator> Drop for FlatCore<A> {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated with `layout` by `allocator`.
        unsafe { self.allocator.deallocate(self.base, self.layout) };
    }
}

// ============================================================================
// FixedSizePool
// ============================================================================

/// Checked flat pool.
///
/// # Example
///
/// ```rust
/// use slabkit::Error;
/// use slabkit::memory::FixedSizePool;
///
/// let mut pool = FixedSizePool::new(32, 2).unwrap();
/// let a = pool.try_rent().unwrap();
/// let _b = pool.try_rent().unwrap();
/// assert!(pool.try_rent().is_none());
///
/// pool.return_element(a).unwrap();
/// assert!(matches!(pool.return_element(a), Err(Error::DuplicateReturn { .. })));
/// ```
pub struct FixedSizePool<A: RawAllocator = SystemAllocator> {
    core: FlatCore<A>,
    rented: OccupancyBitmap,
}

impl FixedSizePool {
    /// Word-aligned pool of `capacity` elements.
    pub fn new(element_size: usize, capacity: usize) -> Result<Self> {
        Self::with_allocator(element_size, capacity, WORD_ALIGN, SystemAllocator)
    }

    /// Pool whose elements are aligned to `alignment`.
    pub fn aligned(element_size: usize, capacity: usize, alignment: usize) -> Result<Self> {
        Self::with_allocator(element_size, capacity, alignment, SystemAllocator)
    }
}

impl<A: RawAllocator> FixedSizePool<A> {
    /// Pool backed by `allocator`.
    pub fn with_allocator(
        element_size: usize,
        capacity: usize,
        alignment: usize,
        allocator: A,
    ) -> Result<Self> {
        let core = FlatCore::new(element_size, capacity, alignment, allocator)?;
        Ok(Self {
            rented: OccupancyBitmap::new(capacity),
            core,
        })
    }

    /// Rent an element, or `None` when every element is out.
    pub fn try_rent(&mut self) -> Option<NonNull<u8>> {
        let (index, ptr) = self.core.pop()?;
        let was_clear = self.rented.set(index);
        debug_assert!(was_clear);
        Some(ptr)
    }

    /// Give an element back.
    ///
    /// # Errors
    ///
    /// - [`Error::ReturnMismatch`] if `ptr` is outside the buffer or not on
    ///   an element boundary.
    /// - [`Error::DuplicateReturn`] if the element is not currently rented.
    ///
    /// The pool is left unchanged on error.
    pub fn return_element(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let addr = ptr.as_ptr() as usize;
        let Some(index) = self.core.index_of(ptr) else {
            warn!(addr, "return of an address this pool does not own");
            return Err(Error::ReturnMismatch { addr });
        };
        if !self.rented.clear(index) {
            warn!(index, "element returned twice");
            return Err(Error::DuplicateReturn { index });
        }
        self.core.free.push(index);
        Ok(())
    }

    /// Whether `ptr` falls inside the pool's buffer.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.core.contains(ptr)
    }

    /// Total elements.
    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// Elements ready to rent.
    pub fn available(&self) -> usize {
        self.core.available()
    }

    /// Elements currently rented.
    pub fn in_use(&self) -> usize {
        self.core.in_use()
    }

    /// Distance between consecutive elements.
    pub fn stride(&self) -> usize {
        self.core.stride
    }
}

impl<A: RawAllocator> PoolCapacity for FixedSizePool<A> {
    fn ensure_capacity(&mut self, count: usize) -> Result<usize> {
        Ok(count.min(self.available()))
    }

    fn trim_excess(&mut self, _keep: usize) -> usize {
        0
    }

    fn stats(&self) -> PoolStats {
        self.core.stats()
    }
}

impl<A: RawAllocator> std::fmt::Debug for FixedSizePool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedSizePool")
            .field("stride", &self.core.stride)
            .field("capacity", &self.core.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

// ============================================================================
// FixedSizeStackPool
// ============================================================================

/// Unchecked flat pool: a plain free-index stack.
pub struct FixedSizeStackPool<A: RawAllocator = SystemAllocator> {
    core: FlatCore<A>,
}

impl FixedSizeStackPool {
    /// Word-aligned pool of `capacity` elements.
    pub fn new(element_size: usize, capacity: usize) -> Result<Self> {
        Self::with_allocator(element_size, capacity, WORD_ALIGN, SystemAllocator)
    }

    /// Pool whose elements are aligned to `alignment`.
    pub fn aligned(element_size: usize, capacity: usize, alignment: usize) -> Result<Self> {
        Self::with_allocator(element_size, capacity, alignment, SystemAllocator)
    }
}

impl<A: RawAllocator> FixedSizeStackPool<A> {
    /// Pool backed by `allocator`.
    pub fn with_allocator(
        element_size: usize,
        capacity: usize,
        alignment: usize,
        allocator: A,
    ) -> Result<Self> {
        Ok(Self {
            core: FlatCore::new(element_size, capacity, alignment, allocator)?,
        })
    }

    /// Rent an element, or `None` when every element is out.
    pub fn try_rent(&mut self) -> Option<NonNull<u8>> {
        self.core.pop().map(|(_, ptr)| ptr)
    }

    /// Give an element back.
    ///
    /// # Safety
    ///
    /// `ptr` must have been rented from this pool and not returned since.
    pub unsafe fn return_element(&mut self, ptr: NonNull<u8>) {
        let offset = ptr.as_ptr() as usize - self.core.base.as_ptr() as usize;
        debug_assert_eq!(self.core.index_of(ptr), Some(offset / self.core.stride));
        debug_assert!(self.core.free.len() < self.core.capacity);
        self.core.free.push(offset / self.core.stride);
    }

    /// Whether `ptr` falls inside the pool's buffer.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.core.contains(ptr)
    }

    /// Total elements.
    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// Elements ready to rent.
    pub fn available(&self) -> usize {
        self.core.available()
    }

    /// Elements currently rented.
    pub fn in_use(&self) -> usize {
        self.core.in_use()
    }
}

impl<A: RawAllocator> PoolCapacity for FixedSizeStackPool<A> {
    fn ensure_capacity(&mut self, count: usize) -> Result<usize> {
        Ok(count.min(self.available()))
    }

    fn trim_excess(&mut self, _keep: usize) -> usize {
        0
    }

    fn stats(&self) -> PoolStats {
        self.core.stats()
    }
}

impl<A: RawAllocator> std::fmt::Debug for FixedSizeStackPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedSizeStackPool")
            .field("stride", &self.core.stride)
            .field("capacity", &self.core.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

// Plain raw pointers keep these !Sync; the buffer is uniquely owned.
unsafe impl<A: RawAllocator + Send> Send for FixedSizePool<A> {}
unsafe impl<A: RawAllocator + Send> Send for FixedSizeStackPool<A> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::raw::TrackingAllocator;
    use std::collections::HashSet;

    #[test]
    fn test_rent_until_exhausted() {
        let mut pool = FixedSizePool::new(24, 4).unwrap();
        let ptrs: Vec<_> = (0..4).map(|_| pool.try_rent().unwrap()).collect();
        assert!(pool.try_rent().is_none());
        assert_eq!(pool.in_use(), 4);
        assert_eq!(pool.available(), 0);

        let distinct: HashSet<_> = ptrs.iter().map(|p| p.as_ptr() as usize).collect();
        assert_eq!(distinct.len(), 4);
        assert!(ptrs.iter().all(|&p| pool.contains(p)));

        for p in ptrs {
            pool.return_element(p).unwrap();
        }
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_mismatch_and_duplicate_are_distinct() {
        let mut pool = FixedSizePool::new(16, 2).unwrap();
        let a = pool.try_rent().unwrap();

        // Interior pointer.
        let inner = unsafe { a.add(1) };
        assert!(matches!(
            pool.return_element(inner),
            Err(Error::ReturnMismatch { .. })
        ));

        // Foreign pointer.
        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        assert!(!pool.contains(foreign));
        assert_eq!(
            pool.return_element(foreign),
            Err(Error::ReturnMismatch {
                addr: foreign.as_ptr() as usize
            })
        );

        // Element never rented.
        let b = unsafe { a.add(pool.stride()) };
        assert_eq!(pool.return_element(b), Err(Error::DuplicateReturn { index: 1 }));

        pool.return_element(a).unwrap();
        assert_eq!(pool.return_element(a), Err(Error::DuplicateReturn { index: 0 }));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_alignment_and_stride() {
        let mut pool = FixedSizePool::aligned(10, 8, 64).unwrap();
        assert_eq!(pool.stride(), 64);
        while let Some(ptr) = pool.try_rent() {
            assert_eq!(ptr.as_ptr() as usize % 64, 0);
        }
        assert!(FixedSizePool::aligned(10, 8, 12).is_err());
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(matches!(FixedSizePool::new(0, 4), Err(Error::InvalidArgument(_))));
        assert!(matches!(FixedSizePool::new(8, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            FixedSizeStackPool::new(usize::MAX / 2, 4),
            Err(Error::LayoutOverflow(_))
        ));
    }

    #[test]
    fn test_capacity_surface_is_fixed() {
        let mut pool = FixedSizePool::new(8, 3).unwrap();
        let a = pool.try_rent().unwrap();
        assert_eq!(pool.ensure_capacity(10).unwrap(), 2);
        assert_eq!(pool.ensure_capacity(1).unwrap(), 1);
        assert_eq!(pool.trim(), 0);
        assert_eq!(pool.capacity(), 3);
        let stats = pool.stats();
        assert_eq!((stats.capacity, stats.in_use, stats.slabs), (3, 1, 1));
        pool.return_element(a).unwrap();
    }

    #[test]
    fn test_stack_pool_lifo_reuse() {
        let mut pool = FixedSizeStackPool::new(32, 4).unwrap();
        let a = pool.try_rent().unwrap();
        let b = pool.try_rent().unwrap();
        assert_ne!(a, b);
        unsafe { pool.return_element(a) };
        assert_eq!(pool.try_rent(), Some(a));
        unsafe {
            pool.return_element(a);
            pool.return_element(b);
        }
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_buffer_released_on_drop() {
        let tracking: TrackingAllocator = TrackingAllocator::default();
        {
            let mut pool = FixedSizePool::with_allocator(48, 16, 16, &tracking).unwrap();
            assert_eq!(tracking.live_blocks(), 1);
            assert_eq!(tracking.live_bytes(), 48 * 16);
            pool.try_rent().unwrap();
        }
        assert_eq!(tracking.live_blocks(), 0);
    }
}
