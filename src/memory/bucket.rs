//! Bucket pool: a bounded cache of same-sized blocks.
//!
//! Blocks come straight from the [`RawAllocator`]; the pool only remembers up
//! to `capacity` returned pointers so the next rent can skip the allocator.
//! There is no slab structure and no per-block header.

use super::align::{WORD_ALIGN, validate_alignment};
use super::defaults;
use super::pool::{PoolCapacity, PoolStats};
use super::raw::{RawAllocator, SystemAllocator};
use crate::error::{Error, Result};
use crate::observability::record_bucket_miss;
use std::alloc::Layout;
use std::ptr::NonNull;
use tracing::debug;

/// Bounded pointer cache over a raw allocator.
///
/// # Example
///
/// ```rust
/// use slabkit::memory::{BucketPool, PoolCapacity};
///
/// let mut pool = BucketPool::new(256, 4).unwrap();
/// pool.ensure_capacity(2).unwrap();
/// let block = pool.rent().unwrap();
/// unsafe { pool.return_block(block) };
/// assert_eq!(pool.cached(), 2);
/// ```
pub struct BucketPool<A: RawAllocator = SystemAllocator> {
    layout: Layout,
    capacity: usize,
    cache: Vec<NonNull<u8>>,
    in_use: usize,
    allocator: A,
}

impl BucketPool {
    /// Pool of word-aligned `length`-byte blocks caching up to `capacity`.
    pub fn new(length: usize, capacity: usize) -> Result<Self> {
        Self::with_allocator(length, WORD_ALIGN, capacity, SystemAllocator)
    }

    /// Pool of `length`-byte blocks with the default cache bound.
    pub fn with_length(length: usize) -> Result<Self> {
        Self::new(length, defaults::BUCKET_CAPACITY)
    }
}

impl<A: RawAllocator> BucketPool<A> {
    /// Pool backed by `allocator`.
    pub fn with_allocator(
        length: usize,
        alignment: usize,
        capacity: usize,
        allocator: A,
    ) -> Result<Self> {
        if length == 0 {
            return Err(Error::invalid("block length must be non-zero"));
        }
        validate_alignment(alignment)?;
        let layout = Layout::from_size_align(length, alignment)
            .map_err(|e| Error::LayoutOverflow(e.to_string()))?;

        Ok(Self {
            layout,
            capacity,
            cache: Vec::with_capacity(capacity),
            in_use: 0,
            allocator,
        })
    }

    /// Rent a block, reusing a cached one when available.
    pub fn rent(&mut self) -> Result<NonNull<u8>> {
        let ptr = match self.cache.pop() {
            Some(ptr) => ptr,
            None => {
                record_bucket_miss("bucket");
                self.allocator.allocate(self.layout)?
            }
        };
        self.in_use += 1;
        Ok(ptr)
    }

    /// Give a block back. It is cached if there is room, freed otherwise.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`rent`](Self::rent) on this pool and must not
    /// have been returned already.
    pub unsafe fn return_block(&mut self, ptr: NonNull<u8>) {
        debug_assert!(self.in_use > 0, "return without outstanding rent");
        self.in_use -= 1;
        if self.cache.len() < self.capacity {
            self.cache.push(ptr);
        } else {
            // SAFETY: caller guarantees `ptr` came from this pool's allocator
            // with `self.layout`.
            unsafe { self.allocator.deallocate(ptr, self.layout) };
        }
    }

    /// Block length in bytes.
    pub fn length(&self) -> usize {
        self.layout.size()
    }

    /// Block alignment.
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Cache bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks currently cached.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Blocks currently rented.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    fn release_cached(&mut self, keep: usize) -> usize {
        let mut released = 0;
        while self.cache.len() > keep {
            if let Some(ptr) = self.cache.pop() {
                // SAFETY: cached pointers came from this allocator with `self.layout`.
                unsafe { self.allocator.deallocate(ptr, self.layout) };
                released += 1;
            }
        }
        released
    }
}

impl<A: RawAllocator> PoolCapacity for BucketPool<A> {
    fn ensure_capacity(&mut self, count: usize) -> Result<usize> {
        let target = count.min(self.capacity);
        while self.cache.len() < target {
            let ptr = self.allocator.allocate(self.layout)?;
            self.cache.push(ptr);
        }
        Ok(self.cache.len())
    }

    fn trim_excess(&mut self, keep: usize) -> usize {
        let released = self.release_cached(keep);
        if released > 0 {
            debug!(released, keep, "trimmed bucket cache");
        }
        released
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.in_use + self.cache.len(),
            in_use: self.in_use,
            slabs: 0,
            cached: self.cache.len(),
        }
    }
}

impl<A: RawAllocator> Drop for BucketPool<A> {
    fn drop(&mut self) {
        // Outstanding blocks belong to the caller.
        self.release_cached(0);
    }
}

impl<A: RawAllocator> std::fmt::Debug for BucketPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketPool")
            .field("length", &self.length())
            .field("alignment", &self.alignment())
            .field("capacity", &self.capacity)
            .field("cached", &self.cache.len())
            .field("in_use", &self.in_use)
            .finish()
    }
}

unsafe impl<A: RawAllocator + Send> Send for BucketPool<A> {}
