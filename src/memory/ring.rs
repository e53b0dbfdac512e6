//! Slab ring and free-slab cache shared by the slab pool family.
//!
//! Every slab pool (free-list, bitmap, arena) keeps its slabs the same way:
//!
//! ```text
//!              active ring (circular, never empty)
//!        ┌────────────────────────────────────────────┐
//!        ▼                                            │
//!   ┌─────────┐ next ┌─────────┐ next ┌─────────┐ next │
//!   │ slab A  │─────▶│ slab B  │─────▶│ slab C  │──────┘
//!   └─────────┘◀─────└─────────┘◀─────└─────────┘
//!                prev    ▲
//!                        └── sentinel (slab currently drawn from)
//!
//!   free-slab cache:  [empty] ─▶ [empty] ─▶ null   (≤ max_free_slabs)
//! ```
//!
//! A slab is in exactly one place: the ring, the cache, or released back to
//! the [`RawAllocator`]. Only a fully empty slab that is not the sentinel
//! leaves the ring, so the slab being filled never collapses underneath the
//! pool.
//!
//! What lives after the header, and what "empty" means, is up to the
//! variant's [`SlabFormat`]. The ring only moves whole slabs around.
//!
//! # Safety
//!
//! The ring is built from raw pointers into allocator memory. All of it is
//! crate-private; pools expose `NonNull<u8>` payloads and nothing else.

use super::raw::RawAllocator;
use crate::error::Result;
use crate::observability::SlabMetrics;
use std::alloc::Layout;
use std::ptr::{self, NonNull};
use tracing::{debug, trace};

/// Header at the start of every slab.
///
/// `next`/`prev` link the active ring. While cached, `next` links the
/// free-slab cache and `prev` is null.
#[repr(C)]
pub(crate) struct SlabHeader<S> {
    next: *mut SlabHeader<S>,
    prev: *mut SlabHeader<S>,
    /// Per-variant occupancy state.
    pub(crate) state: S,
}

/// Per-variant slab layout and formatting.
///
/// # Safety
///
/// `layout()` must be large enough for a `SlabHeader<State>` followed by the
/// variant's node area, and aligned at least as strictly as the header.
/// `format` must leave the slab in the "fully empty" state.
pub(crate) unsafe trait SlabFormat {
    /// Occupancy state stored in the slab header.
    type State;

    /// Label used for logs and metrics.
    const KIND: &'static str;

    /// Layout of one slab allocation.
    fn layout(&self) -> Layout;

    /// Initialize the header state and node area of fresh slab memory.
    ///
    /// # Safety
    ///
    /// `slab` must point to an allocation of `self.layout()`.
    unsafe fn format(&self, slab: NonNull<SlabHeader<Self::State>>);
}

/// The active ring plus the free-slab cache.
pub(crate) struct SlabRing<F: SlabFormat, A: RawAllocator> {
    format: F,
    allocator: A,
    /// Slab currently drawn from.
    sentinel: NonNull<SlabHeader<F::State>>,
    /// Slabs in the ring.
    slabs: usize,
    /// Head of the cache list.
    cache: *mut SlabHeader<F::State>,
    /// Slabs in the cache.
    cached: usize,
    max_cached: usize,
    metrics: SlabMetrics,
}

impl<F: SlabFormat, A: RawAllocator> SlabRing<F, A> {
    /// Create a ring holding one freshly formatted slab.
    pub(crate) fn new(format: F, allocator: A, max_cached: usize) -> Result<Self> {
        let metrics = SlabMetrics::new(F::KIND);
        let sentinel = Self::allocate_slab(&format, &allocator, &metrics)?;
        // SAFETY: fresh slab, exclusively owned; a one-slab ring points at itself.
        unsafe {
            (*sentinel.as_ptr()).next = sentinel.as_ptr();
            (*sentinel.as_ptr()).prev = sentinel.as_ptr();
        }

        debug!(
            pool = F::KIND,
            slab_bytes = format.layout().size(),
            max_cached,
            "created slab ring"
        );

        let ring = Self {
            format,
            allocator,
            sentinel,
            slabs: 1,
            cache: ptr::null_mut(),
            cached: 0,
            max_cached,
            metrics,
        };
        ring.metrics.record_shape(ring.slabs, ring.cached);
        Ok(ring)
    }

    /// The variant's format.
    #[inline]
    pub(crate) fn format(&self) -> &F {
        &self.format
    }

    /// The slab currently drawn from.
    #[inline]
    pub(crate) fn sentinel(&self) -> NonNull<SlabHeader<F::State>> {
        self.sentinel
    }

    /// Slabs in the active ring.
    #[inline]
    pub(crate) fn slabs(&self) -> usize {
        self.slabs
    }

    /// Slabs in the free-slab cache.
    #[inline]
    pub(crate) fn cached(&self) -> usize {
        self.cached
    }

    /// Upper bound on cached slabs.
    #[inline]
    pub(crate) fn max_cached(&self) -> usize {
        self.max_cached
    }

    /// Whether `slab` is the sentinel.
    #[inline]
    pub(crate) fn is_sentinel(&self, slab: NonNull<SlabHeader<F::State>>) -> bool {
        slab == self.sentinel
    }

    /// Move the sentinel to the next slab in the ring and return it.
    ///
    /// With a single slab this returns the same slab.
    #[inline]
    pub(crate) fn advance(&mut self) -> NonNull<SlabHeader<F::State>> {
        // SAFETY: ring links always point at live ring slabs.
        let next = unsafe { (*self.sentinel.as_ptr()).next };
        // SAFETY: the ring is circular, links are never null.
        self.sentinel = unsafe { NonNull::new_unchecked(next) };
        trace!(pool = F::KIND, slabs = self.slabs, "advanced sentinel");
        self.sentinel
    }

    /// Add an empty slab in front of the sentinel and make it the sentinel.
    ///
    /// The slab comes from the cache when one is available, otherwise from
    /// the allocator.
    pub(crate) fn grow(&mut self) -> Result<NonNull<SlabHeader<F::State>>> {
        let slab = match self.pop_cached() {
            Some(slab) => {
                self.metrics.record_reused();
                debug!(pool = F::KIND, cached = self.cached, "reused cached slab");
                slab
            }
            None => Self::allocate_slab(&self.format, &self.allocator, &self.metrics)?,
        };

        // SAFETY: `slab` is detached; sentinel and its prev are live ring slabs.
        unsafe {
            let old = self.sentinel.as_ptr();
            let prev = (*old).prev;
            (*slab.as_ptr()).prev = prev;
            (*slab.as_ptr()).next = old;
            (*prev).next = slab.as_ptr();
            (*old).prev = slab.as_ptr();
        }
        self.sentinel = slab;
        self.slabs += 1;
        self.metrics.record_shape(self.slabs, self.cached);
        Ok(slab)
    }

    /// Take a fully empty slab out of the ring unless it is the sentinel.
    ///
    /// The slab goes to the cache while it is under its bound and back to the
    /// allocator otherwise. Returns whether the slab left the ring.
    ///
    /// # Safety
    ///
    /// `slab` must be a ring slab of this pool with no outstanding nodes.
    pub(crate) unsafe fn retire(&mut self, slab: NonNull<SlabHeader<F::State>>) -> bool {
        if self.is_sentinel(slab) {
            return false;
        }
        debug_assert!(self.slabs > 1, "non-sentinel slab in a one-slab ring");

        // SAFETY: `slab` is in the ring and distinct from the sentinel, so the
        // ring keeps at least one slab after unlinking.
        unsafe {
            let raw = slab.as_ptr();
            let prev = (*raw).prev;
            let next = (*raw).next;
            (*prev).next = next;
            (*next).prev = prev;
        }
        self.slabs -= 1;

        if self.cached < self.max_cached {
            // SAFETY: unlinked, empty and formatted.
            unsafe { self.push_cached(slab) };
            debug!(pool = F::KIND, cached = self.cached, "cached empty slab");
        } else {
            // SAFETY: unlinked and owned by us.
            unsafe { self.release(slab) };
        }
        self.metrics.record_shape(self.slabs, self.cached);
        true
    }

    /// Fill the cache up to `min(count, max_cached)` slabs.
    pub(crate) fn ensure_cached(&mut self, count: usize) -> Result<usize> {
        let target = count.min(self.max_cached);
        while self.cached < target {
            let slab = Self::allocate_slab(&self.format, &self.allocator, &self.metrics)?;
            // SAFETY: fresh, formatted, detached.
            unsafe { self.push_cached(slab) };
        }
        self.metrics.record_shape(self.slabs, self.cached);
        Ok(self.cached)
    }

    /// Release cached slabs above `keep`.
    pub(crate) fn trim_cached(&mut self, keep: usize) -> usize {
        let mut released = 0;
        while self.cached > keep {
            if let Some(slab) = self.pop_cached() {
                // SAFETY: popped from the cache, owned by us.
                unsafe { self.release(slab) };
                released += 1;
            }
        }
        if released > 0 {
            debug!(pool = F::KIND, released, keep, "trimmed slab cache");
            self.metrics.record_shape(self.slabs, self.cached);
        }
        released
    }

    /// Visit every ring slab, starting at the sentinel.
    pub(crate) fn for_each_slab(&self, mut f: impl FnMut(&SlabHeader<F::State>)) {
        let start = self.sentinel.as_ptr();
        let mut cur = start;
        loop {
            // SAFETY: ring links point at live slabs.
            unsafe {
                f(&*cur);
                cur = (*cur).next;
            }
            if cur == start {
                break;
            }
        }
    }

    fn allocate_slab(
        format: &F,
        allocator: &A,
        metrics: &SlabMetrics,
    ) -> Result<NonNull<SlabHeader<F::State>>> {
        let layout = format.layout();
        let slab = allocator.allocate(layout)?.cast::<SlabHeader<F::State>>();
        // SAFETY: fresh allocation of `layout`.
        unsafe {
            (*slab.as_ptr()).next = ptr::null_mut();
            (*slab.as_ptr()).prev = ptr::null_mut();
            format.format(slab);
        }
        metrics.record_allocated();
        debug!(pool = F::KIND, bytes = layout.size(), "allocated slab");
        Ok(slab)
    }

    unsafe fn push_cached(&mut self, slab: NonNull<SlabHeader<F::State>>) {
        // SAFETY: caller hands over a detached slab.
        unsafe {
            (*slab.as_ptr()).prev = ptr::null_mut();
            (*slab.as_ptr()).next = self.cache;
        }
        self.cache = slab.as_ptr();
        self.cached += 1;
    }

    fn pop_cached(&mut self) -> Option<NonNull<SlabHeader<F::State>>> {
        let slab = NonNull::new(self.cache)?;
        // SAFETY: cache entries are live, detached slabs.
        self.cache = unsafe { (*slab.as_ptr()).next };
        self.cached -= 1;
        Some(slab)
    }

    unsafe fn release(&mut self, slab: NonNull<SlabHeader<F::State>>) {
        // SAFETY: caller guarantees `slab` came from `allocate_slab`.
        unsafe { self.allocator.deallocate(slab.cast(), self.format.layout()) };
        self.metrics.record_released();
        debug!(pool = F::KIND, "released slab");
    }
}

impl<F: SlabFormat, A: RawAllocator> Drop for SlabRing<F, A> {
    fn drop(&mut self) {
        self.trim_cached(0);

        let layout = self.format.layout();
        let start = self.sentinel.as_ptr();
        let mut cur = start;
        loop {
            // SAFETY: walk the ring once, reading `next` before freeing.
            unsafe {
                let next = (*cur).next;
                self.allocator.deallocate(NonNull::new_unchecked(cur).cast(), layout);
                self.metrics.record_released();
                cur = next;
            }
            if cur == start {
                break;
            }
        }
        self.metrics.record_shape(0, 0);
        debug!(pool = F::KIND, slabs = self.slabs, "disposed slab ring");
    }
}

// SAFETY: the ring exclusively owns its slabs; moving it moves that ownership.
unsafe impl<F: SlabFormat + Send, A: RawAllocator + Send> Send for SlabRing<F, A> {}
