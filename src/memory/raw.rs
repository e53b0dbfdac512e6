//! Raw allocator capability consumed by every pool.
//!
//! Pools never talk to the global allocator directly. They receive an
//! allocator handle at construction and route every slab or buffer through
//! it, so callers can substitute arenas, counting wrappers, or a C function
//! table without touching pool code.
//!
//! # Implementations
//!
//! - [`SystemAllocator`]: the platform allocator via `std::alloc`.
//! - [`VTableAllocator`]: a `(user_context, fn-table)` pair for C interop.
//! - [`TrackingAllocator`]: wraps another allocator and counts live blocks.

use crate::error::{Error, Result};
use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Aligned allocation capability.
///
/// # Safety
///
/// Implementations must return blocks that are valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, and that stay valid
/// until passed back to [`deallocate`](RawAllocator::deallocate).
pub unsafe trait RawAllocator {
    /// Allocate an uninitialized block.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>>;

    /// Allocate a zero-filled block.
    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        let ptr = self.allocate(layout)?;
        // SAFETY: `allocate` returned a block of `layout.size()` writable bytes.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, layout.size()) };
        Ok(ptr)
    }

    /// Release a block.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with the same `layout`, and must
    /// not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

fn failed(layout: Layout) -> Error {
    Error::AllocationFailed {
        size: layout.size(),
        align: layout.align(),
    }
}

// ============================================================================
// SystemAllocator
// ============================================================================

/// The platform allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemAllocator;

unsafe impl RawAllocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(Error::invalid("zero-sized raw allocation"));
        }
        // SAFETY: layout has non-zero size.
        NonNull::new(unsafe { alloc::alloc(layout) }).ok_or_else(|| failed(layout))
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(Error::invalid("zero-sized raw allocation"));
        }
        // SAFETY: layout has non-zero size.
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or_else(|| failed(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: caller guarantees `ptr` came from `alloc` with `layout`.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

unsafe impl<A: RawAllocator + ?Sized> RawAllocator for &A {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        (**self).allocate(layout)
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        (**self).allocate_zeroed(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }
}

unsafe impl<A: RawAllocator + ?Sized> RawAllocator for Arc<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        (**self).allocate(layout)
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        (**self).allocate_zeroed(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }
}

// ============================================================================
// VTableAllocator
// ============================================================================

/// C-ABI function table for a foreign allocator.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AllocatorVTable {
    /// Allocate `byte_count` bytes aligned to `alignment`; null on failure.
    pub aligned_alloc:
        unsafe extern "C" fn(user: *mut c_void, byte_count: usize, alignment: usize) -> *mut c_void,
    /// Same as `aligned_alloc` but zero-filled.
    pub aligned_alloc_zeroed:
        unsafe extern "C" fn(user: *mut c_void, byte_count: usize, alignment: usize) -> *mut c_void,
    /// Release a block returned by either allocation entry point.
    pub aligned_free: unsafe extern "C" fn(user: *mut c_void, ptr: *mut c_void),
}

/// Allocator backed by a `(user_context, fn-table)` pair.
///
/// The user context is passed verbatim to every call. The handle is neither
/// `Send` nor `Sync` since nothing is known about the foreign side.
#[derive(Debug)]
pub struct VTableAllocator {
    user: *mut c_void,
    vtable: AllocatorVTable,
}

impl VTableAllocator {
    /// Wrap a foreign allocator.
    ///
    /// # Safety
    ///
    /// The table's functions must honor the [`RawAllocator`] contract for the
    /// given `user` context, and `user` must outlive this handle.
    pub unsafe fn new(user: *mut c_void, vtable: AllocatorVTable) -> Self {
        Self { user, vtable }
    }

    /// The user context passed to every call.
    pub fn user(&self) -> *mut c_void {
        self.user
    }
}

unsafe impl RawAllocator for VTableAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        // SAFETY: `new` requires the table to be callable with `user`.
        let raw = unsafe { (self.vtable.aligned_alloc)(self.user, layout.size(), layout.align()) };
        NonNull::new(raw.cast::<u8>()).ok_or_else(|| failed(layout))
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        // SAFETY: as above.
        let raw = unsafe {
            (self.vtable.aligned_alloc_zeroed)(self.user, layout.size(), layout.align())
        };
        NonNull::new(raw.cast::<u8>()).ok_or_else(|| failed(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        // SAFETY: caller guarantees `ptr` came from this table.
        unsafe { (self.vtable.aligned_free)(self.user, ptr.as_ptr().cast::<c_void>()) }
    }
}

// ============================================================================
// TrackingAllocator
// ============================================================================

/// Allocator wrapper that counts live blocks and bytes.
///
/// Useful to check that a pool released everything it owns, and to observe
/// how often a pool falls through to its allocator.
#[derive(Debug, Default)]
pub struct TrackingAllocator<A: RawAllocator = SystemAllocator> {
    inner: A,
    live_blocks: AtomicUsize,
    live_bytes: AtomicUsize,
    total_allocations: AtomicUsize,
}

impl<A: RawAllocator> TrackingAllocator<A> {
    /// Wrap `inner`.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            live_blocks: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            total_allocations: AtomicUsize::new(0),
        }
    }

    /// Blocks currently allocated and not yet released.
    pub fn live_blocks(&self) -> usize {
        self.live_blocks.load(Ordering::Acquire)
    }

    /// Bytes currently allocated and not yet released.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    /// Number of successful allocations since construction.
    pub fn total_allocations(&self) -> usize {
        self.total_allocations.load(Ordering::Acquire)
    }

    fn record_alloc(&self, layout: Layout) {
        self.live_blocks.fetch_add(1, Ordering::AcqRel);
        self.live_bytes.fetch_add(layout.size(), Ordering::AcqRel);
        self.total_allocations.fetch_add(1, Ordering::AcqRel);
    }
}

unsafe impl<A: RawAllocator> RawAllocator for TrackingAllocator<A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        let ptr = self.inner.allocate(layout)?;
        self.record_alloc(layout);
        Ok(ptr)
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        let ptr = self.inner.allocate_zeroed(layout)?;
        self.record_alloc(layout);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live_blocks.fetch_sub(1, Ordering::AcqRel);
        self.live_bytes.fetch_sub(layout.size(), Ordering::AcqRel);
        unsafe { self.inner.deallocate(ptr, layout) }
    }
}
