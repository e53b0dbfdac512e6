//! Arena pool: variable-length bump allocation inside fixed-size slabs.
//!
//! Each rent may ask for its own length and alignment. The pool bumps a
//! cursor through the sentinel slab and counts outstanding allocations per
//! slab; space only comes back when a slab's count drops to zero, at which
//! point the whole slab is reset. Individual holes are never reused.
//!
//! # Memory Layout
//!
//! ```text
//! slab base                                                    data end
//! ▼                                                                  ▼
//! ┌─────────────┬──────┬─────┬─────────┬─────┬──────┬─────────┬──────┐
//! │ SlabHeader  │ pad  │ off │ payload │ pad │ off  │ payload │ free │
//! │ outstanding │      │     │ (len a) │     │      │ (len b) │      │
//! │ cursor      │      │     │         │     │      │         │      │
//! └─────────────┴──────┴─────┴─────────┴─────┴──────┴─────────┴──────┘
//!                        ▲                     ▲
//!                        └ word just before each payload: byte offset
//!                          from the slab base, used by `return`
//! ```
//!
//! An allocation never straddles two slabs. A request that cannot fit in an
//! empty slab is rejected as a configuration error rather than treated as
//! exhaustion.

use super::align::{
    WORD_ALIGN, WORD_SIZE, align_up, checked_align_up, checked_span, validate_alignment,
};
use super::defaults;
use super::pool::{PoolCapacity, PoolStats};
use super::raw::{RawAllocator, SystemAllocator};
use super::ring::{SlabFormat, SlabHeader, SlabRing};
use crate::error::{Error, Result};
use std::alloc::Layout;
use std::mem;
use std::ptr::{self, NonNull};

/// Shape of an [`ArenaPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaPoolConfig {
    /// Bytes available for allocations (headers and padding included) per slab.
    pub max_length: usize,
    /// Alignment of slab memory. Requests up to this alignment pay no
    /// worst-case padding when checked against `max_length`.
    pub slab_alignment: usize,
    /// Empty slabs kept for reuse.
    pub max_free_slabs: usize,
}

impl Default for ArenaPoolConfig {
    fn default() -> Self {
        Self {
            max_length: defaults::ARENA_SLAB_LENGTH,
            slab_alignment: defaults::ARENA_SLAB_ALIGN,
            max_free_slabs: defaults::MAX_FREE_SLABS,
        }
    }
}

impl ArenaPoolConfig {
    /// Config for slabs of `max_length` bytes with default shape otherwise.
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            ..Self::default()
        }
    }

    /// Set the slab memory alignment.
    pub fn with_slab_alignment(mut self, slab_alignment: usize) -> Self {
        self.slab_alignment = slab_alignment;
        self
    }

    /// Set the free-slab cache bound.
    pub fn with_max_free_slabs(mut self, max_free_slabs: usize) -> Self {
        self.max_free_slabs = max_free_slabs;
        self
    }

    /// Check the shape before anything is allocated.
    pub fn validate(&self) -> Result<()> {
        validate_alignment(self.slab_alignment)?;
        if self.max_length <= WORD_SIZE {
            return Err(Error::invalid(format!(
                "max_length must exceed the {WORD_SIZE}-byte allocation header, got {}",
                self.max_length
            )));
        }
        Ok(())
    }
}

pub(crate) struct ArenaState {
    /// Allocations not yet returned.
    outstanding: usize,
    /// Bytes consumed from the start of the data area.
    cursor: usize,
}

type Slab = SlabHeader<ArenaState>;

pub(crate) struct ArenaFormat {
    max_length: usize,
    slab_align: usize,
    data_offset: usize,
    layout: Layout,
}

impl ArenaFormat {
    fn new(config: &ArenaPoolConfig) -> Result<Self> {
        let slab_align = config.slab_alignment.max(mem::align_of::<Slab>());
        let data_offset = align_up(mem::size_of::<Slab>(), slab_align);
        let total = checked_span(1, config.max_length, data_offset)?;
        let layout = Layout::from_size_align(total, slab_align)
            .map_err(|e| Error::LayoutOverflow(e.to_string()))?;

        Ok(Self {
            max_length: config.max_length,
            slab_align,
            data_offset,
            layout,
        })
    }

    /// Worst-case bytes an allocation takes in an empty slab.
    fn worst_case(&self, length: usize, alignment: usize) -> Option<usize> {
        // The data area starts `slab_align`-aligned, so smaller alignments
        // land at a fixed offset; larger ones may need up to `alignment - 1`.
        let head = if alignment <= self.slab_align {
            align_up(WORD_SIZE, alignment)
        } else {
            WORD_SIZE.checked_add(alignment - 1)?
        };
        head.checked_add(length)
    }

    /// Carve `length` bytes at `alignment` out of `slab`, if they fit.
    ///
    /// # Safety
    ///
    /// `slab` must be a live slab of this format.
    unsafe fn bump(
        &self,
        slab: NonNull<Slab>,
        length: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        let base = slab.as_ptr().cast::<u8>();
        let base_addr = base as usize;
        // SAFETY: caller guarantees `slab` is live.
        let state = unsafe { &mut (*slab.as_ptr()).state };

        let data = base_addr + self.data_offset;
        let cursor = data + state.cursor;
        let payload = checked_align_up(cursor.checked_add(WORD_SIZE)?, alignment)?;
        let end = payload.checked_add(length)?;
        if end > data + self.max_length {
            return None;
        }

        let offset = payload - base_addr;
        // SAFETY: `payload - WORD_SIZE .. end` lies inside the data area and
        // `payload` is at least word aligned.
        let ptr = unsafe {
            let ptr = base.add(offset);
            ptr.sub(WORD_SIZE).cast::<usize>().write(offset);
            NonNull::new_unchecked(ptr)
        };
        state.cursor = end - data;
        state.outstanding += 1;
        Some(ptr)
    }
}

unsafe impl SlabFormat for ArenaFormat {
    type State = ArenaState;
    const KIND: &'static str = "arena";

    fn layout(&self) -> Layout {
        self.layout
    }

    unsafe fn format(&self, slab: NonNull<Slab>) {
        // SAFETY: header lies at the start of the slab.
        unsafe {
            ptr::addr_of_mut!((*slab.as_ptr()).state).write(ArenaState {
                outstanding: 0,
                cursor: 0,
            });
        }
    }
}

/// A bump allocator over a ring of fixed-size slabs.
///
/// Not synchronized.
///
/// # Example
///
/// ```rust
/// use slabkit::memory::ArenaPool;
///
/// let mut arena = ArenaPool::new(4096, 1).unwrap();
/// let a = arena.rent(100, 8).unwrap();
/// let b = arena.rent(256, 64).unwrap();
/// assert_eq!(b.as_ptr() as usize % 64, 0);
///
/// unsafe {
///     arena.return_allocation(a);
///     arena.return_allocation(b);
/// }
/// ```
pub struct ArenaPool<A: RawAllocator = SystemAllocator> {
    ring: SlabRing<ArenaFormat, A>,
    config: ArenaPoolConfig,
    in_use: usize,
}

impl ArenaPool {
    /// Arena with `max_length`-byte slabs.
    pub fn new(max_length: usize, max_free_slabs: usize) -> Result<Self> {
        Self::with_config(
            ArenaPoolConfig::new(max_length).with_max_free_slabs(max_free_slabs),
            SystemAllocator,
        )
    }
}

impl<A: RawAllocator> ArenaPool<A> {
    /// Arena with an explicit config and allocator. Allocates the first slab.
    pub fn with_config(config: ArenaPoolConfig, allocator: A) -> Result<Self> {
        config.validate()?;
        let format = ArenaFormat::new(&config)?;
        let ring = SlabRing::new(format, allocator, config.max_free_slabs)?;
        Ok(Self {
            ring,
            config,
            in_use: 0,
        })
    }

    /// Rent `length` bytes aligned to `alignment`.
    ///
    /// `alignment` must be a power of two no smaller than the word alignment.
    /// Zero-length requests are allowed and still produce distinct, counted
    /// allocations.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a bad alignment, or a request that
    ///   cannot fit into an empty slab.
    /// - [`Error::AllocationFailed`] when a new slab cannot be allocated.
    pub fn rent(&mut self, length: usize, alignment: usize) -> Result<NonNull<u8>> {
        validate_alignment(alignment)?;
        if alignment < WORD_ALIGN {
            return Err(Error::invalid(format!(
                "alignment must be at least {WORD_ALIGN}, got {alignment}"
            )));
        }
        let format = self.ring.format();
        match format.worst_case(length, alignment) {
            Some(need) if need <= format.max_length => {}
            _ => {
                return Err(Error::invalid(format!(
                    "{length} bytes at alignment {alignment} cannot fit a {}-byte slab",
                    format.max_length
                )));
            }
        }

        let ptr = self.bump_rotating(length, alignment)?;
        self.in_use += 1;
        Ok(ptr)
    }

    fn bump_rotating(&mut self, length: usize, alignment: usize) -> Result<NonNull<u8>> {
        // SAFETY: every slab handed out by the ring is live.
        unsafe {
            let slab = self.ring.sentinel();
            if let Some(ptr) = self.ring.format().bump(slab, length, alignment) {
                return Ok(ptr);
            }
            let slab = self.ring.advance();
            if let Some(ptr) = self.ring.format().bump(slab, length, alignment) {
                return Ok(ptr);
            }
            let slab = self.ring.grow()?;
            self.ring
                .format()
                .bump(slab, length, alignment)
                .ok_or_else(|| Error::invalid("request does not fit an empty slab"))
        }
    }

    /// Return an allocation.
    ///
    /// When the owning slab has no outstanding allocations left its cursor is
    /// reset; if it is not the sentinel it also leaves the ring.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`rent`](Self::rent) on this pool and must not
    /// have been returned already. Misuse is not detected.
    pub unsafe fn return_allocation(&mut self, ptr: NonNull<u8>) {
        debug_assert!(self.in_use > 0, "return without outstanding rent");
        // SAFETY: caller guarantees `ptr` is outstanding, so the word before
        // it holds the offset back to its slab.
        let (slab, empty) = unsafe {
            let offset = ptr.as_ptr().sub(WORD_SIZE).cast::<usize>().read();
            let slab = ptr.as_ptr().sub(offset).cast::<Slab>();
            let state = &mut (*slab).state;
            debug_assert!(state.outstanding > 0);
            state.outstanding -= 1;
            let empty = state.outstanding == 0;
            if empty {
                state.cursor = 0;
            }
            (NonNull::new_unchecked(slab), empty)
        };
        self.in_use -= 1;

        if empty {
            // SAFETY: no allocation in this slab is outstanding.
            unsafe { self.ring.retire(slab) };
        }
    }

    /// Bytes per slab available to allocations.
    pub fn max_length(&self) -> usize {
        self.config.max_length
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

    /// Allocations currently outstanding.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Bytes consumed in the sentinel slab, padding and headers included.
    pub fn sentinel_used(&self) -> usize {
        // SAFETY: the sentinel is live.
        unsafe { self.ring.sentinel().as_ref() }.state.cursor
    }

    /// Bytes consumed across ring slabs, padding, headers and unreclaimed
    /// holes included.
    pub fn used_bytes(&self) -> usize {
        let mut used = 0;
        self.ring.for_each_slab(|slab| used += slab.state.cursor);
        used
    }
}

impl<A: RawAllocator> PoolCapacity for ArenaPool<A> {
    fn ensure_capacity(&mut self, count: usize) -> Result<usize> {
        self.ring.ensure_cached(count)
    }

    fn trim_excess(&mut self, keep: usize) -> usize {
        self.ring.trim_cached(keep)
    }

    /// `capacity` and `in_use` are byte counts over the ring slabs; see
    /// [`in_use`](ArenaPool::in_use) for the number of allocations.
    fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.ring.slabs() * self.config.max_length,
            in_use: self.used_bytes(),
            slabs: self.ring.slabs(),
            cached: self.ring.cached(),
        }
    }
}

impl<A: RawAllocator> std::fmt::Debug for ArenaPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaPool")
            .field("config", &self.config)
            .field("slabs", &self.slabs())
            .field("free_slabs", &self.free_slabs())
            .field("in_use", &self.in_use)
            .finish()
    }
}
