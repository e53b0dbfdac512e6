//! Fixed-block slab pool with intrusive per-slab free lists.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────┬──────────────────────┬──────────────────────┬─────┐
//! │ SlabHeader  │ node 0               │ node 1               │ ... │
//! │ next, prev, │ ┌────────┬─────────┐ │ ┌────────┬─────────┐ │     │
//! │ free head,  │ │ back → │ payload │ │ │ back → │ payload │ │     │
//! │ free count  │ │ slab   │         │ │ │ slab   │         │ │     │
//! └─────────────┴─┴────────┴─────────┴─┴─┴────────┴─────────┴─┴─────┘
//! ```
//!
//! The back-pointer is written once when the slab is formatted and sits in
//! front of the payload, so it survives while the node is rented. A free
//! node stores the free-list link in the first word of its payload.
//!
//! Returning a node reads the back-pointer, pushes the node on its slab's
//! list, and retires the slab once it is fully free (unless it is the
//! sentinel).

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

/// Shape of a [`SlabPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabPoolConfig {
    /// Payload bytes per node.
    pub length: usize,
    /// Nodes per slab.
    pub size: usize,
    /// Payload alignment; raised to at least word alignment.
    pub alignment: usize,
    /// Empty slabs kept for reuse.
    pub max_free_slabs: usize,
}

impl Default for SlabPoolConfig {
    fn default() -> Self {
        Self {
            length: WORD_SIZE,
            size: defaults::SLAB_NODES,
            alignment: WORD_ALIGN,
            max_free_slabs: defaults::MAX_FREE_SLABS,
        }
    }
}

impl SlabPoolConfig {
    /// Config for `length`-byte nodes with default shape otherwise.
    pub fn new(length: usize) -> Self {
        Self {
            length,
            ..Self::default()
        }
    }

    /// Set nodes per slab.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
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
        if self.size == 0 {
            return Err(Error::invalid("size must be > 0"));
        }
        validate_alignment(self.alignment)
    }
}

pub(crate) struct FreeListState {
    /// Payload address of the first free node, null when exhausted.
    head: *mut u8,
    /// Free nodes in this slab.
    free: usize,
}

type Slab = SlabHeader<FreeListState>;

pub(crate) struct FreeListFormat {
    size: usize,
    node_header: usize,
    stride: usize,
    data_offset: usize,
    layout: Layout,
}

impl FreeListFormat {
    fn new(config: &SlabPoolConfig) -> Result<Self> {
        let align = config.alignment.max(WORD_ALIGN);
        let node_header = align_up(WORD_SIZE, align);
        let payload = config.length.max(WORD_SIZE);
        let stride = node_header
            .checked_add(payload)
            .and_then(|n| checked_align_up(n, align))
            .ok_or_else(|| Error::LayoutOverflow(format!("node of {payload} bytes")))?;
        let data_offset = align_up(mem::size_of::<Slab>(), align);
        let total = checked_span(config.size, stride, data_offset)?;
        let layout = Layout::from_size_align(total, align.max(mem::align_of::<Slab>()))
            .map_err(|e| Error::LayoutOverflow(e.to_string()))?;

        Ok(Self {
            size: config.size,
            node_header,
            stride,
            data_offset,
            layout,
        })
    }
}

unsafe impl SlabFormat for FreeListFormat {
    type State = FreeListState;
    const KIND: &'static str = "free_list";

    fn layout(&self) -> Layout {
        self.layout
    }

    unsafe fn format(&self, slab: NonNull<Slab>) {
        let base = slab.as_ptr().cast::<u8>();
        let mut head = ptr::null_mut();
        // Thread back to front so node 0 is handed out first.
        for i in (0..self.size).rev() {
            // SAFETY: every node lies inside the slab layout; payloads are word aligned.
            unsafe {
                let payload = base.add(self.data_offset + i * self.stride + self.node_header);
                payload.sub(WORD_SIZE).cast::<*mut Slab>().write(slab.as_ptr());
                payload.cast::<*mut u8>().write(head);
                head = payload;
            }
        }
        // SAFETY: header lies at the start of the slab.
        unsafe {
            ptr::addr_of_mut!((*slab.as_ptr()).state).write(FreeListState {
                head,
                free: self.size,
            });
        }
    }
}

/// A pool of fixed-size nodes carved from a ring of slabs.
///
/// Not synchronized: wrap calls in a [`TicketSpinLock`](crate::sync::TicketSpinLock)
/// or keep one pool per thread.
///
/// # Example
///
/// ```rust
/// use slabkit::memory::SlabPool;
///
/// // 48-byte nodes, 4 per slab, keep at most one empty slab cached.
/// let mut pool = SlabPool::new(48, 4, 1).unwrap();
///
/// let node = pool.rent().unwrap();
/// unsafe {
///     node.as_ptr().write_bytes(0xAB, 48);
///     pool.return_node(node);
/// }
/// assert_eq!(pool.slabs(), 1);
/// ```
pub struct SlabPool<A: RawAllocator = SystemAllocator> {
    ring: SlabRing<FreeListFormat, A>,
    config: SlabPoolConfig,
    in_use: usize,
}

impl SlabPool {
    /// Pool of word-aligned `length`-byte nodes, `size` per slab.
    pub fn new(length: usize, size: usize, max_free_slabs: usize) -> Result<Self> {
        Self::with_config(
            SlabPoolConfig::new(length)
                .with_size(size)
                .with_max_free_slabs(max_free_slabs),
            SystemAllocator,
        )
    }

    /// Pool whose payloads are aligned to `alignment`.
    pub fn aligned(
        length: usize,
        size: usize,
        max_free_slabs: usize,
        alignment: usize,
    ) -> Result<Self> {
        Self::with_config(
            SlabPoolConfig::new(length)
                .with_size(size)
                .with_max_free_slabs(max_free_slabs)
                .with_alignment(alignment),
            SystemAllocator,
        )
    }
}

impl<A: RawAllocator> SlabPool<A> {
    /// Pool with an explicit config and allocator. Allocates the first slab.
    pub fn with_config(config: SlabPoolConfig, allocator: A) -> Result<Self> {
        config.validate()?;
        let format = FreeListFormat::new(&config)?;
        let ring = SlabRing::new(format, allocator, config.max_free_slabs)?;
        Ok(Self {
            ring,
            config,
            in_use: 0,
        })
    }

    /// Rent one node.
    ///
    /// Draws from the sentinel slab, then the next ring slab, then a cached
    /// or freshly allocated slab. Fails only when the allocator does.
    pub fn rent(&mut self) -> Result<NonNull<u8>> {
        let mut slab = self.ring.sentinel();
        // SAFETY: ring slabs are live for the lifetime of the ring.
        if unsafe { slab.as_ref() }.state.head.is_null() {
            slab = self.ring.advance();
            if unsafe { slab.as_ref() }.state.head.is_null() {
                slab = self.ring.grow()?;
            }
        }

        // SAFETY: `slab` has at least one free node; its link is word aligned.
        let node = unsafe {
            let state = &mut (*slab.as_ptr()).state;
            let node = state.head;
            state.head = node.cast::<*mut u8>().read();
            state.free -= 1;
            NonNull::new_unchecked(node)
        };
        self.in_use += 1;
        Ok(node)
    }

    /// Return a node to its slab.
    ///
    /// # Safety
    ///
    /// `node` must come from [`rent`](Self::rent) on this pool and must not
    /// have been returned already. Foreign or duplicate returns are not
    /// detected and corrupt the pool.
    pub unsafe fn return_node(&mut self, node: NonNull<u8>) {
        debug_assert!(self.in_use > 0, "return without outstanding rent");
        let payload = node.as_ptr();
        // SAFETY: caller guarantees `node` is an outstanding node of this pool,
        // so the word before it is the back-pointer to a ring slab.
        let (slab, empty) = unsafe {
            let slab = payload.sub(WORD_SIZE).cast::<*mut Slab>().read();
            let state = &mut (*slab).state;
            payload.cast::<*mut u8>().write(state.head);
            state.head = payload;
            state.free += 1;
            (NonNull::new_unchecked(slab), state.free == self.config.size)
        };
        self.in_use -= 1;

        if empty {
            // SAFETY: the slab has no outstanding nodes.
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

    /// Nodes per slab.
    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Requested payload bytes per node.
    pub fn length(&self) -> usize {
        self.config.length
    }

    /// Effective payload alignment.
    pub fn alignment(&self) -> usize {
        self.config.alignment.max(WORD_ALIGN)
    }

    /// Distance between consecutive nodes of a slab, header included.
    pub fn node_stride(&self) -> usize {
        self.ring.format().stride
    }

    /// Nodes currently rented.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Free nodes across the ring, counted slab by slab.
    pub fn free_nodes(&self) -> usize {
        let mut free = 0;
        self.ring.for_each_slab(|slab| free += slab.state.free);
        free
    }
}

impl<A: RawAllocator> PoolCapacity for SlabPool<A> {
    fn ensure_capacity(&mut self, count: usize) -> Result<usize> {
        self.ring.ensure_cached(count)
    }

    fn trim_excess(&mut self, keep: usize) -> usize {
        self.ring.trim_cached(keep)
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.ring.slabs() * self.config.size,
            in_use: self.in_use,
            slabs: self.ring.slabs(),
            cached: self.ring.cached(),
        }
    }
}

impl<A: RawAllocator> std::fmt::Debug for SlabPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabPool")
            .field("config", &self.config)
            .field("slabs", &self.slabs())
            .field("free_slabs", &self.free_slabs())
            .field("in_use", &self.in_use)
            .finish()
    }
}
