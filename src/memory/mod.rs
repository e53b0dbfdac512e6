//! Pooled memory for slabkit.
//!
//! Every pool hands out raw, uninitialized `NonNull<u8>` blocks and takes
//! them back. Pools own their backing memory through a [`RawAllocator`]
//! supplied at construction and release all of it on drop.
//!
//! # Pools
//!
//! | Pool                   | Block size | Grows | Return             |
//! |------------------------|------------|-------|--------------------|
//! | [`SlabPool`]           | fixed      | yes   | `unsafe`           |
//! | [`BitmapPool32`]       | fixed      | yes   | `unsafe`           |
//! | [`BitmapPool64`]       | fixed      | yes   | `unsafe`           |
//! | [`ArenaPool`]          | variable   | yes   | `unsafe`, per slab |
//! | [`FixedSizePool`]      | fixed      | no    | checked `Result`   |
//! | [`FixedSizeStackPool`] | fixed      | no    | `unsafe`           |
//! | [`BucketPool`]         | fixed      | yes   | `unsafe`           |
//!
//! The growable slab pools share one ring of slabs with a sentinel (the slab
//! rents are served from) and a bounded cache of empty slabs. A slab leaves
//! the ring only when it is completely free and is not the sentinel.
//!
//! None of the pools are `Sync`; wrap them in a lock such as
//! [`TicketSpinLock`](crate::sync::TicketSpinLock) to share across threads.
//!
//! # Example
//!
//! ```rust
//! use slabkit::memory::{PoolCapacity, SlabPool};
//!
//! let mut pool = SlabPool::new(48, 16, 2).unwrap();
//! pool.ensure_capacity(1).unwrap();
//!
//! let node = pool.rent().unwrap();
//! unsafe {
//!     node.as_ptr().write_bytes(0xAB, 48);
//!     pool.return_node(node);
//! }
//! assert_eq!(pool.stats().in_use, 0);
//! ```

mod align;
mod arena;
mod bitmap;
mod bitmap_pool;
mod bucket;
pub mod defaults;
mod fixed;
mod pool;
mod raw;
mod ring;
mod slab_pool;

pub use align::{
    WORD_ALIGN, WORD_SIZE, align_down, align_up, checked_align_up, is_aligned, padding_for,
    validate_alignment,
};
pub use arena::{ArenaPool, ArenaPoolConfig};
pub use bitmap::{BitmapWord, OccupancyBitmap};
pub use bitmap_pool::{BitmapPool32, BitmapPool64, BitmapPoolConfig, BitmapSlabPool};
pub use bucket::BucketPool;
pub use fixed::{FixedSizePool, FixedSizeStackPool};
pub use pool::{PoolCapacity, PoolStats};
pub use raw::{AllocatorVTable, RawAllocator, SystemAllocator, TrackingAllocator, VTableAllocator};
pub use slab_pool::{SlabPool, SlabPoolConfig};
