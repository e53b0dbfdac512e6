//! # slabkit
//!
//! Block pools and fair spin locks for building unmanaged containers.
//!
//! Containers that manage their own nodes (lists, trees, hash tables) spend
//! much of their time in the allocator. slabkit replaces per-node allocation
//! with pools that carve nodes out of larger slabs and recycle them.
//!
//! ## Features
//!
//! - **Slab pools**: fixed-size nodes from a ring of slabs, tracked either by
//!   intrusive free lists ([`memory::SlabPool`]) or by a bitmap per slab
//!   ([`memory::BitmapPool32`], [`memory::BitmapPool64`])
//! - **Arena pool**: variable-length bump allocation reclaimed per slab
//!   ([`memory::ArenaPool`])
//! - **Flat pools**: one fixed buffer, with or without misuse detection
//!   ([`memory::FixedSizePool`], [`memory::FixedSizeStackPool`])
//! - **Bucket pool**: a bounded cache in front of the allocator
//!   ([`memory::BucketPool`])
//! - **Pluggable allocation**: every pool goes through a
//!   [`memory::RawAllocator`], including a C function table
//! - **Fair locks**: [`sync::TicketSpinLock`] and [`sync::SequencedRwLock`]
//!
//! ## Quick Start
//!
//! ```rust
//! use slabkit::prelude::*;
//!
//! let mut pool = SlabPool::new(32, 64, 2)?;
//! let node = pool.rent()?;
//! unsafe { pool.return_node(node) };
//!
//! let lock = TicketSpinLock::new();
//! lock.with(|| { /* critical section */ });
//! # Ok::<(), slabkit::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod memory;
pub mod observability;
pub mod sync;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::memory::{
        ArenaPool, BitmapPool32, BitmapPool64, BucketPool, FixedSizePool, FixedSizeStackPool,
        PoolCapacity, PoolStats, RawAllocator, SlabPool, SystemAllocator,
    };
    pub use crate::sync::{SequencedRwLock, SpinPolicy, TicketSpinLock};
}

pub use error::{Error, Result};
