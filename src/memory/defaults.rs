//! Default pool shapes and configuration constants.
//!
//! These values are what the `Default` impls of the config structs use.
//! They favor small slabs that stay resident in L1/L2 over large slabs that
//! amortize allocator calls further.
//!
//! # Usage
//!
//! ```rust,ignore
//! use slabkit::memory::{SlabPool, defaults};
//!
//! let pool = SlabPool::new(48, defaults::SLAB_NODES, defaults::MAX_FREE_SLABS)?;
//! ```

// =============================================================================
// Slab shapes
// =============================================================================

/// Nodes per slab for free-list pools.
pub const SLAB_NODES: usize = 64;

/// Empty slabs a pool keeps cached before releasing them to the allocator.
pub const MAX_FREE_SLABS: usize = 4;

/// Payload bytes per slab for arena pools (64KB).
pub const ARENA_SLAB_LENGTH: usize = 64 * 1024;

/// Alignment of arena slab memory; one cache line.
pub const ARENA_SLAB_ALIGN: usize = 64;

// =============================================================================
// Flat and bucket pools
// =============================================================================

/// Cached pointers retained by a bucket pool.
pub const BUCKET_CAPACITY: usize = 32;

// =============================================================================
// Spin waiting
// =============================================================================

/// Spins before a bounded [`SpinWait`](crate::sync::SpinWait) starts sleeping
/// when the caller asks for the recommended bound.
pub const SPIN_SLEEP_THRESHOLD: u32 = 1024;

/// Sleep per iteration once a bounded spin-wait crosses its threshold.
pub const SPIN_SLEEP_MICROS: u64 = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        assert!(SLAB_NODES > 0);
        assert!(ARENA_SLAB_ALIGN.is_power_of_two());
        assert!(ARENA_SLAB_LENGTH > ARENA_SLAB_ALIGN);
        assert!(BUCKET_CAPACITY > 0);
    }
}
