//! Surface shared by every pool variant.

use crate::error::Result;

/// Snapshot of pool occupancy.
///
/// `capacity` and `in_use` share a unit, so [`utilization`](Self::utilization)
/// is comparable across pools: nodes (or blocks) for the fixed-size pools,
/// bytes for [`ArenaPool`](super::ArenaPool).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Nodes the pool can hand out without growing; slab bytes in the ring
    /// for the arena pool.
    pub capacity: usize,
    /// Nodes currently rented; bytes consumed in the ring (holes included)
    /// for the arena pool.
    pub in_use: usize,
    /// Slabs in the active ring (1 for flat pools, 0 for bucket pools).
    pub slabs: usize,
    /// Empty slabs (or cached blocks, for bucket pools) held for reuse.
    pub cached: usize,
}

impl PoolStats {
    /// Capacity left without growing, in the same unit as `capacity`.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_use)
    }

    /// Fraction of capacity in use, in percent.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.in_use as f64 * 100.0 / self.capacity as f64
    }
}

/// Capacity management common to all pools.
///
/// Slab pools interpret the count as cached empty slabs; the bucket pool as
/// cached blocks. Flat pools never grow or shrink: `ensure_capacity` only
/// reports how many of the requested elements are free, and `trim_excess`
/// releases nothing.
pub trait PoolCapacity {
    /// Pre-warm the reuse cache up to `min(count, bound)` entries.
    ///
    /// Returns the number of cached entries afterwards.
    fn ensure_capacity(&mut self, count: usize) -> Result<usize>;

    /// Release cached entries above `keep`. Returns how many were released.
    fn trim_excess(&mut self, keep: usize) -> usize;

    /// Release every cached entry.
    fn trim(&mut self) -> usize {
        self.trim_excess(0)
    }

    /// Current occupancy.
    fn stats(&self) -> PoolStats;
}
