//! Metrics collection using metrics-rs.

use metrics::{Counter, Gauge, Unit, counter, gauge};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const POOL_SLABS: &str = "slabkit_pool_slabs";
const POOL_CACHED_SLABS: &str = "slabkit_pool_cached_slabs";
const SLABS_ALLOCATED: &str = "slabkit_slabs_allocated";
const SLABS_RELEASED: &str = "slabkit_slabs_released";
const SLABS_REUSED: &str = "slabkit_slabs_reused";
const BUCKET_MISSES: &str = "slabkit_bucket_misses";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_gauge!(
        POOL_SLABS,
        Unit::Count,
        "Slabs currently linked into a pool's active ring"
    );
    metrics::describe_gauge!(
        POOL_CACHED_SLABS,
        Unit::Count,
        "Fully empty slabs retained in a pool's free-slab cache"
    );
    metrics::describe_counter!(
        SLABS_ALLOCATED,
        Unit::Count,
        "Slabs obtained from the raw allocator"
    );
    metrics::describe_counter!(
        SLABS_RELEASED,
        Unit::Count,
        "Slabs handed back to the raw allocator"
    );
    metrics::describe_counter!(
        SLABS_REUSED,
        Unit::Count,
        "Slabs taken from the free-slab cache instead of the allocator"
    );
    metrics::describe_counter!(
        BUCKET_MISSES,
        Unit::Count,
        "Bucket pool rents that fell through to the allocator"
    );
}

/// Record a bucket pool cache miss.
#[inline]
pub fn record_bucket_miss(pool: &'static str) {
    counter!(BUCKET_MISSES, "pool" => pool).increment(1);
}

/// Metrics collector for one slab pool.
///
/// Handles are resolved once at pool construction so the slab lifecycle
/// paths only touch pre-registered counters and gauges.
///
/// The slab gauges are shared by every pool of the same kind. Each collector
/// remembers the shape it last reported and only moves the gauges by the
/// difference, so the gauges hold the sum over live pools.
pub struct SlabMetrics {
    kind: &'static str,
    slabs: Gauge,
    cached: Gauge,
    allocated: Counter,
    released: Counter,
    reused: Counter,
    reported: Cell<(usize, usize)>,
}

impl SlabMetrics {
    /// Create a collector labelled with the pool kind.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slabs: gauge!(POOL_SLABS, "pool" => kind),
            cached: gauge!(POOL_CACHED_SLABS, "pool" => kind),
            allocated: counter!(SLABS_ALLOCATED, "pool" => kind),
            released: counter!(SLABS_RELEASED, "pool" => kind),
            reused: counter!(SLABS_REUSED, "pool" => kind),
            reported: Cell::new((0, 0)),
        }
    }

    /// Record this pool's current ring and cache sizes.
    ///
    /// Report `(0, 0)` when the pool goes away to withdraw its share.
    #[inline]
    pub fn record_shape(&self, slabs: usize, cached: usize) {
        let (prev_slabs, prev_cached) = self.reported.replace((slabs, cached));
        shift(&self.slabs, prev_slabs, slabs);
        shift(&self.cached, prev_cached, cached);
    }

    /// Record a slab obtained from the raw allocator.
    #[inline]
    pub fn record_allocated(&self) {
        self.allocated.increment(1);
    }

    /// Record a slab returned to the raw allocator.
    #[inline]
    pub fn record_released(&self) {
        self.released.increment(1);
    }

    /// Record a slab reused from the free-slab cache.
    #[inline]
    pub fn record_reused(&self) {
        self.reused.increment(1);
    }

    /// The pool kind label.
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

fn shift(gauge: &Gauge, from: usize, to: usize) {
    if to > from {
        gauge.increment((to - from) as f64);
    } else if from > to {
        gauge.decrement((from - to) as f64);
    }
}

impl std::fmt::Debug for SlabMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabMetrics")
            .field("kind", &self.kind)
            .field("reported", &self.reported.get())
            .finish()
    }
}
