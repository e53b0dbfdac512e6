//! Observability: metrics and tracing for pool internals.
//!
//! Pools emit events only on slab lifecycle transitions (allocate, cache,
//! reuse, release), never on the per-node rent/return path.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `slabkit_pool_slabs` | Gauge | Slabs linked into the active ring |
//! | `slabkit_pool_cached_slabs` | Gauge | Empty slabs held in the free-slab cache |
//! | `slabkit_slabs_allocated` | Counter | Slabs obtained from the raw allocator |
//! | `slabkit_slabs_released` | Counter | Slabs handed back to the raw allocator |
//! | `slabkit_slabs_reused` | Counter | Slabs recycled from the free-slab cache |
//! | `slabkit_bucket_misses` | Counter | Bucket pool rents served by the allocator |
//!
//! Every metric carries a `pool` label naming the pool kind.
//! The slab gauges are summed over every live pool of that kind.
//!
//! ## Tracing
//!
//! Slab lifecycle transitions are logged at `debug` level, ring rotation at
//! `trace` level, and misuse detected by checked pools at `warn` level.
//!
//! ## Example
//!
//! ```rust,ignore
//! use slabkit::observability::init_metrics;
//!
//! // Install an exporter of your choice, then describe the metrics once.
//! init_metrics();
//! ```

mod metrics;

pub use metrics::{SlabMetrics, init_metrics, record_bucket_miss};
