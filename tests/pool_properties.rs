//! Integration tests for pool invariants.
//!
//! These exercise every pool through its public surface: round trips leave
//! counters unchanged, live blocks never alias, capacity bounds hold, and
//! dropping a pool returns every byte to the allocator.

use slabkit::Error;
use slabkit::memory::{
    ArenaPool, ArenaPoolConfig, BitmapPool32, BitmapPool64, BitmapPoolConfig, BucketPool,
    FixedSizePool, FixedSizeStackPool, PoolCapacity, SlabPool, SlabPoolConfig, TrackingAllocator,
};
use slabkit::sync::TicketSpinLock;
use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::ptr::NonNull;
use std::thread;

fn fill(ptr: NonNull<u8>, len: usize, byte: u8) {
    unsafe { ptr.as_ptr().write_bytes(byte, len) };
}

fn holds(ptr: NonNull<u8>, len: usize, byte: u8) -> bool {
    unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
        .iter()
        .all(|&b| b == byte)
}

// ============================================================================
// Slab Ring Shape
// ============================================================================

/// Five nodes from four-node slabs need a second slab; returning them all
/// leaves the sentinel plus one cached slab.
#[test]
fn test_free_list_worked_example() {
    let mut pool = SlabPool::new(16, 4, 1).unwrap();
    let nodes: Vec<_> = (0..5).map(|_| pool.rent().unwrap()).collect();
    assert_eq!(pool.slabs(), 2);
    assert_eq!(pool.free_slabs(), 0);

    for node in nodes {
        unsafe { pool.return_node(node) };
    }
    assert_eq!(pool.slabs(), 1);
    assert_eq!(pool.free_slabs(), 1);
    assert_eq!(pool.in_use(), 0);
}

/// The bitmap pools follow the same ring rules with 32/64 slots per slab.
#[test]
fn test_bitmap_worked_example() {
    let mut pool = BitmapPool32::new(8, 1).unwrap();
    let slots: Vec<_> = (0..33).map(|_| pool.rent().unwrap()).collect();
    assert_eq!(pool.slabs(), 2);

    for slot in slots {
        unsafe { pool.return_slot(slot) };
    }
    assert_eq!(pool.slabs(), 1);
    assert_eq!(pool.free_slabs(), 1);
}

// ============================================================================
// Aliasing and Integrity
// ============================================================================

/// Live nodes never share bytes: each keeps its fill pattern while the
/// others are written, across several slabs.
#[test]
fn test_no_aliasing_across_pools() {
    const LEN: usize = 40;

    let mut slab = SlabPool::new(LEN, 8, 2).unwrap();
    let mut bitmap = BitmapPool64::new(LEN, 2).unwrap();
    let mut arena = ArenaPool::new(512, 2).unwrap();

    let mut live = Vec::new();
    for i in 0..150u8 {
        let ptr = match i % 3 {
            0 => slab.rent().unwrap(),
            1 => bitmap.rent().unwrap(),
            _ => arena.rent(LEN, 8).unwrap(),
        };
        fill(ptr, LEN, i);
        live.push((i, ptr));
    }

    let addrs: HashSet<_> = live.iter().map(|(_, p)| p.as_ptr() as usize).collect();
    assert_eq!(addrs.len(), live.len());
    assert!(live.iter().all(|&(i, p)| holds(p, LEN, i)));

    for (i, ptr) in live {
        unsafe {
            match i % 3 {
                0 => slab.return_node(ptr),
                1 => bitmap.return_slot(ptr),
                _ => arena.return_allocation(ptr),
            }
        }
    }
    assert_eq!(slab.in_use() + bitmap.in_use() + arena.in_use(), 0);
}

/// Interleaved rents and returns keep counters consistent.
#[test]
fn test_interleaved_churn() {
    let mut pool = SlabPool::with_config(
        SlabPoolConfig::new(24).with_size(5).with_max_free_slabs(2),
        slabkit::memory::SystemAllocator,
    )
    .unwrap();

    let mut live = Vec::new();
    for round in 0..200usize {
        if round % 3 == 2 {
            if let Some(ptr) = live.pop() {
                unsafe { pool.return_node(ptr) };
            }
        } else {
            live.push(pool.rent().unwrap());
        }
        assert_eq!(pool.in_use(), live.len());
        assert!(pool.free_slabs() <= pool.max_free_slabs());
    }
    for ptr in live.drain(..) {
        unsafe { pool.return_node(ptr) };
    }
    assert_eq!(pool.slabs(), 1);
}

// ============================================================================
// Alignment
// ============================================================================

#[test]
fn test_requested_alignment_is_honored() {
    for align in [8usize, 16, 64, 256] {
        let mut slab = SlabPool::aligned(10, 6, 1, align).unwrap();
        let mut bitmap = BitmapPool32::aligned(10, 1, align).unwrap();
        let mut fixed = FixedSizePool::aligned(10, 6, align).unwrap();
        for _ in 0..6 {
            assert_eq!(slab.rent().unwrap().as_ptr() as usize % align, 0);
            assert_eq!(bitmap.rent().unwrap().as_ptr() as usize % align, 0);
            assert_eq!(fixed.try_rent().unwrap().as_ptr() as usize % align, 0);
        }
    }
}

#[test]
fn test_arena_mixed_alignment() {
    let config = ArenaPoolConfig::new(4096).with_slab_alignment(64);
    let mut arena = ArenaPool::with_config(config, slabkit::memory::SystemAllocator).unwrap();
    let mut spans = Vec::new();
    for i in 0..64usize {
        let align = 8 << (i % 6);
        let len = (i * 37) % 300;
        let ptr = arena.rent(len, align).unwrap();
        assert_eq!(ptr.as_ptr() as usize % align, 0);
        spans.push((ptr.as_ptr() as usize, len.max(1), ptr));
    }
    for (i, a) in spans.iter().enumerate() {
        for b in &spans[i + 1..] {
            assert!(a.0 + a.1 <= b.0 || b.0 + b.1 <= a.0);
        }
    }
    for (_, _, ptr) in spans {
        unsafe { arena.return_allocation(ptr) };
    }
    assert_eq!(arena.slabs(), 1);
}

// ============================================================================
// Capacity Bounds
// ============================================================================

#[test]
fn test_flat_pools_never_grow() {
    let mut checked = FixedSizePool::new(32, 8).unwrap();
    let mut stack = FixedSizeStackPool::new(32, 8).unwrap();
    for _ in 0..8 {
        checked.try_rent().unwrap();
        stack.try_rent().unwrap();
    }
    assert!(checked.try_rent().is_none());
    assert!(stack.try_rent().is_none());
    assert_eq!(checked.ensure_capacity(4).unwrap(), 0);
    assert_eq!(stack.stats().capacity, 8);
}

/// Only the checked flat pool reports misuse; the pool is unchanged after.
#[test]
fn test_checked_pool_reports_misuse() {
    let mut pool = FixedSizePool::new(16, 4).unwrap();
    let a = pool.try_rent().unwrap();
    let before = pool.stats();

    let mut outside = [0u8; 16];
    let foreign = NonNull::new(outside.as_mut_ptr()).unwrap();
    assert!(matches!(
        pool.return_element(foreign),
        Err(Error::ReturnMismatch { .. })
    ));
    assert_eq!(pool.stats(), before);

    pool.return_element(a).unwrap();
    assert!(matches!(
        pool.return_element(a),
        Err(Error::DuplicateReturn { index: 0 })
    ));
    assert_eq!(pool.available(), 4);
}

#[test]
fn test_free_slab_cache_is_bounded() {
    let mut pool = BitmapPool64::with_config(
        BitmapPoolConfig::new(16).with_max_free_slabs(2),
        slabkit::memory::SystemAllocator,
    )
    .unwrap();
    let slots: Vec<_> = (0..64 * 5).map(|_| pool.rent().unwrap()).collect();
    assert_eq!(pool.slabs(), 5);
    for slot in slots {
        unsafe { pool.return_slot(slot) };
    }
    assert_eq!(pool.slabs(), 1);
    assert_eq!(pool.free_slabs(), 2);
    assert_eq!(pool.trim(), 2);
}

// ============================================================================
// Resource Release
// ============================================================================

/// Dropping any pool returns every block it owns, even with nodes still out.
#[test]
fn test_drop_releases_all_memory() {
    let tracking: TrackingAllocator = TrackingAllocator::default();
    {
        let mut slab =
            SlabPool::with_config(SlabPoolConfig::new(64).with_size(4), &tracking).unwrap();
        let mut bitmap =
            BitmapPool32::with_config(BitmapPoolConfig::new(64), &tracking).unwrap();
        let mut arena = ArenaPool::with_config(ArenaPoolConfig::new(1024), &tracking).unwrap();
        let mut fixed = FixedSizePool::with_allocator(64, 16, 8, &tracking).unwrap();
        let mut bucket = BucketPool::with_allocator(64, 8, 4, &tracking).unwrap();

        for _ in 0..40 {
            slab.rent().unwrap();
            bitmap.rent().unwrap();
            arena.rent(100, 16).unwrap();
        }
        fixed.try_rent().unwrap();
        let block = bucket.rent().unwrap();
        unsafe { bucket.return_block(block) };
        slab.ensure_capacity(2).unwrap();

        assert!(tracking.live_blocks() > 5);
    }
    assert_eq!(tracking.live_blocks(), 0);
    assert_eq!(tracking.live_bytes(), 0);
}

// ============================================================================
// Sharing Through a Lock
// ============================================================================

struct LockedPool {
    lock: TicketSpinLock,
    pool: UnsafeCell<SlabPool>,
}

// The pool is only touched while `lock` is held.
unsafe impl Sync for LockedPool {}

impl LockedPool {
    fn rent(&self) -> usize {
        self.lock
            .with(|| unsafe { (*self.pool.get()).rent() })
            .unwrap()
            .as_ptr() as usize
    }

    fn give_back(&self, addr: usize) {
        let ptr = NonNull::new(addr as *mut u8).unwrap();
        self.lock.with(|| unsafe { (*self.pool.get()).return_node(ptr) });
    }
}

#[test]
fn test_pool_shared_through_ticket_lock() {
    let shared = LockedPool {
        lock: TicketSpinLock::new(),
        pool: UnsafeCell::new(SlabPool::new(32, 16, 2).unwrap()),
    };

    thread::scope(|s| {
        for t in 0..4u8 {
            let shared = &shared;
            s.spawn(move || {
                for _ in 0..250 {
                    let addr = shared.rent();
                    let ptr = NonNull::new(addr as *mut u8).unwrap();
                    fill(ptr, 32, t);
                    assert!(holds(ptr, 32, t));
                    shared.give_back(addr);
                }
            });
        }
    });

    let pool = shared.pool.into_inner();
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.slabs(), 1);
}
