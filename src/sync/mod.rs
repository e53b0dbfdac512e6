//! Fair spin locks.
//!
//! - [`TicketSpinLock`]: FIFO mutual exclusion.
//! - [`SequencedRwLock`]: reader-writer lock admitting groups in arrival order.
//!
//! Both spin while waiting; [`SpinPolicy`] decides whether a long wait falls
//! back to sleeping. They are meant for short critical sections such as a
//! pool's `rent`/`return`.
//!
//! # Example
//!
//! ```rust
//! use slabkit::memory::SlabPool;
//! use slabkit::sync::TicketSpinLock;
//! use std::cell::UnsafeCell;
//!
//! struct Shared {
//!     lock: TicketSpinLock,
//!     pool: UnsafeCell<SlabPool>,
//! }
//! unsafe impl Sync for Shared {}
//!
//! let shared = Shared {
//!     lock: TicketSpinLock::new(),
//!     pool: UnsafeCell::new(SlabPool::new(64, 32, 1).unwrap()),
//! };
//! let node = shared.lock.with(|| unsafe { (*shared.pool.get()).rent() }).unwrap();
//! shared.lock.with(|| unsafe { (*shared.pool.get()).return_node(node) });
//! ```

mod rwlock;
mod spin;
mod ticket;

pub use rwlock::{ReadGuard, SequencedRwLock, WriteGuard};
pub use spin::{SpinPolicy, SpinWait, spin_until};
pub use ticket::{Ticket, TicketGuard, TicketSpinLock};
