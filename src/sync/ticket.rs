//! FIFO ticket spin lock.
//!
//! Two counters: the next ticket to hand out and the ticket being served.
//! A caller takes a ticket, waits until it is served, and bumps the served
//! counter on exit. Tickets are served in the order they were drawn, so no
//! waiter can be overtaken.
//!
//! The lock protects no data of its own; it serializes whatever the caller
//! does between `enter` and `exit`. It is not reentrant: entering twice from
//! the same thread deadlocks.

use super::spin::{SpinPolicy, SpinWait};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Position in a [`TicketSpinLock`] queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    /// Raw ticket number.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Fair spin lock.
///
/// ```rust
/// use slabkit::sync::TicketSpinLock;
///
/// let lock = TicketSpinLock::new();
/// {
///     let _guard = lock.enter();
///     assert!(lock.is_locked());
/// }
/// assert!(!lock.is_locked());
/// assert_eq!(lock.with(|| 7), 7);
/// ```
#[derive(Debug, Default)]
pub struct TicketSpinLock {
    next_ticket: CachePadded<AtomicU64>,
    now_serving: CachePadded<AtomicU64>,
}

impl TicketSpinLock {
    /// Unlocked lock.
    pub const fn new() -> Self {
        Self {
            next_ticket: CachePadded::new(AtomicU64::new(0)),
            now_serving: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Draw a ticket without waiting.
    #[inline]
    pub fn acquire(&self) -> Ticket {
        // Only the order matters here; `wait` synchronizes with `exit`.
        Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed))
    }

    /// Block until `ticket` is being served.
    pub fn wait(&self, ticket: Ticket, policy: SpinPolicy) {
        let mut spin = SpinWait::new(policy);
        while self.now_serving.load(Ordering::Acquire) != ticket.0 {
            spin.spin_once();
        }
    }

    /// Acquire and wait, spinning without bound.
    pub fn enter(&self) -> TicketGuard<'_> {
        self.enter_with(SpinPolicy::Unbounded)
    }

    /// Acquire and wait under `policy`.
    pub fn enter_with(&self, policy: SpinPolicy) -> TicketGuard<'_> {
        let ticket = self.acquire();
        self.wait(ticket, policy);
        TicketGuard { lock: self, ticket }
    }

    /// Enter only if nobody holds or waits for the lock.
    pub fn try_enter(&self) -> Option<TicketGuard<'_>> {
        let serving = self.now_serving.load(Ordering::Acquire);
        self.next_ticket
            .compare_exchange(serving, serving + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|t| TicketGuard {
                lock: self,
                ticket: Ticket(t),
            })
    }

    /// Pass the lock to the next ticket.
    ///
    /// Pairs with a completed [`acquire`](Self::acquire) +
    /// [`wait`](Self::wait). Guards call this on drop.
    #[inline]
    pub fn exit(&self) {
        self.now_serving.fetch_add(1, Ordering::Release);
    }

    /// Run `f` while holding the lock.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    /// Whether a ticket is being served or waited for.
    pub fn is_locked(&self) -> bool {
        self.queue_len() != 0
    }

    /// Tickets drawn but not yet exited, the holder included.
    pub fn queue_len(&self) -> u64 {
        let serving = self.now_serving.load(Ordering::Relaxed);
        self.next_ticket
            .load(Ordering::Relaxed)
            .wrapping_sub(serving)
    }
}

/// Holds a [`TicketSpinLock`] until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct TicketGuard<'a> {
    lock: &'a TicketSpinLock,
    ticket: Ticket,
}

impl TicketGuard<'_> {
    /// Ticket this guard was served under.
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.lock.exit();
    }
}
