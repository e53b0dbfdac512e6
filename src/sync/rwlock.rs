//! Group-fair reader-writer lock built from tickets.
//!
//! Every reader and writer draws a ticket from one sequence. Consecutive
//! readers share the ticket of the first reader in their run, so they are
//! admitted together; a writer gets a ticket of its own. The served counter
//! advances once per completed read or write.
//!
//! ```text
//! arrivals:   R  R  W  R  R  W
//! tickets:    0  1  2  3  4  5
//! waits for:  0  0  2  3  3  5      (reader: served >= t, writer: served == t)
//! ```
//!
//! Groups are admitted strictly in arrival order. A reader arriving behind a
//! waiting writer queues behind it, so neither side starves. Drawing tickets
//! is serialized by an internal [`TicketSpinLock`]; waiting happens outside
//! of it.

use super::spin::{SpinPolicy, SpinWait};
use super::ticket::TicketSpinLock;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Reader-writer lock with arrival-order group fairness.
///
/// Like [`TicketSpinLock`] it guards no data itself.
///
/// ```rust
/// use slabkit::sync::SequencedRwLock;
///
/// let lock = SequencedRwLock::new();
/// {
///     let _a = lock.read_guard();
///     let _b = lock.read_guard();
/// }
/// let value = lock.with_write(|| 42);
/// assert_eq!(value, 42);
/// ```
#[derive(Debug, Default)]
pub struct SequencedRwLock {
    gate: TicketSpinLock,
    // Touched only while `gate` is held.
    last_was_write: AtomicBool,
    read_ticket: AtomicU64,
    ticket_counter: AtomicU64,

    serving: CachePadded<AtomicU64>,
    policy: SpinPolicy,
}

impl SequencedRwLock {
    /// Unlocked lock whose guards spin without bound.
    pub const fn new() -> Self {
        Self::with_policy(SpinPolicy::Unbounded)
    }

    /// Unlocked lock whose guards and closures wait under `policy`.
    pub const fn with_policy(policy: SpinPolicy) -> Self {
        Self {
            gate: TicketSpinLock::new(),
            last_was_write: AtomicBool::new(false),
            read_ticket: AtomicU64::new(0),
            ticket_counter: AtomicU64::new(0),
            serving: CachePadded::new(AtomicU64::new(0)),
            policy,
        }
    }

    /// Enter as a reader. Pair with [`exit`](Self::exit).
    pub fn read(&self, policy: SpinPolicy) {
        let ticket = {
            let _gate = self.gate.enter_with(policy);
            let counter = self.ticket_counter.load(Ordering::Relaxed);
            if self.last_was_write.swap(false, Ordering::Relaxed) {
                self.read_ticket.store(counter, Ordering::Relaxed);
            }
            self.ticket_counter.store(counter + 1, Ordering::Relaxed);
            self.read_ticket.load(Ordering::Relaxed)
        };

        let mut spin = SpinWait::new(policy);
        while self.serving.load(Ordering::Acquire) < ticket {
            spin.spin_once();
        }
    }

    /// Enter as a writer. Pair with [`exit`](Self::exit).
    pub fn write(&self, policy: SpinPolicy) {
        let ticket = {
            let _gate = self.gate.enter_with(policy);
            self.last_was_write.store(true, Ordering::Relaxed);
            let counter = self.ticket_counter.load(Ordering::Relaxed);
            self.ticket_counter.store(counter + 1, Ordering::Relaxed);
            counter
        };

        let mut spin = SpinWait::new(policy);
        while self.serving.load(Ordering::Acquire) != ticket {
            spin.spin_once();
        }
    }

    /// Leave after a completed [`read`](Self::read) or [`write`](Self::write).
    #[inline]
    pub fn exit(&self) {
        self.serving.fetch_add(1, Ordering::Release);
    }

    /// Enter as a reader until the guard drops.
    pub fn read_guard(&self) -> ReadGuard<'_> {
        self.read(self.policy);
        ReadGuard { lock: self }
    }

    /// Enter as a writer until the guard drops.
    pub fn write_guard(&self) -> WriteGuard<'_> {
        self.write(self.policy);
        WriteGuard { lock: self }
    }

    /// Run `f` as a reader.
    pub fn with_read<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.read_guard();
        f()
    }

    /// Run `f` as a writer.
    pub fn with_write<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.write_guard();
        f()
    }

    /// Readers and writers that have entered or are waiting, minus exits.
    pub fn pending(&self) -> u64 {
        let serving = self.serving.load(Ordering::Relaxed);
        self.gate.with(|| self.ticket_counter.load(Ordering::Relaxed)) - serving
    }

    /// Policy used by guards and closures.
    pub fn policy(&self) -> SpinPolicy {
        self.policy
    }
}

/// Shared access held until dropped.
#[must_use = "the read lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a SequencedRwLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.exit();
    }
}

/// Exclusive access held until dropped.
#[must_use = "the write lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a SequencedRwLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn wait_pending(lock: &SequencedRwLock, n: u64) {
        while lock.pending() < n {
            thread::yield_now();
        }
    }

    #[test]
    fn test_readers_share() {
        let lock = SequencedRwLock::new();
        lock.read(SpinPolicy::Unbounded);
        lock.read(SpinPolicy::Unbounded);
        assert_eq!(lock.pending(), 2);
        lock.exit();
        lock.exit();
        assert_eq!(lock.pending(), 0);
    }

    #[test]
    fn test_write_after_reads_then_reads_again() {
        let lock = SequencedRwLock::new();
        lock.with_read(|| ());
        lock.with_write(|| ());
        lock.with_read(|| ());
        lock.with_read(|| ());
        lock.with_write(|| ());
        assert_eq!(lock.pending(), 0);
    }

    #[test]
    fn test_reader_behind_writer_waits() {
        let lock = SequencedRwLock::new();
        let order = Mutex::new(Vec::new());
        let reader_in = AtomicBool::new(false);

        let held = lock.read_guard();
        thread::scope(|s| {
            s.spawn(|| {
                lock.with_write(|| order.lock().unwrap().push("writer"));
            });
            wait_pending(&lock, 2);

            s.spawn(|| {
                lock.with_read(|| {
                    reader_in.store(true, Ordering::SeqCst);
                    order.lock().unwrap().push("reader");
                });
            });
            wait_pending(&lock, 3);

            // The late reader cannot join the group ahead of the writer.
            thread::sleep(std::time::Duration::from_millis(20));
            assert!(!reader_in.load(Ordering::SeqCst));
            drop(held);
        });

        assert_eq!(*order.lock().unwrap(), vec!["writer", "reader"]);
    }

    #[test]
    fn test_writers_exclusive() {
        let lock = SequencedRwLock::with_policy(SpinPolicy::recommended());
        let value = AtomicUsize::new(0);
        let readers_seen_torn = AtomicBool::new(false);

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..500 {
                        lock.with_write(|| {
                            // Odd only while a writer is inside.
                            value.fetch_add(1, Ordering::Relaxed);
                            value.fetch_add(1, Ordering::Relaxed);
                        });
                    }
                });
            }
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..500 {
                        lock.with_read(|| {
                            if value.load(Ordering::Relaxed) % 2 == 1 {
                                readers_seen_torn.store(true, Ordering::Relaxed);
                            }
                        });
                    }
                });
            }
        });

        assert_eq!(value.load(Ordering::Relaxed), 2_000);
        assert!(!readers_seen_torn.load(Ordering::Relaxed));
        assert_eq!(lock.pending(), 0);
    }
}
