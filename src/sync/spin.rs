//! Spin waiting with optional fallback to sleeping.

use crate::memory::defaults::{SPIN_SLEEP_MICROS, SPIN_SLEEP_THRESHOLD};
use crossbeam_utils::Backoff;
use std::thread;
use std::time::Duration;

/// How a waiter behaves while the condition it waits on stays false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpinPolicy {
    /// Spin, then yield, forever.
    #[default]
    Unbounded,
    /// Spin/yield for `n` iterations, then sleep on every further iteration.
    SleepAfter(u32),
}

impl SpinPolicy {
    /// Bounded policy using [`SPIN_SLEEP_THRESHOLD`].
    pub const fn recommended() -> Self {
        Self::SleepAfter(SPIN_SLEEP_THRESHOLD)
    }
}

/// Iteration state for one wait loop.
///
/// ```rust
/// use slabkit::sync::{SpinPolicy, SpinWait};
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let ready = AtomicBool::new(true);
/// let mut spin = SpinWait::new(SpinPolicy::recommended());
/// while !ready.load(Ordering::Acquire) {
///     spin.spin_once();
/// }
/// ```
#[derive(Debug)]
pub struct SpinWait {
    backoff: Backoff,
    policy: SpinPolicy,
    spins: u32,
}

impl SpinWait {
    /// Fresh wait state.
    pub fn new(policy: SpinPolicy) -> Self {
        Self {
            backoff: Backoff::new(),
            policy,
            spins: 0,
        }
    }

    /// Wait one iteration.
    pub fn spin_once(&mut self) {
        self.spins = self.spins.saturating_add(1);
        match self.policy {
            SpinPolicy::SleepAfter(limit) if self.spins > limit => {
                thread::sleep(Duration::from_micros(SPIN_SLEEP_MICROS));
            }
            _ => self.backoff.snooze(),
        }
    }

    /// Iterations so far.
    pub fn spins(&self) -> u32 {
        self.spins
    }

    /// Whether the next iteration would sleep rather than spin.
    pub fn is_sleeping(&self) -> bool {
        matches!(self.policy, SpinPolicy::SleepAfter(limit) if self.spins >= limit)
    }

    /// Start over, as if newly created.
    pub fn reset(&mut self) {
        self.backoff.reset();
        self.spins = 0;
    }
}

/// Spin until `done` returns true.
pub fn spin_until(policy: SpinPolicy, mut done: impl FnMut() -> bool) {
    let mut spin = SpinWait::new(policy);
    while !done() {
        spin.spin_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_sleep_after_threshold() {
        let mut spin = SpinWait::new(SpinPolicy::SleepAfter(3));
        for _ in 0..3 {
            assert!(!spin.is_sleeping());
            spin.spin_once();
        }
        assert!(spin.is_sleeping());
        spin.spin_once();
        assert_eq!(spin.spins(), 4);

        spin.reset();
        assert_eq!(spin.spins(), 0);
        assert!(!spin.is_sleeping());
    }

    #[test]
    fn test_unbounded_never_sleeps() {
        let mut spin = SpinWait::new(SpinPolicy::default());
        for _ in 0..100 {
            spin.spin_once();
        }
        assert!(!spin.is_sleeping());
    }

    #[test]
    fn test_spin_until_observes_other_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || flag.store(true, Ordering::Release))
        };
        spin_until(SpinPolicy::SleepAfter(16), || flag.load(Ordering::Acquire));
        setter.join().unwrap();
    }
}
