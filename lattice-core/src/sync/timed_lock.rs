//! A binary lock with bounded-wait acquisition.
//!
//! Unlike `std::sync::Mutex`, a [`TimedLock`] is not tied to a guard or to
//! the thread that acquired it: any holder of a reference may
//! [`unset`](TimedLock::unset) it. This makes it usable as a one-shot gate
//! between independent threads, e.g. "wait at most N ms for the launched
//! process to come up".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Binary lock guarding a single `locked` flag.
#[derive(Debug, Default)]
pub struct TimedLock {
    locked: Mutex<bool>,
    cond: Condvar,
    /// Lock-free mirror of `locked` for [`test`](Self::test).
    snapshot: AtomicBool,
}

impl TimedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, waiting at most `timeout_ms` milliseconds.
    ///
    /// A timeout of `0` waits without bound. Returns `false` if the lock
    /// could not be acquired in time; the lock state is left untouched in
    /// that case.
    pub fn set(&self, timeout_ms: u32) -> bool {
        let timeout = match timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        };
        self.set_timeout(timeout)
    }

    /// Acquire the lock, waiting at most `timeout` (`None` = forever).
    pub fn set_timeout(&self, timeout: Option<Duration>) -> bool {
        let guard = self.guard();
        let mut guard = match timeout {
            None => self
                .cond
                .wait_while(guard, |locked| *locked)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                let (guard, _) = self
                    .cond
                    .wait_timeout_while(guard, timeout, |locked| *locked)
                    .unwrap_or_else(PoisonError::into_inner);
                guard
            }
        };

        // Re-check rather than trusting the timeout flag: the lock may have
        // been released right at the deadline.
        if *guard {
            return false;
        }
        *guard = true;
        self.snapshot.store(true, Ordering::Release);
        true
    }

    /// Release the lock and wake one waiter.
    ///
    /// There is no ownership check; releasing an unheld lock is a no-op.
    pub fn unset(&self) {
        let mut guard = self.guard();
        *guard = false;
        self.snapshot.store(false, Ordering::Release);
        drop(guard);
        self.cond.notify_one();
    }

    /// Acquire the lock only if it is free right now.
    ///
    /// Compare-and-set semantics: on failure the state is not modified.
    pub fn try_set(&self) -> bool {
        let mut guard = self.guard();
        if *guard {
            return false;
        }
        *guard = true;
        self.snapshot.store(true, Ordering::Release);
        true
    }

    /// Best-effort snapshot of the lock state.
    ///
    /// Not an acquisition check: the state may change before the caller
    /// acts on the answer.
    pub fn test(&self) -> bool {
        self.snapshot.load(Ordering::Acquire)
    }

    fn guard(&self) -> MutexGuard<'_, bool> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn set_and_unset() {
        let lock = TimedLock::new();
        assert!(!lock.test());
        assert!(lock.set(0));
        assert!(lock.test());
        lock.unset();
        assert!(!lock.test());
    }

    #[test]
    fn unbounded_set_blocks_until_unset() {
        let lock = Arc::new(TimedLock::new());
        assert!(lock.set(0));

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let acquired = lock.set(0);
                tx.send(acquired).unwrap();
            })
        };

        // Still held: the waiter must not have returned.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        lock.unset();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        waiter.join().unwrap();
        assert!(lock.test());
    }

    #[test]
    fn bounded_set_times_out_without_acquiring() {
        let lock = Arc::new(TimedLock::new());
        assert!(lock.set(0));

        let started = Instant::now();
        let other = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.set(40))
        };
        assert!(!other.join().unwrap());
        assert!(started.elapsed() >= Duration::from_millis(35));

        // Still held by the first owner; releasing frees it for good.
        lock.unset();
        assert!(!lock.test());
        assert!(lock.try_set());
    }

    #[test]
    fn bounded_set_succeeds_when_released_in_time() {
        let lock = Arc::new(TimedLock::new());
        assert!(lock.set(0));

        let releaser = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                lock.unset();
            })
        };
        assert!(lock.set(5_000));
        releaser.join().unwrap();
        assert!(lock.test());
    }

    #[test]
    fn try_set_is_compare_and_set() {
        let lock = TimedLock::new();
        assert!(lock.try_set());
        assert!(lock.test());
        // Already held: reports failure and leaves the state alone.
        assert!(!lock.try_set());
        assert!(lock.test());
        lock.unset();
        assert!(lock.try_set());
    }

    #[test]
    fn unset_by_another_thread() {
        let lock = Arc::new(TimedLock::new());
        assert!(lock.set(0));
        {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.unset()).join().unwrap();
        }
        assert!(!lock.test());
    }
}
