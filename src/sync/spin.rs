//! Test-and-test-and-set spin lock.
//!
//! [`SpinMutex`] never suspends its caller: contenders burn cycles on a
//! read-only spin until the flag looks clear, then race one atomic swap.
//! That makes it the right tool only for critical sections of a few
//! instructions, where the cost of parking a thread would dwarf the wait.
//!
//! There is no fairness, no timed variant, and no reentry: a thread that
//! re-locks a [`SpinMutex`] it already holds deadlocks itself.

use std::sync::atomic::{AtomicBool, Ordering};

use super::Lockable;

/// A test-and-test-and-set exclusive spin lock.
///
/// # Example
///
/// ```
/// use lockstep::sync::SpinMutex;
///
/// static LOCK: SpinMutex = SpinMutex::new();
///
/// LOCK.lock();
/// // ... a few instructions ...
/// LOCK.unlock();
/// ```
#[derive(Debug, Default)]
pub struct SpinMutex {
    locked: AtomicBool,
}

impl SpinMutex {
    /// Creates a new unlocked spin mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquires the lock, spinning until it is available.
    ///
    /// The outer attempt is a `swap` with acquire ordering; between
    /// attempts the contender spins on a relaxed read so the cache line
    /// stays shared instead of bouncing between cores.
    pub fn lock(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `true` on success.
    pub fn try_lock(&self) -> bool {
        !self.locked.swap(true, Ordering::Acquire)
    }

    /// Releases the lock.
    ///
    /// Must only be called by the thread that holds the lock; the flag is
    /// not owner-checked.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Returns `true` if the lock is currently held by some thread.
    ///
    /// The answer is stale by the time the caller sees it; useful for
    /// diagnostics only.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Lockable for SpinMutex {
    fn lock(&self) {
        Self::lock(self);
    }

    fn try_lock(&self) -> bool {
        Self::try_lock(self)
    }

    fn unlock(&self) {
        Self::unlock(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::Arc;

    #[test]
    fn lock_excludes_concurrent_increments() {
        init_test_logging();
        const THREADS: u64 = 3;
        const PER_THREAD: u64 = 100_000;

        let mutex = Arc::new(SpinMutex::new());
        let sum = Arc::new(std::sync::Mutex::new(0u64));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                let sum = Arc::clone(&sum);
                std::thread::spawn(move || {
                    let mut local = 0u64;
                    for _ in 0..PER_THREAD {
                        local += 1;
                    }
                    mutex.lock();
                    *sum.lock().expect("sum mutex") += local;
                    mutex.unlock();
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker panicked");
        }

        assert_eq!(*sum.lock().expect("sum mutex"), THREADS * PER_THREAD);
    }

    #[test]
    fn try_lock_fails_while_held() {
        init_test_logging();
        let mutex = SpinMutex::new();

        assert!(mutex.try_lock());
        assert!(mutex.is_locked());
        assert!(!mutex.try_lock());

        mutex.unlock();
        assert!(!mutex.is_locked());
        assert!(mutex.try_lock());
        mutex.unlock();
    }

    #[test]
    fn contended_handoff_makes_progress() {
        init_test_logging();
        let mutex = Arc::new(SpinMutex::new());
        let in_section = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                let in_section = Arc::clone(&in_section);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        mutex.lock();
                        let prev = in_section.fetch_add(1, Ordering::AcqRel);
                        assert_eq!(prev, 0, "more than one thread inside the spin lock");
                        in_section.fetch_sub(1, Ordering::AcqRel);
                        mutex.unlock();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker panicked");
        }
    }
}
