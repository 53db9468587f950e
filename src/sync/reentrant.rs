//! Reentrant exclusive lock with bounded-wait acquisition.
//!
//! [`ReentrantMutex`] extends the timed-mutex operation family with owner
//! tracking: the thread that holds the lock may re-acquire it, and each
//! acquisition must be matched by an unlock from that same thread. The lock
//! is released to other threads only when the count returns to zero.

use std::sync::{Condvar, Mutex as StdMutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use super::{Lockable, UnlockError};

#[derive(Debug)]
struct OwnerState {
    owner: Option<ThreadId>,
    count: u64,
}

/// A recursive exclusive lock with `lock` / `try_lock` / `try_lock_for` /
/// `try_lock_until`.
///
/// Invariant: `count == 0` exactly when `owner` is empty; while `count > 0`
/// the recorded owner is the only thread permitted to unlock.
///
/// # Example
///
/// ```
/// use lockstep::sync::ReentrantMutex;
///
/// let mutex = ReentrantMutex::new();
/// mutex.lock();
/// mutex.lock(); // same thread: re-entry succeeds
/// assert_eq!(mutex.hold_count(), 2);
/// mutex.unlock().expect("owner");
/// mutex.unlock().expect("owner");
/// assert!(!mutex.is_locked());
/// ```
#[derive(Debug)]
pub struct ReentrantMutex {
    state: StdMutex<OwnerState>,
    cond: Condvar,
}

impl Default for ReentrantMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrantMutex {
    /// Creates a new unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(OwnerState {
                owner: None,
                count: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Acquires the lock, blocking until it is uncontended or owned by the
    /// calling thread.
    pub fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock().expect("reentrant mutex state poisoned");
        while state.count != 0 && state.owner != Some(me) {
            state = self
                .cond
                .wait(state)
                .expect("reentrant mutex state poisoned");
        }
        if state.count == 0 {
            state.owner = Some(me);
        }
        state.count += 1;
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Succeeds if the lock is free or already owned by the calling thread.
    pub fn try_lock(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock().expect("reentrant mutex state poisoned");
        if state.owner == Some(me) {
            state.count += 1;
            return true;
        }
        if state.count == 0 {
            state.owner = Some(me);
            state.count = 1;
            return true;
        }
        false
    }

    /// Attempts to acquire the lock, waiting at most `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        self.try_lock_until(Instant::now() + timeout)
    }

    /// Attempts to acquire the lock before the absolute `deadline`.
    ///
    /// Re-entry by the owner succeeds immediately regardless of the
    /// deadline. A deadline already in the past fails without blocking.
    pub fn try_lock_until(&self, deadline: Instant) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock().expect("reentrant mutex state poisoned");

        // While this thread is parked here it cannot also be the owner, so
        // only the count needs re-checking after a wake.
        loop {
            if state.count == 0 {
                state.owner = Some(me);
                state.count = 1;
                return true;
            }
            if state.owner == Some(me) {
                state.count += 1;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("reentrant mutex state poisoned");
            state = guard;
        }
    }

    /// Releases one level of the lock.
    ///
    /// When the count returns to zero the owner is cleared, the internal
    /// mutex dropped, and one waiter signalled.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockError::NotHeld`] if the lock is not held at all, and
    /// [`UnlockError::NotOwner`] if it is held by a different thread. The
    /// state is left unchanged in both cases.
    pub fn unlock(&self) -> Result<(), UnlockError> {
        let me = thread::current().id();
        let mut state = self.state.lock().expect("reentrant mutex state poisoned");

        if state.count == 0 {
            return Err(UnlockError::NotHeld);
        }
        if state.owner != Some(me) {
            return Err(UnlockError::NotOwner);
        }

        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            drop(state);
            self.cond.notify_one();
        }
        Ok(())
    }

    /// Returns the current re-entry depth (zero when unlocked).
    #[must_use]
    pub fn hold_count(&self) -> u64 {
        self.state
            .lock()
            .expect("reentrant mutex state poisoned")
            .count
    }

    /// Returns `true` if any thread holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.hold_count() != 0
    }

    /// Returns `true` if the calling thread owns the lock.
    #[must_use]
    pub fn is_owned_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        self.state
            .lock()
            .expect("reentrant mutex state poisoned")
            .owner
            == Some(me)
    }
}

impl Lockable for ReentrantMutex {
    fn lock(&self) {
        Self::lock(self);
    }

    fn try_lock(&self) -> bool {
        Self::try_lock(self)
    }

    fn unlock(&self) {
        Self::unlock(self).expect("unlock of reentrant mutex by non-owner");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn reentry_in_one_thread() {
        init_test_logging();
        let mutex = ReentrantMutex::new();

        mutex.lock();
        mutex.lock();
        mutex.lock();
        assert_eq!(mutex.hold_count(), 3);
        assert!(mutex.is_owned_by_current_thread());

        mutex.unlock().expect("owner");
        mutex.unlock().expect("owner");
        assert_eq!(mutex.hold_count(), 1);

        mutex.unlock().expect("owner");
        assert_eq!(mutex.hold_count(), 0);
        assert!(!mutex.is_locked());
        assert!(!mutex.is_owned_by_current_thread());
    }

    #[test]
    fn other_thread_cannot_enter_while_held() {
        init_test_logging();
        let mutex = Arc::new(ReentrantMutex::new());
        mutex.lock();
        mutex.lock();
        mutex.unlock().expect("owner");
        // count is now 1; another thread must still be excluded
        assert_eq!(mutex.hold_count(), 1);

        let other = {
            let mutex = Arc::clone(&mutex);
            std::thread::spawn(move || mutex.try_lock())
        };
        assert!(!other.join().expect("probe panicked"));

        mutex.unlock().expect("owner");
    }

    #[test]
    fn recursion_through_nested_calls() {
        init_test_logging();
        let mutex = ReentrantMutex::new();
        let mut value = 0;

        fn dfs(mutex: &ReentrantMutex, value: &mut i32, depth: i32) {
            mutex.lock();
            *value += 1;
            if depth > 0 {
                dfs(mutex, value, depth - 1);
            }
            mutex.unlock().expect("owner");
        }

        dfs(&mutex, &mut value, 5);
        assert_eq!(value, 6);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn timeout_then_success() {
        init_test_logging();
        let mutex = Arc::new(ReentrantMutex::new());
        let entered = Arc::new(AtomicBool::new(false));

        let holder = {
            let mutex = Arc::clone(&mutex);
            let entered = Arc::clone(&entered);
            std::thread::spawn(move || {
                mutex.lock();
                entered.store(true, Ordering::Release);
                std::thread::sleep(Duration::from_millis(200));
                mutex.unlock().expect("owner");
            })
        };

        while !entered.load(Ordering::Acquire) {
            std::thread::yield_now();
        }

        let start = Instant::now();
        assert!(!mutex.try_lock_for(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));

        assert!(mutex.try_lock_for(Duration::from_millis(400)));
        mutex.unlock().expect("owner");
        holder.join().expect("holder panicked");
    }

    #[test]
    fn past_deadline_fails_immediately() {
        init_test_logging();
        let mutex = Arc::new(ReentrantMutex::new());
        let holder = {
            let mutex = Arc::clone(&mutex);
            std::thread::spawn(move || {
                mutex.lock();
                std::thread::sleep(Duration::from_millis(100));
                mutex.unlock().expect("owner");
            })
        };
        while !mutex.is_locked() {
            std::thread::yield_now();
        }

        let start = Instant::now();
        assert!(!mutex.try_lock_until(Instant::now() - Duration::from_millis(10)));
        assert!(
            start.elapsed() < Duration::from_millis(20),
            "past deadline blocked: {:?}",
            start.elapsed()
        );
        holder.join().expect("holder panicked");
    }

    #[test]
    fn non_owner_unlock_reports_error() {
        init_test_logging();
        let mutex = Arc::new(ReentrantMutex::new());
        assert_eq!(mutex.unlock(), Err(UnlockError::NotHeld));

        mutex.lock();
        let intruder = {
            let mutex = Arc::clone(&mutex);
            std::thread::spawn(move || mutex.unlock())
        };
        assert_eq!(
            intruder.join().expect("intruder panicked"),
            Err(UnlockError::NotOwner)
        );

        // The failed unlock must not have disturbed the count.
        assert_eq!(mutex.hold_count(), 1);
        mutex.unlock().expect("owner");
    }

    #[test]
    fn multi_thread_recursive_exclusion() {
        init_test_logging();
        const THREADS: usize = 4;
        const LOOPS: usize = 5;
        const DEPTH: usize = 3;

        let mutex = Arc::new(ReentrantMutex::new());
        let value = Arc::new(std::sync::Mutex::new(0usize));

        fn work(mutex: &ReentrantMutex, value: &std::sync::Mutex<usize>, depth: usize) {
            mutex.lock();
            *value.lock().expect("value mutex") += 1;
            if depth > 1 {
                work(mutex, value, depth - 1);
            }
            mutex.unlock().expect("owner");
        }

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                let value = Arc::clone(&value);
                std::thread::spawn(move || {
                    for _ in 0..LOOPS {
                        work(&mutex, &value, DEPTH);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert_eq!(*value.lock().expect("value mutex"), THREADS * LOOPS * DEPTH);
    }
}
