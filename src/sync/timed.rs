//! Exclusive lock with bounded-wait acquisition.
//!
//! [`TimedMutex`] is a held-flag behind an internal mutex and condition
//! variable. The timed operations take an absolute monotonic deadline;
//! `try_lock_for` is sugar for `try_lock_until(now + d)`. A deadline that
//! already passed fails immediately without blocking.
//!
//! Waiter ordering is whatever the condition variable delivers; callers
//! must not assume FIFO. For arrival-order fairness use
//! [`SharedMutex`](super::SharedMutex) in exclusive mode.

use std::sync::{Condvar, Mutex as StdMutex};
use std::time::{Duration, Instant};

use super::{Lockable, UnlockError};

/// An exclusive lock with `lock` / `try_lock` / `try_lock_for` /
/// `try_lock_until`.
///
/// Not reentrant: a thread that re-locks a [`TimedMutex`] it already holds
/// blocks forever. For reentry use [`ReentrantMutex`](super::ReentrantMutex).
///
/// # Example
///
/// ```
/// use lockstep::sync::TimedMutex;
/// use std::time::Duration;
///
/// let mutex = TimedMutex::new();
/// assert!(mutex.try_lock_for(Duration::from_millis(10)));
/// mutex.unlock().expect("held");
/// ```
#[derive(Debug, Default)]
pub struct TimedMutex {
    held: StdMutex<bool>,
    cond: Condvar,
}

impl TimedMutex {
    /// Creates a new unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            held: StdMutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Acquires the lock, blocking until it is available.
    pub fn lock(&self) {
        let mut held = self.held.lock().expect("timed mutex state poisoned");
        while *held {
            held = self.cond.wait(held).expect("timed mutex state poisoned");
        }
        *held = true;
    }

    /// Attempts to acquire the lock without blocking on the held flag.
    ///
    /// Returns `true` on success. The internal mutex is still taken
    /// unconditionally; its critical section is a single flag test.
    pub fn try_lock(&self) -> bool {
        let mut held = self.held.lock().expect("timed mutex state poisoned");
        if *held {
            return false;
        }
        *held = true;
        true
    }

    /// Attempts to acquire the lock, waiting at most `timeout`.
    ///
    /// Equivalent to `try_lock_until(Instant::now() + timeout)`; a zero
    /// timeout behaves exactly like [`try_lock`](Self::try_lock).
    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        self.try_lock_until(Instant::now() + timeout)
    }

    /// Attempts to acquire the lock before the absolute `deadline`.
    ///
    /// Succeeds immediately if the lock is free. Otherwise waits on the
    /// condition variable, re-checking on every wake; a wake that observes
    /// the lock free wins even if the deadline has just passed. Returns
    /// `false` once the deadline expires with the lock still held. A
    /// deadline already in the past fails without blocking.
    pub fn try_lock_until(&self, deadline: Instant) -> bool {
        let mut held = self.held.lock().expect("timed mutex state poisoned");
        loop {
            if !*held {
                *held = true;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self
                .cond
                .wait_timeout(held, deadline - now)
                .expect("timed mutex state poisoned");
            held = guard;
        }
    }

    /// Releases the lock and wakes one waiter.
    ///
    /// The held flag is cleared inside an inner scope and the internal
    /// mutex dropped before the signal, so the woken waiter does not
    /// immediately block on it again.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockError::NotHeld`] if the mutex was not locked; the
    /// state is left unchanged.
    pub fn unlock(&self) -> Result<(), UnlockError> {
        {
            let mut held = self.held.lock().expect("timed mutex state poisoned");
            if !*held {
                return Err(UnlockError::NotHeld);
            }
            *held = false;
        }
        self.cond.notify_one();
        Ok(())
    }

    /// Returns `true` if the lock is currently held. Diagnostic only.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        *self.held.lock().expect("timed mutex state poisoned")
    }
}

impl Lockable for TimedMutex {
    fn lock(&self) {
        Self::lock(self);
    }

    fn try_lock(&self) -> bool {
        Self::try_lock(self)
    }

    fn unlock(&self) {
        Self::unlock(self).expect("unlock of unheld timed mutex");
    }
}
