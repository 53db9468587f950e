//! Deadlock-free acquisition of several locks at once.
//!
//! [`lock_all`] acquires an arbitrary set of [`Lockable`]s without imposing
//! a global lock order on callers: it blocks on the first lock, tries the
//! rest, and on any failure releases everything and restarts. Any cycle of
//! competing acquirers therefore backs off instead of deadlocking. The
//! algorithm is deadlock-free but not starvation-free.
//!
//! [`MultiLock`] wraps an acquired set and releases it on drop;
//! [`LockGuard`] does the same for a single lock.

use std::thread;

/// An exclusive lock usable by the multi-lock acquirer.
///
/// Implemented by every primitive in this module; [`SharedMutex`] takes
/// part through its exclusive operations.
///
/// `unlock` here is infallible: it is only ever called on locks the caller
/// acquired, so the typed misuse errors of the inherent `unlock` methods
/// cannot occur. An implementation that does detect misuse panics.
///
/// [`SharedMutex`]: super::SharedMutex
pub trait Lockable {
    /// Acquires the lock, blocking until it is held.
    fn lock(&self);
    /// Attempts to acquire the lock without blocking; `true` on success.
    fn try_lock(&self) -> bool;
    /// Releases the lock.
    fn unlock(&self);
}

/// Acquires every lock in `locks`, in the given order, without deadlock.
///
/// Blocks on the first lock, then `try_lock`s the remainder in order. If
/// any attempt fails, all locks acquired so far are released in reverse
/// order and the whole sequence restarts after yielding the scheduler.
/// Empty and single-element sets degenerate to a no-op and a plain `lock`.
///
/// On return the caller holds all of `locks`; on no path does the caller
/// hold a proper subset.
pub fn lock_all(locks: &[&dyn Lockable]) {
    let Some((first, rest)) = locks.split_first() else {
        return;
    };
    if rest.is_empty() {
        first.lock();
        return;
    }

    loop {
        first.lock();
        let mut acquired = 1;
        for lock in rest {
            if !lock.try_lock() {
                break;
            }
            acquired += 1;
        }
        if acquired == locks.len() {
            return;
        }
        for lock in locks[..acquired].iter().rev() {
            lock.unlock();
        }
        thread::yield_now();
    }
}

/// Scoped ownership of a set of locks, released in reverse order on drop.
///
/// # Example
///
/// ```
/// use lockstep::sync::{MultiLock, TimedMutex};
///
/// let a = TimedMutex::new();
/// let b = TimedMutex::new();
///
/// {
///     let _held = MultiLock::acquire(&[&a, &b]);
///     assert!(a.is_locked() && b.is_locked());
/// }
/// assert!(!a.is_locked() && !b.is_locked());
/// ```
#[must_use = "locks are released as soon as the MultiLock is dropped"]
pub struct MultiLock<'a> {
    locks: Vec<&'a dyn Lockable>,
}

impl<'a> MultiLock<'a> {
    /// Acquires every lock in `locks` via [`lock_all`] and takes ownership
    /// of the set.
    pub fn acquire(locks: &[&'a dyn Lockable]) -> Self {
        lock_all(locks);
        Self {
            locks: locks.to_vec(),
        }
    }

    /// Takes ownership of locks the caller has already acquired.
    ///
    /// The caller must hold every lock in `locks`; the set is released on
    /// drop exactly as if it had been acquired here.
    pub fn adopt(locks: &[&'a dyn Lockable]) -> Self {
        Self {
            locks: locks.to_vec(),
        }
    }

    /// Number of locks owned by this wrapper.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns `true` for the degenerate empty set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for MultiLock<'_> {
    fn drop(&mut self) {
        for lock in self.locks.iter().rev() {
            lock.unlock();
        }
    }
}

impl std::fmt::Debug for MultiLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiLock")
            .field("locks", &self.locks.len())
            .finish()
    }
}

/// Scoped ownership of a single lock.
#[must_use = "the lock is released as soon as the LockGuard is dropped"]
pub struct LockGuard<'a, L: Lockable + ?Sized> {
    lock: &'a L,
}

impl<'a, L: Lockable + ?Sized> LockGuard<'a, L> {
    /// Acquires `lock` and returns a guard that releases it on drop.
    pub fn new(lock: &'a L) -> Self {
        lock.lock();
        Self { lock }
    }

    /// Wraps a lock the caller already holds.
    pub fn adopt(lock: &'a L) -> Self {
        Self { lock }
    }
}

impl<L: Lockable + ?Sized> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<L: Lockable + ?Sized> std::fmt::Debug for LockGuard<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{ReentrantMutex, SharedMutex, SpinMutex, TimedMutex};
    use crate::test_utils::init_test_logging;
    use std::sync::Arc;

    #[test]
    fn acquire_and_release_mixed_lock_kinds() {
        init_test_logging();
        let spin = SpinMutex::new();
        let timed = TimedMutex::new();
        let reentrant = ReentrantMutex::new();
        let shared = SharedMutex::new();

        {
            let held = MultiLock::acquire(&[&spin, &timed, &reentrant, &shared]);
            assert_eq!(held.len(), 4);
            assert!(spin.is_locked());
            assert!(timed.is_locked());
            assert!(reentrant.is_locked());
            assert!(shared.has_writer());
        }

        assert!(!spin.is_locked());
        assert!(!timed.is_locked());
        assert!(!reentrant.is_locked());
        assert!(!shared.has_writer());
    }

    #[test]
    fn degenerate_arities() {
        init_test_logging();
        let held = MultiLock::acquire(&[]);
        assert!(held.is_empty());
        drop(held);

        let single = TimedMutex::new();
        {
            let _held = MultiLock::acquire(&[&single]);
            assert!(single.is_locked());
        }
        assert!(!single.is_locked());
    }

    #[test]
    fn adopt_releases_without_acquiring() {
        init_test_logging();
        let a = TimedMutex::new();
        let b = TimedMutex::new();
        a.lock();
        b.lock();

        drop(MultiLock::adopt(&[&a, &b]));
        assert!(!a.is_locked());
        assert!(!b.is_locked());
    }

    #[test]
    fn lock_guard_scopes_a_single_lock() {
        init_test_logging();
        let mutex = TimedMutex::new();
        {
            let _guard = LockGuard::new(&mutex);
            assert!(mutex.is_locked());
        }
        assert!(!mutex.is_locked());

        mutex.lock();
        drop(LockGuard::adopt(&mutex));
        assert!(!mutex.is_locked());
    }

    #[test]
    fn opposite_orders_do_not_deadlock() {
        init_test_logging();
        const ITERS: usize = 20_000;

        let a = Arc::new(TimedMutex::new());
        let b = Arc::new(TimedMutex::new());

        let forward = {
            let a = Arc::clone(&a);
            let b = Arc::clone(&b);
            std::thread::spawn(move || {
                for _ in 0..ITERS {
                    let _held = MultiLock::acquire(&[&*a as &dyn Lockable, &*b]);
                }
            })
        };
        let backward = {
            let a = Arc::clone(&a);
            let b = Arc::clone(&b);
            std::thread::spawn(move || {
                for _ in 0..ITERS {
                    let _held = MultiLock::acquire(&[&*b as &dyn Lockable, &*a]);
                }
            })
        };

        forward.join().expect("forward thread panicked");
        backward.join().expect("backward thread panicked");
    }
}
