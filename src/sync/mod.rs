//! Blocking synchronization primitives with FIFO fairness.
//!
//! Every lock in this module suspends its caller on an OS condition variable
//! (except [`SpinMutex`], which spins) and owns exactly one internal mutex
//! guarding all of its state. Unlock paths mutate state inside an inner
//! scope, drop the internal mutex, and only then signal, so a woken waiter
//! never immediately collides with its waker.
//!
//! # Primitives
//!
//! - [`SpinMutex`]: test-and-test-and-set lock for very short critical sections
//! - [`TimedMutex`]: exclusive lock with `try_lock_for` / `try_lock_until`
//! - [`ReentrantMutex`]: timed lock that the owning thread may re-acquire
//! - [`SharedMutex`]: fair FIFO reader-writer lock with batched reader
//!   admission and targeted wake-ups
//! - [`MultiLock`]: deadlock-free simultaneous acquisition of N lockables
//!
//! # Choosing a lock
//!
//! | Situation                                   | Primitive         |
//! |---------------------------------------------|-------------------|
//! | Critical section of a few instructions      | [`SpinMutex`]     |
//! | Bounded wait required                       | [`TimedMutex`]    |
//! | Lock re-acquired through recursion          | [`ReentrantMutex`]|
//! | Read-mostly data, writers must not starve   | [`SharedMutex`]   |
//! | Several locks taken together                | [`MultiLock`]     |
//!
//! # Misuse
//!
//! Unlocking a mutex that is not held, or unlocking a reentrant mutex from a
//! thread that does not own it, is a programming error. The fallible unlock
//! operations surface it as [`UnlockError`] instead of corrupting state.

mod multi;
mod reentrant;
mod shared;
mod spin;
mod timed;

pub use multi::{lock_all, LockGuard, Lockable, MultiLock};
pub use reentrant::ReentrantMutex;
pub use shared::{SharedMutex, SharedReadGuard, SharedWriteGuard};
pub use spin::SpinMutex;
pub use timed::TimedMutex;

/// Error returned when an unlock operation detects misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockError {
    /// The mutex was not held at the time of the call.
    NotHeld,
    /// A reentrant mutex was unlocked by a thread that does not own it.
    NotOwner,
}

impl std::fmt::Display for UnlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotHeld => write!(f, "unlock of a mutex that is not held"),
            Self::NotOwner => write!(f, "unlock from a thread that does not own the mutex"),
        }
    }
}

impl std::error::Error for UnlockError {}
