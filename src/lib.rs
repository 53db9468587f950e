//! Lockstep: fair blocking synchronization primitives and an elastic worker pool.
//!
//! # Overview
//!
//! Lockstep provides coordination primitives for programs built on plain OS
//! threads. The locks block, the waits are targeted, and fairness is FIFO:
//! a waiter that arrived first is admitted first, with the single concession
//! that consecutive queued readers of the shared lock are admitted together
//! as a batch.
//!
//! # Core Guarantees
//!
//! - **No thundering herd**: the shared lock wakes exactly the waiters it
//!   admits, through per-waiter gates, never by broadcast
//! - **No starvation**: readers and writers of [`sync::SharedMutex`] are
//!   served in arrival order; writers cannot be starved by a reader stream
//! - **Release before signal**: every unlock path drops its internal mutex
//!   before notifying, so a woken waiter never collides with its waker
//! - **Deadlock-free composition**: [`sync::MultiLock`] acquires arbitrary
//!   lock sets without ordering requirements on the callers
//! - **Contained panics**: a panicking task never tears down a pool worker;
//!   handle-bearing submissions observe the panic through their handle
//!
//! # Module Structure
//!
//! - [`sync`]: spin, timed, reentrant, and fair shared locks, plus the
//!   multi-lock acquirer
//! - [`pool`]: the blocking task queue and the elastic worker pool
//! - [`test_utils`]: tracing-based logging helpers for the test suites
//!
//! # Example
//!
//! ```
//! use lockstep::pool::{PoolConfig, ThreadPool};
//! use std::time::Duration;
//!
//! let pool = ThreadPool::with_config(PoolConfig {
//!     min_threads: 2,
//!     max_threads: 8,
//!     idle_timeout: Duration::from_secs(2),
//!     ..PoolConfig::default()
//! })
//! .expect("valid config");
//!
//! let handle = pool.submit_with_handle(|| 6 * 7).expect("pool running");
//! assert_eq!(handle.wait().expect("task ran"), 42);
//! pool.stop();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod pool;
pub mod sync;
pub mod test_utils;

// Re-exports for convenient access to core types
pub use pool::{PoolConfig, PoolError, PopResult, TaskError, TaskHandle, TaskQueue, ThreadPool};
pub use sync::{
    LockGuard, Lockable, MultiLock, ReentrantMutex, SharedMutex, SpinMutex, TimedMutex,
    UnlockError,
};
