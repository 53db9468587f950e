//! Blocking task queue and the elastic worker pool built on it.
//!
//! [`TaskQueue`] stores ready work in FIFO order, lets urgent work jump the
//! line, and holds delayed work in a deadline heap. Consumers block in
//! [`TaskQueue::pop`] with an idle timeout, which is what lets the pool
//! retire workers that have had nothing to do.
//!
//! [`ThreadPool`] owns a queue and a set of worker threads. It spawns
//! `min_threads` workers eagerly, grows toward `max_threads` while the
//! backlog outruns the idle workers, and shrinks back to the floor after
//! `idle_timeout` of quiet. `stop` is idempotent, drains the queue, and
//! joins every worker before returning.
//!
//! # Example
//!
//! ```
//! use lockstep::pool::ThreadPool;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let pool = ThreadPool::new().expect("default config");
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..8 {
//!     let counter = Arc::clone(&counter);
//!     pool.submit(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .expect("pool running");
//! }
//!
//! pool.stop(); // waits for all eight tasks
//! assert_eq!(counter.load(Ordering::Relaxed), 8);
//! ```

mod error;
mod queue;
mod thread_pool;

pub use error::{PoolError, TaskError};
pub use queue::{PopResult, Task, TaskQueue};
pub use thread_pool::{PoolConfig, TaskHandle, ThreadPool};
