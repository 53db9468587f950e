//! Pool and task errors.

use thiserror::Error;

/// Errors surfaced by pool construction and submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool was configured with no capacity at all.
    #[error("pool capacity misconfigured: max_threads must be at least 1 (min={min}, max={max})")]
    CapacityMisconfigured {
        /// Configured lower bound on live workers.
        min: usize,
        /// Configured upper bound on live workers.
        max: usize,
    },

    /// The pool has been stopped and accepts no new work.
    #[error("pool has been stopped")]
    Stopped,
}

/// Errors surfaced through a [`TaskHandle`](super::TaskHandle).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task body panicked; the worker survived and the payload message
    /// is carried here.
    #[error("task panicked: {message}")]
    Panicked {
        /// Best-effort rendering of the panic payload.
        message: String,
    },

    /// The pool discarded the task before it could run.
    #[error("task was dropped before it could run")]
    Aborted,
}
