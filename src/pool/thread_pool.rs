//! Elastic worker pool over the blocking task queue.
//!
//! The pool keeps `min_threads` core workers alive at all times, grows
//! toward `max_threads` when the backlog outruns the idle workers, and lets
//! surplus workers retire after `idle_timeout` of quiet. Retired workers
//! park their join handles on a dead list that submission paths reap
//! opportunistically, so routine submissions never block behind a
//! concurrent `stop`.
//!
//! # Worker states
//!
//! A worker is *idle* while blocked in `pop`, *running* while executing a
//! task, and exits either on `Stopped` (queue drained after stop) or on
//! `Timeout` when it is above the core floor. Task panics are caught inside
//! the loop; nothing a task does can take a worker down.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex as StdMutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use super::error::{PoolError, TaskError};
use super::queue::{PopResult, TaskQueue};

const POISONED: &str = "pool worker set poisoned";

/// Default lower bound on live workers.
const DEFAULT_MIN_THREADS: usize = 2;
/// Default idle time after which a non-core worker exits.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for a [`ThreadPool`].
///
/// `max_threads` below `min_threads` is normalized up to `min_threads`;
/// a `max_threads` of zero is rejected at construction.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Lower bound on live workers (the core pool).
    pub min_threads: usize,
    /// Upper bound on live workers.
    pub max_threads: usize,
    /// Idle time after which a non-core worker exits.
    pub idle_timeout: Duration,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_threads: DEFAULT_MIN_THREADS,
            max_threads: thread::available_parallelism()
                .map_or(DEFAULT_MIN_THREADS, std::num::NonZeroUsize::get),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "lockstep".to_string(),
        }
    }
}

#[derive(Debug)]
struct WorkerSet {
    /// Live workers, keyed by their thread id so a worker can deregister
    /// itself on scale-down.
    active: HashMap<ThreadId, JoinHandle<()>>,
    /// Workers that exited their loop and await joining by a later
    /// submission or by `stop`.
    dead: Vec<JoinHandle<()>>,
}

struct PoolInner {
    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,
    thread_name_prefix: String,
    next_worker_id: AtomicUsize,
    queue: TaskQueue,
    workers: StdMutex<WorkerSet>,
    /// Workers currently blocked in `pop`. Heuristic input to expansion;
    /// crosses the mutex boundary with acquire/release ordering.
    idle_count: AtomicUsize,
    stopping: AtomicBool,
}

/// An elastic pool of worker threads fed by a [`TaskQueue`].
///
/// # Example
///
/// ```
/// use lockstep::pool::ThreadPool;
///
/// let pool = ThreadPool::new().expect("default config");
/// let handle = pool.submit_with_handle(|| 2 + 2).expect("pool running");
/// assert_eq!(handle.wait().expect("task ran"), 4);
/// pool.stop();
/// ```
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Creates a pool with the default configuration.
    pub fn new() -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::default())
    }

    /// Creates a pool with the given configuration and spawns the core
    /// workers eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::CapacityMisconfigured`] if `max_threads` is
    /// zero.
    pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
        if config.max_threads == 0 {
            return Err(PoolError::CapacityMisconfigured {
                min: config.min_threads,
                max: config.max_threads,
            });
        }

        let inner = Arc::new(PoolInner {
            min_threads: config.min_threads,
            max_threads: config.max_threads.max(config.min_threads),
            idle_timeout: config.idle_timeout,
            thread_name_prefix: config.thread_name_prefix,
            next_worker_id: AtomicUsize::new(0),
            queue: TaskQueue::new(),
            workers: StdMutex::new(WorkerSet {
                active: HashMap::new(),
                dead: Vec::new(),
            }),
            idle_count: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
        });

        {
            let mut workers = inner.workers.lock().expect(POISONED);
            for _ in 0..inner.min_threads {
                spawn_worker(&inner, &mut workers);
            }
        }
        tracing::debug!(
            min = inner.min_threads,
            max = inner.max_threads,
            "pool started"
        );

        Ok(Self { inner })
    }

    /// Submits a task to the back of the FIFO.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Stopped`] if the pool has been stopped.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        // A stop can land between the check above and the push; the queue
        // reports the refusal so no task is ever accepted and then lost.
        if !self.inner.queue.push(Box::new(task)) {
            return Err(PoolError::Stopped);
        }
        expand(&self.inner);
        Ok(())
    }

    /// Submits a task ahead of all queued normal tasks.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Stopped`] if the pool has been stopped.
    pub fn submit_priority<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        if !self.inner.queue.push_priority(Box::new(task)) {
            return Err(PoolError::Stopped);
        }
        expand(&self.inner);
        Ok(())
    }

    /// Submits a task that becomes ready once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Stopped`] if the pool has been stopped.
    pub fn submit_after<F>(&self, delay: Duration, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_at(Instant::now() + delay, task)
    }

    /// Submits a task that becomes ready at the absolute `deadline`.
    ///
    /// A deadline in the past makes the task ready immediately.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Stopped`] if the pool has been stopped.
    pub fn submit_at<F>(&self, deadline: Instant, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        if !self.inner.queue.push_delay(Box::new(task), deadline) {
            return Err(PoolError::Stopped);
        }
        expand(&self.inner);
        Ok(())
    }

    /// Submits a batch of tasks with a single expansion pass, returning how
    /// many were enqueued. An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Stopped`] if the pool has been stopped.
    pub fn submit_batch<I>(&self, tasks: I) -> Result<usize, PoolError>
    where
        I: IntoIterator,
        I::Item: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        let mut enqueued = 0;
        for task in tasks {
            if !self.inner.queue.push(Box::new(task)) {
                break;
            }
            enqueued += 1;
        }
        if enqueued > 0 {
            expand(&self.inner);
        }
        Ok(enqueued)
    }

    /// Submits a task whose result (or panic) is observable through the
    /// returned [`TaskHandle`].
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Stopped`] if the pool has been stopped.
    pub fn submit_with_handle<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.ensure_running()?;
        let (sender, receiver) = mpsc::channel();
        let pushed = self.inner.queue.push(Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                TaskError::Panicked {
                    message: panic_message(payload.as_ref()),
                }
            });
            // The caller may have dropped the handle; that is their choice.
            let _ = sender.send(result);
        }));
        if !pushed {
            return Err(PoolError::Stopped);
        }
        expand(&self.inner);
        Ok(TaskHandle { receiver })
    }

    /// Stops the pool: refuses new work, drains everything already
    /// accepted, and joins every worker. Idempotent; only the first caller
    /// does the work, and it returns once all workers have exited.
    pub fn stop(&self) {
        if self
            .inner
            .stopping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        tracing::debug!("pool stopping");
        self.inner.queue.stop();

        // Move every handle out before joining so no join happens under
        // the worker-set mutex.
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.inner.workers.lock().expect(POISONED);
            let active = workers.active.drain().map(|(_, handle)| handle);
            let mut handles: Vec<_> = active.collect();
            handles.append(&mut workers.dead);
            handles
        };
        for handle in handles {
            let _ = handle.join();
        }
        tracing::debug!("pool stopped");
    }

    /// Tasks currently queued (normal + delayed). Observational only.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Live workers right now, excluding retired ones awaiting a join.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.workers.lock().expect(POISONED).active.len()
    }

    /// Workers currently blocked in `pop`. Approximate.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.inner.idle_count.load(Ordering::Acquire)
    }

    /// Returns `true` once [`stop`](Self::stop) has begun.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<(), PoolError> {
        if self.inner.stopping.load(Ordering::Acquire) {
            return Err(PoolError::Stopped);
        }
        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("active_workers", &self.active_workers())
            .field("idle_workers", &self.idle_workers())
            .field("pending", &self.pending())
            .field("stopping", &self.is_stopped())
            .finish()
    }
}

/// Handle to a task submitted with
/// [`submit_with_handle`](ThreadPool::submit_with_handle).
///
/// The result travels over a one-shot channel; a panic inside the task
/// arrives as [`TaskError::Panicked`], and a task the pool discarded
/// (stopped before it ran) arrives as [`TaskError::Aborted`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: mpsc::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finishes and returns its result.
    pub fn wait(self) -> Result<T, TaskError> {
        self.receiver.recv().unwrap_or(Err(TaskError::Aborted))
    }

    /// Waits at most `timeout` for the result; `None` means the task has
    /// not finished yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(TaskError::Aborted)),
        }
    }
}

/// Spawns one worker and registers its handle. Caller holds the worker-set
/// mutex.
fn spawn_worker(inner: &Arc<PoolInner>, workers: &mut WorkerSet) {
    let id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-worker-{id}", inner.thread_name_prefix);
    let for_thread = Arc::clone(inner);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(&for_thread))
        .expect("failed to spawn worker thread");
    workers.active.insert(handle.thread().id(), handle);
}

/// The worker main loop: pop, run, account idleness, scale down on quiet.
fn worker_loop(inner: &Arc<PoolInner>) {
    inner.idle_count.fetch_add(1, Ordering::Release);

    loop {
        match inner.queue.pop(inner.idle_timeout) {
            PopResult::Stopped => {
                inner.idle_count.fetch_sub(1, Ordering::Release);
                tracing::trace!("worker exiting: queue stopped and drained");
                return;
            }
            PopResult::Timeout => {
                if inner.stopping.load(Ordering::Acquire) {
                    inner.idle_count.fetch_sub(1, Ordering::Release);
                    return;
                }
                let mut workers = inner.workers.lock().expect(POISONED);
                if !inner.stopping.load(Ordering::Relaxed)
                    && workers.active.len() > inner.min_threads
                {
                    let my_id = thread::current().id();
                    if let Some(handle) = workers.active.remove(&my_id) {
                        inner.idle_count.fetch_sub(1, Ordering::Release);
                        workers.dead.push(handle);
                        tracing::debug!(active = workers.active.len(), "idle worker retired");
                        return;
                    }
                }
                // At the core floor (or mid-stop): keep waiting.
            }
            PopResult::Ready(task) => {
                inner.idle_count.fetch_sub(1, Ordering::Release);
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    tracing::debug!(
                        message = %panic_message(payload.as_ref()),
                        "task panicked; worker continues"
                    );
                }
                inner.idle_count.fetch_add(1, Ordering::Release);
            }
        }
    }
}

/// Expansion pass run after every submission.
///
/// Reaps retired workers, then spawns `min(pending - idle, max - active)`
/// new workers when the backlog exceeds the idle workers by more than one.
/// The threshold keeps a trickle of submissions from churning threads.
fn expand(inner: &Arc<PoolInner>) {
    reap(inner);

    if inner.stopping.load(Ordering::Acquire) {
        return;
    }

    let pending = inner.queue.len();
    let idle = inner.idle_count.load(Ordering::Acquire);

    let mut workers = inner.workers.lock().expect(POISONED);
    if inner.stopping.load(Ordering::Relaxed) {
        return;
    }
    let active = workers.active.len();

    if active < inner.max_threads && pending > idle + 1 {
        // New workers account their own idleness at loop entry.
        let needed = (pending - idle).min(inner.max_threads - active);
        for _ in 0..needed {
            spawn_worker(inner, &mut workers);
        }
        tracing::debug!(
            spawned = needed,
            active = workers.active.len(),
            pending,
            "pool expanded"
        );
    }
}

/// Non-blocking reap of retired workers.
///
/// Skips entirely if the worker-set mutex is contended, so a submission
/// never waits behind a concurrent `stop`; joins happen with the mutex
/// released.
fn reap(inner: &Arc<PoolInner>) {
    let dead = {
        let Ok(mut workers) = inner.workers.try_lock() else {
            return;
        };
        if workers.dead.is_empty() {
            return;
        }
        std::mem::take(&mut workers.dead)
    };
    for handle in dead {
        let _ = handle.join();
    }
}

/// Best-effort rendering of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
