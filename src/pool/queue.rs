//! Concurrency-safe blocking task queue with priority and delay lanes.
//!
//! One internal mutex serializes producers and consumers; one condition
//! variable signals new work and stop. Normal tasks join the back of a
//! FIFO, priority tasks jump to its front, delayed tasks sit in a min-heap
//! keyed by their absolute deadline until they come due.
//!
//! After [`stop`](TaskQueue::stop) new pushes are refused (the task is
//! dropped and the push reports it), but everything already enqueued
//! remains drainable; consumers observe [`PopResult::Stopped`] only once
//! both lanes are empty.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Condvar, Mutex as StdMutex};
use std::time::{Duration, Instant};

const POISONED: &str = "task queue state poisoned";

/// A unit of work: a nullary closure owning its captured state.
pub type Task = Box<dyn FnOnce() + Send>;

/// Outcome of a [`TaskQueue::pop`] call.
pub enum PopResult {
    /// A task is ready; the caller now owns it.
    Ready(Task),
    /// The queue is stopped and fully drained; the consumer should exit.
    Stopped,
    /// Nothing became ready within the idle timeout.
    Timeout,
}

impl PopResult {
    /// Returns `true` for [`PopResult::Ready`].
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns `true` for [`PopResult::Stopped`].
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns `true` for [`PopResult::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl std::fmt::Debug for PopResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Ready(..)"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Timeout => f.write_str("Timeout"),
        }
    }
}

/// A delayed task keyed by its absolute deadline.
///
/// Orderings are inverted so the `BinaryHeap` max-heap yields the earliest
/// deadline first; `seq` breaks ties in submission order.
struct DelayedTask {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    normal: VecDeque<Task>,
    delayed: BinaryHeap<DelayedTask>,
    next_seq: u64,
    stopped: bool,
}

/// A blocking FIFO + priority + delay task queue.
///
/// # Example
///
/// ```
/// use lockstep::pool::{PopResult, TaskQueue};
/// use std::time::Duration;
///
/// let queue = TaskQueue::new();
/// queue.push(Box::new(|| println!("ran")));
///
/// match queue.pop(Duration::from_millis(10)) {
///     PopResult::Ready(task) => task(),
///     other => panic!("expected a task, got {other:?}"),
/// }
/// ```
pub struct TaskQueue {
    state: StdMutex<QueueState>,
    cond: Condvar,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Creates a new empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(QueueState {
                normal: VecDeque::new(),
                delayed: BinaryHeap::new(),
                next_seq: 0,
                stopped: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Appends a task to the normal FIFO and wakes one consumer.
    ///
    /// Returns `false` if the queue is stopped and the task was dropped.
    pub fn push(&self, task: Task) -> bool {
        {
            let mut state = self.state.lock().expect(POISONED);
            if state.stopped {
                return false;
            }
            state.normal.push_back(task);
        }
        self.cond.notify_one();
        true
    }

    /// Prepends a task to the normal FIFO — a single "jump the line"
    /// level, not a multi-level priority queue — and wakes one consumer.
    ///
    /// Returns `false` if the queue is stopped and the task was dropped.
    pub fn push_priority(&self, task: Task) -> bool {
        {
            let mut state = self.state.lock().expect(POISONED);
            if state.stopped {
                return false;
            }
            state.normal.push_front(task);
        }
        self.cond.notify_one();
        true
    }

    /// Schedules a task to become ready at the absolute `deadline` and
    /// wakes one consumer so it can re-shorten its sleep.
    ///
    /// Returns `false` if the queue is stopped and the task was dropped.
    pub fn push_delay(&self, task: Task, deadline: Instant) -> bool {
        {
            let mut state = self.state.lock().expect(POISONED);
            if state.stopped {
                return false;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.delayed.push(DelayedTask {
                deadline,
                seq,
                task,
            });
        }
        self.cond.notify_one();
        true
    }

    /// Takes the next ready task, waiting at most `idle_timeout` for one to
    /// appear.
    ///
    /// Due delayed tasks win over FIFO tasks. The sleep never overshoots
    /// the earliest delayed deadline, so a delayed task runs as soon as it
    /// comes due. Even with future delayed work pending, a consumer that
    /// has been idle for the full `idle_timeout` gets [`PopResult::Timeout`]
    /// back — that is the pool's scale-down signal.
    pub fn pop(&self, idle_timeout: Duration) -> PopResult {
        let arrival_deadline = Instant::now() + idle_timeout;
        let mut state = self.state.lock().expect(POISONED);

        loop {
            let now = Instant::now();

            if state.stopped && state.normal.is_empty() && state.delayed.is_empty() {
                return PopResult::Stopped;
            }

            if state.delayed.peek().is_some_and(|next| next.deadline <= now) {
                if let Some(due) = state.delayed.pop() {
                    return PopResult::Ready(due.task);
                }
            }

            if let Some(task) = state.normal.pop_front() {
                return PopResult::Ready(task);
            }

            if now >= arrival_deadline {
                return PopResult::Timeout;
            }

            let mut wait_until = arrival_deadline;
            if let Some(next) = state.delayed.peek() {
                wait_until = wait_until.min(next.deadline);
            }
            if wait_until > now {
                let (guard, _timed_out) = self
                    .cond
                    .wait_timeout(state, wait_until - now)
                    .expect(POISONED);
                state = guard;
            }
            // Woken, timed out, or a deadline just came due: re-evaluate.
        }
    }

    /// Stops the queue: new pushes are discarded, queued work stays
    /// drainable, and every blocked consumer is woken.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().expect(POISONED);
            state.stopped = true;
        }
        tracing::trace!("task queue stopped");
        self.cond.notify_all();
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.lock().expect(POISONED).stopped
    }

    /// Total tasks currently queued (normal + delayed). Approximate the
    /// moment the caller sees it; observational use only.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock().expect(POISONED);
        state.normal.len() + state.delayed.len()
    }

    /// Returns `true` if both lanes are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect(POISONED);
        f.debug_struct("TaskQueue")
            .field("normal", &state.normal.len())
            .field("delayed", &state.delayed.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_task(log: &Arc<StdMutex<Vec<usize>>>, id: usize) -> Task {
        let log = Arc::clone(log);
        Box::new(move || log.lock().expect("log").push(id))
    }

    fn pop_and_run(queue: &TaskQueue) {
        match queue.pop(Duration::from_secs(1)) {
            PopResult::Ready(task) => task(),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn fifo_order_preserved() {
        init_test_logging();
        let queue = TaskQueue::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        for id in 0..4 {
            queue.push(counting_task(&log, id));
        }
        for _ in 0..4 {
            pop_and_run(&queue);
        }
        assert_eq!(*log.lock().expect("log"), vec![0, 1, 2, 3]);
    }

    #[test]
    fn priority_jumps_the_line() {
        init_test_logging();
        let queue = TaskQueue::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        queue.push(counting_task(&log, 1));
        queue.push(counting_task(&log, 2));
        queue.push_priority(counting_task(&log, 0));

        for _ in 0..3 {
            pop_and_run(&queue);
        }
        assert_eq!(*log.lock().expect("log"), vec![0, 1, 2]);
    }

    #[test]
    fn delayed_task_not_before_deadline() {
        init_test_logging();
        let queue = TaskQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let deadline = Instant::now() + Duration::from_millis(100);
        {
            let ran = Arc::clone(&ran);
            queue.push_delay(
                Box::new(move || {
                    ran.fetch_add(1, Ordering::Relaxed);
                }),
                deadline,
            );
        }

        let start = Instant::now();
        match queue.pop(Duration::from_secs(1)) {
            PopResult::Ready(task) => task(),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert!(
            Instant::now() >= deadline,
            "delayed task handed out {:?} early",
            deadline - Instant::now()
        );
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn due_delayed_task_beats_fifo() {
        init_test_logging();
        let queue = TaskQueue::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        queue.push_delay(counting_task(&log, 0), Instant::now() - Duration::from_millis(1));
        queue.push(counting_task(&log, 1));

        pop_and_run(&queue);
        pop_and_run(&queue);
        assert_eq!(*log.lock().expect("log"), vec![0, 1]);
    }

    #[test]
    fn delayed_ties_break_in_submission_order() {
        init_test_logging();
        let queue = TaskQueue::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        let deadline = Instant::now();
        for id in 0..3 {
            queue.push_delay(counting_task(&log, id), deadline);
        }
        for _ in 0..3 {
            pop_and_run(&queue);
        }
        assert_eq!(*log.lock().expect("log"), vec![0, 1, 2]);
    }

    #[test]
    fn pop_times_out_when_idle() {
        init_test_logging();
        let queue = TaskQueue::new();

        let start = Instant::now();
        let result = queue.pop(Duration::from_millis(50));
        assert!(result.is_timeout(), "got {result:?}");
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn pop_times_out_despite_far_future_delay() {
        init_test_logging();
        let queue = TaskQueue::new();
        queue.push_delay(Box::new(|| {}), Instant::now() + Duration::from_secs(60));

        let result = queue.pop(Duration::from_millis(50));
        assert!(result.is_timeout(), "got {result:?}");
        assert_eq!(queue.len(), 1, "the delayed task must stay queued");
    }

    #[test]
    fn stop_drains_then_reports_stopped() {
        init_test_logging();
        let queue = TaskQueue::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        queue.push(counting_task(&log, 0));
        queue.push(counting_task(&log, 1));
        queue.stop();

        pop_and_run(&queue);
        pop_and_run(&queue);
        let result = queue.pop(Duration::from_millis(10));
        assert!(result.is_stopped(), "got {result:?}");
        assert_eq!(*log.lock().expect("log"), vec![0, 1]);
    }

    #[test]
    fn push_after_stop_is_refused() {
        init_test_logging();
        let queue = TaskQueue::new();
        queue.stop();

        assert!(!queue.push(Box::new(|| panic!("must never run"))));
        assert!(!queue.push_priority(Box::new(|| panic!("must never run"))));
        assert!(!queue.push_delay(Box::new(|| panic!("must never run")), Instant::now()));

        assert!(queue.is_empty());
        assert!(queue.pop(Duration::from_millis(10)).is_stopped());
    }

    #[test]
    fn blocked_consumer_wakes_on_push() {
        init_test_logging();
        let queue = Arc::new(TaskQueue::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || match queue.pop(Duration::from_secs(5)) {
                PopResult::Ready(task) => task(),
                other => panic!("expected Ready, got {other:?}"),
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        {
            let ran = Arc::clone(&ran);
            queue.push(Box::new(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            }));
        }

        consumer.join().expect("consumer panicked");
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn stop_wakes_all_blocked_consumers() {
        init_test_logging();
        let queue = Arc::new(TaskQueue::new());

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || queue.pop(Duration::from_secs(30)).is_stopped())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(50));
        queue.stop();

        for consumer in consumers {
            assert!(consumer.join().expect("consumer panicked"));
        }
    }
}
