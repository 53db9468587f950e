//! Fair FIFO reader-writer lock with batched reader admission.
//!
//! [`SharedMutex`] serves arrivals strictly in queue order: a writer is
//! admitted alone, a run of consecutive queued readers is admitted together
//! as one batch. Neither side can starve the other, and every wake-up is
//! targeted — the scheduler flips a per-waiter gate and signals exactly that
//! waiter's condition variable, never a broadcast.
//!
//! # Scheduling rules
//!
//! 1. Lock free, queue head is a writer: wake that writer.
//! 2. Lock free, queue head is a reader: pop the maximal prefix of
//!    consecutive readers, count them as pending, wake each one. A writer
//!    immediately behind the prefix is not woken.
//! 3. While any admitted reader has not yet entered (`pending_readers > 0`)
//!    no further admission happens, so a writer cannot slip between batch
//!    admission and batch entry.
//! 4. A reader that enters moves itself from pending to active; the last
//!    active reader to release re-runs the scheduler, as does every writer
//!    release.
//!
//! The try-variants never cut the line: they fail whenever anyone is queued
//! or a batch is opening.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex, MutexGuard};

use super::{Lockable, UnlockError};

const POISONED: &str = "shared mutex state poisoned";

/// Private handle a queued thread sleeps on.
///
/// The gate transitions false → true exactly once per acquisition, always
/// under the state mutex; the signal that follows is sent after the state
/// mutex is dropped.
#[derive(Debug)]
struct Waiter {
    go: AtomicBool,
    cond: Condvar,
}

impl Waiter {
    fn new() -> Self {
        Self {
            go: AtomicBool::new(false),
            cond: Condvar::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

#[derive(Debug)]
struct Node {
    mode: Mode,
    /// Diagnostic only; fairness comes from queue position.
    ticket: u64,
    waiter: Arc<Waiter>,
}

#[derive(Debug)]
struct SharedState {
    has_writer: bool,
    reader_cnt: usize,
    /// Readers admitted by the scheduler that have not yet entered.
    pending_readers: usize,
    next_ticket: u64,
    queue: VecDeque<Node>,
}

/// A fair FIFO multi-reader / single-writer lock.
///
/// # Example
///
/// ```
/// use lockstep::sync::SharedMutex;
///
/// let lock = SharedMutex::new();
///
/// lock.lock_shared();
/// assert!(lock.try_lock_shared()); // readers share
/// lock.unlock_shared().expect("reader");
/// lock.unlock_shared().expect("reader");
///
/// lock.lock();
/// assert!(!lock.try_lock_shared()); // writer excludes
/// lock.unlock().expect("writer");
/// ```
#[derive(Debug)]
pub struct SharedMutex {
    state: StdMutex<SharedState>,
}

impl Default for SharedMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMutex {
    /// Creates a new unlocked shared mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(SharedState {
                has_writer: false,
                reader_cnt: 0,
                pending_readers: 0,
                next_ticket: 0,
                queue: VecDeque::new(),
            }),
        }
    }

    // ---- writer ----

    /// Acquires the lock exclusively, blocking in FIFO order.
    pub fn lock(&self) {
        let waiter = Arc::new(Waiter::new());
        let mut state = self.state.lock().expect(POISONED);

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(Node {
            mode: Mode::Write,
            ticket,
            waiter: Arc::clone(&waiter),
        });

        // Arriving into an empty system must trigger admission.
        state = self.schedule_and_signal(state, &waiter);

        loop {
            while !waiter.go.load(Ordering::Acquire) {
                state = waiter.cond.wait(state).expect(POISONED);
            }
            // Spurious wakes and stale signals re-arm the gate.
            let admitted = Self::writer_admissible(&state)
                && state
                    .queue
                    .front()
                    .is_some_and(|node| node.mode == Mode::Write && node.ticket == ticket);
            if admitted {
                break;
            }
            waiter.go.store(false, Ordering::Release);
        }

        state.queue.pop_front();
        state.has_writer = true;
    }

    /// Attempts to acquire the lock exclusively without queueing.
    ///
    /// Fails if the lock is held in either mode, a reader batch is opening,
    /// or anyone is queued (no cutting).
    pub fn try_lock(&self) -> bool {
        let mut state = self.state.lock().expect(POISONED);
        if state.has_writer {
            return false;
        }
        if state.reader_cnt != 0 || state.pending_readers != 0 {
            return false;
        }
        if !state.queue.is_empty() {
            return false;
        }
        state.has_writer = true;
        true
    }

    /// Releases an exclusive hold and admits the next queue entry.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockError::NotHeld`] if no writer holds the lock.
    pub fn unlock(&self) -> Result<(), UnlockError> {
        let wake = {
            let mut state = self.state.lock().expect(POISONED);
            if !state.has_writer {
                return Err(UnlockError::NotHeld);
            }
            state.has_writer = false;
            let mut wake = Vec::new();
            Self::schedule(&mut state, &mut wake);
            wake
        };
        for waiter in wake {
            waiter.cond.notify_one();
        }
        Ok(())
    }

    // ---- reader ----

    /// Acquires the lock shared, blocking in FIFO order.
    ///
    /// Consecutive queued readers are admitted together; a reader queued
    /// behind a writer waits for that writer.
    pub fn lock_shared(&self) {
        let waiter = Arc::new(Waiter::new());
        let mut state = self.state.lock().expect(POISONED);

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(Node {
            mode: Mode::Read,
            ticket,
            waiter: Arc::clone(&waiter),
        });

        state = self.schedule_and_signal(state, &waiter);

        while !waiter.go.load(Ordering::Acquire) {
            state = waiter.cond.wait(state).expect(POISONED);
        }

        // Enter: move from pending to active. No scheduler call here — a
        // live reader already blocks writer admission.
        state.reader_cnt += 1;
        if state.pending_readers > 0 {
            state.pending_readers -= 1;
        }
    }

    /// Attempts to acquire the lock shared without queueing.
    ///
    /// Joins active readers only when no writer holds the lock, no batch is
    /// opening, and nobody is queued (no cutting).
    pub fn try_lock_shared(&self) -> bool {
        let mut state = self.state.lock().expect(POISONED);
        if state.has_writer {
            return false;
        }
        if state.pending_readers != 0 {
            return false;
        }
        if !state.queue.is_empty() {
            return false;
        }
        state.reader_cnt += 1;
        true
    }

    /// Releases a shared hold; the last reader out admits the next entry.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockError::NotHeld`] if no reader holds the lock.
    pub fn unlock_shared(&self) -> Result<(), UnlockError> {
        let wake = {
            let mut state = self.state.lock().expect(POISONED);
            if state.reader_cnt == 0 {
                return Err(UnlockError::NotHeld);
            }
            state.reader_cnt -= 1;
            let mut wake = Vec::new();
            if state.reader_cnt == 0 {
                // With pending readers still entering, the scheduler
                // refuses to admit a writer on its own.
                Self::schedule(&mut state, &mut wake);
            }
            wake
        };
        for waiter in wake {
            waiter.cond.notify_one();
        }
        Ok(())
    }

    // ---- guards ----

    /// Acquires shared and returns a guard that releases on drop.
    #[must_use]
    pub fn read_guard(&self) -> SharedReadGuard<'_> {
        self.lock_shared();
        SharedReadGuard { lock: self }
    }

    /// Acquires exclusive and returns a guard that releases on drop.
    #[must_use]
    pub fn write_guard(&self) -> SharedWriteGuard<'_> {
        self.lock();
        SharedWriteGuard { lock: self }
    }

    // ---- observers ----

    /// Number of threads currently waiting in the queue. Diagnostic only.
    #[must_use]
    pub fn queued_waiters(&self) -> usize {
        self.state.lock().expect(POISONED).queue.len()
    }

    /// Number of readers currently inside the critical section.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.state.lock().expect(POISONED).reader_cnt
    }

    /// Returns `true` if a writer currently holds the lock.
    #[must_use]
    pub fn has_writer(&self) -> bool {
        self.state.lock().expect(POISONED).has_writer
    }

    // ---- scheduler ----

    fn writer_admissible(state: &SharedState) -> bool {
        !state.has_writer && state.reader_cnt == 0 && state.pending_readers == 0
    }

    /// Admission decision. Runs under the state mutex; flips gates but does
    /// not signal — the caller signals after dropping the mutex.
    fn schedule(state: &mut SharedState, wake: &mut Vec<Arc<Waiter>>) {
        // Someone is inside, or a batch is still entering: no decision.
        if state.has_writer || state.reader_cnt != 0 {
            return;
        }
        if state.pending_readers != 0 {
            return;
        }

        match state.queue.front().map(|node| node.mode) {
            None => {}
            Some(Mode::Write) => {
                // The writer pops its own node once it wakes.
                if let Some(front) = state.queue.front() {
                    front.waiter.go.store(true, Ordering::Release);
                    wake.push(Arc::clone(&front.waiter));
                }
            }
            Some(Mode::Read) => {
                // Open a batch: pop the maximal reader prefix and admit it
                // whole. The writer behind it stays queued.
                let mut batch = 0;
                while state
                    .queue
                    .front()
                    .is_some_and(|node| node.mode == Mode::Read)
                {
                    let Some(node) = state.queue.pop_front() else {
                        break;
                    };
                    node.waiter.go.store(true, Ordering::Release);
                    wake.push(node.waiter);
                    batch += 1;
                }
                state.pending_readers = batch;
            }
        }
    }

    /// Runs the scheduler for an enqueue path, signalling any admitted
    /// waiters other than the caller with the state mutex dropped.
    ///
    /// The caller's own gate needs no signal: the gate is checked before
    /// sleeping.
    fn schedule_and_signal<'a>(
        &'a self,
        mut state: MutexGuard<'a, SharedState>,
        own: &Arc<Waiter>,
    ) -> MutexGuard<'a, SharedState> {
        let mut wake = Vec::new();
        Self::schedule(&mut state, &mut wake);
        wake.retain(|waiter| !Arc::ptr_eq(waiter, own));
        if !wake.is_empty() {
            drop(state);
            for waiter in &wake {
                waiter.cond.notify_one();
            }
            state = self.state.lock().expect(POISONED);
        }
        state
    }
}

impl Lockable for SharedMutex {
    fn lock(&self) {
        Self::lock(self);
    }

    fn try_lock(&self) -> bool {
        Self::try_lock(self)
    }

    fn unlock(&self) {
        Self::unlock(self).expect("exclusive unlock of shared mutex without a writer");
    }
}

/// Releases a shared hold on drop.
#[must_use = "guard releases the read lock immediately if not held"]
#[derive(Debug)]
pub struct SharedReadGuard<'a> {
    lock: &'a SharedMutex,
}

impl Drop for SharedReadGuard<'_> {
    fn drop(&mut self) {
        self.lock
            .unlock_shared()
            .expect("read guard outlived its reader count");
    }
}

/// Releases an exclusive hold on drop.
#[must_use = "guard releases the write lock immediately if not held"]
#[derive(Debug)]
pub struct SharedWriteGuard<'a> {
    lock: &'a SharedMutex,
}

impl Drop for SharedWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock
            .unlock()
            .expect("write guard outlived its writer flag");
    }
}
