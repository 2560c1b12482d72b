//! Thread-safe priority queue of jobs.
//!
//! Lower priority values are more urgent. Jobs of equal priority come out in
//! the order they went in.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::core::{BoxedJob, CoreError};
use crate::util::generate_task_id;

/// Urgency levels. Lower value = more urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Priority {
    /// Must run before anything else.
    Critical = 0,
    /// Ahead of normal traffic.
    High = 1,
    /// Default level.
    #[default]
    Normal = 2,
    /// Behind normal traffic.
    Low = 3,
    /// Runs when nothing else is waiting.
    Background = 4,
}

impl From<Priority> for i32 {
    fn from(p: Priority) -> Self {
        p as Self
    }
}

/// A queued job with its ordering key.
pub struct PriorityTask {
    /// Priority value (lower = more urgent).
    pub priority: i32,
    /// When the task was enqueued.
    pub enqueued_at: Instant,
    /// Caller- or system-assigned identifier.
    pub task_id: String,
    /// The work itself.
    pub job: BoxedJob,
    seq: u64,
}

impl PriorityTask {
    /// Insertion sequence number, strictly increasing per queue.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for PriorityTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityTask")
            .field("priority", &self.priority)
            .field("task_id", &self.task_id)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl PartialEq for PriorityTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for PriorityTask {}

impl PartialOrd for PriorityTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityTask {
    // BinaryHeap is a max-heap, so every comparison is reversed.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Snapshot of queue activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks currently waiting.
    pub depth: usize,
    /// Tasks ever enqueued.
    pub total_enqueued: u64,
    /// Tasks ever dequeued.
    pub total_dequeued: u64,
    /// Whether the queue still accepts work.
    pub closed: bool,
}

struct QueueState {
    heap: BinaryHeap<PriorityTask>,
    next_seq: u64,
    total_dequeued: u64,
    closed: bool,
    /// Bumped by `wake_all`; blocked consumers compare it after waking.
    wake_generation: u64,
}

/// Min-priority queue with blocking, timeout-aware dequeue.
///
/// All state lives behind one `parking_lot::Mutex`; consumers park on a
/// `Condvar` and each enqueue wakes at most one of them. Jobs are never
/// invoked while the lock is held.
pub struct PriorityTaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl Default for PriorityTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityTaskQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                total_dequeued: 0,
                closed: false,
                wake_generation: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Insert a job and return its id (generated when `task_id` is `None`).
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QueueClosed` after [`close`](Self::close).
    pub fn enqueue(
        &self,
        job: BoxedJob,
        priority: impl Into<i32>,
        task_id: Option<String>,
    ) -> Result<String, CoreError> {
        let task_id = task_id.unwrap_or_else(generate_task_id);
        let priority = priority.into();
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(CoreError::QueueClosed);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(PriorityTask {
                priority,
                enqueued_at: Instant::now(),
                task_id: task_id.clone(),
                job,
                seq,
            });
        }
        self.available.notify_one();
        tracing::trace!(task_id = %task_id, priority, "task enqueued");
        Ok(task_id)
    }

    /// Remove the most urgent task.
    ///
    /// With `Some(timeout)` waits at most that long and returns `None` if
    /// nothing arrived; with `None` blocks until a task is available, the
    /// queue is closed, or [`wake_all`](Self::wake_all) is called. Losing a
    /// task to another consumer is not a reason to return.
    pub fn dequeue(&self, timeout: Option<Duration>) -> Option<PriorityTask> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        let generation = state.wake_generation;
        loop {
            if let Some(task) = state.heap.pop() {
                state.total_dequeued += 1;
                return Some(task);
            }
            if state.closed {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        let task = state.heap.pop();
                        if task.is_some() {
                            state.total_dequeued += 1;
                        }
                        return task;
                    }
                }
                None => {
                    self.available.wait(&mut state);
                    if state.heap.is_empty() && state.wake_generation != generation {
                        return None;
                    }
                }
            }
        }
    }

    /// Remove the most urgent task without waiting.
    pub fn try_dequeue(&self) -> Option<PriorityTask> {
        let mut state = self.state.lock();
        let task = state.heap.pop();
        if task.is_some() {
            state.total_dequeued += 1;
        }
        task
    }

    /// Release every consumer blocked in [`dequeue`](Self::dequeue) with no
    /// timeout, even if nothing is queued.
    pub fn wake_all(&self) {
        self.state.lock().wake_generation += 1;
        self.available.notify_all();
    }

    /// Stop accepting work and release all blocked consumers.
    ///
    /// Tasks already queued can still be drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Accept work again after [`close`](Self::close).
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    /// Number of waiting tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Whether no tasks are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Drop every waiting task and return how many were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.heap.len();
        state.heap.clear();
        n
    }

    /// Current queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            depth: state.heap.len(),
            total_enqueued: state.next_seq,
            total_dequeued: state.total_dequeued,
            closed: state.closed,
        }
    }
}
