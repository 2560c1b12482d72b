//! Fixed-size worker pool draining a [`PriorityTaskQueue`].
//!
//! Each worker is a dedicated OS thread looping on `dequeue`. A job that
//! returns an error or panics is logged and counted; the worker moves on to
//! the next task.
//!
//! # Example
//!
//! ```rust
//! use prometheus_task_core::config::ProcessorConfig;
//! use prometheus_task_core::core::{Priority, TaskProcessor};
//!
//! let processor = TaskProcessor::new(ProcessorConfig::new().with_worker_count(2)).unwrap();
//! processor.start();
//! processor
//!     .submit(Box::new(|| -> anyhow::Result<()> { Ok(()) }), Priority::High, None)
//!     .unwrap();
//! processor.stop(None);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::ProcessorConfig;
use crate::core::{BoxedJob, CoreError, PriorityTask, PriorityTaskQueue};
use crate::metrics::{MetricsCollector, PerformanceMetrics};

/// Metrics namespace used by the processor.
pub const PROCESSOR_METRICS: &str = "task_processor";

/// Statistics about processor activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorStats {
    /// Configured number of worker threads.
    pub worker_count: usize,
    /// Worker threads still alive, including any detached by a timed-out
    /// stop that have not finished their last job yet.
    pub live_workers: usize,
    /// Whether workers are currently running.
    pub running: bool,
    /// Tasks waiting in the queue.
    pub queued_tasks: usize,
    /// Tasks currently executing.
    pub active_tasks: u64,
    /// Tasks that returned `Ok`.
    pub completed_tasks: u64,
    /// Tasks that returned an error or panicked.
    pub failed_tasks: u64,
    /// Subset of `failed_tasks` that panicked.
    pub panicked_tasks: u64,
}

/// Internal counters shared with worker threads.
#[derive(Debug, Default)]
struct ProcessorCounters {
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Everything a worker thread needs.
struct WorkerShared {
    queue: Arc<PriorityTaskQueue>,
    counters: ProcessorCounters,
    running: AtomicBool,
    /// Bumped on every start and stop; a worker exits once it no longer
    /// matches the generation it was spawned for.
    generation: AtomicU64,
    live_workers: AtomicUsize,
    poll_interval: Duration,
    metrics: Option<Arc<PerformanceMetrics>>,
}

/// Worker pool executing prioritized jobs on dedicated threads.
pub struct TaskProcessor {
    config: ProcessorConfig,
    shared: Arc<WorkerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskProcessor {
    /// Create a stopped processor with its own queue.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: ProcessorConfig) -> Result<Self, CoreError> {
        Self::with_queue(config, Arc::new(PriorityTaskQueue::new()))
    }

    /// Create a stopped processor draining an existing queue.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if the configuration is invalid.
    pub fn with_queue(
        config: ProcessorConfig,
        queue: Arc<PriorityTaskQueue>,
    ) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        let shared = Arc::new(WorkerShared {
            queue,
            counters: ProcessorCounters::default(),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            live_workers: AtomicUsize::new(0),
            poll_interval: config.poll_interval(),
            metrics: None,
        });
        Ok(Self {
            config,
            shared,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Report completions, failures, and durations to `collector`.
    ///
    /// Must be called before [`start`](Self::start).
    #[must_use]
    pub fn with_metrics(mut self, collector: &MetricsCollector) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.metrics = Some(collector.metrics(PROCESSOR_METRICS));
        } else {
            warn!("metrics attached after workers were spawned; ignoring");
        }
        self
    }

    /// The queue this processor drains.
    #[must_use]
    pub fn queue(&self) -> &Arc<PriorityTaskQueue> {
        &self.shared.queue
    }

    /// Spawn the worker threads. No-op if already running.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.queue.reopen();
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        for worker_id in 0..self.config.worker_count {
            match spawn_worker(
                worker_id,
                generation,
                Arc::clone(&self.shared),
                self.config.thread_stack_size,
            ) {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(worker_id, error = %e, "failed to spawn worker thread"),
            }
        }
        info!(
            worker_count = workers.len(),
            poll_interval_ms = self.config.poll_interval_ms,
            "task processor started"
        );
    }

    /// Whether workers are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Enqueue a job on the processor's queue.
    ///
    /// Jobs may be queued before the first [`start`](Self::start); they run
    /// once workers exist.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QueueClosed` after [`stop`](Self::stop) until the
    /// processor is started again.
    pub fn submit(
        &self,
        job: BoxedJob,
        priority: impl Into<i32>,
        task_id: Option<String>,
    ) -> Result<String, CoreError> {
        self.shared.queue.enqueue(job, priority, task_id)
    }

    /// Signal workers to exit and join them.
    ///
    /// The queue is closed and every job still waiting in it is dropped
    /// without running, so nothing stays queued for workers that no longer
    /// exist. Waits at most `timeout` in total (the configured stop timeout
    /// when `None`). Workers still busy when the deadline passes are
    /// detached; they exit after their current job and never rejoin a later
    /// [`start`](Self::start). Calling this on a stopped processor does
    /// nothing.
    pub fn stop(&self, timeout: Option<Duration>) {
        let mut workers = self.workers.lock();
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("stopping task processor");
        retire_workers(&self.shared);

        let deadline = Instant::now() + timeout.unwrap_or_else(|| self.config.stop_timeout());
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = crossbeam_channel::bounded::<bool>(1);
            thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker thread panicked"),
                Err(_) => warn!(worker_id = idx, "worker did not exit within timeout - detaching"),
            }
        }
        info!(worker_count, "task processor stopped");
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ProcessorStats {
        let c = &self.shared.counters;
        ProcessorStats {
            worker_count: self.config.worker_count,
            live_workers: self.shared.live_workers.load(Ordering::Acquire),
            running: self.is_running(),
            queued_tasks: self.shared.queue.len(),
            active_tasks: c.active.load(Ordering::Relaxed),
            completed_tasks: c.completed.load(Ordering::Relaxed),
            failed_tasks: c.failed.load(Ordering::Relaxed),
            panicked_tasks: c.panicked.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TaskProcessor {
    fn drop(&mut self) {
        // Signal only; joining in Drop can hang on long-running jobs.
        if self.shared.running.swap(false, Ordering::AcqRel) {
            retire_workers(&self.shared);
            debug!("task processor dropped without stop() - workers will be detached");
        }
    }
}

/// End the current worker generation: close the queue, drop what is still
/// waiting, and wake anyone blocked on it.
fn retire_workers(shared: &WorkerShared) {
    shared.generation.fetch_add(1, Ordering::AcqRel);
    shared.queue.close();
    let dropped = shared.queue.clear();
    if dropped > 0 {
        warn!(dropped, "queued tasks discarded on stop");
    }
    shared.queue.wake_all();
}

fn spawn_worker(
    worker_id: usize,
    generation: u64,
    shared: Arc<WorkerShared>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    shared.live_workers.fetch_add(1, Ordering::AcqRel);
    let spawned = thread::Builder::new()
        .name(format!("task-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn({
            let shared = Arc::clone(&shared);
            move || {
                debug!(worker_id, generation, "worker thread started");
                while shared.generation.load(Ordering::Acquire) == generation {
                    let Some(task) = shared.queue.dequeue(Some(shared.poll_interval)) else {
                        continue;
                    };
                    run_task(worker_id, &shared, task);
                }
                shared.live_workers.fetch_sub(1, Ordering::AcqRel);
                debug!(worker_id, generation, "worker thread exiting");
            }
        });
    if spawned.is_err() {
        shared.live_workers.fetch_sub(1, Ordering::AcqRel);
    }
    spawned
}

fn run_task(worker_id: usize, shared: &WorkerShared, task: PriorityTask) {
    let PriorityTask {
        task_id, job, priority, ..
    } = task;
    let counters = &shared.counters;
    counters.active.fetch_add(1, Ordering::Relaxed);
    debug!(worker_id, task_id = %task_id, priority, "worker executing task");

    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(move || job.execute()));
    let elapsed = started.elapsed();

    counters.active.fetch_sub(1, Ordering::Relaxed);
    let succeeded = match outcome {
        Ok(Ok(())) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(worker_id, task_id = %task_id, ?elapsed, "task completed");
            true
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(worker_id, task_id = %task_id, error = %e, "task failed");
            false
        }
        Err(panic) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!(
                worker_id,
                task_id = %task_id,
                panic = panic_message(panic.as_ref()),
                "task panicked"
            );
            false
        }
    };

    if let Some(metrics) = &shared.metrics {
        metrics.increment(if succeeded { "tasks_completed" } else { "tasks_failed" }, 1);
        metrics.record_time("task_duration", elapsed);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
