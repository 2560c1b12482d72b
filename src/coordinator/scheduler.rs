//! Dependency-aware async task coordinator.
//!
//! A task becomes ready once its schedule time has passed and every
//! dependency is `Completed`. Ready tasks are spawned onto the tokio runtime
//! concurrently; a failed attempt goes back to `Pending` behind a fixed
//! backoff until the retry budget runs out.
//!
//! If a dependency ends `Failed` or `Cancelled`, every task waiting on it is
//! marked `Failed` without retry, transitively.
//!
//! Cancellation is best effort: the task is marked `Cancelled` immediately and
//! its [`ExecutionContext::is_cancelled`] flag is raised, but an operation that
//! is already running is not interrupted and may run to completion. Its
//! outcome is then discarded.
//!
//! Subtasks run inline, in order, as part of their parent's attempt. Their ids
//! are registered alongside the parent so status and result lookups work for
//! them too, and their snapshots inside the parent record each run. A subtask
//! with its own `max_retries` is retried in place before the parent attempt
//! fails. Subtasks cannot declare dependencies. Subtasks that never got to
//! run when the parent fails or is cancelled end up `Cancelled`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::coordinator::{ExecutionContext, Task, TaskId, TaskResult, TaskStatus};
use crate::core::CoreError;
use crate::metrics::{MetricsCollector, PerformanceMetrics};
use crate::util::now_ms;

/// Metrics namespace used by the coordinator.
pub const COORDINATOR_METRICS: &str = "task_coordinator";

/// Task counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Registered tasks.
    pub total: usize,
    /// Waiting on schedule or retry backoff.
    pub pending: usize,
    /// Scheduled, waiting on dependencies.
    pub scheduled: usize,
    /// Running.
    pub in_progress: usize,
    /// Finished successfully.
    pub completed: usize,
    /// Finished unsuccessfully.
    pub failed: usize,
    /// Cancelled.
    pub cancelled: usize,
    /// Attempts started across all tasks.
    pub total_attempts: u64,
}

struct TaskEntry {
    task: Task,
    seq: u64,
    scheduled_for: Option<Instant>,
    eligible_at: Instant,
    attempts: u32,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct CoordinatorState {
    tasks: HashMap<TaskId, TaskEntry>,
    /// Subtask id to the id of the top-level task that owns it.
    subtask_owner: HashMap<TaskId, TaskId>,
    next_seq: u64,
}

impl CoordinatorState {
    /// Top-level task or subtask snapshot by id.
    fn lookup(&self, id: &str) -> Option<&Task> {
        if let Some(entry) = self.tasks.get(id) {
            return Some(&entry.task);
        }
        let owner = self.subtask_owner.get(id)?;
        self.tasks.get(owner)?.task.find_subtask(id)
    }

    fn is_known(&self, id: &str) -> bool {
        self.tasks.contains_key(id) || self.subtask_owner.contains_key(id)
    }

    /// Reject a task whose subtree clashes with what is already registered.
    fn validate_subtasks(&self, task: &Task) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        let mut problem = None;
        task.visit_subtasks(&mut |child| {
            if problem.is_some() {
                return;
            }
            if child.id == task.id || !seen.insert(child.id.clone()) || self.is_known(&child.id) {
                problem = Some(CoreError::DuplicateTask(child.id.clone()));
            } else if !child.dependencies.is_empty() {
                problem = Some(CoreError::InvalidConfig(format!(
                    "subtask {} cannot declare dependencies",
                    child.id
                )));
            } else if let Some(waiting) = self
                .tasks
                .values()
                .find(|e| e.task.dependencies.contains(&child.id))
            {
                problem = Some(CoreError::InvalidConfig(format!(
                    "task {} depends on {}, which would be a subtask",
                    waiting.task.id, child.id
                )));
            }
        });
        problem.map_or(Ok(()), Err)
    }

    /// Resolve the schedule time of `id`, scheduling unscheduled
    /// dependencies first.
    fn schedule(
        &mut self,
        id: &str,
        delay: Duration,
        visiting: &mut HashSet<TaskId>,
    ) -> Option<Instant> {
        let entry = self.tasks.get(id)?;
        if let Some(at) = entry.scheduled_for {
            return Some(at);
        }
        if !visiting.insert(id.to_string()) {
            return None;
        }
        let deps = entry.task.dependencies.clone();
        let latest = deps
            .iter()
            .filter_map(|dep| self.schedule(dep, delay, visiting))
            .max();
        let at = latest.map_or_else(Instant::now, |t| t + delay);

        let entry = self.tasks.get_mut(id)?;
        entry.scheduled_for = Some(at);
        entry.eligible_at = at;
        if entry.task.status == TaskStatus::Pending {
            entry.task.status = TaskStatus::Scheduled;
        }
        Some(at)
    }

    /// Whether registering `id` with `deps` would close a dependency cycle.
    fn creates_cycle(&self, id: &str, deps: &[TaskId]) -> bool {
        let mut stack: Vec<&str> = deps.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == id {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(entry) = self.tasks.get(current) {
                stack.extend(entry.task.dependencies.iter().map(String::as_str));
            }
        }
        false
    }

    fn failed_dependency(&self, task: &Task) -> Option<(TaskId, TaskStatus)> {
        task.dependencies.iter().find_map(|dep| {
            self.tasks.get(dep).and_then(|d| {
                matches!(d.task.status, TaskStatus::Failed | TaskStatus::Cancelled)
                    .then(|| (dep.clone(), d.task.status))
            })
        })
    }

    /// Fail every waiting task whose dependency failed, until nothing changes.
    fn propagate_dependency_failures(&mut self) -> Vec<(TaskId, TaskId, TaskStatus)> {
        let mut failed = Vec::new();
        loop {
            let blocked: Vec<(TaskId, TaskId, TaskStatus)> = self
                .tasks
                .values()
                .filter(|e| matches!(e.task.status, TaskStatus::Pending | TaskStatus::Scheduled))
                .filter_map(|e| {
                    self.failed_dependency(&e.task)
                        .map(|(dep, status)| (e.task.id.clone(), dep, status))
                })
                .collect();
            if blocked.is_empty() {
                return failed;
            }
            for (id, dep, status) in blocked {
                if let Some(entry) = self.tasks.get_mut(&id) {
                    entry.task.status = TaskStatus::Failed;
                    entry.task.completed_at_ms = Some(now_ms());
                    entry.task.result = Some(TaskResult::failure(format!(
                        "dependency {dep} did not complete ({status})"
                    )));
                    settle_subtasks(&mut entry.task);
                }
                failed.push((id, dep, status));
            }
        }
    }

    fn is_ready(&self, entry: &TaskEntry, now: Instant) -> bool {
        matches!(entry.task.status, TaskStatus::Pending | TaskStatus::Scheduled)
            && entry.eligible_at <= now
            && entry.task.dependencies.iter().all(|dep| {
                self.tasks
                    .get(dep)
                    .is_some_and(|d| d.task.status == TaskStatus::Completed)
            })
    }
}

struct Launch {
    task: Task,
    ctx: ExecutionContext,
}

enum Finish {
    Completed { attempts: u32 },
    Retry { retries: u32, max_retries: u32, error: String },
    Failed { attempts: u32, error: String },
    Discarded(TaskStatus),
}

/// Mark every unfinished subtask `Cancelled`; they will not run.
fn settle_subtasks(task: &mut Task) {
    let now = now_ms();
    task.visit_subtasks_mut(&mut |child| {
        if !child.status.is_terminal() {
            child.status = TaskStatus::Cancelled;
            child.completed_at_ms = Some(now);
        }
    });
}

/// Clear subtask snapshots before a new attempt.
fn reset_subtasks(task: &mut Task) {
    task.visit_subtasks_mut(&mut |child| {
        child.status = TaskStatus::Scheduled;
        child.started_at_ms = None;
        child.completed_at_ms = None;
        child.result = None;
        child.retries = 0;
    });
}

struct Inner {
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    /// Signalled on every status change; `wait_for_task` listens here.
    changed: Notify,
    /// Wakes the scheduling loop early.
    wake: Notify,
    shutdown: AtomicBool,
    metrics: Option<Arc<PerformanceMetrics>>,
}

/// Registers tasks, resolves their dependencies, and runs them on tokio.
///
/// Cloning is cheap and every clone drives the same task table. The state
/// lock is never held across an `.await`.
#[derive(Clone)]
pub struct TaskCoordinator {
    inner: Arc<Inner>,
}

impl TaskCoordinator {
    /// Create a coordinator with no tasks.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: CoordinatorConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(CoordinatorState::default()),
                changed: Notify::new(),
                wake: Notify::new(),
                shutdown: AtomicBool::new(false),
                metrics: None,
            }),
        })
    }

    /// Report task outcomes to `collector` under [`COORDINATOR_METRICS`].
    ///
    /// Must be called before the coordinator is cloned.
    #[must_use]
    pub fn with_metrics(mut self, collector: &MetricsCollector) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.metrics = Some(collector.metrics(COORDINATOR_METRICS));
        } else {
            warn!("metrics attached to a shared coordinator; ignoring");
        }
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Register a task and resolve its schedule.
    ///
    /// The task becomes eligible at the latest schedule time among its known
    /// dependencies plus the configured dependency delay, or immediately if
    /// it has none. Dependencies that are not registered yet keep it waiting
    /// until they are registered and complete.
    ///
    /// Subtask ids share the namespace of top-level ids. A subtask without
    /// a retry budget gets none; the parent's retries cover it.
    ///
    /// # Errors
    ///
    /// `CoreError::DuplicateTask` if the id or any subtask id is taken;
    /// `CoreError::InvalidConfig` if the dependencies form a cycle, name a
    /// subtask, or a subtask declares dependencies.
    pub fn add_task(&self, mut task: Task) -> Result<TaskId, CoreError> {
        let id = task.id.clone();
        let dependencies = task.dependencies.len();
        let subtask_ids = task.subtask_ids();
        {
            let mut state = self.inner.state.lock();
            if state.is_known(&id) {
                return Err(CoreError::DuplicateTask(id));
            }
            if let Some(dep) = task
                .dependencies
                .iter()
                .find(|dep| state.subtask_owner.contains_key(*dep))
            {
                return Err(CoreError::InvalidConfig(format!(
                    "task {id} depends on subtask {dep}"
                )));
            }
            state.validate_subtasks(&task)?;
            if state.creates_cycle(&id, &task.dependencies) {
                return Err(CoreError::InvalidConfig(format!(
                    "task {id} has a dependency cycle"
                )));
            }
            task.status = TaskStatus::Pending;
            task.max_retries
                .get_or_insert(self.inner.config.default_max_retries);
            task.visit_subtasks_mut(&mut |child| {
                child.status = TaskStatus::Pending;
                child.max_retries.get_or_insert(0);
            });
            for sub_id in &subtask_ids {
                state.subtask_owner.insert(sub_id.clone(), id.clone());
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.tasks.insert(
                id.clone(),
                TaskEntry {
                    task,
                    seq,
                    scheduled_for: None,
                    eligible_at: Instant::now(),
                    attempts: 0,
                    cancelled: Arc::new(AtomicBool::new(false)),
                },
            );
            state.schedule(&id, self.inner.config.dependency_delay(), &mut HashSet::new());
        }
        debug!(task_id = %id, dependencies, subtasks = subtask_ids.len(), "task added");
        if let Some(m) = &self.inner.metrics {
            m.increment("tasks_added", 1);
        }
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Cancel a pending, scheduled, or running task.
    ///
    /// Returns `false` for unknown or already finished tasks, and for
    /// subtasks, which are cancelled through their top-level task. A running
    /// operation only sees the cancellation through
    /// [`ExecutionContext::is_cancelled`].
    pub fn cancel_task(&self, id: &str) -> bool {
        let previous = {
            let mut state = self.inner.state.lock();
            match state.tasks.get_mut(id) {
                Some(entry) if entry.task.status.is_cancellable() => {
                    let previous = entry.task.status;
                    entry.task.status = TaskStatus::Cancelled;
                    entry.task.completed_at_ms = Some(now_ms());
                    entry.cancelled.store(true, Ordering::Release);
                    settle_subtasks(&mut entry.task);
                    Some(previous)
                }
                _ => None,
            }
        };
        let Some(previous) = previous else {
            return false;
        };
        info!(task_id = %id, from = %previous, "task cancelled");
        if let Some(m) = &self.inner.metrics {
            m.increment("tasks_cancelled", 1);
        }
        self.notify_change();
        true
    }

    /// Current status of a task or subtask.
    #[must_use]
    pub fn get_task_status(&self, id: &str) -> Option<TaskStatus> {
        self.inner.state.lock().lookup(id).map(|t| t.status)
    }

    /// Result of a finished task or subtask.
    #[must_use]
    pub fn get_task_result(&self, id: &str) -> Option<TaskResult> {
        self.inner
            .state
            .lock()
            .lookup(id)
            .and_then(|t| t.result.clone())
    }

    /// Snapshot of a task or subtask.
    #[must_use]
    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.inner.state.lock().lookup(id).cloned()
    }

    /// Snapshots of all top-level tasks, optionally filtered by status, in
    /// registration order.
    #[must_use]
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let state = self.inner.state.lock();
        let mut entries: Vec<&TaskEntry> = state
            .tasks
            .values()
            .filter(|e| status.map_or(true, |s| e.task.status == s))
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.task.clone()).collect()
    }

    /// Counts of top-level tasks by status.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        let state = self.inner.state.lock();
        let mut stats = CoordinatorStats {
            total: state.tasks.len(),
            ..CoordinatorStats::default()
        };
        for entry in state.tasks.values() {
            stats.total_attempts += u64::from(entry.attempts);
            match entry.task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Scheduled => stats.scheduled += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Wait until the task reaches a terminal status or `timeout` elapses,
    /// returning the status at that point.
    ///
    /// Does not drive execution; the scheduling loop must be running.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::TaskNotFound` for an unknown id.
    pub async fn wait_for_task(&self, id: &str, timeout: Duration) -> Result<TaskStatus, CoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let status = self
                .get_task_status(id)
                .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))?;
            if status.is_terminal() {
                return Ok(status);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self
                    .get_task_status(id)
                    .ok_or_else(|| CoreError::TaskNotFound(id.to_string()));
            }
        }
    }

    /// One scheduling pass: fail tasks blocked on failed dependencies, then
    /// spawn every ready task. Returns how many were started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn process_ready_tasks(&self) -> usize {
        let now = Instant::now();
        let (propagated, launches) = {
            let mut state = self.inner.state.lock();
            let propagated = state.propagate_dependency_failures();

            let mut ready: Vec<(i32, u64, TaskId)> = state
                .tasks
                .values()
                .filter(|e| state.is_ready(e, now))
                .map(|e| (i32::from(e.task.priority), e.seq, e.task.id.clone()))
                .collect();
            ready.sort();

            let mut launches = Vec::with_capacity(ready.len());
            for (_, _, id) in ready {
                if let Some(entry) = state.tasks.get_mut(&id) {
                    entry.attempts += 1;
                    entry.task.status = TaskStatus::InProgress;
                    entry.task.started_at_ms = Some(now_ms());
                    reset_subtasks(&mut entry.task);
                    let ctx = ExecutionContext::new(
                        id,
                        entry.attempts,
                        entry.task.context.clone(),
                        Arc::clone(&entry.cancelled),
                    );
                    launches.push(Launch {
                        task: entry.task.clone(),
                        ctx,
                    });
                }
            }
            (propagated, launches)
        };

        for (id, dep, status) in &propagated {
            warn!(task_id = %id, dependency = %dep, dependency_status = %status,
                "dependency did not complete; failing dependent task");
        }
        if let Some(m) = &self.inner.metrics {
            if !propagated.is_empty() {
                m.increment("tasks_failed", propagated.len() as u64);
            }
        }
        if !propagated.is_empty() {
            self.inner.changed.notify_waiters();
        }

        let started = launches.len();
        for launch in launches {
            debug!(task_id = %launch.ctx.task_id, attempt = launch.ctx.attempt, "starting task");
            let this = self.clone();
            tokio::spawn(async move { this.run_attempt(launch).await });
        }
        started
    }

    /// Run the scheduling loop until [`shutdown`](Self::shutdown).
    pub async fn execute_pending_tasks(&self) {
        info!(
            poll_interval_ms = self.inner.config.poll_interval_ms,
            "task coordinator loop started"
        );
        let poll = self.inner.config.poll_interval();
        while !self.inner.shutdown.load(Ordering::Acquire) {
            self.process_ready_tasks();
            let _ = tokio::time::timeout(poll, self.inner.wake.notified()).await;
        }
        info!("task coordinator loop stopped");
    }

    /// Spawn [`execute_pending_tasks`](Self::execute_pending_tasks) onto the
    /// current runtime.
    #[must_use]
    pub fn spawn(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.execute_pending_tasks().await })
    }

    /// Ask the scheduling loop to exit. Running operations are not cancelled.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wake.notify_one();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn notify_change(&self) {
        self.inner.changed.notify_waiters();
        self.inner.wake.notify_one();
    }

    async fn run_attempt(&self, launch: Launch) {
        let id = launch.task.id.clone();
        let started = Instant::now();
        let tracker = SubtaskTracker {
            inner: Arc::clone(&self.inner),
            root: id.clone(),
        };
        // A panicking operation surfaces as a JoinError instead of
        // leaving the task stuck in progress.
        let outcome = match tokio::spawn(execute_tree(launch.task, launch.ctx, tracker)).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(anyhow::anyhow!("task operation panicked")),
            Err(e) => Err(anyhow::anyhow!("task operation aborted: {e}")),
        };
        self.finish_attempt(&id, outcome, started.elapsed());
    }

    fn finish_attempt(&self, id: &str, outcome: anyhow::Result<serde_json::Value>, elapsed: Duration) {
        let backoff = self.inner.config.retry_backoff();
        let finish = {
            let mut state = self.inner.state.lock();
            let Some(entry) = state.tasks.get_mut(id) else {
                return;
            };
            if entry.task.status == TaskStatus::InProgress {
                let attempts = entry.attempts;
                match outcome {
                    Ok(output) => {
                        entry.task.status = TaskStatus::Completed;
                        entry.task.completed_at_ms = Some(now_ms());
                        entry.task.result = Some(
                            TaskResult::success(output)
                                .with_metric("attempts", f64::from(attempts))
                                .with_metric("duration_ms", elapsed.as_secs_f64() * 1000.0),
                        );
                        Finish::Completed { attempts }
                    }
                    Err(e) => {
                        let error = format!("{e:#}");
                        let max_retries = entry
                            .task
                            .max_retries
                            .unwrap_or(self.inner.config.default_max_retries);
                        if entry.task.retries < max_retries {
                            entry.task.retries += 1;
                            entry.task.status = TaskStatus::Pending;
                            entry.eligible_at = Instant::now() + backoff;
                            Finish::Retry {
                                retries: entry.task.retries,
                                max_retries,
                                error,
                            }
                        } else {
                            entry.task.status = TaskStatus::Failed;
                            entry.task.completed_at_ms = Some(now_ms());
                            entry.task.result = Some(
                                TaskResult::failure(error.clone())
                                    .with_metric("attempts", f64::from(attempts)),
                            );
                            settle_subtasks(&mut entry.task);
                            Finish::Failed { attempts, error }
                        }
                    }
                }
            } else {
                Finish::Discarded(entry.task.status)
            }
        };

        let metrics = self.inner.metrics.as_deref();
        if let Some(m) = metrics {
            m.record_time("task_duration", elapsed);
        }
        match finish {
            Finish::Completed { attempts } => {
                debug!(task_id = %id, attempts, elapsed_ms = elapsed.as_millis(), "task completed");
                if let Some(m) = metrics {
                    m.increment("tasks_completed", 1);
                }
            }
            Finish::Retry {
                retries,
                max_retries,
                error,
            } => {
                warn!(task_id = %id, retries, max_retries, backoff_ms = backoff.as_millis(),
                    error = %error, "task failed; retry scheduled");
                if let Some(m) = metrics {
                    m.increment("tasks_retried", 1);
                }
            }
            Finish::Failed { attempts, error } => {
                error!(task_id = %id, attempts, error = %error, "task failed permanently");
                if let Some(m) = metrics {
                    m.increment("tasks_failed", 1);
                }
            }
            Finish::Discarded(status) => {
                debug!(task_id = %id, status = %status, "attempt finished after task left in-progress; outcome discarded");
            }
        }
        self.notify_change();
    }
}

/// Writes subtask progress into the snapshot held by the owning entry.
#[derive(Clone)]
struct SubtaskTracker {
    inner: Arc<Inner>,
    root: TaskId,
}

impl SubtaskTracker {
    /// Apply `update` to subtask `id` while its owner is still running.
    /// Late updates after a cancellation are dropped.
    fn update(&self, id: &str, update: impl FnOnce(&mut Task)) {
        {
            let mut state = self.inner.state.lock();
            let Some(entry) = state.tasks.get_mut(&self.root) else {
                return;
            };
            if entry.task.status != TaskStatus::InProgress {
                return;
            }
            let Some(subtask) = entry.task.find_subtask_mut(id) else {
                return;
            };
            update(subtask);
        }
        self.inner.changed.notify_waiters();
    }

    /// Run one subtask, retrying in place within its own budget.
    async fn run(
        &self,
        subtask: Task,
        parent: &ExecutionContext,
    ) -> anyhow::Result<serde_json::Value> {
        let id = subtask.id.clone();
        let max_retries = subtask.max_retries.unwrap_or(0);
        let backoff = self.inner.config.retry_backoff();
        let started = Instant::now();
        let mut retries = 0;
        loop {
            self.update(&id, |t| {
                t.status = TaskStatus::InProgress;
                t.started_at_ms = Some(now_ms());
                t.retries = retries;
            });
            let ctx = parent.for_subtask(&subtask);
            match execute_tree(subtask.clone(), ctx, self.clone()).await {
                Ok(output) => {
                    let result = TaskResult::success(output.clone())
                        .with_metric("attempts", f64::from(retries + 1))
                        .with_metric("duration_ms", started.elapsed().as_secs_f64() * 1000.0);
                    self.update(&id, |t| {
                        t.status = TaskStatus::Completed;
                        t.completed_at_ms = Some(now_ms());
                        t.result = Some(result);
                    });
                    return Ok(output);
                }
                Err(e) if retries < max_retries && !parent.is_cancelled() => {
                    retries += 1;
                    warn!(task_id = %self.root, subtask_id = %id, retries, max_retries,
                        error = %format!("{e:#}"), "subtask failed; retrying in place");
                    self.update(&id, |t| {
                        t.status = TaskStatus::Pending;
                        t.retries = retries;
                    });
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    let result = TaskResult::failure(format!("{e:#}"))
                        .with_metric("attempts", f64::from(retries + 1));
                    self.update(&id, |t| {
                        t.status = TaskStatus::Failed;
                        t.completed_at_ms = Some(now_ms());
                        t.result = Some(result);
                    });
                    return Err(e);
                }
            }
        }
    }
}

/// Run `task`'s subtasks in order, then its own operation.
fn execute_tree(
    task: Task,
    ctx: ExecutionContext,
    tracker: SubtaskTracker,
) -> Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>> {
    Box::pin(async move {
        let Task {
            subtasks,
            operation,
            ..
        } = task;
        let mut outputs = Vec::with_capacity(subtasks.len());
        for subtask in subtasks {
            if ctx.is_cancelled() {
                anyhow::bail!("task {} cancelled", ctx.task_id);
            }
            let sub_id = subtask.id.clone();
            let output = tracker
                .run(subtask, &ctx)
                .await
                .with_context(|| format!("subtask {sub_id} failed"))?;
            outputs.push(output);
        }
        if ctx.is_cancelled() {
            anyhow::bail!("task {} cancelled", ctx.task_id);
        }
        match operation {
            Some(op) => op.execute(ctx).await,
            None if outputs.is_empty() => Ok(serde_json::Value::Null),
            None => Ok(serde_json::Value::Array(outputs)),
        }
    })
}
