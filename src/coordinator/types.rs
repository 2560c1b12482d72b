//! Task model for the dependency coordinator.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::coordinator::TaskOperation;
use crate::core::Priority;
use crate::util::{generate_task_id, now_ms};

/// Unique task identifier.
pub type TaskId = String;

/// Lifecycle state of a coordinator task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, waiting for its schedule or a retry backoff.
    Pending,
    /// Schedule resolved; runs once its dependencies complete.
    Scheduled,
    /// Operation is running.
    InProgress,
    /// Operation succeeded.
    Completed,
    /// Operation failed with retries exhausted, or a dependency failed.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether [`TaskCoordinator::cancel_task`](crate::coordinator::TaskCoordinator::cancel_task)
    /// has any effect.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled | Self::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Broad kind of work a task represents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Inspecting existing material.
    Analysis,
    /// Producing new code or content.
    Implementation,
    /// Restructuring existing code.
    Refactoring,
    /// Running or writing tests.
    Testing,
    /// Writing docs.
    Documentation,
    /// Gathering information.
    Research,
    /// Anything else.
    #[default]
    General,
}

/// Environment a task operation runs in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContext {
    /// Root directory the task works against.
    pub workspace_root: Option<PathBuf>,
    /// Extra environment variables.
    pub env_vars: HashMap<String, String>,
    /// Directories the operation may touch.
    pub allowed_dirs: Vec<PathBuf>,
    /// Token allowance for LLM-backed operations.
    pub token_budget: Option<u64>,
}

/// Outcome of a finished task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Wall-clock timestamp (ms since epoch) when the result was recorded.
    pub completion_time_ms: u128,
    /// Operation output.
    pub output: Option<serde_json::Value>,
    /// Error text for failures.
    pub error: Option<String>,
    /// Numeric measurements, e.g. `attempts` and `duration_ms`.
    pub metrics: HashMap<String, f64>,
}

impl TaskResult {
    /// Successful result carrying `output`.
    #[must_use]
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            completion_time_ms: now_ms(),
            output: Some(output),
            error: None,
            metrics: HashMap::new(),
        }
    }

    /// Failed result carrying `error`.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            completion_time_ms: now_ms(),
            output: None,
            error: Some(error.into()),
            metrics: HashMap::new(),
        }
    }

    /// Attach a metric.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// What an operation sees while it runs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Task (or subtask) being executed.
    pub task_id: TaskId,
    /// 1-based attempt number of the top-level task.
    pub attempt: u32,
    /// The task's environment.
    pub context: TaskContext,
    cancelled: Arc<AtomicBool>,
}

impl ExecutionContext {
    /// Build a context sharing `cancelled` with the coordinator.
    #[must_use]
    pub fn new(
        task_id: impl Into<TaskId>,
        attempt: u32,
        context: TaskContext,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            attempt,
            context,
            cancelled,
        }
    }

    /// Whether the task was cancelled. Operations should check this at safe
    /// points; nothing interrupts them otherwise.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Context for a child task sharing this one's cancellation flag.
    #[must_use]
    pub fn for_subtask(&self, subtask: &Task) -> Self {
        Self {
            task_id: subtask.id.clone(),
            attempt: self.attempt,
            context: subtask.context.clone(),
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

/// A unit of coordinator work.
#[derive(Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id.
    pub id: TaskId,
    /// Kind of work.
    pub category: TaskCategory,
    /// Human-readable summary.
    pub description: String,
    /// Urgency, also used when the work runs on a `TaskProcessor`.
    pub priority: Priority,
    /// Current state.
    pub status: TaskStatus,
    /// Creation timestamp (ms since epoch).
    pub created_at_ms: u128,
    /// Start of the latest attempt.
    pub started_at_ms: Option<u128>,
    /// When the task reached a terminal state.
    pub completed_at_ms: Option<u128>,
    /// Execution environment.
    pub context: TaskContext,
    /// Children run in order before this task's own operation.
    pub subtasks: Vec<Task>,
    /// Owning task, for subtasks.
    pub parent_id: Option<TaskId>,
    /// Tasks that must complete first.
    pub dependencies: Vec<TaskId>,
    /// Final outcome.
    pub result: Option<TaskResult>,
    /// Retries consumed so far.
    pub retries: u32,
    /// Retry budget; the coordinator default applies when unset.
    pub max_retries: Option<u32>,
    /// Work to run. Tasks without one succeed once their subtasks do.
    #[serde(skip)]
    pub operation: Option<Arc<dyn TaskOperation>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("description", &self.description)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("dependencies", &self.dependencies)
            .field("subtasks", &self.subtasks.len())
            .field("retries", &self.retries)
            .field("max_retries", &self.max_retries)
            .field("has_operation", &self.operation.is_some())
            .finish_non_exhaustive()
    }
}

impl Task {
    /// New pending task with a generated id.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: generate_task_id(),
            category: TaskCategory::default(),
            description: description.into(),
            priority: Priority::default(),
            status: TaskStatus::Pending,
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            context: TaskContext::default(),
            subtasks: Vec::new(),
            parent_id: None,
            dependencies: Vec::new(),
            result: None,
            retries: 0,
            max_retries: None,
            operation: None,
        }
    }

    /// Replace the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        for child in &mut self.subtasks {
            child.parent_id = Some(self.id.clone());
        }
        self
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: TaskCategory) -> Self {
        self.category = category;
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the execution environment.
    #[must_use]
    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    /// Add a dependency.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Append a subtask, taking ownership of it as a child.
    #[must_use]
    pub fn with_subtask(mut self, mut subtask: Self) -> Self {
        subtask.parent_id = Some(self.id.clone());
        self.subtasks.push(subtask);
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set the operation.
    #[must_use]
    pub fn with_operation(mut self, operation: impl TaskOperation + 'static) -> Self {
        self.operation = Some(Arc::new(operation));
        self
    }

    /// Set a shared operation.
    #[must_use]
    pub fn with_shared_operation(mut self, operation: Arc<dyn TaskOperation>) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Find a descendant by id, searching depth first in execution order.
    #[must_use]
    pub fn find_subtask(&self, id: &str) -> Option<&Self> {
        self.subtasks
            .iter()
            .find_map(|child| if child.id == id { Some(child) } else { child.find_subtask(id) })
    }

    /// Mutable [`find_subtask`](Self::find_subtask).
    pub fn find_subtask_mut(&mut self, id: &str) -> Option<&mut Self> {
        for child in &mut self.subtasks {
            if child.id == id {
                return Some(child);
            }
            if let Some(found) = child.find_subtask_mut(id) {
                return Some(found);
            }
        }
        None
    }

    /// Ids of every descendant, in execution order.
    #[must_use]
    pub fn subtask_ids(&self) -> Vec<TaskId> {
        let mut ids = Vec::new();
        self.visit_subtasks(&mut |child| ids.push(child.id.clone()));
        ids
    }

    /// Call `f` on every descendant, depth first.
    pub fn visit_subtasks(&self, f: &mut impl FnMut(&Self)) {
        for child in &self.subtasks {
            f(child);
            child.visit_subtasks(f);
        }
    }

    /// Call `f` on every descendant, depth first, with mutable access.
    pub fn visit_subtasks_mut(&mut self, f: &mut impl FnMut(&mut Self)) {
        for child in &mut self.subtasks {
            f(child);
            child.visit_subtasks_mut(f);
        }
    }
}
