//! Async, dependency-aware task coordination on tokio.

pub mod bridge;
pub mod operation;
pub mod scheduler;
pub mod types;

pub use bridge::ProcessorOperation;
pub use operation::TaskOperation;
pub use scheduler::{CoordinatorStats, TaskCoordinator, COORDINATOR_METRICS};
pub use types::{
    ExecutionContext, Task, TaskCategory, TaskContext, TaskId, TaskResult, TaskStatus,
};
