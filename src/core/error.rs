//! Error types for scheduler, pool, and coordinator operations.

use thiserror::Error;

/// Errors produced by core components.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The priority queue no longer accepts work.
    #[error("queue closed")]
    QueueClosed,
    /// The task processor is not running.
    #[error("task processor stopped")]
    ProcessorStopped,
    /// No pool registered under the given name.
    #[error("pool not found: {0}")]
    PoolNotFound(String),
    /// A pool with the given name already exists.
    #[error("pool already exists: {0}")]
    PoolExists(String),
    /// The pool exists but manages a different resource type.
    #[error("pool type mismatch: {0}")]
    PoolTypeMismatch(String),
    /// A resource factory failed to produce a resource.
    #[error("factory error: {0}")]
    Factory(String),
    /// No task registered under the given id.
    #[error("task not found: {0}")]
    TaskNotFound(String),
    /// A task with the given id is already registered.
    #[error("duplicate task: {0}")]
    DuplicateTask(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A task operation failed.
    #[error("operation failed: {0}")]
    Operation(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
