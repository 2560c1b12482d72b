//! Tests for error types

use prometheus_task_core::core::CoreError;

#[test]
fn test_queue_closed_error() {
    let err = CoreError::QueueClosed;
    assert_eq!(format!("{}", err), "queue closed");
}

#[test]
fn test_processor_stopped_error() {
    let err = CoreError::ProcessorStopped;
    assert_eq!(format!("{}", err), "task processor stopped");
}

#[test]
fn test_pool_errors() {
    assert_eq!(
        CoreError::PoolNotFound("db".to_string()).to_string(),
        "pool not found: db"
    );
    assert_eq!(
        CoreError::PoolExists("db".to_string()).to_string(),
        "pool already exists: db"
    );
    assert_eq!(
        CoreError::PoolTypeMismatch("db".to_string()).to_string(),
        "pool type mismatch: db"
    );
    assert_eq!(
        CoreError::Factory("refused".to_string()).to_string(),
        "factory error: refused"
    );
}

#[test]
fn test_task_errors() {
    assert_eq!(
        CoreError::TaskNotFound("t1".to_string()).to_string(),
        "task not found: t1"
    );
    assert_eq!(
        CoreError::DuplicateTask("t1".to_string()).to_string(),
        "duplicate task: t1"
    );
    assert_eq!(
        CoreError::Operation("boom".to_string()).to_string(),
        "operation failed: boom"
    );
}

#[test]
fn test_invalid_config_error() {
    let err = CoreError::InvalidConfig("workers must be > 0".to_string());
    assert_eq!(format!("{}", err), "invalid configuration: workers must be > 0");
}

#[test]
fn test_converts_into_anyhow() {
    let err: anyhow::Error = CoreError::QueueClosed.into();
    assert!(matches!(err.downcast_ref::<CoreError>(), Some(CoreError::QueueClosed)));
}
