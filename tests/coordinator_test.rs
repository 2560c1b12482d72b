//! Integration tests for the dependency coordinator
//!
//! These tests cover:
//! - Dependencies never starting before they complete
//! - Retry accounting (`max_retries = r` gives `r + 1` attempts)
//! - Failure propagation to dependents
//! - Subtask ordering, per-subtask status tracking and in-place retries
//! - Cooperative cancellation

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus_task_core::config::CoordinatorConfig;
use prometheus_task_core::coordinator::{
    ExecutionContext, Task, TaskCoordinator, TaskOperation, TaskStatus,
};
use prometheus_task_core::core::CoreError;
use prometheus_task_core::metrics::MetricsCollector;
use rand::Rng;
use serde_json::{json, Value};

// ============================================================================
// HELPERS
// ============================================================================

fn coordinator() -> TaskCoordinator {
    TaskCoordinator::new(
        CoordinatorConfig::new()
            .with_poll_interval_ms(5)
            .with_dependency_delay_ms(0)
            .with_retry_backoff_ms(10),
    )
    .unwrap()
}

fn record(log: &Arc<Mutex<Vec<String>>>, name: &str) -> impl TaskOperation + 'static {
    let log = Arc::clone(log);
    let name = name.to_string();
    move |_ctx: ExecutionContext| {
        let log = Arc::clone(&log);
        let name = name.clone();
        async move {
            log.lock().push(name.clone());
            Ok::<_, anyhow::Error>(json!(name))
        }
    }
}

const WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// DEPENDENCIES
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dependencies_complete_before_dependent_starts() {
    for _ in 0..5 {
        let coord = coordinator();
        let (delay_a, delay_b) = {
            let mut rng = rand::rng();
            (rng.random_range(0..30_u64), rng.random_range(0..30_u64))
        };

        let sleeper = |ms: u64| {
            move |_ctx: ExecutionContext| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, anyhow::Error>(Value::Null)
            }
        };

        let observed = Arc::new(Mutex::new(None));
        let probe = {
            let coord = coord.clone();
            let observed = Arc::clone(&observed);
            move |_ctx: ExecutionContext| {
                let coord = coord.clone();
                let observed = Arc::clone(&observed);
                async move {
                    *observed.lock() = Some((coord.get_task_status("a"), coord.get_task_status("b")));
                    Ok::<_, anyhow::Error>(Value::Null)
                }
            }
        };

        coord
            .add_task(Task::new("c").with_id("c").depends_on("a").depends_on("b").with_operation(probe))
            .unwrap();
        coord.add_task(Task::new("a").with_id("a").with_operation(sleeper(delay_a))).unwrap();
        coord.add_task(Task::new("b").with_id("b").with_operation(sleeper(delay_b))).unwrap();

        let handle = coord.spawn();
        assert_eq!(coord.wait_for_task("c", WAIT).await.unwrap(), TaskStatus::Completed);
        coord.shutdown();
        handle.await.unwrap();

        assert_eq!(
            *observed.lock(),
            Some((Some(TaskStatus::Completed), Some(TaskStatus::Completed)))
        );
    }
}

#[tokio::test]
async fn test_chain_runs_in_order() {
    let coord = coordinator();
    let log = Arc::new(Mutex::new(Vec::new()));
    coord.add_task(Task::new("1").with_id("one").with_operation(record(&log, "one"))).unwrap();
    coord
        .add_task(Task::new("2").with_id("two").depends_on("one").with_operation(record(&log, "two")))
        .unwrap();
    coord
        .add_task(Task::new("3").with_id("three").depends_on("two").with_operation(record(&log, "three")))
        .unwrap();

    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("three", WAIT).await.unwrap(), TaskStatus::Completed);
    coord.shutdown();
    handle.await.unwrap();

    assert_eq!(*log.lock(), vec!["one", "two", "three"]);
    assert_eq!(coord.stats().completed, 3);
}

#[tokio::test]
async fn test_failed_dependency_propagates() {
    let coord = coordinator();
    let failing = |_ctx: ExecutionContext| async {
        Err::<Value, _>(anyhow::anyhow!("upstream broke"))
    };
    coord
        .add_task(Task::new("root").with_id("root").with_max_retries(0).with_operation(failing))
        .unwrap();
    coord.add_task(Task::new("mid").with_id("mid").depends_on("root")).unwrap();
    coord.add_task(Task::new("leaf").with_id("leaf").depends_on("mid")).unwrap();

    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("leaf", WAIT).await.unwrap(), TaskStatus::Failed);
    coord.shutdown();
    handle.await.unwrap();

    assert_eq!(coord.get_task_status("root"), Some(TaskStatus::Failed));
    assert_eq!(
        coord.get_task_result("mid").unwrap().error.as_deref(),
        Some("dependency root did not complete (failed)")
    );
    assert_eq!(
        coord.get_task_result("leaf").unwrap().error.as_deref(),
        Some("dependency mid did not complete (failed)")
    );
    assert_eq!(coord.get_task("mid").unwrap().retries, 0);
}

#[tokio::test]
async fn test_cancelled_dependency_propagates() {
    let coord = coordinator();
    coord.add_task(Task::new("gate").with_id("gate").depends_on("external")).unwrap();
    coord.add_task(Task::new("after").with_id("after").depends_on("gate")).unwrap();
    assert!(coord.cancel_task("gate"));
    assert_eq!(coord.process_ready_tasks(), 0);
    assert_eq!(coord.get_task_status("after"), Some(TaskStatus::Failed));
}

#[tokio::test]
async fn test_unregistered_dependency_waits() {
    let coord = coordinator();
    let log = Arc::new(Mutex::new(Vec::new()));
    coord
        .add_task(Task::new("late").with_id("late").depends_on("later").with_operation(record(&log, "late")))
        .unwrap();
    assert_eq!(coord.process_ready_tasks(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(coord.process_ready_tasks(), 0);
    assert_eq!(coord.get_task_status("late"), Some(TaskStatus::Scheduled));

    coord.add_task(Task::new("later").with_id("later").with_operation(record(&log, "later"))).unwrap();
    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("late", WAIT).await.unwrap(), TaskStatus::Completed);
    coord.shutdown();
    handle.await.unwrap();
    assert_eq!(*log.lock(), vec!["later", "late"]);
}

// ============================================================================
// RETRIES
// ============================================================================

#[tokio::test]
async fn test_always_failing_task_makes_r_plus_one_attempts() {
    for r in [0_u32, 1, 3] {
        let coord = coordinator();
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let op = move |ctx: ExecutionContext| {
            let seen = Arc::clone(&seen);
            async move {
                let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                assert_eq!(ctx.attempt, n);
                Err::<Value, _>(anyhow::anyhow!("attempt {n} failed"))
            }
        };
        coord.add_task(Task::new("f").with_id("f").with_max_retries(r).with_operation(op)).unwrap();

        let handle = coord.spawn();
        assert_eq!(coord.wait_for_task("f", WAIT).await.unwrap(), TaskStatus::Failed);
        coord.shutdown();
        handle.await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), r + 1);
        let task = coord.get_task("f").unwrap();
        assert_eq!(task.retries, r);
        let result = task.result.unwrap();
        assert!(!result.success);
        assert_eq!(result.error, Some(format!("attempt {} failed", r + 1)));
        assert_eq!(coord.stats().total_attempts, u64::from(r + 1));
    }
}

#[tokio::test]
async fn test_flaky_task_recovers() {
    let collector = MetricsCollector::new();
    let coord = coordinator().with_metrics(&collector);
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&attempts);
    let op = move |_ctx: ExecutionContext| {
        let seen = Arc::clone(&seen);
        async move {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("not yet");
            }
            Ok(json!({ "ok": true }))
        }
    };
    coord.add_task(Task::new("flaky").with_id("flaky").with_max_retries(3).with_operation(op)).unwrap();

    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("flaky", WAIT).await.unwrap(), TaskStatus::Completed);
    coord.shutdown();
    handle.await.unwrap();

    let result = coord.get_task_result("flaky").unwrap();
    assert!(result.success);
    assert_eq!(result.output, Some(json!({ "ok": true })));
    assert_eq!(result.metrics["attempts"], 3.0);
    let m = collector.metrics("task_coordinator");
    assert_eq!(m.counter("tasks_retried"), 2);
    assert_eq!(m.counter("tasks_completed"), 1);
}

#[tokio::test]
async fn test_panicking_operation_counts_as_failure() {
    let coord = coordinator();
    let op = |_ctx: ExecutionContext| async {
        if true {
            panic!("operation exploded");
        }
        Ok::<_, anyhow::Error>(Value::Null)
    };
    coord.add_task(Task::new("p").with_id("p").with_max_retries(0).with_operation(op)).unwrap();
    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("p", WAIT).await.unwrap(), TaskStatus::Failed);
    coord.shutdown();
    handle.await.unwrap();
    assert_eq!(
        coord.get_task_result("p").unwrap().error.as_deref(),
        Some("task operation panicked")
    );
}

// ============================================================================
// SUBTASKS AND CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_subtasks_run_before_parent() {
    let coord = coordinator();
    let log = Arc::new(Mutex::new(Vec::new()));
    let parent = Task::new("parent")
        .with_id("parent")
        .with_subtask(Task::new("c1").with_id("c1").with_operation(record(&log, "c1")))
        .with_subtask(
            Task::new("c2")
                .with_id("c2")
                .with_subtask(Task::new("g").with_id("g").with_operation(record(&log, "g")))
                .with_operation(record(&log, "c2")),
        )
        .with_operation(record(&log, "parent"));
    coord.add_task(parent).unwrap();

    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("parent", WAIT).await.unwrap(), TaskStatus::Completed);
    coord.shutdown();
    handle.await.unwrap();
    assert_eq!(*log.lock(), vec!["c1", "g", "c2", "parent"]);
}

#[tokio::test]
async fn test_subtask_failure_fails_parent_attempt() {
    let coord = coordinator();
    let failing = |_ctx: ExecutionContext| async { Err::<Value, _>(anyhow::anyhow!("child broke")) };
    let parent = Task::new("parent")
        .with_id("parent")
        .with_max_retries(0)
        .with_subtask(Task::new("child").with_id("child").with_operation(failing));
    coord.add_task(parent).unwrap();

    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("parent", WAIT).await.unwrap(), TaskStatus::Failed);
    coord.shutdown();
    handle.await.unwrap();
    assert_eq!(
        coord.get_task_result("parent").unwrap().error.as_deref(),
        Some("subtask child failed: child broke")
    );
}

#[tokio::test]
async fn test_subtask_snapshots_record_each_run() {
    let coord = coordinator();
    let log = Arc::new(Mutex::new(Vec::new()));
    let parent = Task::new("parent")
        .with_id("parent")
        .with_subtask(Task::new("c1").with_id("c1").with_operation(record(&log, "c1")))
        .with_subtask(
            Task::new("c2")
                .with_id("c2")
                .with_subtask(Task::new("g").with_id("g").with_operation(record(&log, "g"))),
        )
        .with_operation(record(&log, "parent"));
    coord.add_task(parent).unwrap();

    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("parent", WAIT).await.unwrap(), TaskStatus::Completed);
    coord.shutdown();
    handle.await.unwrap();

    for id in ["c1", "c2", "g"] {
        let sub = coord.get_task(id).unwrap();
        assert_eq!(sub.status, TaskStatus::Completed, "{id}");
        assert!(sub.started_at_ms.is_some(), "{id}");
        assert!(sub.completed_at_ms >= sub.started_at_ms, "{id}");
        assert!(sub.result.as_ref().is_some_and(|r| r.success), "{id}");
    }
    assert_eq!(coord.get_task_result("c1").unwrap().output, Some(json!("c1")));
    // a subtask without its own operation reports its children's outputs
    assert_eq!(coord.get_task_result("c2").unwrap().output, Some(json!(["g"])));
    assert_eq!(
        coord.wait_for_task("g", Duration::from_millis(10)).await.unwrap(),
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn test_subtask_retries_in_place() {
    let coord = coordinator();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let flaky = move |_ctx: ExecutionContext| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("first call fails");
            }
            Ok::<_, anyhow::Error>(json!("ok"))
        }
    };
    let parent = Task::new("parent")
        .with_id("parent")
        .with_max_retries(0)
        .with_subtask(Task::new("child").with_id("child").with_max_retries(1).with_operation(flaky));
    coord.add_task(parent).unwrap();

    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("parent", WAIT).await.unwrap(), TaskStatus::Completed);
    coord.shutdown();
    handle.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(coord.get_task("parent").unwrap().retries, 0);
    let child = coord.get_task("child").unwrap();
    assert_eq!(child.status, TaskStatus::Completed);
    assert_eq!(child.retries, 1);
    assert_eq!(child.result.unwrap().metrics.get("attempts"), Some(&2.0));
}

#[tokio::test]
async fn test_failed_subtask_cancels_the_rest() {
    let coord = coordinator();
    let log = Arc::new(Mutex::new(Vec::new()));
    let failing = |_ctx: ExecutionContext| async { Err::<Value, _>(anyhow::anyhow!("disk full")) };
    let parent = Task::new("parent")
        .with_id("parent")
        .with_max_retries(0)
        .with_subtask(Task::new("first").with_id("first").with_operation(failing))
        .with_subtask(Task::new("second").with_id("second").with_operation(record(&log, "second")));
    coord.add_task(parent).unwrap();

    let handle = coord.spawn();
    assert_eq!(coord.wait_for_task("parent", WAIT).await.unwrap(), TaskStatus::Failed);
    coord.shutdown();
    handle.await.unwrap();

    assert!(log.lock().is_empty());
    assert_eq!(coord.get_task_status("first"), Some(TaskStatus::Failed));
    assert_eq!(
        coord.get_task_result("first").unwrap().error.as_deref(),
        Some("disk full")
    );
    let second = coord.get_task("second").unwrap();
    assert_eq!(second.status, TaskStatus::Cancelled);
    assert!(second.started_at_ms.is_none());
}

#[tokio::test]
async fn test_cancelling_parent_cancels_waiting_subtasks() {
    let coord = coordinator();
    let parent = Task::new("parent")
        .with_id("parent")
        .depends_on("never")
        .with_subtask(Task::new("child").with_id("child"));
    coord.add_task(parent).unwrap();

    assert!(coord.cancel_task("parent"));
    assert_eq!(coord.get_task_status("child"), Some(TaskStatus::Cancelled));
}

#[tokio::test]
async fn test_cancel_in_progress_is_cooperative() {
    let coord = coordinator();
    let saw_cancel = Arc::new(AtomicU32::new(0));
    let flag = Arc::clone(&saw_cancel);
    let op = move |ctx: ExecutionContext| {
        let flag = Arc::clone(&flag);
        async move {
            while !ctx.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            flag.store(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(json!("finished anyway"))
        }
    };
    coord.add_task(Task::new("long").with_id("long").with_operation(op)).unwrap();
    let handle = coord.spawn();

    let started = async {
        while coord.get_task_status("long") != Some(TaskStatus::InProgress) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(WAIT, started).await.unwrap();

    assert!(coord.cancel_task("long"));
    assert_eq!(coord.get_task_status("long"), Some(TaskStatus::Cancelled));
    tokio::time::timeout(WAIT, async {
        while saw_cancel.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    coord.shutdown();
    handle.await.unwrap();
    assert_eq!(coord.get_task_status("long"), Some(TaskStatus::Cancelled));
    assert!(coord.get_task_result("long").is_none());
    assert!(!coord.cancel_task("long"));
}

#[tokio::test]
async fn test_listing_and_errors() {
    let coord = coordinator();
    coord.add_task(Task::new("x").with_id("x").depends_on("y")).unwrap();
    coord.add_task(Task::new("z").with_id("z").depends_on("y")).unwrap();
    assert!(matches!(
        coord.add_task(Task::new("dup").with_id("x")),
        Err(CoreError::DuplicateTask(_))
    ));
    assert!(matches!(
        coord.add_task(Task::new("y").with_id("y").depends_on("x")),
        Err(CoreError::InvalidConfig(_))
    ));

    let ids: Vec<String> = coord.list_tasks(None).into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["x", "z"]);
    coord.cancel_task("z");
    assert_eq!(coord.list_tasks(Some(TaskStatus::Cancelled)).len(), 1);
    assert_eq!(
        coord.wait_for_task("x", Duration::from_millis(20)).await.unwrap(),
        TaskStatus::Scheduled
    );
    assert!(coord.get_task_status("missing").is_none());
}
