//! Tests for namespaced metrics

use std::time::Duration;

use prometheus_task_core::metrics::MetricsCollector;

#[test]
fn test_namespaces_are_independent() {
    let collector = MetricsCollector::new();
    collector.increment("cache", "hits", 2);
    collector.increment("pool", "hits", 5);
    assert_eq!(collector.metrics("cache").counter("hits"), 2);
    assert_eq!(collector.metrics("pool").counter("hits"), 5);
    assert_eq!(collector.namespaces(), vec!["cache", "pool"]);
}

#[test]
fn test_timer_summary() {
    let collector = MetricsCollector::new();
    collector.record_time("io", "read", Duration::from_millis(10));
    collector.record_time("io", "read", Duration::from_millis(30));
    let summary = collector.metrics("io").timer("read").unwrap();
    assert_eq!(summary.count, 2);
    assert!((summary.min_secs - 0.010).abs() < 1e-9);
    assert!((summary.max_secs - 0.030).abs() < 1e-9);
    assert!((summary.avg_secs - 0.020).abs() < 1e-9);
}

#[test]
fn test_gauge_last_write_wins() {
    let collector = MetricsCollector::new();
    collector.set_gauge("pool", "available", 3.0);
    collector.set_gauge("pool", "available", 1.0);
    assert_eq!(collector.metrics("pool").gauge("available"), Some(1.0));
}

#[test]
fn test_timer_guard_records_on_panic() {
    let collector = MetricsCollector::new();
    let metrics = collector.metrics("work");
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _guard = metrics.time("step");
        panic!("step failed");
    }));
    assert!(result.is_err());
    assert_eq!(metrics.timer("step").unwrap().count, 1);
}

#[test]
fn test_get_all_metrics_and_json() {
    let collector = MetricsCollector::new();
    collector.increment("task_processor", "tasks_completed", 1);
    let all = collector.get_all_metrics();
    assert_eq!(all["task_processor"].counters["tasks_completed"], 1);

    let json: serde_json::Value = serde_json::from_str(&collector.to_json().unwrap()).unwrap();
    assert_eq!(json["task_processor"]["counters"]["tasks_completed"], 1);

    collector.reset();
    assert_eq!(collector.metrics("task_processor").counter("tasks_completed"), 0);
}
