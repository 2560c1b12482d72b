//! Tests for utility functions

use prometheus_task_core::core::Priority;
use prometheus_task_core::util::{generate_task_id, init_tracing, now_ms};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical < Priority::High);
    assert!(Priority::High < Priority::Normal);
    assert!(Priority::Normal < Priority::Low);
    assert!(Priority::Low < Priority::Background);
    assert_eq!(i32::from(Priority::Critical), 0);
    assert_eq!(i32::from(Priority::Background), 4);
}

#[test]
fn test_priority_default() {
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_priority_serde() {
    let json = serde_json::to_string(&Priority::Background).unwrap();
    assert_eq!(json, "\"background\"");
    let back: Priority = serde_json::from_str("\"critical\"").unwrap();
    assert_eq!(back, Priority::Critical);
}

#[test]
fn test_task_ids_unique() {
    let a = generate_task_id();
    let b = generate_task_id();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn test_clock() {
    assert!(now_ms() > 1_600_000_000_000);
}

#[test]
fn test_init_tracing_is_repeatable() {
    let _ = init_tracing();
    assert!(!init_tracing());
}
