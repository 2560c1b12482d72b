//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_task_core::config::{
    CacheConfig, CoordinatorConfig, CoreConfig, ProcessorConfig, ResourcePoolConfig,
};

#[test]
fn test_pool_config_validation() {
    let valid = ResourcePoolConfig::new(2, 5).with_idle_timeout(Duration::from_secs(60));
    assert!(valid.validate().is_ok());
    assert_eq!(valid.idle_timeout(), Duration::from_secs(60));
}

#[test]
fn test_pool_config_invalid_max_size() {
    let invalid = ResourcePoolConfig::new(0, 0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_min_above_max() {
    let invalid = ResourcePoolConfig::new(4, 3);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_timeout() {
    let invalid = ResourcePoolConfig {
        min_size: 0,
        max_size: 3,
        idle_timeout_ms: 0,
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_processor_config() {
    let cfg = ProcessorConfig::new()
        .with_worker_count(3)
        .with_poll_interval_ms(50)
        .with_stop_timeout(Duration::from_secs(2));
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.poll_interval(), Duration::from_millis(50));
    assert_eq!(cfg.stop_timeout(), Duration::from_secs(2));
    assert!(ProcessorConfig::new().with_worker_count(0).validate().is_err());
}

#[test]
fn test_coordinator_defaults() {
    let cfg = CoordinatorConfig::default();
    assert_eq!(cfg.retry_backoff(), Duration::from_secs(5));
    assert_eq!(cfg.dependency_delay(), Duration::from_secs(1));
    assert_eq!(cfg.default_max_retries, 3);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_cache_config() {
    assert_eq!(CacheConfig::default().capacity, 1000);
    let invalid = CacheConfig {
        capacity: 0,
        ..CacheConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_core_config_validation() {
    let mut pools = HashMap::new();
    pools.insert("db".to_string(), ResourcePoolConfig::new(1, 4));
    let mut cfg = CoreConfig {
        pools,
        ..CoreConfig::default()
    };
    assert!(cfg.validate().is_ok());

    cfg.pools.insert("broken".to_string(), ResourcePoolConfig::new(9, 1));
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("broken"));
}

#[test]
fn test_core_config_from_json() {
    let json = r#"{
        "processor": { "worker_count": 2 },
        "coordinator": { "retry_backoff_ms": 250 },
        "pools": { "http": { "min_size": 1, "max_size": 8 } },
        "cleanup_interval_secs": 0
    }"#;
    let cfg = CoreConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.processor.worker_count, 2);
    assert_eq!(cfg.processor.poll_interval_ms, 100);
    assert_eq!(cfg.coordinator.retry_backoff_ms, 250);
    assert_eq!(cfg.pools["http"].max_size, 8);
    assert_eq!(cfg.pools["http"].idle_timeout_ms, 300_000);
    assert!(cfg.cleanup_interval().is_none());
}

#[test]
fn test_core_config_from_json_rejects_invalid() {
    assert!(CoreConfig::from_json_str("{ not json").is_err());
    assert!(CoreConfig::from_json_str(r#"{ "cache": { "capacity": 0 } }"#).is_err());
}

#[test]
fn test_core_config_from_lookup() {
    let vars: HashMap<&str, &str> = [
        ("TASK_CORE_WORKERS", "6"),
        ("TASK_CORE_MAX_RETRIES", "1"),
        ("TASK_CORE_CLEANUP_INTERVAL_SECS", "30"),
    ]
    .into_iter()
    .collect();
    let cfg = CoreConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
    assert_eq!(cfg.processor.worker_count, 6);
    assert_eq!(cfg.coordinator.default_max_retries, 1);
    assert_eq!(cfg.cleanup_interval(), Some(Duration::from_secs(30)));
}

#[test]
fn test_core_config_from_lookup_bad_value() {
    let result = CoreConfig::from_lookup(|k| {
        (k == "TASK_CORE_CACHE_CAPACITY").then(|| "lots".to_string())
    });
    assert!(result.is_err());
}
