//! Tests for builder modules

use std::sync::Arc;

use prometheus_task_core::builders::{build_pools, CoreRuntime};
use prometheus_task_core::config::{CoreConfig, ProcessorConfig, ResourcePoolConfig};
use prometheus_task_core::core::{AppResult, CoreError, ResourceCleanup, ResourceFactory};

fn runtime_config() -> CoreConfig {
    CoreConfig {
        processor: ProcessorConfig::new()
            .with_worker_count(2)
            .with_poll_interval_ms(10),
        cleanup_interval_secs: 0,
        ..CoreConfig::default()
    }
}

#[test]
fn test_build_pools_registers_on_manager() {
    let mut cfg = runtime_config();
    cfg.pools.insert("sessions".into(), ResourcePoolConfig::new(2, 4));
    let runtime = CoreRuntime::from_config(cfg.clone()).unwrap();

    let pools = build_pools(&cfg, runtime.resources(), |name, _| {
        let name = name.to_string();
        let factory: ResourceFactory<String> =
            Box::new(move || -> AppResult<String> { Ok(format!("{name}-conn")) });
        let cleanup: ResourceCleanup<String> = Box::new(|_: String| -> AppResult<()> { Ok(()) });
        Ok((factory, Some(cleanup)))
    })
    .unwrap();

    let pool = runtime.resources().get_pool::<String>("sessions").unwrap();
    assert!(Arc::ptr_eq(&pool, &pools["sessions"]));
    assert_eq!(pool.available_count(), 2);
    assert_eq!(pool.acquire().unwrap().as_str(), "sessions-conn");
    assert!(!runtime.resources().is_cleanup_running());
}

#[test]
fn test_build_pools_propagates_hook_errors() {
    let mut cfg = runtime_config();
    cfg.pools.insert("x".into(), ResourcePoolConfig::new(0, 1));
    let runtime = CoreRuntime::from_config(runtime_config()).unwrap();
    let result = build_pools::<u32, _>(&cfg, runtime.resources(), |name, _| {
        Err(CoreError::Factory(format!("no driver for {name}")))
    });
    assert!(matches!(result, Err(CoreError::Factory(_))));
}

#[test]
fn test_runtime_processor_and_cache() {
    let runtime = CoreRuntime::from_config(runtime_config()).unwrap();
    runtime.start();
    runtime.cache().put("answer", serde_json::json!(42));
    assert_eq!(runtime.cache().get("answer"), Some(serde_json::json!(42)));

    let (tx, rx) = crossbeam_channel::bounded(1);
    runtime
        .processor()
        .submit(
            Box::new(move || -> anyhow::Result<()> {
                tx.send(7).map_err(anyhow::Error::from)
            }),
            prometheus_task_core::core::Priority::Normal,
            None,
        )
        .unwrap();
    assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 7);
    runtime.shutdown();
}
