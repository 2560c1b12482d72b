//! Explicitly constructed runtime context.
//!
//! Everything an application needs from this crate is owned by one
//! [`CoreRuntime`] value that is built once and passed around. There are no
//! process-wide registries.

use std::sync::Arc;

use tracing::info;

use crate::cache::LruCache;
use crate::config::CoreConfig;
use crate::core::{CoreError, ResourceManager, TaskProcessor};
use crate::metrics::MetricsCollector;

#[cfg(feature = "tokio-runtime")]
use crate::coordinator::{ExecutionContext, ProcessorOperation, TaskCoordinator};
#[cfg(feature = "tokio-runtime")]
use crate::core::{AppResult, Priority};

/// Shared metrics, pools, processor, coordinator, and cache.
pub struct CoreRuntime {
    config: CoreConfig,
    metrics: MetricsCollector,
    resources: Arc<ResourceManager>,
    processor: Arc<TaskProcessor>,
    #[cfg(feature = "tokio-runtime")]
    coordinator: TaskCoordinator,
    cache: Arc<LruCache<serde_json::Value>>,
}

impl CoreRuntime {
    /// Build every component from `config`.
    ///
    /// The resource manager's cleanup thread is started when an interval is
    /// configured; the processor is left stopped until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if any section is invalid.
    pub fn from_config(config: CoreConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;

        let metrics = MetricsCollector::new();
        let resources = Arc::new(ResourceManager::new().with_metrics(metrics.clone()));
        if let Some(interval) = config.cleanup_interval() {
            resources.start_cleanup_thread(interval)?;
        }
        let processor =
            Arc::new(TaskProcessor::new(config.processor.clone())?.with_metrics(&metrics));
        #[cfg(feature = "tokio-runtime")]
        let coordinator =
            TaskCoordinator::new(config.coordinator.clone())?.with_metrics(&metrics);
        let cache = Arc::new(LruCache::from_config(&config.cache)?);

        info!(
            workers = config.processor.worker_count,
            cache_capacity = config.cache.capacity,
            cleanup_interval_secs = config.cleanup_interval_secs,
            "core runtime built"
        );
        Ok(Self {
            config,
            metrics,
            resources,
            processor,
            #[cfg(feature = "tokio-runtime")]
            coordinator,
            cache,
        })
    }

    /// Build from `.env` and `TASK_CORE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for unparseable or invalid values.
    pub fn from_env() -> Result<Self, CoreError> {
        let config = CoreConfig::from_env().map_err(CoreError::InvalidConfig)?;
        Self::from_config(config)
    }

    /// Configuration this runtime was built from.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Shared metrics collector.
    #[must_use]
    pub const fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Named resource pools.
    #[must_use]
    pub const fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Worker-thread processor.
    #[must_use]
    pub const fn processor(&self) -> &Arc<TaskProcessor> {
        &self.processor
    }

    /// Dependency coordinator.
    #[cfg(feature = "tokio-runtime")]
    #[must_use]
    pub const fn coordinator(&self) -> &TaskCoordinator {
        &self.coordinator
    }

    /// Shared JSON cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<LruCache<serde_json::Value>> {
        &self.cache
    }

    /// Start the worker threads.
    pub fn start(&self) {
        self.processor.start();
    }

    /// Wrap blocking `work` so a coordinator task runs it on this runtime's
    /// processor.
    #[cfg(feature = "tokio-runtime")]
    pub fn processor_operation<F>(&self, priority: Priority, work: F) -> ProcessorOperation
    where
        F: Fn(&ExecutionContext) -> AppResult<serde_json::Value> + Send + Sync + 'static,
    {
        ProcessorOperation::new(Arc::clone(&self.processor), priority, work)
    }

    /// Stop the coordinator loop, the worker threads, and the cleanup
    /// thread. Safe to call more than once.
    pub fn shutdown(&self) {
        #[cfg(feature = "tokio-runtime")]
        self.coordinator.shutdown();
        self.processor.stop(None);
        self.resources.stop_cleanup_thread();
        info!("core runtime shut down");
    }
}
