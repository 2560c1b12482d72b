//! Registry of named resource pools with a background idle-cleanup thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ResourcePoolConfig;
use crate::core::resource_pool::{
    ManagedPool, ResourceCleanup, ResourceFactory, ResourcePool, ResourcePoolStats,
};
use crate::core::CoreError;
use crate::metrics::MetricsCollector;

/// Shared stop signal for the cleanup thread.
struct CleanupSignal {
    stop: Mutex<bool>,
    wake: Condvar,
}

/// Creates, tracks, and periodically reclaims named pools.
///
/// Constructed explicitly and handed to whoever needs pools; there is no
/// process-wide registry.
pub struct ResourceManager {
    pools: Arc<RwLock<HashMap<String, Arc<dyn ManagedPool>>>>,
    cleanup_thread: Mutex<Option<(Arc<CleanupSignal>, JoinHandle<()>)>>,
    metrics: Option<MetricsCollector>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
            cleanup_thread: Mutex::new(None),
            metrics: None,
        }
    }

    /// Attach a metrics collector to every pool created from now on.
    #[must_use]
    pub fn with_metrics(mut self, collector: MetricsCollector) -> Self {
        self.metrics = Some(collector);
        self
    }

    /// Create and register a pool.
    ///
    /// # Errors
    ///
    /// `CoreError::PoolExists` if the name is taken, plus any error from
    /// [`ResourcePool::new`].
    pub fn create_pool<T: Send + 'static>(
        &self,
        name: &str,
        config: ResourcePoolConfig,
        factory: ResourceFactory<T>,
        cleanup: Option<ResourceCleanup<T>>,
    ) -> Result<Arc<ResourcePool<T>>, CoreError> {
        if self.pools.read().contains_key(name) {
            return Err(CoreError::PoolExists(name.to_string()));
        }
        // Pre-warming runs the factory, so build outside the registry lock.
        let mut pool = ResourcePool::new(name, config, factory, cleanup)?;
        if let Some(collector) = &self.metrics {
            pool = pool.with_metrics(collector);
        }
        let pool = Arc::new(pool);

        let mut pools = self.pools.write();
        if pools.contains_key(name) {
            drop(pools);
            pool.drain();
            return Err(CoreError::PoolExists(name.to_string()));
        }
        pools.insert(name.to_string(), Arc::clone(&pool) as Arc<dyn ManagedPool>);
        Ok(pool)
    }

    /// Look up a pool by name and resource type.
    ///
    /// # Errors
    ///
    /// `CoreError::PoolNotFound` for an unknown name,
    /// `CoreError::PoolTypeMismatch` if the pool holds a different type.
    pub fn get_pool<T: Send + 'static>(&self, name: &str) -> Result<Arc<ResourcePool<T>>, CoreError> {
        let pool = self
            .pools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::PoolNotFound(name.to_string()))?;
        pool.as_any()
            .downcast::<ResourcePool<T>>()
            .map_err(|_| CoreError::PoolTypeMismatch(name.to_string()))
    }

    /// Unregister a pool and destroy its idle resources.
    ///
    /// Returns `false` if no pool had that name.
    pub fn remove_pool(&self, name: &str) -> bool {
        let removed = self.pools.write().remove(name);
        removed.is_some_and(|pool| {
            let drained = pool.drain();
            info!(pool = name, drained, "resource pool removed");
            true
        })
    }

    /// Sorted names of registered pools.
    #[must_use]
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run idle reclamation on every pool; returns the total removed.
    pub fn cleanup_all_pools(&self) -> usize {
        cleanup_pools(&self.pools)
    }

    /// Statistics for every pool keyed by name.
    #[must_use]
    pub fn stats(&self) -> HashMap<String, ResourcePoolStats> {
        let pools: Vec<Arc<dyn ManagedPool>> = self.pools.read().values().cloned().collect();
        pools
            .into_iter()
            .map(|p| (p.pool_name().to_string(), p.stats()))
            .collect()
    }

    /// Start the background cleanup thread. No-op if it is already running.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for a zero interval or if the
    /// thread cannot be spawned.
    pub fn start_cleanup_thread(&self, interval: Duration) -> Result<(), CoreError> {
        if interval.is_zero() {
            return Err(CoreError::InvalidConfig(
                "cleanup interval must be greater than 0".into(),
            ));
        }
        let mut slot = self.cleanup_thread.lock();
        if slot.is_some() {
            return Ok(());
        }
        let signal = Arc::new(CleanupSignal {
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });
        let pools = Arc::clone(&self.pools);
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("pool-cleanup".into())
            .spawn(move || cleanup_loop(&pools, &thread_signal, interval))
            .map_err(|e| CoreError::InvalidConfig(format!("failed to spawn cleanup thread: {e}")))?;
        *slot = Some((signal, handle));
        info!(interval_ms = interval.as_millis(), "pool cleanup thread started");
        Ok(())
    }

    /// Stop the cleanup thread and wait for it. No-op if not running.
    pub fn stop_cleanup_thread(&self) {
        let Some((signal, handle)) = self.cleanup_thread.lock().take() else {
            return;
        };
        *signal.stop.lock() = true;
        signal.wake.notify_all();
        if handle.join().is_err() {
            warn!("pool cleanup thread panicked");
        }
        info!("pool cleanup thread stopped");
    }

    /// Whether the cleanup thread is running.
    #[must_use]
    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup_thread.lock().is_some()
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.stop_cleanup_thread();
    }
}

fn cleanup_pools(pools: &RwLock<HashMap<String, Arc<dyn ManagedPool>>>) -> usize {
    // Snapshot so no pool's cleanup hook runs under the registry lock.
    let snapshot: Vec<Arc<dyn ManagedPool>> = pools.read().values().cloned().collect();
    snapshot.iter().map(|p| p.cleanup_idle()).sum()
}

fn cleanup_loop(
    pools: &RwLock<HashMap<String, Arc<dyn ManagedPool>>>,
    signal: &CleanupSignal,
    interval: Duration,
) {
    loop {
        {
            let mut stop = signal.stop.lock();
            if !*stop {
                let _ = signal.wake.wait_for(&mut stop, interval);
            }
            if *stop {
                break;
            }
        }
        let removed = cleanup_pools(pools);
        if removed > 0 {
            debug!(removed, "periodic pool cleanup");
        }
    }
}
