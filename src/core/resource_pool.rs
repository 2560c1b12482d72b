//! Lifecycle-managed resource pool with idle reclamation.
//!
//! A pool owns a factory producing resources and an optional cleanup hook run
//! when a resource is discarded. Capacity is soft: when the pool is already at
//! `max_size`, `acquire` still creates a resource and logs a warning.
//! Idle reclamation never shrinks the pool below `min_size`.
//!
//! Checked-out resources are RAII guards: dropping one returns it to the pool,
//! so an early `?` or a panic cannot leak an "active" slot.
//!
//! Factories and cleanup hooks are always called with the pool lock
//! released.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ResourcePoolConfig;
use crate::core::{AppResult, CoreError};
use crate::metrics::{MetricsCollector, PerformanceMetrics};

/// Produces new resources.
pub type ResourceFactory<T> = Box<dyn Fn() -> AppResult<T> + Send + Sync>;
/// Tears down a discarded resource.
pub type ResourceCleanup<T> = Box<dyn Fn(T) -> AppResult<()> + Send + Sync>;

/// A resource checked out of a pool.
///
/// Dropping the guard releases the resource back to its pool, exactly like
/// [`ResourcePool::release`]. Use [`ResourcePool::discard`] for a broken
/// resource, or [`into_inner`](Self::into_inner) to take it out of pool
/// management. If the pool itself is gone, the value is simply dropped.
pub struct PooledResource<T> {
    // `None` only after the value has been handed back or taken.
    value: Option<T>,
    acquired_at: Instant,
    pool: Weak<PoolInner<T>>,
}

impl<T> PooledResource<T> {
    /// Borrow the resource.
    #[must_use]
    pub fn value(&self) -> &T {
        self
    }

    /// When this resource was handed out.
    #[must_use]
    pub const fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Take the resource out of pool management entirely.
    ///
    /// The pool stops counting it as active and tops itself back up to
    /// `min_size`.
    pub fn into_inner(mut self) -> T {
        let value = self.take();
        if let Some(pool) = self.pool.upgrade() {
            pool.detach();
        }
        value
    }

    fn take(&mut self) -> T {
        match self.value.take() {
            Some(value) => value,
            None => unreachable!("pooled resource already consumed"),
        }
    }

    fn belongs_to(&self, pool: &Arc<PoolInner<T>>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }
}

impl<T> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("pooled resource already consumed"),
        }
    }
}

impl<T> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pooled resource already consumed"),
        }
    }
}

impl<T> Drop for PooledResource<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.check_in(value);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("value", &self.value)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

/// Statistics snapshot for one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePoolStats {
    /// Pool name.
    pub name: String,
    /// Idle resources ready to hand out.
    pub available: usize,
    /// Resources currently checked out.
    pub active: usize,
    /// Configured floor.
    pub min_size: usize,
    /// Configured soft ceiling.
    pub max_size: usize,
    /// Resources ever created.
    pub created: u64,
    /// Resources ever destroyed.
    pub destroyed: u64,
    /// Successful acquisitions.
    pub acquired: u64,
    /// Releases.
    pub released: u64,
}

struct IdleResource<T> {
    value: T,
    idle_since: Instant,
}

struct PoolState<T> {
    available: VecDeque<IdleResource<T>>,
    active: usize,
}

impl<T> PoolState<T> {
    fn total(&self) -> usize {
        self.available.len() + self.active
    }
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    destroyed: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Shared pool state; guards hold a weak reference to it.
struct PoolInner<T> {
    name: String,
    config: ResourcePoolConfig,
    factory: ResourceFactory<T>,
    cleanup: Option<ResourceCleanup<T>>,
    state: Mutex<PoolState<T>>,
    counters: PoolCounters,
    metrics: OnceLock<Arc<PerformanceMetrics>>,
}

/// Pool of reusable, lifecycle-managed resources.
pub struct ResourcePool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> ResourcePool<T> {
    /// Create a pool and pre-create `min_size` resources.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for an invalid configuration and
    /// `CoreError::Factory` if pre-creating the minimum set fails.
    pub fn new(
        name: impl Into<String>,
        config: ResourcePoolConfig,
        factory: ResourceFactory<T>,
        cleanup: Option<ResourceCleanup<T>>,
    ) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        let inner = Arc::new(PoolInner {
            name: name.into(),
            config,
            factory,
            cleanup,
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                active: 0,
            }),
            counters: PoolCounters::default(),
            metrics: OnceLock::new(),
        });
        inner.replenish()?;
        info!(
            pool = %inner.name,
            min_size = inner.config.min_size,
            max_size = inner.config.max_size,
            idle_timeout_ms = inner.config.idle_timeout_ms,
            "resource pool created"
        );
        Ok(Self { inner })
    }

    /// Report gauges and counters under `pool.<name>` in `collector`.
    ///
    /// Only the first collector attached is used.
    #[must_use]
    pub fn with_metrics(self, collector: &MetricsCollector) -> Self {
        let metrics = collector.metrics(&format!("pool.{}", self.inner.name));
        if self.inner.metrics.set(metrics).is_err() {
            warn!(pool = %self.inner.name, "metrics already attached; ignoring");
        }
        self.inner.publish_gauges();
        self
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &ResourcePoolConfig {
        &self.inner.config
    }

    /// Check out a resource.
    ///
    /// Idle resources older than the idle timeout are destroyed rather than
    /// handed out. When no idle resource is usable a new one is created, even
    /// past `max_size` (with a warning).
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Factory` if a new resource was needed and the
    /// factory failed.
    pub fn acquire(&self) -> Result<PooledResource<T>, CoreError> {
        let value = self.inner.check_out()?;
        Ok(PooledResource {
            value: Some(value),
            acquired_at: Instant::now(),
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Return a resource to the pool.
    ///
    /// The resource is kept idle if fewer than `max_size` are idle, otherwise
    /// it is destroyed. Same as dropping the guard.
    pub fn release(&self, resource: PooledResource<T>) {
        if let Some(value) = self.reclaim(resource) {
            self.inner.check_in(value);
        }
    }

    /// Destroy a checked-out resource instead of returning it (e.g. a broken
    /// connection), then top the pool back up to `min_size`.
    pub fn discard(&self, resource: PooledResource<T>) {
        if let Some(value) = self.reclaim(resource) {
            self.inner.discard_value(value);
        }
    }

    /// Destroy idle resources past the idle timeout, keeping at least
    /// `min_size` resources (idle plus active) alive.
    ///
    /// Returns how many resources were removed. Cleanup-hook failures are
    /// logged and do not stop the pass.
    pub fn cleanup_idle(&self) -> usize {
        self.inner.cleanup_idle()
    }

    /// Number of idle resources.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.inner.state.lock().available.len()
    }

    /// Number of checked-out resources.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ResourcePoolStats {
        self.inner.stats()
    }

    /// Destroy every idle resource regardless of age or `min_size`.
    pub fn drain(&self) -> usize {
        self.inner.drain()
    }

    /// Take the value out of a guard issued by this pool. A guard from
    /// another pool is dropped, which hands it back to its own pool.
    fn reclaim(&self, mut resource: PooledResource<T>) -> Option<T> {
        if resource.belongs_to(&self.inner) {
            Some(resource.take())
        } else {
            warn!(pool = %self.inner.name, "resource belongs to another pool; returning it there");
            None
        }
    }
}

impl<T> PoolInner<T> {
    fn metrics(&self) -> Option<&PerformanceMetrics> {
        self.metrics.get().map(Arc::as_ref)
    }

    fn check_out(&self) -> Result<T, CoreError> {
        let timeout = self.config.idle_timeout();
        let mut expired = Vec::new();
        let reused = {
            let mut state = self.state.lock();
            let mut found = None;
            while let Some(idle) = state.available.pop_back() {
                if idle.idle_since.elapsed() < timeout {
                    found = Some(idle.value);
                    break;
                }
                expired.push(idle.value);
            }
            if found.is_some() {
                state.active += 1;
            }
            found
        };
        self.destroy_all(expired);

        let value = if let Some(value) = reused {
            value
        } else {
            let total = self.state.lock().total();
            if total >= self.config.max_size {
                warn!(
                    pool = %self.name,
                    total,
                    max_size = self.config.max_size,
                    "resource pool at capacity, creating temporary resource"
                );
                if let Some(m) = self.metrics() {
                    m.increment("capacity_overflows", 1);
                }
            }
            let value = self.create()?;
            self.state.lock().active += 1;
            value
        };

        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        self.restore_floor();
        if let Some(m) = self.metrics() {
            m.increment("acquired", 1);
        }
        self.publish_gauges();
        Ok(value)
    }

    fn check_in(&self, value: T) {
        let overflow = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            if state.available.len() < self.config.max_size {
                state.available.push_back(IdleResource {
                    value,
                    idle_since: Instant::now(),
                });
                None
            } else {
                Some(value)
            }
        };
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        if let Some(value) = overflow {
            debug!(pool = %self.name, "pool full on release, destroying resource");
            self.destroy_all(vec![value]);
        }
        if let Some(m) = self.metrics() {
            m.increment("released", 1);
        }
        self.publish_gauges();
    }

    fn discard_value(&self, value: T) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.destroy_all(vec![value]);
        self.restore_floor();
        self.publish_gauges();
    }

    /// A checked-out resource left pool management.
    fn detach(&self) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        debug!(pool = %self.name, "resource detached from pool");
        self.restore_floor();
        self.publish_gauges();
    }

    fn cleanup_idle(&self) -> usize {
        let timeout = self.config.idle_timeout();
        let removed = {
            let mut state = self.state.lock();
            let mut removable = state.total().saturating_sub(self.config.min_size);
            let mut removed = Vec::new();
            let mut kept = VecDeque::with_capacity(state.available.len());
            // oldest first
            for idle in state.available.drain(..) {
                if removable > 0 && idle.idle_since.elapsed() > timeout {
                    removable -= 1;
                    removed.push(idle.value);
                } else {
                    kept.push_back(idle);
                }
            }
            state.available = kept;
            removed
        };
        let count = removed.len();
        self.destroy_all(removed);
        if count > 0 {
            debug!(pool = %self.name, count, "reclaimed idle resources");
            if let Some(m) = self.metrics() {
                m.increment("reclaimed", count as u64);
            }
        }
        self.publish_gauges();
        count
    }

    fn stats(&self) -> ResourcePoolStats {
        let (available, active) = {
            let state = self.state.lock();
            (state.available.len(), state.active)
        };
        ResourcePoolStats {
            name: self.name.clone(),
            available,
            active,
            min_size: self.config.min_size,
            max_size: self.config.max_size,
            created: self.counters.created.load(Ordering::Relaxed),
            destroyed: self.counters.destroyed.load(Ordering::Relaxed),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
        }
    }

    fn drain(&self) -> usize {
        let drained: Vec<T> = self
            .state
            .lock()
            .available
            .drain(..)
            .map(|idle| idle.value)
            .collect();
        let count = drained.len();
        self.destroy_all(drained);
        self.publish_gauges();
        count
    }

    fn create(&self) -> Result<T, CoreError> {
        let value = (self.factory)().map_err(|e| {
            warn!(pool = %self.name, error = %e, "resource factory failed");
            CoreError::Factory(format!("{}: {e}", self.name))
        })?;
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    fn restore_floor(&self) {
        if let Err(e) = self.replenish() {
            warn!(pool = %self.name, error = %e, "failed to restore minimum pool size");
        }
    }

    /// Top the pool back up to `min_size` with fresh idle resources.
    fn replenish(&self) -> Result<(), CoreError> {
        loop {
            if self.state.lock().total() >= self.config.min_size {
                return Ok(());
            }
            let value = self.create()?;
            let mut state = self.state.lock();
            if state.total() >= self.config.min_size {
                drop(state);
                self.destroy_all(vec![value]);
                return Ok(());
            }
            state.available.push_back(IdleResource {
                value,
                idle_since: Instant::now(),
            });
        }
    }

    fn destroy_all(&self, resources: Vec<T>) {
        for value in resources {
            self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
            if let Some(cleanup) = &self.cleanup {
                if let Err(e) = cleanup(value) {
                    warn!(pool = %self.name, error = %e, "resource cleanup failed");
                }
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_gauges(&self) {
        if let Some(m) = self.metrics() {
            let (available, active) = {
                let state = self.state.lock();
                (state.available.len(), state.active)
            };
            m.set_gauge("available", available as f64);
            m.set_gauge("active", active as f64);
        }
    }
}

impl<T> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Type-erased view of a pool, used by the resource manager.
pub trait ManagedPool: Send + Sync {
    /// Pool name.
    fn pool_name(&self) -> &str;
    /// Run one idle-reclamation pass.
    fn cleanup_idle(&self) -> usize;
    /// Current statistics.
    fn stats(&self) -> ResourcePoolStats;
    /// Destroy all idle resources.
    fn drain(&self) -> usize;
    /// Upcast for typed lookup.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + 'static> ManagedPool for ResourcePool<T> {
    fn pool_name(&self) -> &str {
        self.name()
    }

    fn cleanup_idle(&self) -> usize {
        Self::cleanup_idle(self)
    }

    fn stats(&self) -> ResourcePoolStats {
        Self::stats(self)
    }

    fn drain(&self) -> usize {
        Self::drain(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
