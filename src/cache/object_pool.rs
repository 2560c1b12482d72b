//! Allocation-reuse pool for cheap-to-reset objects.
//!
//! Unlike [`ResourcePool`](crate::core::ResourcePool) there is no lifecycle
//! management here: objects have no idle timeout and are simply dropped when
//! the pool is full.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Object pool counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPoolStats {
    /// Idle objects ready for reuse.
    pub pool_size: usize,
    /// Upper bound on idle objects.
    pub max_size: usize,
    /// Objects produced by the factory.
    pub allocated: u64,
    /// Acquisitions served from the idle list.
    pub reused: u64,
    /// `reused / (allocated + reused)`, or 0 before any acquisition.
    pub reuse_rate: f64,
}

/// Keeps up to `max_size` released objects for later `acquire` calls.
pub struct ObjectPool<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
    idle: Mutex<Vec<T>>,
    max_size: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl<T> ObjectPool<T> {
    /// Create an empty pool.
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static, max_size: usize) -> Self {
        Self {
            factory: Box::new(factory),
            idle: Mutex::new(Vec::new()),
            max_size,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Take an idle object or build a fresh one. Never blocks.
    pub fn acquire(&self) -> T {
        let reused = self.idle.lock().pop();
        if let Some(obj) = reused {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return obj;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        (self.factory)()
    }

    /// Return an object. Dropped if the pool is already full.
    pub fn release(&self, obj: T) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_size {
            idle.push(obj);
        }
    }

    /// Idle object count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.idle.lock().len()
    }

    /// Whether no idle objects are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.idle.lock().is_empty()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ObjectPoolStats {
        let allocated = self.allocated.load(Ordering::Relaxed);
        let reused = self.reused.load(Ordering::Relaxed);
        let total = allocated + reused;
        #[allow(clippy::cast_precision_loss)]
        let reuse_rate = if total == 0 {
            0.0
        } else {
            reused as f64 / total as f64
        };
        ObjectPoolStats {
            pool_size: self.len(),
            max_size: self.max_size,
            allocated,
            reused,
            reuse_rate,
        }
    }
}
