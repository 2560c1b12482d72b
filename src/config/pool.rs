//! Resource pool and cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a single resource pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePoolConfig {
    /// Resources kept alive even when idle.
    pub min_size: usize,
    /// Soft ceiling on pooled resources.
    pub max_size: usize,
    /// How long a resource may sit idle before it can be reclaimed.
    pub idle_timeout_ms: u64,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            idle_timeout_ms: 300_000,
        }
    }
}

impl ResourcePoolConfig {
    /// Config with the given bounds and the default idle timeout.
    #[must_use]
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            ..Self::default()
        }
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Validate pool bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be greater than 0".into());
        }
        if self.min_size > self.max_size {
            return Err(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err("idle_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// LRU cache and object pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries held by the LRU cache.
    pub capacity: usize,
    /// Maximum idle objects kept by object pools.
    pub object_pool_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            object_pool_size: 100,
        }
    }
}

impl CacheConfig {
    /// Validate cache sizing.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".into());
        }
        Ok(())
    }
}
