//! Root configuration for the whole task core.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{CacheConfig, CoordinatorConfig, ProcessorConfig, ResourcePoolConfig};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TASK_CORE_";

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Worker-thread processor.
    pub processor: ProcessorConfig,
    /// Dependency coordinator.
    pub coordinator: CoordinatorConfig,
    /// LRU cache and object pools.
    pub cache: CacheConfig,
    /// Named resource pools.
    pub pools: HashMap<String, ResourcePoolConfig>,
    /// Interval of the background idle-cleanup thread; 0 disables it.
    pub cleanup_interval_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorConfig::default(),
            coordinator: CoordinatorConfig::default(),
            cache: CacheConfig::default(),
            pools: HashMap::new(),
            cleanup_interval_secs: 60,
        }
    }
}

impl CoreConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns a description naming the invalid section.
    pub fn validate(&self) -> Result<(), String> {
        self.processor
            .validate()
            .map_err(|e| format!("processor invalid: {e}"))?;
        self.coordinator
            .validate()
            .map_err(|e| format!("coordinator invalid: {e}"))?;
        self.cache
            .validate()
            .map_err(|e| format!("cache invalid: {e}"))?;
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Cleanup interval, or `None` when disabled.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Option<Duration> {
        if self.cleanup_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.cleanup_interval_secs))
        }
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `TASK_CORE_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    ///
    /// # Errors
    ///
    /// Returns a message for unparseable values or an invalid result.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup` (keyed by full variable name).
    ///
    /// # Errors
    ///
    /// Returns a message for unparseable values or an invalid result.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = Self::default();
        let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(v) = get("WORKERS") {
            cfg.processor.worker_count = parse_var("WORKERS", &v)?;
        }
        if let Some(v) = get("POLL_INTERVAL_MS") {
            let ms = parse_var("POLL_INTERVAL_MS", &v)?;
            cfg.processor.poll_interval_ms = ms;
            cfg.coordinator.poll_interval_ms = ms;
        }
        if let Some(v) = get("STOP_TIMEOUT_MS") {
            cfg.processor.stop_timeout_ms = parse_var("STOP_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("CACHE_CAPACITY") {
            cfg.cache.capacity = parse_var("CACHE_CAPACITY", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_MS") {
            cfg.coordinator.retry_backoff_ms = parse_var("RETRY_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("DEPENDENCY_DELAY_MS") {
            cfg.coordinator.dependency_delay_ms = parse_var("DEPENDENCY_DELAY_MS", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            cfg.coordinator.default_max_retries = parse_var("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("CLEANUP_INTERVAL_SECS") {
            cfg.cleanup_interval_secs = parse_var("CLEANUP_INTERVAL_SECS", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name}={value:?}: {e}"))
}
