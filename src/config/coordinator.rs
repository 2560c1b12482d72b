//! Dependency coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs for the dependency coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Pause between scheduling passes when nothing woke the loop.
    pub poll_interval_ms: u64,
    /// Delay added after the latest dependency's scheduled time.
    pub dependency_delay_ms: u64,
    /// Fixed backoff before a failed task becomes eligible again.
    pub retry_backoff_ms: u64,
    /// `max_retries` given to tasks that don't set their own.
    pub default_max_retries: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            dependency_delay_ms: 1_000,
            retry_backoff_ms: 5_000,
            default_max_retries: 3,
        }
    }
}

impl CoordinatorConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loop poll interval.
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the dependency delay.
    #[must_use]
    pub const fn with_dependency_delay_ms(mut self, ms: u64) -> Self {
        self.dependency_delay_ms = ms;
        self
    }

    /// Set the retry backoff.
    #[must_use]
    pub const fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Set the default retry budget.
    #[must_use]
    pub const fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Dependency delay as a `Duration`.
    #[must_use]
    pub const fn dependency_delay(&self) -> Duration {
        Duration::from_millis(self.dependency_delay_ms)
    }

    /// Retry backoff as a `Duration`.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Validate coordinator settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}
