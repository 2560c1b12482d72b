//! Central registry of metric namespaces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::{MetricsSnapshot, PerformanceMetrics};

/// Hands out one [`PerformanceMetrics`] per namespace.
///
/// Cloning is cheap; clones share the same namespaces.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    groups: Arc<RwLock<HashMap<String, Arc<PerformanceMetrics>>>>,
}

impl MetricsCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics group for `namespace`, created on first use.
    #[must_use]
    pub fn metrics(&self, namespace: &str) -> Arc<PerformanceMetrics> {
        if let Some(m) = self.groups.read().get(namespace) {
            return Arc::clone(m);
        }
        let mut groups = self.groups.write();
        Arc::clone(
            groups
                .entry(namespace.to_string())
                .or_insert_with(|| Arc::new(PerformanceMetrics::new(namespace))),
        )
    }

    /// Increment a counter in `namespace`.
    pub fn increment(&self, namespace: &str, name: &str, delta: u64) {
        self.metrics(namespace).increment(name, delta);
    }

    /// Record a timer sample in `namespace`.
    pub fn record_time(&self, namespace: &str, name: &str, duration: Duration) {
        self.metrics(namespace).record_time(name, duration);
    }

    /// Set a gauge in `namespace`.
    pub fn set_gauge(&self, namespace: &str, name: &str, value: f64) {
        self.metrics(namespace).set_gauge(name, value);
    }

    /// Names of all namespaces seen so far.
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every namespace.
    #[must_use]
    pub fn get_all_metrics(&self) -> HashMap<String, MetricsSnapshot> {
        let groups: Vec<Arc<PerformanceMetrics>> = self.groups.read().values().cloned().collect();
        groups
            .into_iter()
            .map(|m| (m.name().to_string(), m.snapshot()))
            .collect()
    }

    /// All metrics as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (non-finite gauge values).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.get_all_metrics())
    }

    /// Reset every namespace.
    pub fn reset(&self) {
        for m in self.groups.read().values() {
            m.reset();
        }
    }
}
