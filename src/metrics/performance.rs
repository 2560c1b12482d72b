//! Per-namespace metric storage.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Derived statistics over a timer's samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerSummary {
    /// Number of samples.
    pub count: usize,
    /// Sum of all samples in seconds.
    pub total_secs: f64,
    /// Shortest sample in seconds.
    pub min_secs: f64,
    /// Longest sample in seconds.
    pub max_secs: f64,
    /// Mean sample in seconds.
    pub avg_secs: f64,
}

impl TimerSummary {
    fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let secs = samples.iter().map(Duration::as_secs_f64);
        let total: f64 = secs.clone().sum();
        let min = secs.clone().fold(f64::INFINITY, f64::min);
        let max = secs.fold(0.0_f64, f64::max);
        #[allow(clippy::cast_precision_loss)]
        let avg = total / samples.len() as f64;
        Self {
            count: samples.len(),
            total_secs: total,
            min_secs: min,
            max_secs: max,
            avg_secs: avg,
        }
    }
}

/// Point-in-time copy of one namespace's metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Monotonic counters.
    pub counters: HashMap<String, u64>,
    /// Timer summaries.
    pub timers: HashMap<String, TimerSummary>,
    /// Last-written gauge values.
    pub gauges: HashMap<String, f64>,
}

#[derive(Default)]
struct MetricsState {
    counters: HashMap<String, u64>,
    timers: HashMap<String, Vec<Duration>>,
    gauges: HashMap<String, f64>,
}

/// Counters, timers, and gauges for one namespace.
///
/// All three share a single lock; there is no ordering guarantee across
/// threads beyond each individual update being atomic.
pub struct PerformanceMetrics {
    name: String,
    state: Mutex<MetricsState>,
}

impl PerformanceMetrics {
    /// Create an empty metrics group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MetricsState::default()),
        }
    }

    /// Namespace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `delta` to a counter, creating it at zero.
    pub fn increment(&self, name: &str, delta: u64) {
        let mut state = self.state.lock();
        let counter = state.counters.entry(name.to_string()).or_insert(0);
        *counter = counter.saturating_add(delta);
    }

    /// Append a duration sample to a timer.
    pub fn record_time(&self, name: &str, duration: Duration) {
        self.state
            .lock()
            .timers
            .entry(name.to_string())
            .or_default()
            .push(duration);
    }

    /// Overwrite a gauge.
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.state.lock().gauges.insert(name.to_string(), value);
    }

    /// Current counter value (0 if never incremented).
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.state.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Current gauge value.
    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.state.lock().gauges.get(name).copied()
    }

    /// Summary of a timer's samples.
    #[must_use]
    pub fn timer(&self, name: &str) -> Option<TimerSummary> {
        self.state
            .lock()
            .timers
            .get(name)
            .map(|s| TimerSummary::from_samples(s))
    }

    /// Start a scoped timer recorded under `name` when the guard drops.
    #[must_use = "the duration is recorded when the guard is dropped"]
    pub fn time<'a>(&'a self, name: &str) -> TimerGuard<'a> {
        TimerGuard {
            metrics: self,
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Run `f` and record how long it took, whether or not it panicked.
    pub fn measure<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        let _guard = self.time(name);
        f()
    }

    /// Copy out everything recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            counters: state.counters.clone(),
            timers: state
                .timers
                .iter()
                .map(|(k, v)| (k.clone(), TimerSummary::from_samples(v)))
                .collect(),
            gauges: state.gauges.clone(),
        }
    }

    /// Forget all recorded values.
    pub fn reset(&self) {
        *self.state.lock() = MetricsState::default();
    }
}

/// Records elapsed time into its metrics group on drop.
///
/// Because recording happens in `Drop`, the sample is taken even when the
/// timed scope unwinds.
pub struct TimerGuard<'a> {
    metrics: &'a PerformanceMetrics,
    name: String,
    start: Instant,
}

impl TimerGuard<'_> {
    /// Time elapsed so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.metrics.record_time(&self.name, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_counters_accumulate() {
        let m = PerformanceMetrics::new("test");
        m.increment("hits", 1);
        m.increment("hits", 4);
        assert_eq!(m.counter("hits"), 5);
        assert_eq!(m.counter("missing"), 0);
    }

    #[test]
    fn test_gauges_last_write_wins() {
        let m = PerformanceMetrics::new("test");
        m.set_gauge("depth", 3.0);
        m.set_gauge("depth", 1.5);
        assert_eq!(m.gauge("depth"), Some(1.5));
    }

    #[test]
    fn test_timer_summary() {
        let m = PerformanceMetrics::new("test");
        m.record_time("op", Duration::from_millis(10));
        m.record_time("op", Duration::from_millis(30));
        let t = m.timer("op").unwrap();
        assert_eq!(t.count, 2);
        assert!((t.min_secs - 0.010).abs() < 1e-9);
        assert!((t.max_secs - 0.030).abs() < 1e-9);
        assert!((t.avg_secs - 0.020).abs() < 1e-9);
    }

    #[test]
    fn test_timer_guard_records_on_panic() {
        let m = PerformanceMetrics::new("test");
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _g = m.time("explodes");
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(m.timer("explodes").unwrap().count, 1);
    }

    #[test]
    fn test_measure_and_reset() {
        let m = PerformanceMetrics::new("test");
        let v = m.measure("calc", || 21 * 2);
        assert_eq!(v, 42);
        assert_eq!(m.snapshot().timers["calc"].count, 1);
        m.reset();
        assert!(m.snapshot().timers.is_empty());
    }
}
