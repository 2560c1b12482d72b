//! Counters, timers, and gauges grouped by namespace.
//!
//! Every component that reports utilization takes an optional
//! [`MetricsCollector`] handle; the collector hands out one shared
//! [`PerformanceMetrics`] per namespace.

pub mod collector;
pub mod performance;

pub use collector::MetricsCollector;
pub use performance::{MetricsSnapshot, PerformanceMetrics, TimerGuard, TimerSummary};
