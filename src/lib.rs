//! # Prometheus Task Core
//!
//! Task scheduling and resource management for the Prometheus AI Platform.
//!
//! The application layer (LLM calls, persistence, HTTP) stays outside this
//! crate; it submits work here and reads back status and results.
//!
//! ## Layers
//!
//! - **Priority processing**: a lock-protected binary heap of boxed jobs
//!   ([`core::PriorityTaskQueue`]) drained by a fixed set of OS worker threads
//!   ([`core::TaskProcessor`]). Lower priority values run first, FIFO within a
//!   level. A failing or panicking job never takes its worker down.
//! - **Resource pools**: [`core::ResourcePool`] hands out factory-built
//!   resources, reclaims idle ones past their timeout, and never shrinks below
//!   `min_size`. [`core::ResourceManager`] owns named pools and an optional
//!   background cleanup thread.
//! - **Caching**: a string-keyed LRU cache ([`cache::LruCache`]) and an
//!   allocation-reuse [`cache::ObjectPool`].
//! - **Metrics**: namespaced counters, timers, and gauges
//!   ([`metrics::MetricsCollector`]).
//! - **Coordination** (`tokio-runtime` feature): an async scheduler that runs
//!   tasks once their dependencies complete, with subtasks, fixed-backoff
//!   retries, and cooperative cancellation ([`coordinator::TaskCoordinator`]).
//!
//! ## Example
//!
//! ```rust,ignore
//! use prometheus_task_core::builders::CoreRuntime;
//! use prometheus_task_core::config::CoreConfig;
//! use prometheus_task_core::core::Priority;
//!
//! let runtime = CoreRuntime::from_config(CoreConfig::default())?;
//! runtime.start();
//!
//! runtime.processor().submit(
//!     Box::new(|| -> anyhow::Result<()> {
//!         // CPU-bound work
//!         Ok(())
//!     }),
//!     Priority::High,
//!     None,
//! )?;
//!
//! runtime.shutdown();
//! ```
//!
//! For complete scenarios, see the integration tests under `tests/`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Jobs, the priority queue, worker threads, and resource pools.
pub mod core;
/// Configuration models for the processor, coordinator, pools, and cache.
pub mod config;
/// Builders to construct task-core components from configuration.
pub mod builders;
/// LRU cache and object pool.
pub mod cache;
/// Namespaced performance metrics.
pub mod metrics;
/// Async dependency-aware task coordination.
#[cfg(feature = "tokio-runtime")]
pub mod coordinator;
/// Shared utilities.
pub mod util;
