//! Configuration models for pools, processor, coordinator, and cache.

pub mod coordinator;
pub mod pool;
pub mod processor;
pub mod runtime;

pub use coordinator::CoordinatorConfig;
pub use pool::{CacheConfig, ResourcePoolConfig};
pub use processor::ProcessorConfig;
pub use runtime::CoreConfig;
