//! Builders to construct task-core components from configuration.

pub mod pool_builder;
pub mod runtime;

pub use pool_builder::{build_pools, PoolHooks};
pub use runtime::CoreRuntime;
