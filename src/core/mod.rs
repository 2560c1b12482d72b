//! Core scheduling primitives: jobs, the priority queue, worker threads, and
//! resource pools.

pub mod error;
pub mod job;
pub mod priority_queue;
pub mod resource_manager;
pub mod resource_pool;
pub mod task_processor;

pub use error::{AppResult, CoreError};
pub use job::{BoxedJob, FnJob, Job};
pub use priority_queue::{Priority, PriorityTask, PriorityTaskQueue, QueueStats};
pub use resource_manager::ResourceManager;
pub use resource_pool::{
    ManagedPool, PooledResource, ResourceCleanup, ResourceFactory, ResourcePool,
    ResourcePoolStats,
};
pub use task_processor::{ProcessorStats, TaskProcessor, PROCESSOR_METRICS};
