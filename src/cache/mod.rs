//! In-memory caching and allocation reuse.

pub mod lru;
pub mod object_pool;

pub use self::lru::{CacheStats, LruCache};
pub use object_pool::{ObjectPool, ObjectPoolStats};
