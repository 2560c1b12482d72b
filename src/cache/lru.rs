//! String-keyed LRU cache with hit/miss accounting.

use std::num::NonZeroUsize;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::core::CoreError;

/// Cache counters and sizing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Successful lookups.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 with no lookups.
    pub hit_rate: f64,
    /// Entries currently held.
    pub size: usize,
    /// Maximum entries.
    pub capacity: usize,
    /// Entries pushed out by capacity pressure.
    pub evictions: u64,
}

struct Entry<V> {
    value: V,
    last_access: Instant,
}

struct CacheState<V> {
    entries: ::lru::LruCache<String, Entry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Fixed-capacity least-recently-used cache.
///
/// Both `get` and `put` count as a use. Values are cloned out so no caller
/// ever holds a reference into the locked map.
pub struct LruCache<V> {
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> LruCache<V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, CoreError> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| CoreError::InvalidConfig("cache capacity must be greater than 0".into()))?;
        Ok(Self {
            state: Mutex::new(CacheState {
                entries: ::lru::LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        })
    }

    /// Create a cache sized from configuration.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if the config does not validate.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        Self::new(config.capacity)
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock();
        let found = state.entries.get_mut(key).map(|entry| {
            entry.last_access = Instant::now();
            entry.value.clone()
        });
        if found.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        found
    }

    /// Insert or replace `key`, evicting the least recently used entry if full.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut state = self.state.lock();
        let entry = Entry {
            value,
            last_access: Instant::now(),
        };
        // push hands back either the replaced entry (same key) or the evicted one
        if let Some((old_key, _)) = state.entries.push(key.clone(), entry) {
            if old_key != key {
                state.evictions += 1;
                tracing::trace!(key = %old_key, "cache entry evicted");
            }
        }
    }

    /// Whether `key` is present. Does not affect recency or counters.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.state.lock().entries.pop(key).map(|e| e.value)
    }

    /// When `key` was last read or written.
    #[must_use]
    pub fn last_access(&self, key: &str) -> Option<Instant> {
        self.state.lock().entries.peek(key).map(|e| e.last_access)
    }

    /// Drop every entry and reset hit/miss counters.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().entries.cap().get()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            size: state.entries.len(),
            capacity: state.entries.cap().get(),
            evictions: state.evictions,
        }
    }
}
