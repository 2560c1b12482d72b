//! Builders to construct resource pools from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{CoreConfig, ResourcePoolConfig};
use crate::core::{CoreError, ResourceCleanup, ResourceFactory, ResourceManager, ResourcePool};

/// Factory and optional cleanup hook for one configured pool.
pub type PoolHooks<T> = (ResourceFactory<T>, Option<ResourceCleanup<T>>);

/// Create every pool in `cfg.pools` on `manager`, asking `hooks` for the
/// factory and cleanup of each.
///
/// Pools are created in name order. If one fails, the pools created so far
/// stay registered.
///
/// # Errors
///
/// Returns `CoreError::InvalidConfig` for an invalid config, or whatever
/// `hooks` or [`ResourceManager::create_pool`] return.
pub fn build_pools<T, F>(
    cfg: &CoreConfig,
    manager: &ResourceManager,
    mut hooks: F,
) -> Result<HashMap<String, Arc<ResourcePool<T>>>, CoreError>
where
    T: Send + 'static,
    F: FnMut(&str, &ResourcePoolConfig) -> Result<PoolHooks<T>, CoreError>,
{
    cfg.validate()
        .map_err(|e| CoreError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut names: Vec<&String> = cfg.pools.keys().collect();
    names.sort();

    let mut pools = HashMap::with_capacity(names.len());
    for name in names {
        let pool_cfg = &cfg.pools[name];
        let (factory, cleanup) = hooks(name, pool_cfg)?;
        let pool = manager.create_pool(name, pool_cfg.clone(), factory, cleanup)?;
        pools.insert(name.clone(), pool);
    }
    Ok(pools)
}
