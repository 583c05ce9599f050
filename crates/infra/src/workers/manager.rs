//! Named pools created on first use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ordo_core::{PoolError, PoolResult};
use ordo_observability::PerformanceProfiler;
use parking_lot::Mutex;
use tracing::info;

use super::config::WorkerPoolConfig;
use super::pool::WorkerPool;
use super::registry::TaskRegistry;

/// Name of the blueprint used for pools nobody registered explicitly.
pub const GENERIC_POOL: &str = "generic";

#[derive(Debug, Clone)]
struct Blueprint {
    registry: TaskRegistry,
    config: WorkerPoolConfig,
}

/// Owns every pool of the process.
///
/// Blueprints are registered at startup; the pool itself is only started
/// the first time [`get_pool`](Self::get_pool) asks for it.
#[derive(Debug, Default)]
pub struct WorkerPoolManager {
    blueprints: Mutex<HashMap<String, Blueprint>>,
    pools: Mutex<HashMap<String, Arc<WorkerPool>>>,
    profiler: Option<Arc<PerformanceProfiler>>,
}

impl WorkerPoolManager {
    pub fn new(profiler: Option<Arc<PerformanceProfiler>>) -> Self {
        Self {
            blueprints: Mutex::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
            profiler,
        }
    }

    pub fn register(&self, name: impl Into<String>, registry: TaskRegistry, config: WorkerPoolConfig) {
        let name = name.into();
        let config = config.with_name(format!("ordo-{name}"));
        self.blueprints
            .lock()
            .insert(name, Blueprint { registry, config });
    }

    /// The pool registered under `name`, started on first use.
    ///
    /// Unknown names fall back to the `generic` blueprint when one exists.
    pub fn get_pool(&self, name: &str) -> PoolResult<Arc<WorkerPool>> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(name) {
            return Ok(pool.clone());
        }

        let blueprint = {
            let blueprints = self.blueprints.lock();
            match blueprints.get(name).or_else(|| blueprints.get(GENERIC_POOL)) {
                Some(b) => b.clone(),
                None => return Err(PoolError::UnknownPool(name.to_string())),
            }
        };

        let pool = Arc::new(WorkerPool::new(
            blueprint.config,
            blueprint.registry,
            self.profiler.clone(),
        )?);
        info!(pool = name, "worker pool created");
        pools.insert(name.to_string(), pool.clone());
        Ok(pool)
    }

    /// Names of the pools started so far, sorted.
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.blueprints.lock().contains_key(name)
    }

    pub async fn shutdown_all(&self, drain_timeout: Duration) {
        let pools: Vec<Arc<WorkerPool>> = self.pools.lock().drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.shutdown(drain_timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_core::TaskOptions;
    use serde_json::json;

    fn manager() -> WorkerPoolManager {
        let m = WorkerPoolManager::new(None);
        m.register(
            "math",
            TaskRegistry::new().with("inc", |n: i64| Ok::<_, String>(n + 1)),
            WorkerPoolConfig::default().with_max_workers(1),
        );
        m
    }

    #[tokio::test]
    async fn pools_are_created_lazily_and_reused() {
        let m = manager();
        assert!(m.pool_names().is_empty());

        let a = m.get_pool("math").unwrap();
        let b = m.get_pool("math").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "ordo-math");

        let r = a
            .execute_task("inc", json!(1), TaskOptions::default())
            .await
            .unwrap();
        assert_eq!(r.data, Some(json!(2)));
        m.shutdown_all(Duration::from_secs(1)).await;
        assert!(m.pool_names().is_empty());
    }

    #[test]
    fn unknown_pool_without_generic_fallback_is_an_error() {
        let m = manager();
        assert_eq!(
            m.get_pool("other").unwrap_err(),
            PoolError::UnknownPool("other".to_string())
        );
    }

    #[test]
    fn generic_blueprint_backs_unknown_names() {
        let m = manager();
        m.register(
            GENERIC_POOL,
            TaskRegistry::new(),
            WorkerPoolConfig::default().with_max_workers(1),
        );
        let pool = m.get_pool("email-send").unwrap();
        assert_eq!(pool.name(), "ordo-generic");
        assert_eq!(m.pool_names(), vec!["email-send".to_string()]);
    }
}
