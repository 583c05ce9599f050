//! Pool variant serving named compute modules.
//!
//! A [`ModuleCatalog`] holds factories for [`ComputeModule`]s. Workers
//! instantiate modules on demand (or ahead of time through
//! [`ComputePool::preload_module`]) and call their functions with JSON
//! arguments. Pool-level failures are folded into unsuccessful results so
//! callers only ever look at [`ComputeResult::success`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ordo_core::{PoolResult, TaskOptions, WorkerResult};
use ordo_observability::PerformanceProfiler;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::config::WorkerPoolConfig;
use super::pool::WorkerPool;
use super::registry::TaskRegistry;
use super::stats::PoolStats;

pub const CAPABILITY_CHECK_TASK: &str = "compute-capability-check";
pub const PRELOAD_TASK: &str = "compute-preload";
pub const EXECUTION_TASK: &str = "compute-execution";

/// A loadable unit exposing named functions over JSON values.
pub trait ComputeModule: Send + Sync {
    fn name(&self) -> &str;

    fn functions(&self) -> Vec<String>;

    fn call(&self, function: &str, args: &[Value]) -> Result<Value, String>;
}

type ModuleFactory = Arc<dyn Fn() -> Result<Arc<dyn ComputeModule>, String> + Send + Sync>;

/// Module factories plus the cache of instantiated modules.
#[derive(Default)]
pub struct ModuleCatalog {
    factories: HashMap<String, ModuleFactory>,
    loaded: Mutex<HashMap<String, Arc<dyn ComputeModule>>>,
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("available", &self.available_modules())
            .field("loaded", &self.loaded_modules())
            .finish()
    }
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Arc<dyn ComputeModule>, String> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register an already constructed module; it is cloned out on load.
    pub fn register_module(&mut self, module: Arc<dyn ComputeModule>) -> &mut Self {
        let name = module.name().to_string();
        self.register(name, move || Ok(module.clone()))
    }

    /// Cached instance of `name`, instantiating it on first use.
    pub fn load(&self, name: &str) -> Result<Arc<dyn ComputeModule>, String> {
        if let Some(module) = self.loaded.lock().get(name) {
            return Ok(module.clone());
        }
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| format!("unknown compute module: {name}"))?;
        let module = factory().map_err(|e| format!("failed to load module {name}: {e}"))?;
        self.loaded
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| module.clone());
        Ok(module)
    }

    pub fn call(&self, module: &str, function: &str, args: &[Value]) -> Result<Value, String> {
        let instance = self.load(module)?;
        if !instance.functions().iter().any(|f| f == function) {
            return Err(format!("function {function} not found in module {module}"));
        }
        instance.call(function, args)
    }

    pub fn available_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeOptions {
    pub priority: i32,
    pub timeout: Duration,
}

impl Default for ComputeOptions {
    fn default() -> Self {
        Self {
            priority: 10,
            timeout: Duration::from_secs(60),
        }
    }
}

/// One call in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeCall {
    pub module: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl ComputeCall {
    pub fn new(module: impl Into<String>, function: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: f64,
    pub compute: bool,
}

impl ComputeResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            execution_time_ms: 0.0,
            compute: true,
        }
    }
}

impl From<WorkerResult> for ComputeResult {
    fn from(r: WorkerResult) -> Self {
        Self {
            success: r.success,
            data: r.data,
            error: r.error,
            execution_time_ms: r.execution_time_ms,
            compute: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeStats {
    #[serde(flatten)]
    pub pool: PoolStats,
    /// Outcome of the capability check; false until it has run.
    pub capable: bool,
    pub loaded_modules: Vec<String>,
}

#[derive(Deserialize)]
struct PreloadRequest {
    module: String,
}

/// Worker pool dedicated to compute modules.
#[derive(Debug)]
pub struct ComputePool {
    pool: WorkerPool,
    catalog: Arc<ModuleCatalog>,
    capable: OnceCell<bool>,
}

impl ComputePool {
    pub fn new(
        config: WorkerPoolConfig,
        catalog: ModuleCatalog,
        profiler: Option<Arc<PerformanceProfiler>>,
    ) -> PoolResult<Self> {
        let catalog = Arc::new(catalog);
        let pool = WorkerPool::new(config, Self::registry(&catalog), profiler)?;
        Ok(Self {
            pool,
            catalog,
            capable: OnceCell::new(),
        })
    }

    fn registry(catalog: &Arc<ModuleCatalog>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();

        registry.register(CAPABILITY_CHECK_TASK, |_: Value| {
            Ok::<_, String>(json!({
                "capable": true,
                "thread": std::thread::current().name().unwrap_or("unnamed"),
            }))
        });

        let c = catalog.clone();
        registry.register(PRELOAD_TASK, move |req: PreloadRequest| {
            let module = c.load(&req.module)?;
            Ok::<_, String>(json!({
                "module": req.module,
                "functions": module.functions(),
            }))
        });

        let c = catalog.clone();
        registry.register(EXECUTION_TASK, move |call: ComputeCall| {
            c.call(&call.module, &call.function, &call.args)
        });

        registry
    }

    /// Run the capability check once for the pool; later calls reuse the
    /// outcome.
    pub async fn ensure_initialized(&self) -> bool {
        *self
            .capable
            .get_or_init(|| async {
                let capable = match self
                    .pool
                    .execute_task(CAPABILITY_CHECK_TASK, Value::Null, TaskOptions::default())
                    .await
                {
                    Ok(r) if r.success => true,
                    Ok(r) => {
                        warn!(error = ?r.error, "compute capability check failed");
                        false
                    }
                    Err(e) => {
                        warn!(error = %e, "compute capability check failed");
                        false
                    }
                };
                info!(pool = %self.pool.name(), capable, "compute pool initialized");
                capable
            })
            .await
    }

    pub async fn execute_function(
        &self,
        module: &str,
        function: &str,
        args: Vec<Value>,
        options: ComputeOptions,
    ) -> ComputeResult {
        self.ensure_initialized().await;
        self.execute_call(ComputeCall::new(module, function, args), options)
            .await
    }

    async fn execute_call(&self, call: ComputeCall, options: ComputeOptions) -> ComputeResult {
        let payload = match serde_json::to_value(&call) {
            Ok(p) => p,
            Err(e) => return ComputeResult::failed(e.to_string()),
        };
        let opts = TaskOptions::new()
            .with_priority(options.priority)
            .with_timeout(options.timeout);
        match self.pool.execute_task(EXECUTION_TASK, payload, opts).await {
            Ok(result) => result.into(),
            Err(e) => {
                warn!(module = %call.module, function = %call.function, error = %e, "compute call failed");
                ComputeResult::failed(e.to_string())
            }
        }
    }

    /// Instantiate `module` ahead of its first call.
    pub async fn preload_module(&self, module: &str) -> bool {
        self.ensure_initialized().await;
        let result = self
            .pool
            .execute_task(PRELOAD_TASK, json!({ "module": module }), TaskOptions::default())
            .await;
        match result {
            Ok(r) if r.success => {
                info!(module, "compute module preloaded");
                true
            }
            Ok(r) => {
                warn!(module, error = ?r.error, "compute module preload failed");
                false
            }
            Err(e) => {
                warn!(module, error = %e, "compute module preload failed");
                false
            }
        }
    }

    /// Run `calls` concurrently; results come back in call order.
    ///
    /// Earlier calls get higher priority (`10 - index`).
    pub async fn execute_batch(self: &Arc<Self>, calls: Vec<ComputeCall>, timeout: Duration) -> Vec<ComputeResult> {
        self.ensure_initialized().await;
        let handles: Vec<_> = calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| {
                let this = Arc::clone(self);
                let options = ComputeOptions {
                    priority: 10 - index as i32,
                    timeout,
                };
                tokio::spawn(async move { this.execute_call(call, options).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(r) => r,
                Err(e) => ComputeResult::failed(format!("batch call aborted: {e}")),
            });
        }
        results
    }

    pub fn compute_stats(&self) -> ComputeStats {
        ComputeStats {
            pool: self.pool.stats(),
            capable: self.capable.get().copied().unwrap_or(false),
            loaded_modules: self.catalog.loaded_modules(),
        }
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.pool.shutdown(drain_timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Arith;

    impl ComputeModule for Arith {
        fn name(&self) -> &str {
            "arith"
        }

        fn functions(&self) -> Vec<String> {
            vec!["add".into(), "mul".into()]
        }

        fn call(&self, function: &str, args: &[Value]) -> Result<Value, String> {
            let nums: Vec<i64> = args.iter().filter_map(Value::as_i64).collect();
            match function {
                "add" => Ok(json!(nums.iter().sum::<i64>())),
                "mul" => Ok(json!(nums.iter().product::<i64>())),
                other => Err(format!("unsupported: {other}")),
            }
        }
    }

    fn compute_pool() -> Arc<ComputePool> {
        let mut catalog = ModuleCatalog::new();
        catalog.register_module(Arc::new(Arith));
        catalog.register("broken", || Err("corrupt module".to_string()));
        Arc::new(
            ComputePool::new(
                WorkerPoolConfig::default()
                    .with_name("compute-test")
                    .with_max_workers(2)
                    .with_profiling(false),
                catalog,
                None,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn executes_module_functions() {
        let pool = compute_pool();
        let r = pool
            .execute_function("arith", "add", vec![json!(2), json!(3)], ComputeOptions::default())
            .await;
        assert!(r.success);
        assert!(r.compute);
        assert_eq!(r.data, Some(json!(5)));
        assert!(pool.compute_stats().capable);
        assert_eq!(pool.compute_stats().loaded_modules, vec!["arith".to_string()]);
    }

    #[tokio::test]
    async fn capability_check_runs_once() {
        let pool = compute_pool();
        assert!(!pool.compute_stats().capable);
        assert!(pool.ensure_initialized().await);
        assert!(pool.ensure_initialized().await);
        assert_eq!(pool.pool().detailed_stats().total_tasks_executed, 1);
    }

    #[tokio::test]
    async fn errors_are_folded_into_results() {
        let pool = compute_pool();
        let r = pool
            .execute_function("arith", "pow", vec![], ComputeOptions::default())
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("not found"));

        let r = pool
            .execute_function("nope", "add", vec![], ComputeOptions::default())
            .await;
        assert!(!r.success);
    }

    #[tokio::test]
    async fn preload_reports_success() {
        let pool = compute_pool();
        assert!(pool.preload_module("arith").await);
        assert!(!pool.preload_module("broken").await);
        assert!(!pool.preload_module("missing").await);
        assert_eq!(pool.catalog().loaded_modules(), vec!["arith".to_string()]);
    }

    #[tokio::test]
    async fn batch_results_keep_call_order() {
        let pool = compute_pool();
        let calls = vec![
            ComputeCall::new("arith", "add", vec![json!(1), json!(1)]),
            ComputeCall::new("arith", "mul", vec![json!(3), json!(4)]),
            ComputeCall::new("arith", "missing", vec![]),
        ];
        let results = pool.execute_batch(calls, Duration::from_secs(5)).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].data, Some(json!(2)));
        assert_eq!(results[1].data, Some(json!(12)));
        assert!(!results[2].success);
        pool.shutdown(Duration::from_secs(1)).await;
    }
}
