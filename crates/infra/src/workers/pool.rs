//! Fixed-size pool of worker threads with a priority queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use ordo_core::{PoolError, PoolResult, TaskOptions, WorkerResult, WorkerTask};
use ordo_observability::PerformanceProfiler;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::config::WorkerPoolConfig;
use super::dispatcher::{DispatchEvent, Dispatcher};
use super::monitor::{MonitorHandle, PoolMonitor};
use super::registry::TaskRegistry;
use super::stats::{DetailedPoolStats, PoolCounters, PoolPerformance, PoolStats};

/// A fixed number of OS-thread workers fed from a priority queue.
///
/// Submissions are async and runtime-agnostic: the caller awaits a oneshot
/// that the dispatcher thread completes. Tasks that outlive their timeout
/// fail with [`PoolError::TaskTimeout`] and their worker is replaced.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    registry: Arc<TaskRegistry>,
    events: mpsc::Sender<DispatchEvent>,
    counters: Arc<Mutex<PoolCounters>>,
    profiler: Option<Arc<PerformanceProfiler>>,
    next_seq: AtomicU64,
    accepting: AtomicBool,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.config.name)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Start a pool; pass a profiler to get hotspots, alert logging and
    /// profiler figures in [`detailed_stats`](Self::detailed_stats).
    pub fn new(
        config: WorkerPoolConfig,
        registry: TaskRegistry,
        profiler: Option<Arc<PerformanceProfiler>>,
    ) -> PoolResult<Self> {
        config
            .validate()
            .map_err(|e| PoolError::WorkerExecution(e.to_string()))?;

        let registry = Arc::new(registry);
        let counters = Arc::new(Mutex::new(PoolCounters::default()));
        let profiler = profiler.filter(|_| config.enable_profiling);

        let (events, dispatcher) = Dispatcher::start(
            config.clone(),
            registry.clone(),
            counters.clone(),
            profiler.clone(),
        )?;

        let monitor = match &profiler {
            Some(p) => match PoolMonitor::spawn(&config, p.subscribe(), counters.clone()) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(pool = %config.name, error = %e, "pool monitor unavailable");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            config,
            registry,
            events,
            counters,
            profiler,
            next_seq: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            dispatcher: Mutex::new(Some(dispatcher)),
            monitor: Mutex::new(monitor),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Run a task and wait for its result.
    ///
    /// A handler that returns an error yields `Ok(WorkerResult { success:
    /// false, .. })`; pool-level problems (full queue, timeout, crash,
    /// unknown type, shutdown) are `Err`.
    pub async fn execute_task(
        &self,
        task_type: &str,
        payload: Value,
        options: TaskOptions,
    ) -> PoolResult<WorkerResult> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        if !self.registry.contains(task_type) {
            return Err(PoolError::UnknownTaskType(task_type.to_string()));
        }

        let task = WorkerTask::new(
            task_type,
            payload,
            options.priority.unwrap_or(self.config.default_priority),
            options.timeout.unwrap_or(self.config.default_timeout),
            self.next_seq.fetch_add(1, Ordering::SeqCst),
        );

        let (reply, rx) = oneshot::channel();
        self.events
            .send(DispatchEvent::Submit { task, reply })
            .map_err(|_| PoolError::ShuttingDown)?;
        rx.await.map_err(|_| PoolError::ShuttingDown)?
    }

    /// Typed wrapper around [`execute_task`](Self::execute_task).
    ///
    /// A handler error becomes `PoolError::WorkerExecution`.
    pub async fn execute_typed<P, R>(
        &self,
        task_type: &str,
        payload: &P,
        options: TaskOptions,
    ) -> PoolResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload)?;
        let result = self.execute_task(task_type, payload, options).await?;
        let data = result.into_result().map_err(PoolError::WorkerExecution)?;
        Ok(serde_json::from_value(data)?)
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.lock().stats
    }

    pub fn detailed_stats(&self) -> DetailedPoolStats {
        let mut detailed = self.counters.lock().detailed();
        if let Some(profiler) = &self.profiler {
            let metrics = profiler.metrics();
            detailed.performance = Some(PoolPerformance {
                event_loop_lag_ms: metrics.event_loop_lag_ms,
                memory_mb: metrics.heap_used_mb(),
                cpu_percent: metrics.cpu.percent,
            });
        }
        detailed
    }

    pub fn profiler(&self) -> Option<&Arc<PerformanceProfiler>> {
        self.profiler.as_ref()
    }

    /// Plain-text report of pool and profiler state.
    pub fn generate_performance_report(&self) -> String {
        let d = self.detailed_stats();
        let mut out = String::new();

        out.push_str(&format!("=== Worker Pool Report: {} ===\n\n", self.config.name));
        out.push_str("Pool:\n");
        out.push_str(&format!("  workers:       {}\n", d.stats.total_workers));
        out.push_str(&format!("  busy:          {}\n", d.stats.busy_workers));
        out.push_str(&format!("  queued:        {}\n", d.stats.queue_size));
        out.push_str(&format!("  pending:       {}\n\n", d.stats.pending_tasks));

        out.push_str("Tasks:\n");
        out.push_str(&format!("  executed:      {}\n", d.total_tasks_executed));
        out.push_str(&format!("  failed:        {}\n", d.failed_tasks));
        out.push_str(&format!("  timed out:     {}\n", d.timed_out_tasks));
        out.push_str(&format!("  crashes:       {}\n", d.crashed_workers));
        out.push_str(&format!("  respawns:      {}\n", d.respawned_workers));
        out.push_str(&format!(
            "  avg execution: {:.2}ms (recent {:.2}ms)\n",
            d.average_execution_time_ms, d.recent_average_execution_time_ms
        ));
        out.push_str(&format!("  avg queue:     {:.2}ms\n\n", d.average_queue_time_ms));

        if let Some(p) = d.performance {
            out.push_str("Process:\n");
            out.push_str(&format!("  lag:           {:.2}ms\n", p.event_loop_lag_ms));
            out.push_str(&format!("  memory:        {:.2}MB\n", p.memory_mb));
            out.push_str(&format!("  cpu:           {:.1}%\n\n", p.cpu_percent));
        }

        out.push_str("Health:\n");
        let exec_warn = self.config.task_execution_warning.as_secs_f64() * 1000.0;
        let queue_warn = self.config.queue_wait_warning.as_secs_f64() * 1000.0;
        if d.average_execution_time_ms > exec_warn {
            out.push_str(&format!(
                "  WARN average execution time above {exec_warn:.0}ms\n"
            ));
        } else {
            out.push_str("  OK execution time\n");
        }
        if d.average_queue_time_ms > queue_warn {
            out.push_str(&format!("  WARN average queue wait above {queue_warn:.0}ms\n"));
        } else {
            out.push_str("  OK queue wait\n");
        }
        if d.stats.busy_workers == d.stats.total_workers && d.stats.queue_size > 0 {
            out.push_str("  WARN all workers busy with tasks waiting\n");
        } else {
            out.push_str("  OK capacity\n");
        }
        out
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting work, reject queued tasks and wait up to
    /// `drain_timeout` for in-flight tasks before stopping the workers.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(pool = %self.config.name, "worker pool shutting down");
        }

        let (done, wait) = oneshot::channel();
        if self
            .events
            .send(DispatchEvent::Shutdown {
                drain_timeout,
                done: Some(done),
            })
            .is_ok()
        {
            let _ = wait.await;
        }

        // The dispatcher has sent its last message; it exits right after.
        self.dispatcher.lock().take();
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.shutdown();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.dispatcher.get_mut().is_some() {
            let _ = self.events.send(DispatchEvent::Shutdown {
                drain_timeout: Duration::ZERO,
                done: None,
            });
        }
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pool(workers: usize) -> WorkerPool {
        let registry = TaskRegistry::new()
            .with("double", |n: i64| Ok::<_, String>(n * 2))
            .with("fail", |_: Value| Err::<Value, _>("nope"));
        WorkerPool::new(
            WorkerPoolConfig::default()
                .with_name("unit")
                .with_max_workers(workers)
                .with_profiling(false),
            registry,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn executes_and_reports_stats() {
        let pool = pool(2);
        let result = pool
            .execute_task("double", json!(21), TaskOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.data, Some(json!(42)));

        let stats = pool.detailed_stats();
        assert_eq!(stats.stats.total_workers, 2);
        assert_eq!(stats.total_tasks_executed, 1);
        assert!(stats.performance.is_none());
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn handler_error_is_an_unsuccessful_result() {
        let pool = pool(1);
        let result = pool
            .execute_task("fail", json!(null), TaskOptions::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("nope"));
        assert_eq!(pool.detailed_stats().failed_tasks, 1);
    }

    #[tokio::test]
    async fn typed_execution() {
        let pool = pool(1);
        let out: i64 = pool
            .execute_typed("double", &8, TaskOptions::default())
            .await
            .unwrap();
        assert_eq!(out, 16);

        let err = pool
            .execute_typed::<_, Value>("fail", &(), TaskOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, PoolError::WorkerExecution("nope".to_string()));
    }

    #[tokio::test]
    async fn unknown_type_and_shutdown_are_rejected() {
        let pool = pool(1);
        let err = pool
            .execute_task("missing", json!(null), TaskOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, PoolError::UnknownTaskType("missing".into()));

        pool.shutdown(Duration::from_millis(100)).await;
        let err = pool
            .execute_task("double", json!(1), TaskOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, PoolError::ShuttingDown);
        assert_eq!(pool.stats().total_workers, 0);
    }

    #[tokio::test]
    async fn report_mentions_pool_name() {
        let pool = pool(1);
        pool.execute_task("double", json!(1), TaskOptions::default())
            .await
            .unwrap();
        let report = pool.generate_performance_report();
        assert!(report.contains("Worker Pool Report: unit"));
        assert!(report.contains("executed:      1"));
    }
}
