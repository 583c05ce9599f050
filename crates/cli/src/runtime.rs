//! Process wiring: profiler, pools and job queue, started and stopped together.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ordo_infra::jobs::{JobQueue, JobQueueConfig};
use ordo_infra::workers::{GENERIC_POOL, TaskRegistry, WorkerPoolConfig, WorkerPoolManager};
use ordo_observability::{PerformanceProfiler, ProfilerConfig};
use serde_json::Value;
use tracing::info;

pub struct Runtime {
    pub profiler: Arc<PerformanceProfiler>,
    pub pools: Arc<WorkerPoolManager>,
    pub jobs: JobQueue,
    pool_config: WorkerPoolConfig,
}

/// Task types every ordo process can serve.
fn builtin_tasks() -> TaskRegistry {
    TaskRegistry::new()
        .with("echo", |v: Value| Ok::<_, String>(v))
        .with("checksum", |data: String| {
            Ok::<_, String>(data.bytes().fold(0u32, |acc, b| acc.rotate_left(5) ^ u32::from(b)))
        })
        .with("sleep", |ms: u64| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok::<_, String>(ms)
        })
}

impl Runtime {
    /// Build everything from `ORDO_*` variables; `sample_interval` overrides
    /// the profiler's.
    pub fn start(sample_interval: Option<Duration>) -> anyhow::Result<Self> {
        let mut profiler_config = ProfilerConfig::from_env().context("profiler configuration")?;
        if let Some(interval) = sample_interval {
            profiler_config = profiler_config.with_sample_interval(interval);
        }
        let pool_config = WorkerPoolConfig::from_env().context("worker pool configuration")?;
        let job_config = JobQueueConfig::from_env().context("job queue configuration")?;

        let profiler = PerformanceProfiler::new(profiler_config);
        let pools = Arc::new(WorkerPoolManager::new(Some(profiler.clone())));
        pools.register(GENERIC_POOL, builtin_tasks(), pool_config.clone());
        let jobs = JobQueue::start(job_config, pools.clone()).context("job queue startup")?;

        info!(max_workers = pool_config.max_workers, "ordo runtime started");
        Ok(Self {
            profiler,
            pools,
            jobs,
            pool_config,
        })
    }

    pub async fn shutdown(self) {
        self.profiler.stop_monitoring();
        self.jobs.shutdown(self.pool_config.drain_timeout).await;
        info!("ordo runtime stopped");
    }
}
