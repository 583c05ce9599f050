//! The job queue: tracked, retried background work on top of worker pools.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use ordo_core::{JobId, TaskOptions};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::workers::WorkerPoolManager;

use super::config::JobQueueConfig;
use super::store::{InMemoryJobStore, JobCounts, JobStore};
use super::types::{JobData, JobError, JobEvent, JobFilter, JobOptions, JobStatus, JobType};

const EVENT_CAPACITY: usize = 256;
const CANCELLED: &str = "job cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobQueueStats {
    #[serde(flatten)]
    pub counts: JobCounts,
    pub current_jobs: usize,
    pub max_concurrent_jobs: usize,
}

struct Inner {
    config: JobQueueConfig,
    store: Arc<dyn JobStore>,
    pools: Arc<WorkerPoolManager>,
    events: broadcast::Sender<JobEvent>,
    current_jobs: AtomicUsize,
    accepting: AtomicBool,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

/// Background jobs with bounded concurrency and retry.
///
/// A scheduling loop claims the best pending job whenever fewer than
/// `max_concurrent_jobs` are running and hands it to the pool named after
/// its job type. Failures go through `Retrying` with exponential backoff
/// until `max_retries` is used up. A second loop sweeps finished jobs past
/// the retention window.
pub struct JobQueue {
    inner: Arc<Inner>,
    stop: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    /// Start the queue on the current tokio runtime with an in-memory table.
    pub fn start(config: JobQueueConfig, pools: Arc<WorkerPoolManager>) -> Result<Self, JobError> {
        Self::with_store(config, pools, Arc::new(InMemoryJobStore::new()))
    }

    pub fn with_store(
        config: JobQueueConfig,
        pools: Arc<WorkerPoolManager>,
        store: Arc<dyn JobStore>,
    ) -> Result<Self, JobError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            config,
            store,
            pools,
            events,
            current_jobs: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            timers: Mutex::new(Vec::new()),
        });
        let (stop, stop_rx) = watch::channel(false);

        let scheduler = tokio::spawn(schedule_loop(inner.clone(), stop_rx.clone()));
        let sweeper = tokio::spawn(sweep_loop(inner.clone(), stop_rx));
        info!(
            max_concurrent_jobs = inner.config.max_concurrent_jobs,
            poll_interval_ms = inner.config.poll_interval.as_millis() as u64,
            "job queue started"
        );

        Ok(Self {
            inner,
            stop,
            loops: Mutex::new(vec![scheduler, sweeper]),
        })
    }

    /// Track a new job. With a delay, the job only becomes visible (and
    /// schedulable) once the delay has elapsed.
    pub fn add_job(
        &self,
        job_type: impl Into<JobType>,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobId, JobError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(JobError::ShuttingDown);
        }
        let cfg = &self.inner.config;
        let mut job = JobData::new(
            JobId::new(),
            job_type.into(),
            payload,
            options.priority.unwrap_or(cfg.default_priority),
            options.max_retries.unwrap_or(cfg.default_max_retries),
        );
        job.timeout_ms = options
            .timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        let id = job.id;

        match options.delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                debug!(job_id = %id, delay_ms = delay.as_millis() as u64, "job delayed");
                let inner = self.inner.clone();
                self.inner.spawn_timer(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = inner.insert(job) {
                        warn!(job_id = %id, error = %e, "delayed job dropped");
                    }
                });
            }
            None => self.inner.insert(job)?,
        }
        Ok(id)
    }

    pub fn get_job(&self, id: JobId) -> Option<JobData> {
        self.inner.store.get(id)
    }

    /// Cancel a job that has not started yet.
    ///
    /// Returns false when the job is unknown or already past `Pending`;
    /// running jobs are never interrupted.
    pub fn cancel_job(&self, id: JobId) -> bool {
        match self.inner.store.cancel(id, CANCELLED) {
            Ok(true) => {
                info!(job_id = %id, "job cancelled");
                self.inner.emit(JobEvent::StatusChanged {
                    id,
                    from: JobStatus::Pending,
                    to: JobStatus::Failed,
                });
                self.inner.emit(JobEvent::Cancelled { id });
                true
            }
            Ok(false) => false,
            Err(_) => false,
        }
    }

    /// Jobs matching `filter`, highest priority first, then oldest first.
    pub fn get_jobs(&self, filter: &JobFilter) -> Vec<JobData> {
        self.inner.store.list(filter)
    }

    pub fn stats(&self) -> JobQueueStats {
        JobQueueStats {
            counts: self.inner.store.counts(),
            current_jobs: self.inner.current_jobs.load(Ordering::SeqCst),
            max_concurrent_jobs: self.inner.config.max_concurrent_jobs,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Remove finished jobs older than the retention window.
    pub fn cleanup_old_jobs(&self) -> usize {
        self.inner.cleanup()
    }

    /// Poll until the job has an outcome or `timeout` elapses.
    pub async fn wait_for(&self, id: JobId, timeout: Duration) -> Result<Value, JobError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut seen = false;
        loop {
            if let Some(job) = self.get_job(id) {
                seen = true;
                if let Some(outcome) = job.outcome() {
                    return outcome;
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(if seen {
                    JobError::WaitTimeout(id)
                } else {
                    JobError::NotFound(id)
                });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn queue_pdf_generation(&self, payload: Value, options: JobOptions) -> Result<JobId, JobError> {
        self.add_job(JobType::PdfGeneration, payload, options)
    }

    pub fn queue_email_send(&self, payload: Value, options: JobOptions) -> Result<JobId, JobError> {
        self.add_job(JobType::EmailSend, payload, options)
    }

    pub fn queue_data_export(&self, payload: Value, options: JobOptions) -> Result<JobId, JobError> {
        self.add_job(JobType::DataExport, payload, options)
    }

    pub fn queue_image_processing(
        &self,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobId, JobError> {
        self.add_job(JobType::ImageProcessing, payload, options)
    }

    pub fn queue_report_generation(
        &self,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobId, JobError> {
        self.add_job(JobType::ReportGeneration, payload, options)
    }

    /// Stop scheduling, wait up to `timeout` for running jobs, then shut
    /// the pools down.
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let _ = self.stop.send(true);
        for handle in self.loops.lock().drain(..) {
            handle.abort();
        }
        for handle in self.inner.timers.lock().drain(..) {
            handle.abort();
        }

        let deadline = Instant::now().checked_add(timeout);
        while self.inner.current_jobs.load(Ordering::SeqCst) > 0
            && deadline.is_none_or(|d| Instant::now() < d)
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let abandoned = self.inner.current_jobs.load(Ordering::SeqCst);
        if abandoned > 0 {
            warn!(abandoned, "job queue shut down with jobs still running");
        }

        let remaining = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::MAX);
        self.inner.pools.shutdown_all(remaining).await;
        info!("job queue stopped");
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
        for handle in self.loops.get_mut().drain(..) {
            handle.abort();
        }
        for handle in self.inner.timers.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Inner {
    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn insert(&self, job: JobData) -> Result<(), JobError> {
        let id = job.id;
        let job_type = job.job_type.clone();
        self.store.insert(job)?;
        debug!(job_id = %id, job_type = %job_type, "job added");
        self.emit(JobEvent::Added { id, job_type });
        Ok(())
    }

    fn spawn_timer<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.timers.lock();
        timers.retain(|h| !h.is_finished());
        timers.push(tokio::spawn(fut));
    }

    fn cleanup(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let removed = self.store.remove_finished_before(Utc::now() - retention);
        if removed > 0 {
            info!(removed, "old jobs cleaned up");
        }
        removed
    }

    /// Claim pending jobs while slots are free; returns how many started.
    fn fill_slots(self: &Arc<Self>) -> usize {
        let mut started = 0;
        while self.current_jobs.load(Ordering::SeqCst) < self.config.max_concurrent_jobs {
            let Some(job) = self.store.claim_next() else {
                break;
            };
            self.current_jobs.fetch_add(1, Ordering::SeqCst);
            self.emit(JobEvent::StatusChanged {
                id: job.id,
                from: JobStatus::Pending,
                to: JobStatus::Processing,
            });
            tokio::spawn(process_job(self.clone(), job));
            started += 1;
        }
        started
    }
}

async fn schedule_loop(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            break;
        }
        inner.fill_slots();
        tokio::select! {
            _ = tokio::time::sleep(inner.config.poll_interval) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("job scheduler stopped");
}

async fn sweep_loop(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.cleanup_interval);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                inner.cleanup();
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

async fn process_job(inner: Arc<Inner>, mut job: JobData) {
    let id = job.id;
    let task_type = job.job_type.as_str().to_string();
    let timeout = job
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(inner.config.job_timeout);

    info!(job_id = %id, job_type = %task_type, attempt = job.retry_count + 1, "processing job");

    let outcome = match inner.pools.get_pool(&task_type) {
        Ok(pool) => {
            let options = TaskOptions::new()
                .with_priority(job.priority)
                .with_timeout(timeout);
            match pool.execute_task(&task_type, job.payload.clone(), options).await {
                Ok(result) => result.into_result(),
                Err(e) => Err(e.to_string()),
            }
        }
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok(result) => match job.complete(result) {
            Ok(from) => {
                info!(job_id = %id, job_type = %task_type, "job completed");
                inner.save(&job);
                inner.emit(JobEvent::StatusChanged {
                    id,
                    from,
                    to: JobStatus::Completed,
                });
            }
            Err(e) => error!(job_id = %id, error = %e, "job completion rejected"),
        },
        Err(message) => match job.fail(&message) {
            Ok(from) => {
                let to = job.status;
                inner.save(&job);
                inner.emit(JobEvent::StatusChanged { id, from, to });
                if to == JobStatus::Retrying {
                    let delay = inner.config.retry.delay_for_retry(job.retry_count);
                    warn!(
                        job_id = %id,
                        job_type = %task_type,
                        retry_count = job.retry_count,
                        max_retries = job.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "job failed; retry scheduled"
                    );
                    let timer_inner = inner.clone();
                    inner.spawn_timer(async move {
                        tokio::time::sleep(delay).await;
                        timer_inner.requeue(id);
                    });
                } else {
                    error!(
                        job_id = %id,
                        job_type = %task_type,
                        retry_count = job.retry_count,
                        error = %message,
                        "job failed permanently"
                    );
                }
            }
            Err(e) => error!(job_id = %id, error = %e, "job failure rejected"),
        },
    }

    inner.current_jobs.fetch_sub(1, Ordering::SeqCst);
}

impl Inner {
    fn save(&self, job: &JobData) {
        if let Err(e) = self.store.update(job) {
            warn!(job_id = %job.id, error = %e, "job record lost");
        }
    }

    /// Put a job whose backoff elapsed back in line.
    fn requeue(&self, id: JobId) {
        let Some(mut job) = self.store.get(id) else {
            return;
        };
        match job.transition(JobStatus::Pending) {
            Ok(from) => {
                self.save(&job);
                self.emit(JobEvent::StatusChanged {
                    id,
                    from,
                    to: JobStatus::Pending,
                });
            }
            Err(e) => debug!(job_id = %id, error = %e, "retry skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::{GENERIC_POOL, TaskRegistry, WorkerPoolConfig};
    use serde_json::json;

    fn queue() -> JobQueue {
        let pools = Arc::new(WorkerPoolManager::new(None));
        pools.register(
            GENERIC_POOL,
            TaskRegistry::new().with("echo", |v: Value| Ok::<_, String>(v)),
            WorkerPoolConfig::default()
                .with_max_workers(2)
                .with_profiling(false),
        );
        JobQueue::start(
            JobQueueConfig::default().with_poll_interval(Duration::from_millis(10)),
            pools,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn completes_a_job() {
        let q = queue();
        let id = q.add_job("echo", json!({"n": 1}), JobOptions::new()).unwrap();
        let result = q.wait_for(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result, json!({"n": 1}));

        let job = q.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
        q.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn delayed_job_is_invisible_until_due() {
        let q = queue();
        let id = q
            .add_job(
                "echo",
                json!(1),
                JobOptions::new().with_delay(Duration::from_millis(150)),
            )
            .unwrap();
        assert!(q.get_job(id).is_none());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(q.get_job(id).is_some());
        q.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_jobs() {
        let q = queue();
        let id = q.add_job("echo", json!(1), JobOptions::new()).unwrap();
        q.wait_for(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(q.cleanup_old_jobs(), 0);
        assert!(q.get_job(id).is_some());
        q.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_start() {
        let pools = Arc::new(WorkerPoolManager::new(None));
        let zero_sweep = JobQueueConfig {
            cleanup_interval: Duration::ZERO,
            ..JobQueueConfig::default()
        };
        assert!(matches!(
            JobQueue::start(zero_sweep, pools.clone()),
            Err(JobError::Config(_))
        ));
        let zero_poll = JobQueueConfig::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(
            JobQueue::start(zero_poll, pools),
            Err(JobError::Config(_))
        ));
    }

    #[tokio::test]
    async fn unbounded_job_timeout_is_kept_saturated() {
        let q = queue();
        let id = q
            .add_job("echo", json!(7), JobOptions::new().with_timeout(Duration::MAX))
            .unwrap();
        assert_eq!(q.wait_for(id, Duration::from_secs(5)).await, Ok(json!(7)));
        assert_eq!(q.get_job(id).unwrap().timeout_ms, Some(u64::MAX));
        q.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn rejects_jobs_after_shutdown() {
        let q = queue();
        q.shutdown(Duration::from_millis(100)).await;
        assert_eq!(
            q.add_job("echo", json!(1), JobOptions::new()),
            Err(JobError::ShuttingDown)
        );
    }
}
