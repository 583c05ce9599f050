//! Core job types and policies.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ordo_core::{ConfigError, JobId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of background work; doubles as task type and pool name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    PdfGeneration,
    EmailSend,
    DataExport,
    ImageProcessing,
    ReportGeneration,
    Custom(String),
}

impl JobType {
    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobType::PdfGeneration => "pdf-generation",
            JobType::EmailSend => "email-send",
            JobType::DataExport => "data-export",
            JobType::ImageProcessing => "image-processing",
            JobType::ReportGeneration => "report-generation",
            JobType::Custom(name) => name,
        }
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pdf-generation" => JobType::PdfGeneration,
            "email-send" => JobType::EmailSend,
            "data-export" => JobType::DataExport,
            "image-processing" => JobType::ImageProcessing,
            "report-generation" => JobType::ReportGeneration,
            _ => JobType::Custom(value),
        }
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        match value {
            JobType::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be picked up
    Pending,
    /// Running on a worker pool
    Processing,
    Completed,
    /// Permanently failed (or cancelled before it ran)
    Failed,
    /// Failed, waiting out its backoff before going back to pending
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed lifecycle edges; `Pending -> Failed` is cancellation.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Retrying)
                | (Retrying, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retrying" => Ok(JobStatus::Retrying),
            other => Err(ConfigError::Invalid {
                key: "job_status".to_string(),
                value: other.to_string(),
                reason: "unknown job status".to_string(),
            }),
        }
    }
}

/// Job-level failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    /// Retries used up; carries the last failure message.
    #[error("job {id} failed permanently: {error}")]
    Exhausted { id: JobId, error: String },
    #[error("timed out waiting for job {0}")]
    WaitTimeout(JobId),
    #[error("job queue is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// base * 2^retry_count
    #[default]
    Exponential,
    /// base * retry_count
    Linear,
}

/// How long a failed job waits before it is pending again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Cap applied after jitter.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Additive jitter as a fraction of the delay, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delays and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry_count` (1-based), randomized.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        let sample = rand::rng().random_range(0.0..1.0);
        self.delay_with_sample(retry_count, sample)
    }

    /// Deterministic form of [`delay_for_retry`](Self::delay_for_retry);
    /// `sample` in `[0, 1)` selects the jitter.
    pub fn delay_with_sample(&self, retry_count: u32, sample: f64) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => base_ms * 2_f64.powi(retry_count.min(62) as i32),
            BackoffStrategy::Linear => base_ms * retry_count as f64,
        };

        let jitter = self.jitter.clamp(0.0, 0.999);
        let jittered = delay_ms + delay_ms * jitter * sample.clamp(0.0, 1.0);
        let capped = jittered.min(self.max_delay.as_secs_f64() * 1000.0);
        Duration::from_micros((capped * 1000.0) as u64)
    }
}

/// A tracked unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: Value,
    pub priority: i32,
    pub status: JobStatus,
    /// 0..=100
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Latest failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Per-job execution bound; the queue default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl JobData {
    pub fn new(id: JobId, job_type: JobType, payload: Value, priority: i32, max_retries: u32) -> Self {
        Self {
            id,
            job_type,
            payload,
            priority,
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            timeout_ms: None,
        }
    }

    /// Move to `to`, stamping timestamps; returns the previous status.
    pub fn transition(&mut self, to: JobStatus) -> Result<JobStatus, JobError> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from,
                to,
            });
        }
        let now = Utc::now();
        match to {
            JobStatus::Processing => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed => self.completed_at = Some(now),
            JobStatus::Pending | JobStatus::Retrying => {}
        }
        self.status = to;
        Ok(from)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn complete(&mut self, result: Value) -> Result<JobStatus, JobError> {
        let from = self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.progress = 100;
        Ok(from)
    }

    /// Record a failed attempt: `Retrying` while retries remain, else `Failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<JobStatus, JobError> {
        self.error = Some(error.into());
        if self.can_retry() {
            let from = self.transition(JobStatus::Retrying)?;
            self.retry_count += 1;
            Ok(from)
        } else {
            self.transition(JobStatus::Failed)
        }
    }

    /// Final outcome, if the job has one.
    pub fn outcome(&self) -> Option<Result<Value, JobError>> {
        match self.status {
            JobStatus::Completed => Some(Ok(self.result.clone().unwrap_or(Value::Null))),
            JobStatus::Failed => Some(Err(JobError::Exhausted {
                id: self.id,
                error: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "job failed".to_string()),
            })),
            _ => None,
        }
    }
}

/// Per-job overrides for `add_job`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub delay: Option<Duration>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Query for `get_jobs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &JobData) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.job_type.as_ref().is_none_or(|t| &job.job_type == t)
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Lifecycle notifications published by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Added {
        id: JobId,
        job_type: JobType,
    },
    StatusChanged {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    Cancelled {
        id: JobId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn job_type_names_are_stable() {
        assert_eq!(JobType::PdfGeneration.as_str(), "pdf-generation");
        assert_eq!(JobType::from("email-send"), JobType::EmailSend);
        assert_eq!(JobType::custom("resize"), JobType::Custom("resize".into()));
        assert_eq!(serde_json::to_value(JobType::DataExport).unwrap(), json!("data-export"));
        let parsed: JobType = serde_json::from_value(json!("report-generation")).unwrap();
        assert_eq!(parsed, JobType::ReportGeneration);
    }

    #[test]
    fn exponential_backoff_without_jitter() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_with_sample(1, 0.5), Duration::from_secs(2));
        assert_eq!(policy.delay_with_sample(2, 0.5), Duration::from_secs(4));
        assert_eq!(policy.delay_with_sample(3, 0.5), Duration::from_secs(8));
        assert_eq!(policy.delay_with_sample(20, 0.5), Duration::from_secs(300));
    }

    #[test]
    fn fixed_and_linear_backoff() {
        let fixed = RetryPolicy::fixed(Duration::from_millis(500));
        assert_eq!(fixed.delay_with_sample(1, 0.9), Duration::from_millis(500));
        assert_eq!(fixed.delay_with_sample(4, 0.9), Duration::from_millis(500));

        let linear = RetryPolicy {
            base_delay: Duration::from_millis(100),
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(linear.delay_with_sample(3, 0.0), Duration::from_millis(300));
    }

    #[test]
    fn jitter_is_additive_and_bounded() {
        let policy = RetryPolicy::default();
        let low = policy.delay_with_sample(1, 0.0);
        let high = policy.delay_with_sample(1, 0.999);
        assert_eq!(low, Duration::from_secs(2));
        assert!(high > low && high < Duration::from_millis(2200));
    }

    proptest! {
        #[test]
        fn delays_strictly_increase_below_the_cap(
            samples in proptest::collection::vec(0.0f64..1.0, 8),
            jitter in 0.0f64..0.99,
        ) {
            let policy = RetryPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_secs(3600),
                strategy: BackoffStrategy::Exponential,
                jitter,
            };
            let delays: Vec<Duration> = samples
                .iter()
                .enumerate()
                .map(|(i, s)| policy.delay_with_sample(i as u32 + 1, *s))
                .collect();
            for pair in delays.windows(2) {
                prop_assert!(pair[1] > pair[0]);
            }
        }
    }

    #[test]
    fn lifecycle_edges_are_enforced() {
        let mut job = JobData::new(JobId::new(), JobType::EmailSend, json!({}), 0, 1);
        assert!(job.complete(json!(1)).is_err());

        job.transition(JobStatus::Processing).unwrap();
        assert!(job.started_at.is_some());
        job.fail("smtp down").unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.retry_count, 1);

        job.transition(JobStatus::Pending).unwrap();
        job.transition(JobStatus::Processing).unwrap();
        job.fail("smtp still down").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 1);
        assert!(job.completed_at.is_some());
        assert_eq!(
            job.outcome(),
            Some(Err(JobError::Exhausted {
                id: job.id,
                error: "smtp still down".into()
            }))
        );
    }

    #[test]
    fn filter_matches_status_and_type() {
        let job = JobData::new(JobId::new(), JobType::DataExport, json!({}), 0, 0);
        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter::default().with_status(JobStatus::Pending).matches(&job));
        assert!(!JobFilter::default().with_type(JobType::EmailSend).matches(&job));
    }
}
