//! Background jobs with retry, backoff, and retention.
//!
//! A [`JobQueue`] tracks each job through
//! `pending -> processing -> completed | retrying | failed` and runs the
//! work on the [`WorkerPoolManager`](crate::workers::WorkerPoolManager)
//! pool named after the job type. Jobs live in a [`JobStore`]; the default
//! is an in-memory table.

pub mod config;
pub mod queue;
pub mod store;
pub mod types;

pub use config::JobQueueConfig;
pub use queue::{JobQueue, JobQueueStats};
pub use store::{InMemoryJobStore, JobCounts, JobStore};
pub use types::{
    BackoffStrategy, JobData, JobError, JobEvent, JobFilter, JobOptions, JobStatus, JobType,
    RetryPolicy,
};
