//! Error taxonomy of the execution core.

use thiserror::Error;

use crate::id::TaskId;

/// Result type used by worker pools.
pub type PoolResult<T> = Result<T, PoolError>;

/// Pool-level failure.
///
/// These reject the caller's submission directly; the pool never retries on
/// its own. Retry policy belongs to the job queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Submission rejected because the task queue is at capacity.
    #[error("task queue is full (limit {limit})")]
    QueueFull { limit: usize },

    /// Execution exceeded its bound; the worker running it was terminated.
    #[error("task {task_id} timed out after {timeout_ms}ms")]
    TaskTimeout { task_id: TaskId, timeout_ms: u64 },

    /// The task ran but its worker crashed while executing it.
    #[error("worker execution failed: {0}")]
    WorkerExecution(String),

    /// A task was handed to a worker that already had one in flight.
    #[error("worker {worker_id} is busy")]
    WorkerBusy { worker_id: usize },

    /// No handler is registered for the task type.
    #[error("no handler registered for task type: {0}")]
    UnknownTaskType(String),

    /// The pool is draining or stopped and accepts no new work.
    #[error("worker pool is shutting down")]
    ShuttingDown,

    /// Payload or result could not be (de)serialized.
    #[error("payload error: {0}")]
    Payload(String),

    /// No pool blueprint is registered under the given name.
    #[error("no worker pool registered under name: {0}")]
    UnknownPool(String),
}

impl PoolError {
    /// Whether an upstream caller should treat this as a transient,
    /// 503-class condition and retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::QueueFull { .. } | PoolError::TaskTimeout { .. } | PoolError::ShuttingDown
        )
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(value: serde_json::Error) -> Self {
        PoolError::Payload(value.to_string())
    }
}

/// Configuration loading failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value was present but could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    /// A value parsed but is outside the accepted range.
    #[error("{key} out of range: {reason}")]
    OutOfRange { key: String, reason: String },
}

impl ConfigError {
    pub fn out_of_range(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(PoolError::QueueFull { limit: 1 }.is_retryable());
        assert!(PoolError::ShuttingDown.is_retryable());
        assert!(
            PoolError::TaskTimeout {
                task_id: TaskId::new(),
                timeout_ms: 10
            }
            .is_retryable()
        );
        assert!(!PoolError::WorkerExecution("boom".into()).is_retryable());
        assert!(!PoolError::UnknownTaskType("x".into()).is_retryable());
    }
}
