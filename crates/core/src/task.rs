//! Task and result types exchanged with worker pools.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::TaskId;

/// A unit of work submitted to a worker pool.
///
/// Immutable once enqueued; consumed exactly once by a worker.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub id: TaskId,
    pub task_type: String,
    pub payload: Value,
    pub priority: i32,
    pub timeout: Duration,
    /// Submission order, used to break priority ties.
    pub seq: u64,
    pub enqueued_at: Instant,
}

impl WorkerTask {
    pub fn new(
        task_type: impl Into<String>,
        payload: Value,
        priority: i32,
        timeout: Duration,
        seq: u64,
    ) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            payload,
            priority,
            timeout,
            seq,
            enqueued_at: Instant::now(),
        }
    }

    /// Time spent waiting since submission.
    pub fn queue_wait(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Per-submission overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    pub priority: Option<i32>,
    pub timeout: Option<Duration>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a task as reported by the worker that ran it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: f64,
}

impl WorkerResult {
    pub fn ok(data: Value, execution_time_ms: f64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms,
        }
    }

    pub fn failed(error: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            execution_time_ms,
        }
    }

    /// Collapse into a plain result; failures without a message get a
    /// generic one.
    pub fn into_result(self) -> Result<Value, String> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "worker execution failed".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_result_without_message_gets_generic_error() {
        let result = WorkerResult {
            success: false,
            data: None,
            error: None,
            execution_time_ms: 1.0,
        };
        assert_eq!(result.into_result().unwrap_err(), "worker execution failed");
    }

    #[test]
    fn successful_result_serializes_without_error_field() {
        let result = WorkerResult::ok(json!({"pages": 3}), 12.5);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], json!(true));
        assert!(value.get("error").is_none());
        assert_eq!(result.into_result().unwrap(), json!({"pages": 3}));
    }

    #[test]
    fn options_builder_sets_fields() {
        let opts = TaskOptions::new()
            .with_priority(5)
            .with_timeout(Duration::from_millis(250));
        assert_eq!(opts.priority, Some(5));
        assert_eq!(opts.timeout, Some(Duration::from_millis(250)));
    }
}
