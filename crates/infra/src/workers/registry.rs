//! Task handlers keyed by task type.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Type-erased handler run on a worker thread.
pub type TaskHandler = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Handlers available to a pool's workers.
///
/// Payload and result types are fixed when a handler is registered; the
/// registry erases them to JSON so tasks can cross the thread boundary.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, TaskHandler>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("TaskRegistry")
            .field("task_types", &types)
            .finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strongly-typed handler for `task_type`.
    ///
    /// A payload that does not deserialize into `P` fails the task.
    pub fn register<P, R, E, F>(&mut self, task_type: impl Into<String>, handler: F) -> &mut Self
    where
        P: DeserializeOwned,
        R: Serialize,
        E: Display,
        F: Fn(P) -> Result<R, E> + Send + Sync + 'static,
    {
        let erased = move |payload: Value| -> Result<Value, String> {
            let input: P =
                serde_json::from_value(payload).map_err(|e| format!("invalid payload: {e}"))?;
            let output = handler(input).map_err(|e| e.to_string())?;
            serde_json::to_value(output).map_err(|e| format!("invalid result: {e}"))
        };
        self.handlers.insert(task_type.into(), Arc::new(erased));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<P, R, E, F>(mut self, task_type: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned,
        R: Serialize,
        E: Display,
        F: Fn(P) -> Result<R, E> + Send + Sync + 'static,
    {
        self.register(task_type, handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<TaskHandler> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    #[test]
    fn typed_handler_round_trips_through_json() {
        let registry = TaskRegistry::new().with("add", |p: Add| Ok::<_, String>(p.a + p.b));
        let handler = registry.get("add").unwrap();
        assert_eq!(handler(json!({"a": 2, "b": 3})).unwrap(), json!(5));
    }

    #[test]
    fn malformed_payload_is_a_task_failure() {
        let registry = TaskRegistry::new().with("add", |p: Add| Ok::<_, String>(p.a + p.b));
        let handler = registry.get("add").unwrap();
        let err = handler(json!({"a": "two"})).unwrap_err();
        assert!(err.starts_with("invalid payload"));
    }

    #[test]
    fn handler_errors_are_stringified() {
        let registry =
            TaskRegistry::new().with("fail", |_: Value| Err::<Value, _>("render failed"));
        assert_eq!(registry.get("fail").unwrap()(json!(null)).unwrap_err(), "render failed");
        assert!(!registry.contains("missing"));
        assert_eq!(registry.task_types(), vec!["fail".to_string()]);
    }
}
