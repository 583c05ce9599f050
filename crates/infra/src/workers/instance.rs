//! A single worker: one OS thread fed through a channel.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use ordo_core::{PoolError, PoolResult, TaskId, WorkerResult, WorkerTask};
use tracing::{debug, error};

use super::dispatcher::DispatchEvent;
use super::registry::TaskRegistry;

/// Bookkeeping for the task a worker is running.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub task_id: TaskId,
    pub task_type: String,
    pub started_at: Instant,
    /// `None` when the timeout is too large to represent as an instant.
    pub deadline: Option<Instant>,
    pub timeout: Duration,
    pub queue_wait: Duration,
}

/// Handle to one worker thread.
///
/// Holds at most one task: `is_busy()` is true exactly while a task is in
/// flight. Results come back to the dispatcher as [`DispatchEvent`]s tagged
/// with the worker id, its generation and the task id.
#[derive(Debug)]
pub struct WorkerInstance {
    id: usize,
    generation: u64,
    sender: Option<mpsc::Sender<WorkerTask>>,
    thread: Option<thread::JoinHandle<()>>,
    current: Option<InFlight>,
}

impl WorkerInstance {
    /// Spawn the worker thread.
    pub(crate) fn spawn(
        pool_name: &str,
        id: usize,
        generation: u64,
        registry: Arc<TaskRegistry>,
        events: mpsc::Sender<DispatchEvent>,
    ) -> PoolResult<Self> {
        let (tx, rx) = mpsc::channel::<WorkerTask>();
        let thread = thread::Builder::new()
            .name(format!("{pool_name}-worker-{id}"))
            .spawn(move || worker_loop(id, generation, rx, registry, events))
            .map_err(|e| PoolError::WorkerExecution(format!("failed to spawn worker thread: {e}")))?;

        debug!(worker_id = id, generation, "worker started");
        Ok(Self {
            id,
            generation,
            sender: Some(tx),
            thread: Some(thread),
            current: None,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current.as_ref().map(|c| c.task_id)
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().and_then(|c| c.deadline)
    }

    /// Hand a task to the worker and arm its deadline.
    ///
    /// Fails with [`PoolError::WorkerBusy`] if a task is already in flight.
    pub fn execute(&mut self, task: WorkerTask) -> PoolResult<()> {
        if self.current.is_some() {
            return Err(PoolError::WorkerBusy { worker_id: self.id });
        }
        let Some(sender) = self.sender.as_ref() else {
            return Err(PoolError::WorkerExecution(format!(
                "worker {} has been terminated",
                self.id
            )));
        };

        let now = Instant::now();
        let in_flight = InFlight {
            task_id: task.id,
            task_type: task.task_type.clone(),
            started_at: now,
            deadline: now.checked_add(task.timeout),
            timeout: task.timeout,
            queue_wait: now.saturating_duration_since(task.enqueued_at),
        };

        sender.send(task).map_err(|_| {
            PoolError::WorkerExecution(format!("worker {} thread is gone", self.id))
        })?;
        self.current = Some(in_flight);
        Ok(())
    }

    /// Clear the in-flight task if the event belongs to it.
    ///
    /// Returns `None` for events from a previous generation or for a task
    /// this worker is not running.
    pub(crate) fn complete(&mut self, generation: u64, task_id: TaskId) -> Option<InFlight> {
        if generation != self.generation {
            return None;
        }
        match &self.current {
            Some(c) if c.task_id == task_id => self.current.take(),
            _ => None,
        }
    }

    /// Take the in-flight task regardless of its state (timeouts).
    pub(crate) fn take_in_flight(&mut self) -> Option<InFlight> {
        self.current.take()
    }

    /// Close the channel and detach the thread.
    ///
    /// A thread stuck in a handler keeps running until the handler returns;
    /// whatever it reports afterwards is discarded by the generation check.
    pub fn terminate(&mut self) {
        self.sender.take();
        self.current.take();
        if let Some(handle) = self.thread.take() {
            drop(handle);
        }
    }

    /// Close the channel and wait for an idle thread to exit.
    pub fn join(mut self) {
        self.sender.take();
        if self.current.is_some() {
            self.terminate();
            return;
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    id: usize,
    generation: u64,
    rx: mpsc::Receiver<WorkerTask>,
    registry: Arc<TaskRegistry>,
    events: mpsc::Sender<DispatchEvent>,
) {
    while let Ok(task) = rx.recv() {
        let task_id = task.id;
        let started = Instant::now();

        let Some(handler) = registry.get(&task.task_type) else {
            let result = WorkerResult::failed(
                format!("no handler registered for task type: {}", task.task_type),
                0.0,
            );
            let _ = events.send(DispatchEvent::TaskComplete {
                worker_id: id,
                generation,
                task_id,
                result,
            });
            continue;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| handler(task.payload)));
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(data)) => {
                let _ = events.send(DispatchEvent::TaskComplete {
                    worker_id: id,
                    generation,
                    task_id,
                    result: WorkerResult::ok(data, elapsed_ms),
                });
            }
            Ok(Err(message)) => {
                let _ = events.send(DispatchEvent::TaskComplete {
                    worker_id: id,
                    generation,
                    task_id,
                    result: WorkerResult::failed(message, elapsed_ms),
                });
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(worker_id = id, task_id = %task_id, panic = %message, "worker crashed");
                let _ = events.send(DispatchEvent::TaskError {
                    worker_id: id,
                    generation,
                    task_id,
                    message,
                });
                // The thread state after a panic is not trusted; retire it.
                return;
            }
        }
    }
    debug!(worker_id = id, generation, "worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn registry() -> Arc<TaskRegistry> {
        let mut r = TaskRegistry::new();
        r.register("echo", |v: Value| Ok::<_, String>(v));
        r.register("sleep", |ms: u64| {
            thread::sleep(Duration::from_millis(ms));
            Ok::<_, String>(ms)
        });
        r.register("panic", |_: Value| -> Result<Value, String> { panic!("boom") });
        Arc::new(r)
    }

    fn task(task_type: &str, payload: Value) -> WorkerTask {
        WorkerTask::new(task_type, payload, 0, Duration::from_secs(5), 0)
    }

    #[test]
    fn rejects_second_task_while_busy() {
        let (tx, rx) = mpsc::channel();
        let mut worker = WorkerInstance::spawn("test", 0, 0, registry(), tx).unwrap();

        worker.execute(task("sleep", json!(50))).unwrap();
        assert!(worker.is_busy());
        let err = worker.execute(task("echo", json!(1))).unwrap_err();
        assert_eq!(err, PoolError::WorkerBusy { worker_id: 0 });

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            DispatchEvent::TaskComplete {
                task_id, result, ..
            } => {
                assert!(worker.complete(0, task_id).is_some());
                assert!(result.success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!worker.is_busy());
        worker.join();
    }

    #[test]
    fn stale_generation_is_ignored() {
        let (tx, _rx) = mpsc::channel();
        let mut worker = WorkerInstance::spawn("test", 1, 7, registry(), tx).unwrap();
        let t = task("echo", json!("x"));
        let id = t.id;
        worker.execute(t).unwrap();

        assert!(worker.complete(6, id).is_none());
        assert!(worker.is_busy());
        assert!(worker.complete(7, TaskId::new()).is_none());
        assert!(worker.complete(7, id).is_some());
    }

    #[test]
    fn panicking_handler_reports_task_error() {
        let (tx, rx) = mpsc::channel();
        let mut worker = WorkerInstance::spawn("test", 2, 0, registry(), tx).unwrap();
        worker.execute(task("panic", json!(null))).unwrap();

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            DispatchEvent::TaskError { message, .. } => assert_eq!(message, "boom"),
            other => panic!("unexpected event: {other:?}"),
        }
        worker.terminate();
        assert!(!worker.is_busy());
    }

    #[test]
    fn unbounded_timeout_arms_no_deadline() {
        let (tx, rx) = mpsc::channel();
        let mut worker = WorkerInstance::spawn("test", 3, 0, registry(), tx).unwrap();
        worker
            .execute(WorkerTask::new("echo", json!(1), 0, Duration::MAX, 0))
            .unwrap();
        assert!(worker.is_busy());
        assert_eq!(worker.deadline(), None);

        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            DispatchEvent::TaskComplete { .. }
        ));
        worker.join();
    }
}
