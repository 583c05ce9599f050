//! The pool's dispatcher thread.
//!
//! One thread per pool owns the task queue, the worker slots and the map of
//! callers waiting on in-flight tasks. Everything else talks to it through
//! [`DispatchEvent`]s, so none of that state needs a lock. The thread sleeps
//! until the next event or the nearest deadline (task timeout, delayed
//! respawn, drain cutoff).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use ordo_core::{PoolError, PoolResult, TaskId, WorkerResult, WorkerTask};
use ordo_observability::PerformanceProfiler;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::config::WorkerPoolConfig;
use super::instance::{InFlight, WorkerInstance};
use super::queue::TaskQueue;
use super::registry::TaskRegistry;
use super::stats::{PoolCounters, PoolStats};

pub(crate) type Reply = oneshot::Sender<PoolResult<WorkerResult>>;

#[derive(Debug)]
pub(crate) enum DispatchEvent {
    Submit {
        task: WorkerTask,
        reply: Reply,
    },
    /// The handler returned, successfully or with an error.
    TaskComplete {
        worker_id: usize,
        generation: u64,
        task_id: TaskId,
        result: WorkerResult,
    },
    /// The handler panicked; the worker thread has exited.
    TaskError {
        worker_id: usize,
        generation: u64,
        task_id: TaskId,
        message: String,
    },
    Shutdown {
        drain_timeout: Duration,
        done: Option<oneshot::Sender<()>>,
    },
}

#[derive(Debug)]
struct Queued {
    task: WorkerTask,
    reply: Reply,
}

#[derive(Debug)]
enum Slot {
    Active(WorkerInstance),
    Respawning { at: Instant },
    Retired,
}

#[derive(Debug)]
struct Drain {
    /// `None` waits for in-flight tasks without a cutoff.
    deadline: Option<Instant>,
    done: Vec<oneshot::Sender<()>>,
}

pub(crate) struct Dispatcher {
    config: WorkerPoolConfig,
    registry: Arc<TaskRegistry>,
    events_tx: mpsc::Sender<DispatchEvent>,
    events_rx: mpsc::Receiver<DispatchEvent>,
    slots: Vec<Slot>,
    queue: TaskQueue<Queued>,
    in_flight: HashMap<TaskId, Reply>,
    counters: Arc<Mutex<PoolCounters>>,
    profiler: Option<Arc<PerformanceProfiler>>,
    next_generation: u64,
    crashes: VecDeque<Instant>,
    drain: Option<Drain>,
}

impl Dispatcher {
    /// Spawn the workers and the dispatcher thread.
    pub(crate) fn start(
        config: WorkerPoolConfig,
        registry: Arc<TaskRegistry>,
        counters: Arc<Mutex<PoolCounters>>,
        profiler: Option<Arc<PerformanceProfiler>>,
    ) -> PoolResult<(mpsc::Sender<DispatchEvent>, thread::JoinHandle<()>)> {
        let (events_tx, events_rx) = mpsc::channel();

        let mut slots = Vec::with_capacity(config.max_workers);
        for id in 0..config.max_workers {
            let worker =
                WorkerInstance::spawn(&config.name, id, 0, registry.clone(), events_tx.clone())?;
            slots.push(Slot::Active(worker));
        }

        let dispatcher = Dispatcher {
            registry,
            events_tx: events_tx.clone(),
            events_rx,
            slots,
            queue: TaskQueue::new(),
            in_flight: HashMap::new(),
            counters,
            profiler,
            next_generation: 1,
            crashes: VecDeque::new(),
            drain: None,
            config,
        };
        dispatcher.publish_stats();

        let handle = thread::Builder::new()
            .name(format!("{}-dispatcher", dispatcher.config.name))
            .spawn(move || dispatcher.run())
            .map_err(|e| PoolError::WorkerExecution(format!("failed to spawn dispatcher: {e}")))?;

        Ok((events_tx, handle))
    }

    fn run(mut self) {
        info!(
            pool = %self.config.name,
            workers = self.slots.len(),
            queue_limit = self.config.task_queue_limit,
            "worker pool started"
        );

        loop {
            let event = match self.next_wakeup() {
                Some(at) => {
                    let wait = at.saturating_duration_since(Instant::now());
                    match self.events_rx.recv_timeout(wait) {
                        Ok(ev) => Some(ev),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.events_rx.recv() {
                    Ok(ev) => Some(ev),
                    Err(_) => break,
                },
            };

            if let Some(ev) = event {
                self.handle(ev);
            }
            self.expire_deadlines();
            self.respawn_due();
            if self.drain.is_none() {
                self.dispatch();
            }
            self.publish_stats();

            if self.drain_finished() {
                break;
            }
        }

        self.finish();
    }

    fn handle(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::Submit { task, reply } => self.submit(task, reply),
            DispatchEvent::TaskComplete {
                worker_id,
                generation,
                task_id,
                result,
            } => self.task_complete(worker_id, generation, task_id, result),
            DispatchEvent::TaskError {
                worker_id,
                generation,
                task_id,
                message,
            } => self.task_error(worker_id, generation, task_id, message),
            DispatchEvent::Shutdown {
                drain_timeout,
                done,
            } => self.begin_drain(drain_timeout, done),
        }
    }

    fn submit(&mut self, task: WorkerTask, reply: Reply) {
        if self.drain.is_some() {
            let _ = reply.send(Err(PoolError::ShuttingDown));
            return;
        }
        if !self.has_capacity() {
            let _ = reply.send(Err(PoolError::WorkerExecution(
                "worker pool has no live workers".to_string(),
            )));
            return;
        }
        let limit = self.config.task_queue_limit;
        if self.queue.len() >= limit {
            warn!(pool = %self.config.name, task_type = %task.task_type, limit, "task queue full");
            let _ = reply.send(Err(PoolError::QueueFull { limit }));
            return;
        }
        debug!(
            pool = %self.config.name,
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            "task queued"
        );
        self.queue
            .push(task.priority, task.seq, Queued { task, reply });
    }

    fn task_complete(
        &mut self,
        worker_id: usize,
        generation: u64,
        task_id: TaskId,
        result: WorkerResult,
    ) {
        let Some(done) = self.complete_on_slot(worker_id, generation, task_id) else {
            debug!(pool = %self.config.name, worker_id, task_id = %task_id, "discarding stale result");
            return;
        };

        let queue_ms = done.queue_wait.as_secs_f64() * 1000.0;
        self.counters
            .lock()
            .record_execution(result.execution_time_ms, queue_ms, result.success);
        self.log_task_timing(&done, result.execution_time_ms);
        self.record_hotspot(&done.task_type, result.execution_time_ms);

        if !result.success {
            debug!(
                pool = %self.config.name,
                task_id = %task_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "task failed"
            );
        }
        if let Some(reply) = self.in_flight.remove(&task_id) {
            let _ = reply.send(Ok(result));
        }
    }

    fn task_error(&mut self, worker_id: usize, generation: u64, task_id: TaskId, message: String) {
        let Some(done) = self.complete_on_slot(worker_id, generation, task_id) else {
            debug!(pool = %self.config.name, worker_id, "discarding crash report from stale worker");
            return;
        };

        let elapsed_ms = done.started_at.elapsed().as_secs_f64() * 1000.0;
        self.record_hotspot(&done.task_type, elapsed_ms);
        self.counters.lock().crashed += 1;
        error!(
            pool = %self.config.name,
            worker_id,
            task_id = %task_id,
            task_type = %done.task_type,
            error = %message,
            "worker crashed while executing task"
        );

        if let Some(reply) = self.in_flight.remove(&task_id) {
            let _ = reply.send(Err(PoolError::WorkerExecution(message)));
        }
        self.replace_worker(worker_id, true);
    }

    fn complete_on_slot(
        &mut self,
        worker_id: usize,
        generation: u64,
        task_id: TaskId,
    ) -> Option<InFlight> {
        match self.slots.get_mut(worker_id) {
            Some(Slot::Active(worker)) => worker.complete(generation, task_id),
            _ => None,
        }
    }

    fn expire_deadlines(&mut self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if let Slot::Active(worker) = slot {
                if worker.deadline().is_some_and(|d| d <= now) {
                    if let Some(in_flight) = worker.take_in_flight() {
                        expired.push((idx, in_flight));
                    }
                }
            }
        }

        for (idx, in_flight) in expired {
            let timeout_ms = u64::try_from(in_flight.timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(
                pool = %self.config.name,
                worker_id = idx,
                task_id = %in_flight.task_id,
                task_type = %in_flight.task_type,
                timeout_ms,
                "task timed out; terminating worker"
            );
            self.counters.lock().timed_out += 1;
            self.record_hotspot(
                &in_flight.task_type,
                in_flight.started_at.elapsed().as_secs_f64() * 1000.0,
            );
            if let Some(reply) = self.in_flight.remove(&in_flight.task_id) {
                let _ = reply.send(Err(PoolError::TaskTimeout {
                    task_id: in_flight.task_id,
                    timeout_ms,
                }));
            }
            self.replace_worker(idx, false);
        }
    }

    /// Terminate the worker in `idx` and decide what takes its place.
    fn replace_worker(&mut self, idx: usize, crashed: bool) {
        if let Some(Slot::Active(worker)) = self.slots.get_mut(idx) {
            worker.terminate();
        }

        if !self.config.respawn_workers || self.drain.is_some() {
            self.slots[idx] = Slot::Retired;
            warn!(pool = %self.config.name, worker_id = idx, "worker retired");
            return;
        }

        if crashed {
            let now = Instant::now();
            self.crashes.push_back(now);
            while self
                .crashes
                .front()
                .is_some_and(|t| now.duration_since(*t) > self.config.crash_loop_window)
            {
                self.crashes.pop_front();
            }
            if self.crashes.len() >= self.config.crash_loop_threshold {
                let delay = self.config.crash_respawn_delay;
                warn!(
                    pool = %self.config.name,
                    worker_id = idx,
                    recent_crashes = self.crashes.len(),
                    delay_ms = delay.as_millis() as u64,
                    "crash loop detected; delaying worker respawn"
                );
                self.slots[idx] = match now.checked_add(delay) {
                    Some(at) => Slot::Respawning { at },
                    None => Slot::Retired,
                };
                return;
            }
        }

        self.spawn_into(idx);
    }

    fn spawn_into(&mut self, idx: usize) {
        let generation = self.next_generation;
        self.next_generation += 1;
        match WorkerInstance::spawn(
            &self.config.name,
            idx,
            generation,
            self.registry.clone(),
            self.events_tx.clone(),
        ) {
            Ok(worker) => {
                self.slots[idx] = Slot::Active(worker);
                self.counters.lock().respawned += 1;
                info!(pool = %self.config.name, worker_id = idx, generation, "worker respawned");
            }
            Err(e) => {
                error!(pool = %self.config.name, worker_id = idx, error = %e, "worker respawn failed");
                self.slots[idx] = match Instant::now().checked_add(self.config.crash_respawn_delay) {
                    Some(at) => Slot::Respawning { at },
                    None => Slot::Retired,
                };
            }
        }
    }

    fn respawn_due(&mut self) {
        let now = Instant::now();
        let due: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                Slot::Respawning { at } if *at <= now => Some(idx),
                _ => None,
            })
            .collect();
        for idx in due {
            if self.drain.is_some() {
                self.slots[idx] = Slot::Retired;
            } else {
                self.spawn_into(idx);
            }
        }
    }

    /// Hand queued tasks to idle workers, highest priority first.
    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Some(idx) = self.slots.iter().position(|slot| match slot {
                Slot::Active(worker) => !worker.is_busy(),
                _ => false,
            }) else {
                break;
            };
            let Some(Queued { task, reply }) = self.queue.pop() else {
                break;
            };
            if reply.is_closed() {
                debug!(pool = %self.config.name, task_id = %task.id, "caller went away; dropping task");
                continue;
            }

            let task_id = task.id;
            let task_type = task.task_type.clone();
            let wait = task.queue_wait();
            if wait > self.config.queue_wait_warning {
                warn!(
                    pool = %self.config.name,
                    task_id = %task_id,
                    task_type = %task_type,
                    queue_wait_ms = wait.as_millis() as u64,
                    "slow queue wait"
                );
            }

            let Slot::Active(worker) = &mut self.slots[idx] else {
                continue;
            };
            match worker.execute(task) {
                Ok(()) => {
                    self.in_flight.insert(task_id, reply);
                }
                Err(e) => {
                    error!(pool = %self.config.name, worker_id = idx, error = %e, "dispatch failed");
                    let _ = reply.send(Err(e));
                    self.counters.lock().crashed += 1;
                    self.replace_worker(idx, true);
                }
            }
        }
    }

    fn begin_drain(&mut self, drain_timeout: Duration, done: Option<oneshot::Sender<()>>) {
        if let Some(drain) = self.drain.as_mut() {
            drain.done.extend(done);
            return;
        }

        let rejected = self.queue.drain();
        let rejected_count = rejected.len();
        for queued in rejected {
            let _ = queued.reply.send(Err(PoolError::ShuttingDown));
        }
        info!(
            pool = %self.config.name,
            rejected = rejected_count,
            in_flight = self.in_flight.len(),
            "worker pool draining"
        );
        self.drain = Some(Drain {
            deadline: Instant::now().checked_add(drain_timeout),
            done: done.into_iter().collect(),
        });
    }

    fn drain_finished(&self) -> bool {
        match &self.drain {
            Some(drain) => {
                self.in_flight.is_empty() || drain.deadline.is_some_and(|d| Instant::now() >= d)
            }
            None => false,
        }
    }

    fn finish(&mut self) {
        for (_, reply) in self.in_flight.drain() {
            let _ = reply.send(Err(PoolError::ShuttingDown));
        }
        for queued in self.queue.drain() {
            let _ = queued.reply.send(Err(PoolError::ShuttingDown));
        }
        for slot in self.slots.iter_mut() {
            if let Slot::Active(worker) = std::mem::replace(slot, Slot::Retired) {
                worker.join();
            }
        }
        self.publish_stats();
        if let Some(drain) = self.drain.take() {
            for done in drain.done {
                let _ = done.send(());
            }
        }
        info!(pool = %self.config.name, "worker pool stopped");
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let deadlines = self.slots.iter().filter_map(|slot| match slot {
            Slot::Active(worker) => worker.deadline(),
            Slot::Respawning { at } => Some(*at),
            Slot::Retired => None,
        });
        let drain = self.drain.as_ref().and_then(|d| d.deadline);
        deadlines.chain(drain).min()
    }

    fn has_capacity(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| !matches!(slot, Slot::Retired))
    }

    fn publish_stats(&self) {
        let mut total = 0;
        let mut busy = 0;
        for slot in &self.slots {
            match slot {
                Slot::Active(worker) => {
                    total += 1;
                    if worker.is_busy() {
                        busy += 1;
                    }
                }
                Slot::Respawning { .. } => total += 1,
                Slot::Retired => {}
            }
        }
        self.counters.lock().stats = PoolStats {
            total_workers: total,
            busy_workers: busy,
            queue_size: self.queue.len(),
            pending_tasks: self.queue.len() + self.in_flight.len(),
        };
    }

    fn record_hotspot(&self, task_type: &str, duration_ms: f64) {
        if !self.config.enable_profiling {
            return;
        }
        if let Some(profiler) = &self.profiler {
            profiler.record_hotspot(task_type, duration_ms);
        }
    }

    fn log_task_timing(&self, task: &InFlight, execution_ms: f64) {
        let critical = self.config.task_execution_critical.as_secs_f64() * 1000.0;
        let warning = self.config.task_execution_warning.as_secs_f64() * 1000.0;
        if execution_ms > critical {
            error!(
                pool = %self.config.name,
                task_id = %task.task_id,
                task_type = %task.task_type,
                execution_ms,
                "critical task execution time"
            );
        } else if execution_ms > warning {
            warn!(
                pool = %self.config.name,
                task_id = %task.task_id,
                task_type = %task.task_type,
                execution_ms,
                "slow task execution"
            );
        }
    }
}
