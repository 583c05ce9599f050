use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use ordo_observability::{ProfilerEvent, Severity, Subscription};
use parking_lot::Mutex;
use tracing::{error, warn};

use super::config::WorkerPoolConfig;
use super::stats::PoolCounters;

/// Handle to control and join a background monitor thread.
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    /// Request shutdown and wait for the thread to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Watches profiler alerts and the pool's average timings.
///
/// - Logs every profiler alert with the pool name attached
/// - Every `monitor_interval`, warns when lifetime averages exceed the
///   per-task warning thresholds
pub(crate) struct PoolMonitor;

impl PoolMonitor {
    pub(crate) fn spawn(
        config: &WorkerPoolConfig,
        sub: Subscription<ProfilerEvent>,
        counters: Arc<Mutex<PoolCounters>>,
    ) -> std::io::Result<MonitorHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let pool = config.name.clone();
        let interval = config.monitor_interval;
        let execution_warning_ms = config.task_execution_warning.as_secs_f64() * 1000.0;
        let queue_warning_ms = config.queue_wait_warning.as_secs_f64() * 1000.0;

        let join = thread::Builder::new()
            .name(format!("{pool}-monitor"))
            .spawn(move || {
                monitor_loop(
                    &pool,
                    sub,
                    shutdown_rx,
                    counters,
                    interval,
                    execution_warning_ms,
                    queue_warning_ms,
                )
            })?;

        Ok(MonitorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn monitor_loop(
    pool: &str,
    sub: Subscription<ProfilerEvent>,
    shutdown_rx: mpsc::Receiver<()>,
    counters: Arc<Mutex<PoolCounters>>,
    interval: Duration,
    execution_warning_ms: f64,
    queue_warning_ms: f64,
) {
    let tick = Duration::from_millis(100);
    let mut last_check = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(ProfilerEvent::Alert(alert)) => {
                if alert.severity == Severity::Critical {
                    error!(
                        pool,
                        alert_type = alert.alert_type.as_str(),
                        severity = alert.severity.as_str(),
                        "performance alert: {}",
                        alert.message
                    );
                } else {
                    warn!(
                        pool,
                        alert_type = alert.alert_type.as_str(),
                        severity = alert.severity.as_str(),
                        "performance alert: {}",
                        alert.message
                    );
                }
            }
            Ok(ProfilerEvent::Metrics(_)) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if last_check.elapsed() >= interval {
            last_check = Instant::now();
            let (avg_exec, avg_queue) = {
                let c = counters.lock();
                (c.average_execution_ms(), c.average_queue_ms())
            };
            if avg_exec > execution_warning_ms {
                warn!(pool, average_execution_ms = avg_exec, "high average task execution time");
            }
            if avg_queue > queue_warning_ms {
                warn!(pool, average_queue_ms = avg_queue, "high average queue wait");
            }
        }
    }
}
