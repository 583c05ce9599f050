//! Runtime health profiler.
//!
//! The profiler samples scheduling lag, process memory and CPU on a fixed
//! interval, keeps a bounded history of snapshots and publishes threshold
//! alerts on an [`EventBus`]. It does not depend on the worker pool; the pool
//! feeds it task timings through [`PerformanceProfiler::record_hotspot`].

mod alerts;
mod config;
mod event_loop;
mod hotspots;
mod metrics;
mod sampler;

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::{EventBus, Subscription};

pub use alerts::{
    AlertType, PerformanceAlert, Severity, evaluate_thresholds, pause_severity,
    slow_operation_severity,
};
pub use config::ProfilerConfig;
pub use event_loop::EventLoopMonitor;
pub use hotspots::Hotspot;
pub use metrics::{CpuUsage, EventLoopStats, GcStats, HeapStats, MemoryUsage, PerformanceMetrics};

use hotspots::HotspotLedger;
use sampler::ResourceSampler;

/// Number of hotspots listed in reports.
const REPORT_HOTSPOTS: usize = 10;

/// Message published to profiler subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfilerEvent {
    Metrics(PerformanceMetrics),
    Alert(PerformanceAlert),
}

struct SamplerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Structured profiler report (`generate_report` renders it as text).
#[derive(Debug, Clone, Serialize)]
pub struct ProfilerReport {
    pub generated_at: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
    pub event_loop: EventLoopStats,
    pub gc: GcStats,
    pub hotspots: Vec<Hotspot>,
    pub health: Vec<String>,
}

pub struct PerformanceProfiler {
    config: ProfilerConfig,
    event_loop: EventLoopMonitor,
    sampler: ResourceSampler,
    hotspots: HotspotLedger,
    history: Mutex<VecDeque<PerformanceMetrics>>,
    gc: Mutex<GcStats>,
    bus: EventBus<ProfilerEvent>,
    monitor: Mutex<Option<SamplerHandle>>,
}

impl std::fmt::Debug for PerformanceProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceProfiler")
            .field("config", &self.config)
            .field("monitoring", &self.is_monitoring())
            .finish_non_exhaustive()
    }
}

impl PerformanceProfiler {
    pub fn new(config: ProfilerConfig) -> Arc<Self> {
        Arc::new(Self {
            event_loop: EventLoopMonitor::new(config.lag_sample_capacity),
            sampler: ResourceSampler::new(),
            hotspots: HotspotLedger::default(),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            gc: Mutex::new(GcStats::default()),
            bus: EventBus::new(),
            monitor: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Spawn the sampler on the current tokio runtime.
    ///
    /// Calling this while already monitoring logs a warning and does nothing.
    pub fn start_monitoring(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(|h| !h.task.is_finished()) {
            tracing::warn!("performance monitoring already running");
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.sample_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
                let Some(profiler) = weak.upgrade() else {
                    break;
                };
                profiler.collect_sample().await;
            }
            tracing::debug!("performance sampler exited");
        });

        *monitor = Some(SamplerHandle { stop, task });
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "performance monitoring started"
        );
    }

    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            let _ = handle.stop.send(true);
            handle.task.abort();
            tracing::info!("performance monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Take one full sample (lag probe plus resources) and ingest it.
    pub async fn collect_sample(&self) -> PerformanceMetrics {
        let lag = self.event_loop.probe().await;
        let resources = self.sampler.sample();
        let metrics = PerformanceMetrics {
            event_loop_lag_ms: lag,
            memory: resources.memory,
            cpu: resources.cpu,
            heap: resources.heap,
            timestamp: Utc::now(),
        };
        self.ingest(metrics.clone());
        metrics
    }

    /// Append a snapshot to the history, evaluate thresholds and publish.
    pub fn ingest(&self, metrics: PerformanceMetrics) {
        {
            let mut history = self.history.lock();
            if history.len() >= self.config.history_capacity {
                history.pop_front();
            }
            history.push_back(metrics.clone());
        }

        for alert in evaluate_thresholds(&self.config, &metrics) {
            self.raise(alert);
        }
        self.bus.publish(ProfilerEvent::Metrics(metrics));
    }

    /// Current snapshot: last probed lag and a fresh resource sample.
    pub fn metrics(&self) -> PerformanceMetrics {
        let resources = self.sampler.sample();
        PerformanceMetrics {
            event_loop_lag_ms: self.event_loop.current_lag(),
            memory: resources.memory,
            cpu: resources.cpu,
            heap: resources.heap,
            timestamp: Utc::now(),
        }
    }

    pub fn event_loop(&self) -> &EventLoopMonitor {
        &self.event_loop
    }

    pub fn event_loop_stats(&self) -> EventLoopStats {
        self.event_loop.stats()
    }

    pub fn record_hotspot(&self, name: &str, duration_ms: f64) {
        self.hotspots.record(name, duration_ms);
    }

    /// Hotspots, heaviest total time first.
    pub fn hotspots(&self) -> Vec<Hotspot> {
        self.hotspots.sorted()
    }

    /// Record a measured operation; slow ones raise a `Cpu` alert.
    pub fn record_operation(&self, name: &str, duration_ms: f64) {
        self.record_hotspot(name, duration_ms);
        if let Some(severity) = slow_operation_severity(&self.config, duration_ms) {
            self.raise(PerformanceAlert::new(
                AlertType::Cpu,
                severity,
                format!("slow operation {name}: {duration_ms:.2}ms"),
                self.metrics(),
            ));
        }
    }

    /// Record a runtime pause (allocator compaction, arena reset, ...).
    ///
    /// Ignored unless pause monitoring is enabled.
    pub fn record_pause(&self, kind: &str, duration: Duration, freed_bytes: u64) {
        if !self.config.enable_gc_monitoring {
            return;
        }
        let duration_ms = duration.as_secs_f64() * 1000.0;
        {
            let mut gc = self.gc.lock();
            gc.collections += 1;
            gc.total_time_ms += duration_ms;
            gc.total_freed_bytes += freed_bytes;
        }

        if let Some(severity) = pause_severity(&self.config, duration_ms) {
            self.raise(PerformanceAlert::new(
                AlertType::Gc,
                severity,
                format!("{kind} pause of {duration_ms:.2}ms"),
                self.metrics(),
            ));
        }
    }

    pub fn gc_stats(&self) -> GcStats {
        *self.gc.lock()
    }

    /// History snapshots, oldest first.
    pub fn metrics_history(&self) -> Vec<PerformanceMetrics> {
        self.history.lock().iter().cloned().collect()
    }

    /// Clear history, lag samples, hotspots and pause statistics.
    pub fn clear_history(&self) {
        self.history.lock().clear();
        self.event_loop.clear();
        self.hotspots.clear();
        *self.gc.lock() = GcStats::default();
    }

    pub fn subscribe(&self) -> Subscription<ProfilerEvent> {
        self.bus.subscribe()
    }

    pub fn report(&self) -> ProfilerReport {
        let metrics = self.metrics();
        let event_loop = self.event_loop_stats();
        let gc = self.gc_stats();
        let mut hotspots = self.hotspots();
        hotspots.truncate(REPORT_HOTSPOTS);
        let health = self.health_lines(&metrics, &event_loop);

        ProfilerReport {
            generated_at: Utc::now(),
            metrics,
            event_loop,
            gc,
            hotspots,
            health,
        }
    }

    pub fn report_json(&self) -> serde_json::Value {
        serde_json::to_value(self.report()).unwrap_or(serde_json::Value::Null)
    }

    /// Human-readable report.
    pub fn generate_report(&self) -> String {
        let report = self.report();
        let m = &report.metrics;
        let mut out = String::new();

        out.push_str("=== Performance Report ===\n");
        out.push_str(&format!("Generated: {}\n\n", report.generated_at.to_rfc3339()));

        out.push_str("Scheduling lag:\n");
        out.push_str(&format!("  current: {:.2}ms\n", report.event_loop.current_lag));
        out.push_str(&format!("  average: {:.2}ms\n", report.event_loop.average_lag));
        out.push_str(&format!("  p95:     {:.2}ms\n\n", report.event_loop.p95_lag));

        out.push_str("Memory:\n");
        out.push_str(&format!("  rss:     {:.2}MB\n", m.memory.rss_mb()));
        out.push_str(&format!("  virtual: {:.2}MB\n", m.memory.virtual_mb()));
        out.push_str(&format!(
            "  heap:    {:.2}MB used / {:.2}MB total / {:.2}MB limit\n\n",
            m.heap.used_mb(),
            m.heap.total_mb(),
            m.heap.limit_mb()
        ));

        out.push_str(&format!("CPU: {:.1}%\n\n", m.cpu.percent));

        if self.config.enable_gc_monitoring {
            out.push_str("Pauses:\n");
            out.push_str(&format!("  count:      {}\n", report.gc.collections));
            out.push_str(&format!("  total time: {:.2}ms\n", report.gc.total_time_ms));
            out.push_str(&format!("  freed:      {} bytes\n\n", report.gc.total_freed_bytes));
        }

        out.push_str("Top hotspots:\n");
        if report.hotspots.is_empty() {
            out.push_str("  (none)\n");
        }
        for (i, h) in report.hotspots.iter().enumerate() {
            out.push_str(&format!(
                "  {}. {}: {} calls, {:.2}ms total, {:.2}ms avg\n",
                i + 1,
                h.name,
                h.count,
                h.total_time_ms,
                h.avg_time_ms
            ));
        }

        out.push_str("\nHealth:\n");
        for line in &report.health {
            out.push_str(&format!("  {line}\n"));
        }
        out
    }

    fn health_lines(&self, metrics: &PerformanceMetrics, event_loop: &EventLoopStats) -> Vec<String> {
        let mut lines = Vec::new();
        if event_loop.average_lag > self.config.event_loop_lag_threshold_ms {
            lines.push(format!(
                "WARN scheduling lag: average {:.2}ms above {}ms",
                event_loop.average_lag, self.config.event_loop_lag_threshold_ms
            ));
        } else {
            lines.push("OK scheduling lag".to_string());
        }
        if metrics.heap_used_mb() > self.config.memory_threshold_mb {
            lines.push(format!(
                "WARN memory: {:.2}MB above {}MB",
                metrics.heap_used_mb(),
                self.config.memory_threshold_mb
            ));
        } else {
            lines.push("OK memory".to_string());
        }
        if metrics.cpu.percent > self.config.cpu_threshold {
            lines.push(format!(
                "WARN cpu: {:.1}% above {}%",
                metrics.cpu.percent, self.config.cpu_threshold
            ));
        } else {
            lines.push("OK cpu".to_string());
        }
        lines
    }

    fn raise(&self, alert: PerformanceAlert) {
        match alert.severity {
            Severity::Critical => tracing::error!(
                alert_type = alert.alert_type.as_str(),
                severity = alert.severity.as_str(),
                "{}",
                alert.message
            ),
            _ => tracing::warn!(
                alert_type = alert.alert_type.as_str(),
                severity = alert.severity.as_str(),
                "{}",
                alert.message
            ),
        }
        self.bus.publish(ProfilerEvent::Alert(alert));
    }
}

impl Drop for PerformanceProfiler {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().take() {
            let _ = handle.stop.send(true);
            handle.task.abort();
        }
    }
}
