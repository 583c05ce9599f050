//! Tracing, logging and runtime health profiling (shared setup).

/// Initialize process-wide observability (JSON tracing to stderr).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// In-process pub/sub used for profiler events.
pub mod bus;

/// Scheduling-lag, memory and CPU profiler with threshold alerting.
pub mod profiler;

/// Instrumentation helpers feeding the hotspot ledger.
pub mod measure;

pub use bus::{EventBus, Subscription};
pub use measure::{measure_async, measure_sync};
pub use profiler::{
    AlertType, CpuUsage, EventLoopMonitor, EventLoopStats, GcStats, HeapStats, Hotspot,
    MemoryUsage, PerformanceAlert, PerformanceMetrics, PerformanceProfiler, ProfilerConfig,
    ProfilerEvent, ProfilerReport, Severity,
};
