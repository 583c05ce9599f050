//! Point-in-time health snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;

const MB: f64 = 1024.0 * 1024.0;

/// Process memory footprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
}

impl MemoryUsage {
    pub fn rss_mb(&self) -> f64 {
        self.rss_bytes as f64 / MB
    }

    pub fn virtual_mb(&self) -> f64 {
        self.virtual_bytes as f64 / MB
    }
}

/// Process CPU usage since the previous sample, in percent of one core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuUsage {
    pub percent: f64,
}

/// Heap-level view of the process.
///
/// Rust has no managed heap: `used_bytes` is the resident set,
/// `total_bytes` the reserved virtual size and `limit_bytes` the physical
/// memory of the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HeapStats {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
}

impl HeapStats {
    pub fn used_mb(&self) -> f64 {
        self.used_bytes as f64 / MB
    }

    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / MB
    }

    pub fn limit_mb(&self) -> f64 {
        self.limit_bytes as f64 / MB
    }
}

/// Immutable snapshot appended to the profiler history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub event_loop_lag_ms: f64,
    pub memory: MemoryUsage,
    pub cpu: CpuUsage,
    pub heap: HeapStats,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceMetrics {
    /// Memory figure compared against the memory threshold.
    pub fn heap_used_mb(&self) -> f64 {
        self.heap.used_mb()
    }

    /// Synthetic snapshot, mostly useful for exercising thresholds.
    pub fn synthetic(lag_ms: f64, rss_mb: f64, cpu_percent: f64) -> Self {
        let rss_bytes = (rss_mb * MB) as u64;
        Self {
            event_loop_lag_ms: lag_ms,
            memory: MemoryUsage {
                rss_bytes,
                virtual_bytes: rss_bytes,
            },
            cpu: CpuUsage {
                percent: cpu_percent,
            },
            heap: HeapStats {
                used_bytes: rss_bytes,
                total_bytes: rss_bytes,
                limit_bytes: 0,
            },
            timestamp: Utc::now(),
        }
    }
}

/// Accumulated pause statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GcStats {
    pub collections: u64,
    pub total_time_ms: f64,
    pub total_freed_bytes: u64,
}

/// Summary of the lag ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EventLoopStats {
    pub current_lag: f64,
    pub average_lag: f64,
    pub p95_lag: f64,
}
