//! Pool statistics shared between the dispatcher and callers.

use std::collections::VecDeque;

use serde::Serialize;

/// Number of completed tasks kept for the recent execution average.
const RECENT_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub queue_size: usize,
    /// Queued plus in-flight tasks.
    pub pending_tasks: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoolPerformance {
    pub event_loop_lag_ms: f64,
    pub memory_mb: f64,
    pub cpu_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetailedPoolStats {
    #[serde(flatten)]
    pub stats: PoolStats,
    pub total_tasks_executed: u64,
    /// Lifetime average: cumulative execution time over tasks completed.
    pub average_execution_time_ms: f64,
    /// Lifetime average: cumulative queue wait over tasks completed.
    pub average_queue_time_ms: f64,
    /// Average over the most recent completed tasks only.
    pub recent_average_execution_time_ms: f64,
    pub failed_tasks: u64,
    pub timed_out_tasks: u64,
    pub crashed_workers: u64,
    pub respawned_workers: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PoolPerformance>,
}

/// Counters updated by the dispatcher thread.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub stats: PoolStats,
    pub tasks_executed: u64,
    pub total_execution_ms: f64,
    pub total_queue_ms: f64,
    pub recent_execution_ms: VecDeque<f64>,
    pub failed: u64,
    pub timed_out: u64,
    pub crashed: u64,
    pub respawned: u64,
}

impl PoolCounters {
    /// Record a task that ran to completion (successfully or not).
    pub fn record_execution(&mut self, execution_ms: f64, queue_ms: f64, success: bool) {
        self.tasks_executed += 1;
        self.total_execution_ms += execution_ms;
        self.total_queue_ms += queue_ms;
        if !success {
            self.failed += 1;
        }
        if self.recent_execution_ms.len() == RECENT_WINDOW {
            self.recent_execution_ms.pop_front();
        }
        self.recent_execution_ms.push_back(execution_ms);
    }

    pub fn average_execution_ms(&self) -> f64 {
        if self.tasks_executed == 0 {
            0.0
        } else {
            self.total_execution_ms / self.tasks_executed as f64
        }
    }

    pub fn average_queue_ms(&self) -> f64 {
        if self.tasks_executed == 0 {
            0.0
        } else {
            self.total_queue_ms / self.tasks_executed as f64
        }
    }

    pub fn recent_average_execution_ms(&self) -> f64 {
        if self.recent_execution_ms.is_empty() {
            0.0
        } else {
            self.recent_execution_ms.iter().sum::<f64>() / self.recent_execution_ms.len() as f64
        }
    }

    pub fn detailed(&self) -> DetailedPoolStats {
        DetailedPoolStats {
            stats: self.stats,
            total_tasks_executed: self.tasks_executed,
            average_execution_time_ms: self.average_execution_ms(),
            average_queue_time_ms: self.average_queue_ms(),
            recent_average_execution_time_ms: self.recent_average_execution_ms(),
            failed_tasks: self.failed,
            timed_out_tasks: self.timed_out,
            crashed_workers: self.crashed,
            respawned_workers: self.respawned,
            performance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifetime_average_lags_behind_recent_behaviour() {
        let mut c = PoolCounters::default();
        for _ in 0..900 {
            c.record_execution(10.0, 1.0, true);
        }
        for _ in 0..100 {
            c.record_execution(110.0, 1.0, true);
        }
        // 900 fast tasks dominate the cumulative average...
        assert!((c.average_execution_ms() - 20.0).abs() < 1e-9);
        // ...while the recent window only sees the slow ones.
        assert!((c.recent_average_execution_ms() - 110.0).abs() < 1e-9);
        assert!((c.average_queue_ms() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn failures_are_counted() {
        let mut c = PoolCounters::default();
        c.record_execution(5.0, 0.0, false);
        let d = c.detailed();
        assert_eq!(d.total_tasks_executed, 1);
        assert_eq!(d.failed_tasks, 1);
    }
}
