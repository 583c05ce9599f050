//! Scheduling-lag measurement for the tokio runtime.
//!
//! A probe spawns a no-op task and measures how long the runtime takes to
//! run it. Samples are kept in a fixed-size ring.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

use super::metrics::EventLoopStats;

#[derive(Debug)]
pub struct EventLoopMonitor {
    samples: Mutex<VecDeque<f64>>,
    capacity: usize,
}

impl EventLoopMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Measure the current scheduling lag in milliseconds and record it.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn probe(&self) -> f64 {
        let start = Instant::now();
        let lag = match tokio::spawn(async move { start.elapsed() }).await {
            Ok(elapsed) => elapsed.as_secs_f64() * 1000.0,
            // Runtime is shutting down; report the time spent waiting.
            Err(_) => start.elapsed().as_secs_f64() * 1000.0,
        };
        self.record(lag);
        lag
    }

    /// Append a sample, evicting the oldest once the ring is full.
    pub fn record(&self, lag_ms: f64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(lag_ms);
    }

    pub fn current_lag(&self) -> f64 {
        self.samples.lock().back().copied().unwrap_or(0.0)
    }

    /// Arithmetic mean of the ring; 0 when empty.
    pub fn average_lag(&self) -> f64 {
        mean(self.samples.lock().iter().copied())
    }

    /// 95th-percentile order statistic of the ring; 0 when empty.
    pub fn p95_lag(&self) -> f64 {
        let samples: Vec<f64> = self.samples.lock().iter().copied().collect();
        p95(samples)
    }

    pub fn stats(&self) -> EventLoopStats {
        let samples: Vec<f64> = self.samples.lock().iter().copied().collect();
        EventLoopStats {
            current_lag: samples.last().copied().unwrap_or(0.0),
            average_lag: mean(samples.iter().copied()),
            p95_lag: p95(samples),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn p95(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let index = ((values.len() as f64) * 0.95).floor() as usize;
    values[index.min(values.len() - 1)]
}
