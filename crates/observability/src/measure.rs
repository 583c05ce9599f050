//! Timing helpers that feed the profiler's hotspot ledger.

use std::future::Future;
use std::time::Instant;

use crate::profiler::PerformanceProfiler;

/// Run `f`, recording its duration under `name`.
///
/// Operations slower than the configured slow-operation threshold raise a
/// `Cpu` alert.
pub fn measure_sync<T>(profiler: &PerformanceProfiler, name: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    profiler.record_operation(name, start.elapsed().as_secs_f64() * 1000.0);
    out
}

/// Async counterpart of [`measure_sync`].
pub async fn measure_async<F>(profiler: &PerformanceProfiler, name: &str, fut: F) -> F::Output
where
    F: Future,
{
    let start = Instant::now();
    let out = fut.await;
    profiler.record_operation(name, start.elapsed().as_secs_f64() * 1000.0);
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::profiler::{AlertType, ProfilerConfig, ProfilerEvent};

    #[test]
    fn fast_operations_only_record_a_hotspot() {
        let profiler = PerformanceProfiler::new(ProfilerConfig::default());
        let sub = profiler.subscribe();

        let value = measure_sync(&profiler, "sum", || (1..=10).sum::<u32>());

        assert_eq!(value, 55);
        assert_eq!(profiler.hotspots()[0].name, "sum");
        assert!(sub.drain().is_empty());
    }

    #[tokio::test]
    async fn slow_operations_raise_a_cpu_alert() {
        let profiler = PerformanceProfiler::new(ProfilerConfig::default());
        let sub = profiler.subscribe();

        measure_async(&profiler, "sleepy", tokio::time::sleep(Duration::from_millis(120))).await;

        let events = sub.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            ProfilerEvent::Alert(a) if a.alert_type == AlertType::Cpu
        )));
        assert_eq!(profiler.hotspots()[0].count, 1);
    }
}
