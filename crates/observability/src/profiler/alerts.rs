//! Alert types and threshold evaluation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::config::ProfilerConfig;
use super::metrics::PerformanceMetrics;

/// Critical lag is this multiple of the lag threshold.
const LAG_CRITICAL_FACTOR: f64 = 5.0;
/// Critical memory is this multiple of the memory threshold.
const MEMORY_CRITICAL_FACTOR: f64 = 1.5;
/// CPU percentage at which a CPU alert becomes critical.
const CPU_CRITICAL_PERCENT: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Lag,
    Memory,
    Cpu,
    Gc,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Lag => "lag",
            AlertType::Memory => "memory",
            AlertType::Cpu => "cpu",
            AlertType::Gc => "gc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A threshold breach. Published once; the profiler keeps no alert log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceAlert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub metrics: PerformanceMetrics,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceAlert {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        message: impl Into<String>,
        metrics: PerformanceMetrics,
    ) -> Self {
        Self {
            alert_type,
            severity,
            message: message.into(),
            metrics,
            timestamp: Utc::now(),
        }
    }
}

/// Evaluate one sample against the configured thresholds.
///
/// Stateless: a sustained breach produces an alert for every sample.
pub fn evaluate_thresholds(
    config: &ProfilerConfig,
    metrics: &PerformanceMetrics,
) -> Vec<PerformanceAlert> {
    let mut alerts = Vec::new();

    let lag = metrics.event_loop_lag_ms;
    if lag > config.event_loop_lag_threshold_ms {
        let severity = if lag > config.event_loop_lag_threshold_ms * LAG_CRITICAL_FACTOR {
            Severity::Critical
        } else {
            Severity::High
        };
        alerts.push(PerformanceAlert::new(
            AlertType::Lag,
            severity,
            format!(
                "scheduling lag {lag:.2}ms exceeds threshold {}ms",
                config.event_loop_lag_threshold_ms
            ),
            metrics.clone(),
        ));
    }

    let memory_mb = metrics.heap_used_mb();
    if memory_mb > config.memory_threshold_mb {
        let severity = if memory_mb > config.memory_threshold_mb * MEMORY_CRITICAL_FACTOR {
            Severity::Critical
        } else {
            Severity::High
        };
        alerts.push(PerformanceAlert::new(
            AlertType::Memory,
            severity,
            format!(
                "memory usage {memory_mb:.2}MB exceeds threshold {}MB",
                config.memory_threshold_mb
            ),
            metrics.clone(),
        ));
    }

    let cpu = metrics.cpu.percent;
    if cpu > config.cpu_threshold {
        let severity = if cpu > CPU_CRITICAL_PERCENT {
            Severity::Critical
        } else {
            Severity::High
        };
        alerts.push(PerformanceAlert::new(
            AlertType::Cpu,
            severity,
            format!("cpu usage {cpu:.1}% exceeds threshold {}%", config.cpu_threshold),
            metrics.clone(),
        ));
    }

    alerts
}

/// Severity of a pause of `duration_ms`, or `None` when under threshold.
pub fn pause_severity(config: &ProfilerConfig, duration_ms: f64) -> Option<Severity> {
    if duration_ms > config.pause_threshold_ms * 2.0 {
        Some(Severity::Critical)
    } else if duration_ms > config.pause_threshold_ms {
        Some(Severity::High)
    } else {
        None
    }
}

/// Severity of a measured operation, or `None` when it was fast enough.
pub fn slow_operation_severity(config: &ProfilerConfig, duration_ms: f64) -> Option<Severity> {
    if duration_ms > config.slow_operation_threshold_ms * 10.0 {
        Some(Severity::Critical)
    } else if duration_ms > config.slow_operation_threshold_ms {
        Some(Severity::High)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(alerts: &[PerformanceAlert]) -> Vec<(AlertType, Severity)> {
        alerts.iter().map(|a| (a.alert_type, a.severity)).collect()
    }

    #[test]
    fn healthy_sample_raises_nothing() {
        let cfg = ProfilerConfig::default();
        let m = PerformanceMetrics::synthetic(2.0, 100.0, 10.0);
        assert!(evaluate_thresholds(&cfg, &m).is_empty());
    }

    #[test]
    fn lag_escalates_past_five_times_the_threshold() {
        let cfg = ProfilerConfig::default();
        let high = evaluate_thresholds(&cfg, &PerformanceMetrics::synthetic(20.0, 1.0, 0.0));
        let critical = evaluate_thresholds(&cfg, &PerformanceMetrics::synthetic(51.0, 1.0, 0.0));
        assert_eq!(types(&high), vec![(AlertType::Lag, Severity::High)]);
        assert_eq!(types(&critical), vec![(AlertType::Lag, Severity::Critical)]);
    }

    #[test]
    fn memory_and_cpu_breaches_are_reported_together() {
        let cfg = ProfilerConfig::default();
        let m = PerformanceMetrics::synthetic(0.0, 800.0, 97.0);
        assert_eq!(
            types(&evaluate_thresholds(&cfg, &m)),
            vec![
                (AlertType::Memory, Severity::Critical),
                (AlertType::Cpu, Severity::Critical),
            ]
        );

        let m = PerformanceMetrics::synthetic(0.0, 600.0, 85.0);
        assert_eq!(
            types(&evaluate_thresholds(&cfg, &m)),
            vec![
                (AlertType::Memory, Severity::High),
                (AlertType::Cpu, Severity::High),
            ]
        );
    }

    #[test]
    fn values_at_the_threshold_do_not_alert() {
        let cfg = ProfilerConfig::default();
        let m = PerformanceMetrics::synthetic(10.0, 100.0, 80.0);
        assert!(evaluate_thresholds(&cfg, &m).is_empty());
    }

    #[test]
    fn pause_and_slow_operation_severities() {
        let cfg = ProfilerConfig::default();
        assert_eq!(pause_severity(&cfg, 40.0), None);
        assert_eq!(pause_severity(&cfg, 60.0), Some(Severity::High));
        assert_eq!(pause_severity(&cfg, 150.0), Some(Severity::Critical));
        assert_eq!(slow_operation_severity(&cfg, 99.0), None);
        assert_eq!(slow_operation_severity(&cfg, 250.0), Some(Severity::High));
        assert_eq!(slow_operation_severity(&cfg, 1500.0), Some(Severity::Critical));
    }
}
