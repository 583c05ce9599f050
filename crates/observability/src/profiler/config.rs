//! Profiler configuration.

use std::time::Duration;

use ordo_core::ConfigError;
use ordo_core::config::{EnvSource, ProcessEnv, parse_bool, parse_millis, parse_var};
use serde::Serialize;

/// Thresholds and cadence of the profiler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilerConfig {
    /// Scheduling lag above which a `Lag` alert fires (ms).
    pub event_loop_lag_threshold_ms: f64,
    /// Resident memory above which a `Memory` alert fires (MB).
    pub memory_threshold_mb: f64,
    /// Process CPU usage above which a `Cpu` alert fires (%).
    pub cpu_threshold: f64,
    /// Interval between samples.
    pub sample_interval: Duration,
    /// Whether reported pauses are tracked and alerted on.
    pub enable_gc_monitoring: bool,
    /// Pause length above which a `Gc` alert fires (ms); critical above 2x.
    pub pause_threshold_ms: f64,
    /// Measured operations slower than this raise a `Cpu` alert (ms).
    pub slow_operation_threshold_ms: f64,
    /// Capacity of the metrics history ring.
    pub history_capacity: usize,
    /// Capacity of the lag sample ring.
    pub lag_sample_capacity: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            event_loop_lag_threshold_ms: 10.0,
            memory_threshold_mb: 512.0,
            cpu_threshold: 80.0,
            sample_interval: Duration::from_secs(1),
            enable_gc_monitoring: true,
            pause_threshold_ms: 50.0,
            slow_operation_threshold_ms: 100.0,
            history_capacity: 1000,
            lag_sample_capacity: 100,
        }
    }
}

impl ProfilerConfig {
    /// Defaults overridden by `ORDO_*` process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(src: &(impl EnvSource + ?Sized)) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = parse_var::<f64>(src, "ORDO_LAG_THRESHOLD_MS")? {
            cfg.event_loop_lag_threshold_ms = v;
        }
        if let Some(v) = parse_var::<f64>(src, "ORDO_MEMORY_THRESHOLD_MB")? {
            cfg.memory_threshold_mb = v;
        }
        if let Some(v) = parse_var::<f64>(src, "ORDO_CPU_THRESHOLD")? {
            cfg.cpu_threshold = v;
        }
        if let Some(v) = parse_millis(src, "ORDO_SAMPLE_INTERVAL_MS")? {
            cfg.sample_interval = v;
        }
        if let Some(v) = parse_bool(src, "ORDO_ENABLE_GC_MONITORING")? {
            cfg.enable_gc_monitoring = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval.is_zero() {
            return Err(ConfigError::out_of_range(
                "ORDO_SAMPLE_INTERVAL_MS",
                "must be greater than zero",
            ));
        }
        if self.event_loop_lag_threshold_ms <= 0.0 {
            return Err(ConfigError::out_of_range(
                "ORDO_LAG_THRESHOLD_MS",
                "must be greater than zero",
            ));
        }
        if self.history_capacity == 0 || self.lag_sample_capacity == 0 {
            return Err(ConfigError::out_of_range(
                "history_capacity",
                "ring capacities must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_lag_threshold_ms(mut self, threshold: f64) -> Self {
        self.event_loop_lag_threshold_ms = threshold;
        self
    }

    pub fn with_memory_threshold_mb(mut self, threshold: f64) -> Self {
        self.memory_threshold_mb = threshold;
        self
    }

    pub fn with_cpu_threshold(mut self, threshold: f64) -> Self {
        self.cpu_threshold = threshold;
        self
    }

    pub fn with_gc_monitoring(mut self, enabled: bool) -> Self {
        self.enable_gc_monitoring = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_defaults() {
        let env: [(&str, &str); 3] = [
            ("ORDO_LAG_THRESHOLD_MS", "25"),
            ("ORDO_SAMPLE_INTERVAL_MS", "200"),
            ("ORDO_ENABLE_GC_MONITORING", "false"),
        ];
        let cfg = ProfilerConfig::from_source(&env[..]).unwrap();
        assert_eq!(cfg.event_loop_lag_threshold_ms, 25.0);
        assert_eq!(cfg.sample_interval, Duration::from_millis(200));
        assert!(!cfg.enable_gc_monitoring);
        assert_eq!(cfg.memory_threshold_mb, 512.0);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let env: [(&str, &str); 1] = [("ORDO_SAMPLE_INTERVAL_MS", "0")];
        assert!(ProfilerConfig::from_source(&env[..]).is_err());
    }
}
