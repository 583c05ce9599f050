//! Worker pool configuration.

use std::time::Duration;

use ordo_core::ConfigError;
use ordo_core::config::{
    EnvSource, ProcessEnv, default_worker_count, parse_bool, parse_millis, parse_var,
};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    /// Used in thread names and log fields.
    pub name: String,
    pub max_workers: usize,
    /// Maximum number of queued (not yet dispatched) tasks.
    pub task_queue_limit: usize,
    pub default_timeout: Duration,
    pub default_priority: i32,
    /// Feed task timings to the profiler and watch its alerts.
    pub enable_profiling: bool,
    /// Replace workers lost to timeouts or crashes.
    pub respawn_workers: bool,
    /// Crashes within `crash_loop_window` that trigger a delayed respawn.
    pub crash_loop_threshold: usize,
    pub crash_loop_window: Duration,
    pub crash_respawn_delay: Duration,
    pub monitor_interval: Duration,
    pub task_execution_warning: Duration,
    pub task_execution_critical: Duration,
    pub queue_wait_warning: Duration,
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "ordo-pool".to_string(),
            max_workers: default_worker_count(),
            task_queue_limit: 100,
            default_timeout: Duration::from_secs(30),
            default_priority: 0,
            enable_profiling: true,
            respawn_workers: true,
            crash_loop_threshold: 3,
            crash_loop_window: Duration::from_secs(60),
            crash_respawn_delay: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(5),
            task_execution_warning: Duration::from_secs(1),
            task_execution_critical: Duration::from_secs(5),
            queue_wait_warning: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl WorkerPoolConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(src: &(impl EnvSource + ?Sized)) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = parse_var(src, "ORDO_MAX_WORKERS")? {
            cfg.max_workers = v;
        }
        if let Some(v) = parse_var(src, "ORDO_TASK_QUEUE_LIMIT")? {
            cfg.task_queue_limit = v;
        }
        if let Some(v) = parse_millis(src, "ORDO_TASK_TIMEOUT_MS")? {
            cfg.default_timeout = v;
        }
        if let Some(v) = parse_bool(src, "ORDO_ENABLE_PROFILING")? {
            cfg.enable_profiling = v;
        }
        if let Some(v) = parse_bool(src, "ORDO_RESPAWN_WORKERS")? {
            cfg.respawn_workers = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::out_of_range(
                "ORDO_MAX_WORKERS",
                "at least one worker is required",
            ));
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError::out_of_range(
                "ORDO_TASK_TIMEOUT_MS",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.task_queue_limit = limit;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.enable_profiling = enabled;
        self
    }

    pub fn with_respawn(mut self, enabled: bool) -> Self {
        self.respawn_workers = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_from_source() {
        let env: [(&str, &str); 4] = [
            ("ORDO_MAX_WORKERS", "3"),
            ("ORDO_TASK_QUEUE_LIMIT", "7"),
            ("ORDO_TASK_TIMEOUT_MS", "1500"),
            ("ORDO_RESPAWN_WORKERS", "off"),
        ];
        let cfg = WorkerPoolConfig::from_source(&env[..]).unwrap();
        assert_eq!(cfg.max_workers, 3);
        assert_eq!(cfg.task_queue_limit, 7);
        assert_eq!(cfg.default_timeout, Duration::from_millis(1500));
        assert!(!cfg.respawn_workers);
        assert!(cfg.enable_profiling);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let env: [(&str, &str); 1] = [("ORDO_MAX_WORKERS", "0")];
        assert!(matches!(
            WorkerPoolConfig::from_source(&env[..]),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
