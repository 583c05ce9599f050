//! Job queue configuration.

use std::time::Duration;

use ordo_core::ConfigError;
use ordo_core::config::{EnvSource, ProcessEnv, parse_millis, parse_secs, parse_var};

use super::types::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct JobQueueConfig {
    pub max_concurrent_jobs: usize,
    /// Wait between scheduling passes when no slot or job is available.
    pub poll_interval: Duration,
    /// Execution bound handed to the pool for each attempt.
    pub job_timeout: Duration,
    /// How long finished jobs stay queryable.
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub default_max_retries: u32,
    pub default_priority: i32,
    pub retry: RetryPolicy,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(30 * 60),
            default_max_retries: 3,
            default_priority: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl JobQueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(src: &(impl EnvSource + ?Sized)) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = parse_var(src, "ORDO_MAX_CONCURRENT_JOBS")? {
            cfg.max_concurrent_jobs = v;
        }
        if let Some(v) = parse_millis(src, "ORDO_JOB_POLL_INTERVAL_MS")? {
            cfg.poll_interval = v;
        }
        if let Some(v) = parse_millis(src, "ORDO_JOB_TIMEOUT_MS")? {
            cfg.job_timeout = v;
        }
        if let Some(v) = parse_secs(src, "ORDO_JOB_RETENTION_SECS")? {
            cfg.retention = v;
        }
        if let Some(v) = parse_secs(src, "ORDO_JOB_CLEANUP_INTERVAL_SECS")? {
            cfg.cleanup_interval = v;
        }
        if let Some(v) = parse_millis(src, "ORDO_RETRY_BASE_DELAY_MS")? {
            cfg.retry.base_delay = v;
        }
        if let Some(v) = parse_millis(src, "ORDO_RETRY_MAX_DELAY_MS")? {
            cfg.retry.max_delay = v;
        }
        if let Some(v) = parse_var::<f64>(src, "ORDO_RETRY_JITTER")? {
            cfg.retry.jitter = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::out_of_range(
                "ORDO_MAX_CONCURRENT_JOBS",
                "must be greater than zero",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::out_of_range(
                "ORDO_JOB_POLL_INTERVAL_MS",
                "must be greater than zero",
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::out_of_range(
                "ORDO_JOB_CLEANUP_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::out_of_range(
                "ORDO_RETRY_JITTER",
                "must be in [0, 1)",
            ));
        }
        Ok(())
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_and_validation() {
        let env: [(&str, &str); 3] = [
            ("ORDO_MAX_CONCURRENT_JOBS", "2"),
            ("ORDO_RETRY_BASE_DELAY_MS", "50"),
            ("ORDO_JOB_RETENTION_SECS", "60"),
        ];
        let cfg = JobQueueConfig::from_source(&env[..]).unwrap();
        assert_eq!(cfg.max_concurrent_jobs, 2);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(50));
        assert_eq!(cfg.retention, Duration::from_secs(60));
        assert_eq!(cfg.job_timeout, Duration::from_secs(30));

        let bad: [(&str, &str); 1] = [("ORDO_RETRY_JITTER", "1.5")];
        assert!(JobQueueConfig::from_source(&bad[..]).is_err());
    }
}
