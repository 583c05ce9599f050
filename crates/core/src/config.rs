//! Environment-driven configuration helpers.
//!
//! Every tunable of the execution core has a default and can be overridden by
//! an `ORDO_*` environment variable. Component configs (`WorkerPoolConfig`,
//! `JobQueueConfig`, `ProfilerConfig`) build on the parsers here.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// A source of configuration values keyed by variable name.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl EnvSource for [(&str, &str)] {
    fn get(&self, key: &str) -> Option<String> {
        self.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_string())
    }
}

/// Parse `key` if present; blank values count as absent.
pub fn parse_var<T>(src: &(impl EnvSource + ?Sized), key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match src.get(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    key: key.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })
        }
        _ => Ok(None),
    }
}

/// Parse a boolean flag (`true/false`, `1/0`, `yes/no`, `on/off`).
pub fn parse_bool(src: &(impl EnvSource + ?Sized), key: &str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = src.get(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Parse a duration expressed in milliseconds.
pub fn parse_millis(
    src: &(impl EnvSource + ?Sized),
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_var::<u64>(src, key)?.map(Duration::from_millis))
}

/// Parse a duration expressed in seconds.
pub fn parse_secs(
    src: &(impl EnvSource + ?Sized),
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_var::<u64>(src, key)?.map(Duration::from_secs))
}

/// Default worker count: host parallelism minus one, never below two.
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_blank_values_fall_back() {
        let env: [(&str, &str); 1] = [("ORDO_BLANK", "  ")];
        assert_eq!(parse_var::<usize>(&env[..], "ORDO_MISSING").unwrap(), None);
        assert_eq!(parse_var::<usize>(&env[..], "ORDO_BLANK").unwrap(), None);
    }

    #[test]
    fn malformed_number_is_an_error() {
        let env: [(&str, &str); 1] = [("ORDO_MAX_WORKERS", "lots")];
        let err = parse_var::<usize>(&env[..], "ORDO_MAX_WORKERS").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "ORDO_MAX_WORKERS"));
    }

    #[test]
    fn booleans_accept_common_spellings() {
        let env: [(&str, &str); 3] = [("A", "yes"), ("B", "0"), ("C", "maybe")];
        assert_eq!(parse_bool(&env[..], "A").unwrap(), Some(true));
        assert_eq!(parse_bool(&env[..], "B").unwrap(), Some(false));
        assert!(parse_bool(&env[..], "C").is_err());
    }

    #[test]
    fn durations_parse_in_their_unit() {
        let mut env = HashMap::new();
        env.insert("MS".to_string(), "250".to_string());
        env.insert("S".to_string(), "3".to_string());
        assert_eq!(parse_millis(&env, "MS").unwrap(), Some(Duration::from_millis(250)));
        assert_eq!(parse_secs(&env, "S").unwrap(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn default_worker_count_is_at_least_two() {
        assert!(default_worker_count() >= 2);
    }
}
