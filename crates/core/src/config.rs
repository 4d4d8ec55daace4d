//! Batching configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Attribute key used for the retry counter when none is configured.
pub const DEFAULT_RETRY_COUNT_NAME: &str = "retryCount";

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_LIMIT_RETRY: u32 = 3;

/// Batching and retry configuration for one scheduler.
///
/// Validated when the scheduler is built and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum buffered items before a forced flush.
    pub batch_size: usize,
    /// Maximum buffer age (since the last flush) before a forced flush; also
    /// the timer tick interval.
    pub timeout_ms: u64,
    /// Retry attempts allowed before an item is dead-lettered.
    pub limit_retry: u32,
    /// Attribute key carrying the retry counter. Empty means the default.
    pub retry_count_name: String,
    /// Dispatch a flush's retry/dead-letter work onto a background thread.
    pub run_in_background: bool,
    /// Flush whatever is buffered when the timer is shut down.
    pub drain_on_stop: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            limit_retry: DEFAULT_LIMIT_RETRY,
            retry_count_name: DEFAULT_RETRY_COUNT_NAME.to_string(),
            run_in_background: false,
            drain_on_stop: true,
        }
    }
}

impl BatchConfig {
    pub fn new(batch_size: usize, timeout_ms: u64) -> Self {
        Self {
            batch_size,
            timeout_ms,
            ..Default::default()
        }
    }

    pub fn with_limit_retry(mut self, limit: u32) -> Self {
        self.limit_retry = limit;
        self
    }

    pub fn with_retry_count_name(mut self, name: impl Into<String>) -> Self {
        self.retry_count_name = name.into();
        self
    }

    pub fn with_run_in_background(mut self, background: bool) -> Self {
        self.run_in_background = background;
        self
    }

    pub fn with_drain_on_stop(mut self, drain: bool) -> Self {
        self.drain_on_stop = drain;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The attribute key actually used for the retry counter.
    pub fn retry_count_key(&self) -> &str {
        if self.retry_count_name.is_empty() {
            DEFAULT_RETRY_COUNT_NAME
        } else {
            &self.retry_count_name
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Load from `BATCH_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup (environment, file, test map).
    ///
    /// Recognised keys: `BATCH_SIZE`, `BATCH_TIMEOUT_MS`, `BATCH_LIMIT_RETRY`,
    /// `BATCH_RETRY_COUNT_NAME`, `BATCH_RUN_IN_BACKGROUND`, `BATCH_DRAIN_ON_STOP`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("BATCH_SIZE") {
            config.batch_size = parse_value("BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("BATCH_TIMEOUT_MS") {
            config.timeout_ms = parse_value("BATCH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("BATCH_LIMIT_RETRY") {
            config.limit_retry = parse_value("BATCH_LIMIT_RETRY", &v)?;
        }
        if let Some(v) = lookup("BATCH_RETRY_COUNT_NAME") {
            config.retry_count_name = v;
        }
        if let Some(v) = lookup("BATCH_RUN_IN_BACKGROUND") {
            config.run_in_background = parse_flag("BATCH_RUN_IN_BACKGROUND", &v)?;
        }
        if let Some(v) = lookup("BATCH_DRAIN_ON_STOP") {
            config.drain_on_stop = parse_flag("BATCH_DRAIN_ON_STOP", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_value<V: std::str::FromStr>(key: &str, raw: &str) -> Result<V, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = BatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_count_key(), "retryCount");
    }

    #[test]
    fn empty_retry_count_name_falls_back_to_default() {
        let config = BatchConfig::new(10, 50).with_retry_count_name("");
        assert_eq!(config.retry_count_key(), DEFAULT_RETRY_COUNT_NAME);

        let config = config.with_retry_count_name("attempts");
        assert_eq!(config.retry_count_key(), "attempts");
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert_eq!(
            BatchConfig::new(0, 50).validate(),
            Err(ConfigError::ZeroBatchSize)
        );
        assert_eq!(
            BatchConfig::new(10, 0).validate(),
            Err(ConfigError::ZeroTimeout)
        );
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = BatchConfig::from_lookup(lookup_from(&[
            ("BATCH_SIZE", "25"),
            ("BATCH_TIMEOUT_MS", "250"),
            ("BATCH_LIMIT_RETRY", "0"),
            ("BATCH_RETRY_COUNT_NAME", "x-retry"),
            ("BATCH_RUN_IN_BACKGROUND", "true"),
            ("BATCH_DRAIN_ON_STOP", "off"),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.limit_retry, 0);
        assert_eq!(config.retry_count_key(), "x-retry");
        assert!(config.run_in_background);
        assert!(!config.drain_on_stop);
    }

    #[test]
    fn lookup_reports_bad_values() {
        let err = BatchConfig::from_lookup(lookup_from(&[("BATCH_SIZE", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "BATCH_SIZE".to_string(),
                value: "lots".to_string(),
            }
        );

        let err = BatchConfig::from_lookup(lookup_from(&[("BATCH_SIZE", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBatchSize);
    }

    #[test]
    fn deserializes_partial_json() {
        let config: BatchConfig =
            serde_json::from_str(r#"{"batch_size": 5, "limit_retry": 1}"#).unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.limit_retry, 1);
        assert_eq!(config.timeout_ms, 1000);
    }
}
