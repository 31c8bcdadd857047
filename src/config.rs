//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - sentra.toml (default configuration)
//! - sentra.local.toml (git-ignored local overrides)
//! - Environment variables (SENTRA_* prefix, `__` as nesting separator)
//!
//! ## Example
//!
//! ```toml
//! # sentra.toml
//! [runtime]
//! batch_size = 65536
//! batch_timeout = "1s"
//! max_events = 1000000
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! SENTRA_RUNTIME__BATCH_SIZE=1024
//! SENTRA_RUNTIME__CANCEL_GRACE=10s
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::data::Duration;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution runtime tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Soft cap on rows per emitted batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Soft cap on how long an operator may buffer before flushing.
    #[serde(default = "default_batch_timeout", with = "humane_duration")]
    pub batch_timeout: Duration,

    /// Back-off ceiling for retrying transient failures.
    #[serde(default = "default_retry_timeout", with = "humane_duration")]
    pub retry_timeout: Duration,

    /// Hard cap on events a pipeline may emit; `None` is unbounded.
    #[serde(default)]
    pub max_events: Option<u64>,

    /// Wall-clock bound within which a cancelled pipeline must wind down.
    #[serde(default = "default_cancel_grace", with = "humane_duration")]
    pub cancel_grace: Duration,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_batch_size() -> usize {
    65_536
}
fn default_batch_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_retry_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            batch_size: default_batch_size(),
            batch_timeout: default_batch_timeout(),
            retry_timeout: default_retry_timeout(),
            max_events: None,
            cancel_grace: default_cancel_grace(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from the default locations.
    ///
    /// Merges in order:
    /// 1. sentra.toml (base configuration)
    /// 2. sentra.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (SENTRA_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("sentra.toml"))
            .merge(Toml::file("sentra.local.toml"))
            .merge(Env::prefixed("SENTRA_").split("__"))
            .extract()
    }

    /// Loads configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SENTRA_").split("__"))
            .extract()
    }
}

/// Serde adapter accepting durations as suffix-annotated strings (`"1s"`,
/// `"250ms"`) or raw nanosecond integers.
mod humane_duration {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::data::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Nanos(i64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Duration::parse(&s)
                .ok_or_else(|| de::Error::custom(format!("invalid duration `{s}`"))),
            Raw::Nanos(n) => Ok(Duration::from_nanos(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.runtime.batch_size, 65_536);
        assert_eq!(config.runtime.batch_timeout, Duration::from_secs(1));
        assert_eq!(config.runtime.retry_timeout, Duration::from_secs(10));
        assert_eq!(config.runtime.cancel_grace, Duration::from_secs(5));
        assert_eq!(config.runtime.max_events, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[runtime]"));
        assert!(toml_str.contains("batch_timeout = \"1s\""));
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.runtime.batch_size, config.runtime.batch_size);
        assert_eq!(back.runtime.batch_timeout, config.runtime.batch_timeout);
    }

    #[test]
    fn test_duration_from_string_and_nanos() {
        let config: Config = toml::from_str("[runtime]\nbatch_timeout = \"250ms\"\n").unwrap();
        assert_eq!(config.runtime.batch_timeout, Duration::from_millis(250));
        let config: Config = toml::from_str("[runtime]\ncancel_grace = 1000000000\n").unwrap();
        assert_eq!(config.runtime.cancel_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_max_events_cap() {
        let config: Config = toml::from_str("[runtime]\nmax_events = 500\n").unwrap();
        assert_eq!(config.runtime.max_events, Some(500));
    }
}
