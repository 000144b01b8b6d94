//! Configuration management
//!
//! TOML-backed configuration covering poll intervals, retention sizing,
//! threshold rules, storage, and the notification sink. A missing config
//! file falls back to defaults; an invalid one is a fatal startup error.

use crate::error::ConfigError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Threshold rules; when empty, `default_thresholds` applies
    #[serde(default, rename = "threshold")]
    pub thresholds: Vec<ThresholdConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
}

/// Per-adapter polling defaults and scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// Poll interval for hwmon sensors (ms)
    pub hwmon_interval_ms: u64,
    /// Poll interval for NVIDIA GPU sensors (ms)
    pub nvidia_interval_ms: u64,
    /// Poll interval for SMART disk sensors (ms); SMART queries are expensive
    pub smart_interval_ms: u64,
    /// Time box for a single poll (ms)
    pub timeout_ms: u64,
    /// Consecutive device-absent polls before a sensor is retired
    pub absence_retire_polls: u32,
    /// Backoff cap as a multiple of the base interval
    pub max_backoff_multiplier: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            hwmon_interval_ms: 5000,
            nvidia_interval_ms: 5000,
            smart_interval_ms: 30000,
            timeout_ms: 2000,
            absence_retire_polls: 10,
            max_backoff_multiplier: 10,
        }
    }
}

/// History buffer sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// How long raw samples are kept at native resolution (seconds)
    pub raw_window_secs: u64,
    /// Hard cap on raw samples per sensor
    pub max_raw_samples: usize,
    /// Downsampling bucket width (seconds)
    pub bucket_width_secs: u64,
    /// How long downsampled buckets are kept (seconds)
    pub bucket_retention_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_window_secs: 3600,
            max_raw_samples: 4096,
            bucket_width_secs: 60,
            bucket_retention_secs: 86400,
        }
    }
}

/// One threshold rule as written in the config file
///
/// Exactly one of `sensor` and `class` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    /// Rule identifier; defaults to the selector when omitted
    #[serde(default)]
    pub id: Option<String>,
    /// Exact sensor id this rule applies to
    #[serde(default)]
    pub sensor: Option<String>,
    /// Sensor class this rule applies to: "temperature", "fan", or "voltage"
    #[serde(default)]
    pub class: Option<String>,
    /// Warning level in the sensor's unit
    pub warning: f64,
    /// Critical level in the sensor's unit
    pub critical: f64,
    /// Gap below a threshold required before de-escalating
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,
    /// Consecutive qualifying samples required to accept a severity change
    #[serde(default = "default_debounce")]
    pub debounce_samples: u32,
}

fn default_hysteresis() -> f64 {
    5.0
}

fn default_debounce() -> u32 {
    2
}

/// Durable storage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Append-only record file (line-delimited JSON)
    pub path: String,
    /// Flush cadence, decoupled from sampling intervals (ms)
    pub flush_interval_ms: u64,
    /// Retry attempts for a transient flush failure before dropping
    pub max_retries: u32,
    /// First retry delay (ms); doubles per attempt
    pub initial_backoff_ms: u64,
    /// Retry delay ceiling (ms)
    pub max_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "thermwatch.jsonl".to_string(),
            flush_interval_ms: 10000,
            max_retries: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60000,
        }
    }
}

/// Notification sink selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Discard alert notifications (they are still persisted)
    None,
    /// Write alert notifications to the application log
    Log,
    /// POST alert events as JSON to an HTTP endpoint
    Webhook { url: String },
    /// Invoke a user command with the alert summary as its argument
    Command { program: String },
}

/// Notification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    pub sink: SinkConfig,
    /// Maximum notifications per rate window
    pub rate_limit: usize,
    /// Rate window length (seconds)
    pub rate_window_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::Log,
            rate_limit: 3,
            rate_window_secs: 300,
        }
    }
}

/// Which adapters to register at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AdaptersConfig {
    pub hwmon: bool,
    pub nvidia: bool,
    pub smart: bool,
    pub synthetic: bool,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            hwmon: true,
            nvidia: true,
            smart: true,
            synthetic: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the file does not exist,
    /// `ConfigError::TomlError` if it does not parse, and
    /// `ConfigError::Invalid` if it parses but fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional path, falling back to defaults when no file
    /// was given or the given file does not exist
    ///
    /// Unlike a missing file, a file that exists but is invalid is a hard
    /// error: configuration problems must surface at startup, not be
    /// papered over mid-run.
    pub fn load_or_default(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                info!("Loading configuration from: {}", path);
                match Config::from_file(Path::new(path)) {
                    Ok(config) => Ok(config),
                    Err(ConfigError::Missing(_)) => {
                        warn!("Configuration file '{}' not found, using defaults", path);
                        Ok(Config::default())
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                info!("Using default configuration");
                Ok(Config::default())
            }
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.hwmon_interval_ms == 0
            || self.poll.nvidia_interval_ms == 0
            || self.poll.smart_interval_ms == 0
        {
            return Err(ConfigError::Invalid(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.poll.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll.absence_retire_polls == 0 {
            return Err(ConfigError::Invalid(
                "poll.absence_retire_polls must be greater than zero".to_string(),
            ));
        }
        if self.retention.bucket_width_secs == 0 || self.retention.max_raw_samples == 0 {
            return Err(ConfigError::Invalid(
                "retention sizing must be greater than zero".to_string(),
            ));
        }
        if self.storage.path.is_empty() {
            return Err(ConfigError::Invalid(
                "storage.path must not be empty".to_string(),
            ));
        }
        for (idx, rule) in self.thresholds.iter().enumerate() {
            match (&rule.sensor, &rule.class) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(ConfigError::Invalid(format!(
                        "threshold rule {}: exactly one of 'sensor' and 'class' must be set",
                        idx
                    )));
                }
                _ => {}
            }
            if let Some(class) = &rule.class {
                if !matches!(class.as_str(), "temperature" | "fan" | "voltage") {
                    return Err(ConfigError::Invalid(format!(
                        "threshold rule {}: unknown class '{}'",
                        idx, class
                    )));
                }
            }
            if rule.warning >= rule.critical {
                return Err(ConfigError::Invalid(format!(
                    "threshold rule {}: warning ({}) must be below critical ({})",
                    idx, rule.warning, rule.critical
                )));
            }
            if rule.hysteresis < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "threshold rule {}: hysteresis must not be negative",
                    idx
                )));
            }
        }
        if let SinkConfig::Webhook { url } = &self.notify.sink {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "notify.sink webhook url must be http(s): '{}'",
                    url
                )));
            }
        }
        if let SinkConfig::Command { program } = &self.notify.sink {
            if program.is_empty() {
                return Err(ConfigError::Invalid(
                    "notify.sink command program must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Effective threshold rules: the configured list, or the built-in
    /// defaults when none are configured
    ///
    /// Defaults follow the original deployment values: CPU-class
    /// temperatures warn at 85 °C, disk temperatures at 70 °C.
    pub fn effective_thresholds(&self) -> Vec<ThresholdConfig> {
        if !self.thresholds.is_empty() {
            return self.thresholds.clone();
        }
        vec![ThresholdConfig {
            id: Some("temperature-default".to_string()),
            sensor: None,
            class: Some("temperature".to_string()),
            warning: 85.0,
            critical: 95.0,
            hysteresis: default_hysteresis(),
            debounce_samples: default_debounce(),
        }]
    }
}
