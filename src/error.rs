use thiserror::Error;

/// Errors that can occur when polling a hardware sensor
///
/// These never escape the adapter boundary as panics; the scheduler treats
/// every variant as "skip this cycle, retry next".
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Poll timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors that can occur when flushing records to durable storage
#[derive(Error, Debug)]
pub enum FlushError {
    #[error("Transient flush failure: {0}")]
    Transient(String),

    #[error("Permanent flush failure: {0}")]
    Permanent(String),
}

/// Errors that can occur when pushing alert events to a notification sink
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to deliver notification: {0}")]
    DeliveryFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur during configuration loading
///
/// Configuration errors are fatal at startup only, never mid-run.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    Missing(String),

    #[error("Invalid configuration value: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl SensorError {
    /// Map a raw IO error from a sensor source into the adapter taxonomy
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                SensorError::PermissionDenied(format!("{}: {}", context, err))
            }
            _ => SensorError::DeviceUnavailable(format!("{}: {}", context, err)),
        }
    }
}
