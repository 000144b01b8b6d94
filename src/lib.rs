/// Error types for the sensor monitoring service
pub mod error;

/// Core sensor, sample and alert event types
pub mod sensors;

/// Configuration management
pub mod config;

/// Sensor adapters for hardware families
pub mod adapters;

/// Owned registry of discovered sensors
pub mod registry;

/// Per-sensor polling scheduler
pub mod scheduler;

/// Bounded per-sensor history with downsampling
pub mod history;

/// Threshold rules and the stateful alert engine
pub mod alerts;

/// Persistence and notification sinks
pub mod sink;

// Re-export commonly used types
pub use error::{ConfigError, FlushError, ReportError, SensorError};
