//! Core sensor and sample types for the hardware monitoring service
//!
//! This module defines the fundamental data structures used throughout the
//! application for representing sensors, samples, alert transitions, and
//! scheduler events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Stable identifier for a sensor, e.g. `coretemp/temp1`, `nvidia0`, `sda`
pub type SensorId = String;

/// Hardware sensor capability class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SensorClass {
    /// Temperature in degrees Celsius
    Temperature,
    /// Fan speed in RPM
    FanSpeed,
    /// Voltage in volts
    Voltage,
}

impl SensorClass {
    /// Canonical unit string for this sensor class
    pub fn unit(&self) -> &'static str {
        match self {
            SensorClass::Temperature => "°C",
            SensorClass::FanSpeed => "RPM",
            SensorClass::Voltage => "V",
        }
    }
}

impl std::fmt::Display for SensorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorClass::Temperature => write!(f, "temperature"),
            SensorClass::FanSpeed => write!(f, "fan"),
            SensorClass::Voltage => write!(f, "voltage"),
        }
    }
}

/// A discovered hardware sensor
///
/// Created at adapter-discovery time; identity is immutable for the process
/// lifetime. A sensor is retired (not destroyed) if its adapter reports
/// device absence across enough consecutive polls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sensor {
    /// Stable identifier, unique across all adapters
    pub id: SensorId,
    /// Human-readable label, e.g. "Package id 0" or "GeForce RTX 3080"
    pub label: String,
    /// Capability class of this sensor
    pub class: SensorClass,
    /// How often this sensor should be polled
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Name of the adapter that owns this sensor
    pub adapter: String,
}

/// A single reading from a sensor
///
/// Produced by the scheduler, appended to the history buffer, never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Sensor this reading belongs to
    pub sensor_id: SensorId,
    /// When the reading was taken
    pub timestamp: Timestamp,
    /// Measured value in the sensor's canonical unit
    pub value: f64,
    /// Whether the reading passed validity checks (spike guard)
    pub valid: bool,
}

impl Sample {
    /// Create a valid sample taken now
    pub fn new(sensor_id: impl Into<SensorId>, value: f64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp: Utc::now(),
            value,
            valid: true,
        }
    }
}

/// Alert severity level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Value within configured limits
    Normal,
    /// Warning threshold crossed and sustained
    Warning,
    /// Critical threshold crossed and sustained
    Critical,
}

/// Kind of alert transition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Severity increased
    Raised,
    /// Severity returned to Normal
    Cleared,
}

/// An alert state transition emitted by the alert engine
///
/// Consumed by persistence and by the notification sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    /// Rule that produced this transition
    pub rule_id: String,
    /// Sensor the transition applies to
    pub sensor_id: SensorId,
    /// Raised or cleared
    pub kind: AlertKind,
    /// Severity before the transition
    pub previous: Severity,
    /// Severity after the transition
    pub severity: Severity,
    /// Sample value that completed the transition
    pub value: f64,
    /// When the transition occurred
    pub timestamp: Timestamp,
}

impl AlertEvent {
    /// One-line human-readable summary, used by log and command sinks
    pub fn summary(&self) -> String {
        match self.kind {
            AlertKind::Raised => format!(
                "{} on {}: value {:.1} ({:?} -> {:?})",
                self.rule_id, self.sensor_id, self.value, self.previous, self.severity
            ),
            AlertKind::Cleared => format!(
                "{} on {} cleared: value {:.1} back to normal",
                self.rule_id, self.sensor_id, self.value
            ),
        }
    }
}

/// Events flowing from poller threads to the evaluation loop
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A successful (or spike-flagged) reading
    Sample(Sample),
    /// A sensor failed three consecutive polls and is being backed off
    SensorDegraded {
        sensor_id: SensorId,
        consecutive_failures: u32,
    },
    /// A sensor reported device absence long enough to be retired
    SensorRetired { sensor_id: SensorId },
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_serialization() {
        let sample = Sample {
            sensor_id: "coretemp/temp1".to_string(),
            timestamp: Utc::now(),
            value: 54.5,
            valid: true,
        };

        let json = serde_json::to_string(&sample).unwrap();
        let deserialized: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(sample, deserialized);
    }

    #[test]
    fn test_sensor_serialization() {
        let sensor = Sensor {
            id: "nvidia0".to_string(),
            label: "GeForce RTX 3080".to_string(),
            class: SensorClass::Temperature,
            poll_interval: Duration::from_millis(5000),
            adapter: "nvidia".to_string(),
        };

        let json = serde_json::to_string(&sensor).unwrap();
        let deserialized: Sensor = serde_json::from_str(&json).unwrap();
        assert_eq!(sensor, deserialized);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Normal < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
        assert!(Severity::Normal < Severity::Critical);
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(
            serde_json::to_string(&Severity::Normal).unwrap(),
            "\"normal\""
        );
        assert_eq!(
            serde_json::to_string(&Severity::Warning).unwrap(),
            "\"warning\""
        );
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn test_sensor_class_units() {
        assert_eq!(SensorClass::Temperature.unit(), "°C");
        assert_eq!(SensorClass::FanSpeed.unit(), "RPM");
        assert_eq!(SensorClass::Voltage.unit(), "V");
    }

    #[test]
    fn test_alert_event_summary() {
        let event = AlertEvent {
            rule_id: "cpu-temp".to_string(),
            sensor_id: "coretemp/temp1".to_string(),
            kind: AlertKind::Raised,
            previous: Severity::Normal,
            severity: Severity::Warning,
            value: 86.0,
            timestamp: Utc::now(),
        };

        let summary = event.summary();
        assert!(summary.contains("cpu-temp"));
        assert!(summary.contains("coretemp/temp1"));
        assert!(summary.contains("86.0"));

        let cleared = AlertEvent {
            kind: AlertKind::Cleared,
            previous: Severity::Warning,
            severity: Severity::Normal,
            value: 70.0,
            ..event
        };
        assert!(cleared.summary().contains("cleared"));
    }
}
