//! Threshold rules
//!
//! A rule binds warning/critical levels, a hysteresis margin and a debounce
//! requirement to either one sensor or a whole sensor class. Rules are built
//! from configuration at startup and immutable during a run.

use crate::config::ThresholdConfig;
use crate::error::ConfigError;
use crate::sensors::{Sensor, SensorClass, Severity};

/// What a threshold rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorSelector {
    /// Exactly one sensor by id
    Id(String),
    /// Every sensor of a class
    Class(SensorClass),
}

impl std::fmt::Display for SensorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorSelector::Id(id) => write!(f, "{}", id),
            SensorSelector::Class(class) => write!(f, "class:{}", class),
        }
    }
}

/// One configured threshold rule
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub id: String,
    pub selector: SensorSelector,
    pub warning: f64,
    pub critical: f64,
    pub hysteresis: f64,
    /// Consecutive qualifying samples required to accept a severity change;
    /// zero means transitions take effect immediately
    pub debounce_samples: u32,
}

impl ThresholdRule {
    /// Build a rule from its configuration form
    ///
    /// Assumes the config has passed `Config::validate`; selector problems
    /// are still reported as `ConfigError::Invalid` rather than panicking.
    pub fn from_config(config: &ThresholdConfig) -> Result<Self, ConfigError> {
        let selector = match (&config.sensor, &config.class) {
            (Some(sensor), None) => SensorSelector::Id(sensor.clone()),
            (None, Some(class)) => SensorSelector::Class(parse_class(class)?),
            _ => {
                return Err(ConfigError::Invalid(
                    "threshold rule needs exactly one of 'sensor' and 'class'".to_string(),
                ))
            }
        };

        let id = config
            .id
            .clone()
            .unwrap_or_else(|| selector.to_string());

        Ok(Self {
            id,
            selector,
            warning: config.warning,
            critical: config.critical,
            hysteresis: config.hysteresis,
            debounce_samples: config.debounce_samples,
        })
    }

    /// Whether this rule applies to the given sensor
    pub fn matches(&self, sensor: &Sensor) -> bool {
        match &self.selector {
            SensorSelector::Id(id) => *id == sensor.id,
            SensorSelector::Class(class) => *class == sensor.class,
        }
    }

    /// Severity a value maps to, ignoring hysteresis and debounce
    pub fn target_severity(&self, value: f64) -> Severity {
        if value >= self.critical {
            Severity::Critical
        } else if value >= self.warning {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }

    /// Threshold that must be recrossed (minus hysteresis) to leave the
    /// given severity downwards
    pub fn exit_level(&self, severity: Severity) -> Option<f64> {
        match severity {
            Severity::Critical => Some(self.critical - self.hysteresis),
            Severity::Warning => Some(self.warning - self.hysteresis),
            Severity::Normal => None,
        }
    }
}

fn parse_class(class: &str) -> Result<SensorClass, ConfigError> {
    match class {
        "temperature" => Ok(SensorClass::Temperature),
        "fan" => Ok(SensorClass::FanSpeed),
        "voltage" => Ok(SensorClass::Voltage),
        other => Err(ConfigError::Invalid(format!(
            "unknown sensor class '{}'",
            other
        ))),
    }
}
