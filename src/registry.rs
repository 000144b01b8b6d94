//! Owned sensor registry
//!
//! Central table of discovered sensors and their liveness. The registry is
//! an explicitly owned struct handed to the components that need it; there
//! is no global sensor state.

use crate::sensors::{Sensor, SensorId};
use log::{info, warn};
use std::collections::HashMap;

/// Liveness of a registered sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Sensor is being polled
    Active,
    /// Sensor reported device absence long enough to stop polling it
    Retired,
}

struct SensorEntry {
    sensor: Sensor,
    liveness: Liveness,
}

/// Registry of all sensors discovered at startup
///
/// Sensor identity is fixed for the process lifetime; retirement flips the
/// liveness flag but never removes the entry, so late samples and alert
/// state can still be attributed.
pub struct SensorRegistry {
    entries: HashMap<SensorId, SensorEntry>,
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a sensor discovered by an adapter
    ///
    /// Returns `false` (and keeps the existing entry) if the id is already
    /// taken; adapters are expected to produce unique ids.
    pub fn register(&mut self, sensor: Sensor) -> bool {
        if self.entries.contains_key(&sensor.id) {
            warn!("Duplicate sensor id '{}' ignored", sensor.id);
            return false;
        }
        info!(
            "Registered sensor '{}' ({}, {}, adapter {})",
            sensor.id, sensor.label, sensor.class, sensor.adapter
        );
        self.entries.insert(
            sensor.id.clone(),
            SensorEntry {
                sensor,
                liveness: Liveness::Active,
            },
        );
        true
    }

    /// Look up a sensor by id
    pub fn get(&self, id: &str) -> Option<&Sensor> {
        self.entries.get(id).map(|e| &e.sensor)
    }

    /// Whether the sensor exists and is still being polled
    pub fn is_active(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .map(|e| e.liveness == Liveness::Active)
            .unwrap_or(false)
    }

    /// Mark a sensor as retired after sustained device absence
    pub fn retire(&mut self, id: &str) {
        if let Some(entry) = self.entries.get_mut(id) {
            if entry.liveness == Liveness::Active {
                warn!("Retiring sensor '{}' after sustained device absence", id);
                entry.liveness = Liveness::Retired;
            }
        }
    }

    /// All active sensors
    pub fn active_sensors(&self) -> Vec<&Sensor> {
        self.entries
            .values()
            .filter(|e| e.liveness == Liveness::Active)
            .map(|e| &e.sensor)
            .collect()
    }

    /// Total number of registered sensors, active or retired
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of active sensors
    pub fn active_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.liveness == Liveness::Active)
            .count()
    }
}
