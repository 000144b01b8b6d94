//! Synthetic sensor adapter
//!
//! Produces deterministic triangle-wave readings without touching hardware.
//! Useful for demos on machines without readable sensors and for exercising
//! the full pipeline in tests, including failure injection.

use crate::adapters::SensorAdapter;
use crate::error::SensorError;
use crate::sensors::{Sample, Sensor, SensorClass, SensorId};
use std::collections::HashMap;
use std::time::Duration;

/// In-process adapter generating predictable values
pub struct SyntheticAdapter {
    poll_interval: Duration,
    sensor_count: usize,
    base: f64,
    amplitude: f64,
    period: u64,
    /// Fail every Nth poll of each sensor with a timeout, when set
    fail_every: Option<u64>,
    ticks: HashMap<SensorId, u64>,
}

impl SyntheticAdapter {
    /// Create an adapter with `sensor_count` temperature sensors oscillating
    /// between `base` and `base + amplitude`
    pub fn new(sensor_count: usize, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            sensor_count,
            base: 40.0,
            amplitude: 30.0,
            period: 60,
            fail_every: None,
            ticks: HashMap::new(),
        }
    }

    /// Inject a `Timeout` failure on every Nth poll of each sensor
    pub fn with_failures(mut self, every: u64) -> Self {
        self.fail_every = Some(every.max(1));
        self
    }

    /// Triangle wave over the configured period
    fn wave(&self, tick: u64) -> f64 {
        let phase = tick % self.period;
        let half = self.period / 2;
        let fraction = if phase < half {
            phase as f64 / half as f64
        } else {
            (self.period - phase) as f64 / half as f64
        };
        self.base + self.amplitude * fraction
    }
}

impl SensorAdapter for SyntheticAdapter {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn discover(&mut self) -> Result<Vec<Sensor>, SensorError> {
        Ok((0..self.sensor_count)
            .map(|i| Sensor {
                id: format!("synthetic/temp{}", i),
                label: format!("Synthetic temperature {}", i),
                class: SensorClass::Temperature,
                poll_interval: self.poll_interval,
                adapter: "synthetic".to_string(),
            })
            .collect())
    }

    fn poll(&mut self, sensor: &Sensor) -> Result<Sample, SensorError> {
        let tick = self.ticks.entry(sensor.id.clone()).or_insert(0);
        *tick += 1;
        let tick = *tick;

        if let Some(every) = self.fail_every {
            if tick % every == 0 {
                return Err(SensorError::Timeout(self.poll_interval));
            }
        }

        Ok(Sample::new(sensor.id.clone(), self.wave(tick)))
    }
}
