//! Linux hwmon sysfs adapter
//!
//! Enumerates `/sys/class/hwmon/hwmon*` chips and exposes their temperature
//! (`temp*_input`, millidegrees), fan (`fan*_input`, RPM) and voltage
//! (`in*_input`, millivolts) channels as individual sensors.

use crate::adapters::SensorAdapter;
use crate::error::SensorError;
use crate::sensors::{Sample, Sensor, SensorClass, SensorId};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HWMON_ROOT: &str = "/sys/class/hwmon";

/// Adapter over the Linux hwmon sysfs tree
pub struct HwmonAdapter {
    root: PathBuf,
    poll_interval: Duration,
    /// Input-file path and class per discovered sensor id
    channels: HashMap<SensorId, (PathBuf, SensorClass)>,
}

impl HwmonAdapter {
    /// Create an adapter reading from the standard sysfs location
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_root(PathBuf::from(DEFAULT_HWMON_ROOT), poll_interval)
    }

    /// Create an adapter reading from an alternate root (used by tests)
    pub fn with_root(root: PathBuf, poll_interval: Duration) -> Self {
        Self {
            root,
            poll_interval,
            channels: HashMap::new(),
        }
    }

    /// Read and trim a small sysfs file
    fn read_sysfs(path: &Path) -> Result<String, SensorError> {
        std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| SensorError::from_io(&path.display().to_string(), e))
    }

    /// Classify a channel file name such as `temp1_input`
    fn classify(file_name: &str) -> Option<(SensorClass, &str)> {
        let channel = file_name.strip_suffix("_input")?;
        if channel.starts_with("temp") {
            Some((SensorClass::Temperature, channel))
        } else if channel.starts_with("fan") {
            Some((SensorClass::FanSpeed, channel))
        } else if channel.starts_with("in") {
            Some((SensorClass::Voltage, channel))
        } else {
            None
        }
    }

    /// Scale a raw sysfs integer into the sensor's canonical unit
    fn scale(class: SensorClass, raw: i64) -> f64 {
        match class {
            // millidegrees C and millivolts
            SensorClass::Temperature | SensorClass::Voltage => raw as f64 / 1000.0,
            SensorClass::FanSpeed => raw as f64,
        }
    }

    fn discover_chip(
        &mut self,
        chip_dir: &Path,
        sensors: &mut Vec<Sensor>,
    ) -> Result<(), SensorError> {
        let chip = Self::read_sysfs(&chip_dir.join("name"))?;

        let entries = std::fs::read_dir(chip_dir)
            .map_err(|e| SensorError::from_io(&chip_dir.display().to_string(), e))?;

        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some((class, channel)) = Self::classify(&file_name) else {
                continue;
            };

            let mut id = format!("{}/{}", chip, channel);
            if self.channels.contains_key(&id) {
                // Two chips with the same name; disambiguate with the hwmon dir
                let dir = chip_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                id = format!("{}.{}/{}", chip, dir, channel);
            }

            let label_path = chip_dir.join(format!("{}_label", channel));
            let label = match Self::read_sysfs(&label_path) {
                Ok(label) if !label.is_empty() => label,
                _ => format!("{} {}", chip, channel),
            };

            self.channels.insert(id.clone(), (entry.path(), class));
            sensors.push(Sensor {
                id,
                label,
                class,
                poll_interval: self.poll_interval,
                adapter: "hwmon".to_string(),
            });
        }

        Ok(())
    }
}

impl SensorAdapter for HwmonAdapter {
    fn name(&self) -> &str {
        "hwmon"
    }

    fn discover(&mut self) -> Result<Vec<Sensor>, SensorError> {
        self.channels.clear();
        let mut sensors = Vec::new();

        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| SensorError::from_io(&self.root.display().to_string(), e))?;

        for entry in entries.flatten() {
            let chip_dir = entry.path();
            if !chip_dir.is_dir() {
                continue;
            }
            if let Err(e) = self.discover_chip(&chip_dir, &mut sensors) {
                // A single unreadable chip should not abort discovery
                warn!("Skipping hwmon chip {}: {}", chip_dir.display(), e);
            }
        }

        debug!("hwmon discovery found {} sensors", sensors.len());
        Ok(sensors)
    }

    fn poll(&mut self, sensor: &Sensor) -> Result<Sample, SensorError> {
        let (path, class) = self.channels.get(&sensor.id).ok_or_else(|| {
            SensorError::DeviceUnavailable(format!("unknown hwmon sensor '{}'", sensor.id))
        })?;

        let raw_text = Self::read_sysfs(path)?;
        let raw: i64 = raw_text.parse().map_err(|_| {
            SensorError::DeviceUnavailable(format!(
                "unparseable hwmon value '{}' for '{}'",
                raw_text, sensor.id
            ))
        })?;

        Ok(Sample::new(sensor.id.clone(), Self::scale(*class, raw)))
    }
}
