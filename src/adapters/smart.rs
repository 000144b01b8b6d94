//! SMART disk temperature adapter
//!
//! Discovers block devices with `smartctl --scan` and reads drive
//! temperatures from `smartctl -A`, handling both the ATA attribute table
//! form (`194 Temperature_Celsius ... 38`) and the NVMe log form
//! (`Temperature: 38 Celsius`).

use crate::adapters::{run_with_timeout, SensorAdapter};
use crate::error::SensorError;
use crate::sensors::{Sample, Sensor, SensorClass, SensorId};
use log::debug;
use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;

/// Adapter over `smartctl`
pub struct SmartAdapter {
    poll_interval: Duration,
    timeout: Duration,
    /// Device path per discovered sensor id
    devices: HashMap<SensorId, String>,
}

impl SmartAdapter {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
            devices: HashMap::new(),
        }
    }

    /// Parse `smartctl --scan` output into device paths
    ///
    /// Lines look like `/dev/sda -d sat # /dev/sda [SAT], ATA device`.
    fn parse_scan(output: &str) -> Vec<String> {
        output
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .filter(|token| token.starts_with("/dev/"))
            .map(|token| token.to_string())
            .collect()
    }

    /// Extract a drive temperature from `smartctl -A` output
    fn parse_temperature(output: &str) -> Option<f64> {
        for line in output.lines() {
            if !line.contains("Temperature") {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();

            // NVMe form: "Temperature: 38 Celsius"
            if let Some(pos) = tokens.iter().position(|t| t.starts_with("Celsius")) {
                if pos > 0 {
                    if let Ok(value) = tokens[pos - 1].parse() {
                        return Some(value);
                    }
                }
            }

            // ATA attribute row: raw value is the 10th column
            let is_temp_attribute = tokens
                .get(1)
                .map(|name| {
                    name.contains("Temperature_Celsius") || name.contains("Airflow_Temperature")
                })
                .unwrap_or(false);
            if is_temp_attribute {
                if let Some(raw) = tokens.get(9) {
                    // Raw fields can carry extras like "38 (Min/Max 21/54)"
                    let digits: String =
                        raw.chars().take_while(|c| c.is_ascii_digit()).collect();
                    if let Ok(value) = digits.parse() {
                        return Some(value);
                    }
                }
            }
        }
        None
    }

    /// Derive a short sensor id from a device path: `/dev/sda` -> `sda`
    fn device_id(device: &str) -> String {
        device.rsplit('/').next().unwrap_or(device).to_string()
    }
}

impl SensorAdapter for SmartAdapter {
    fn name(&self) -> &str {
        "smart"
    }

    fn discover(&mut self) -> Result<Vec<Sensor>, SensorError> {
        self.devices.clear();

        let mut cmd = Command::new("smartctl");
        cmd.arg("--scan");
        let output = run_with_timeout(cmd, self.timeout)?;
        if !output.success {
            return Err(SensorError::DeviceUnavailable(
                "smartctl --scan exited with an error".to_string(),
            ));
        }

        let sensors = Self::parse_scan(&output.stdout)
            .into_iter()
            .map(|device| {
                let id = Self::device_id(&device);
                self.devices.insert(id.clone(), device.clone());
                Sensor {
                    id,
                    label: device,
                    class: SensorClass::Temperature,
                    poll_interval: self.poll_interval,
                    adapter: "smart".to_string(),
                }
            })
            .collect::<Vec<_>>();

        debug!("smart discovery found {} devices", sensors.len());
        Ok(sensors)
    }

    fn poll(&mut self, sensor: &Sensor) -> Result<Sample, SensorError> {
        let device = self.devices.get(&sensor.id).ok_or_else(|| {
            SensorError::DeviceUnavailable(format!("unknown disk sensor '{}'", sensor.id))
        })?;

        let mut cmd = Command::new("smartctl");
        cmd.args(["-A", device]);
        let output = run_with_timeout(cmd, self.timeout)?;
        if !output.success {
            // smartctl without privileges reports permission problems on stdout
            if output.stdout.contains("Permission denied") {
                return Err(SensorError::PermissionDenied(format!(
                    "smartctl needs elevated privileges for {}",
                    device
                )));
            }
            return Err(SensorError::DeviceUnavailable(format!(
                "smartctl exited with an error for {}",
                device
            )));
        }

        let value = Self::parse_temperature(&output.stdout).ok_or_else(|| {
            SensorError::DeviceUnavailable(format!(
                "no temperature attribute reported for {}",
                device
            ))
        })?;
        Ok(Sample::new(sensor.id.clone(), value))
    }
}
