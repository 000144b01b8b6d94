//! NVIDIA GPU adapter
//!
//! Discovers GPUs and reads die temperatures through the `nvidia-smi`
//! command line tool in CSV mode.

use crate::adapters::{run_with_timeout, SensorAdapter};
use crate::error::SensorError;
use crate::sensors::{Sample, Sensor, SensorClass, SensorId};
use log::debug;
use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;

/// Adapter over `nvidia-smi`
pub struct NvidiaAdapter {
    poll_interval: Duration,
    timeout: Duration,
    /// GPU index per discovered sensor id
    indices: HashMap<SensorId, u32>,
}

impl NvidiaAdapter {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
            indices: HashMap::new(),
        }
    }

    /// Parse `nvidia-smi --query-gpu=index,name --format=csv,noheader` output
    ///
    /// Lines look like `0, NVIDIA GeForce RTX 3080`.
    fn parse_discovery(output: &str) -> Vec<(u32, String)> {
        output
            .lines()
            .filter_map(|line| {
                let (index, name) = line.split_once(',')?;
                let index = index.trim().parse().ok()?;
                let name = name.trim();
                if name.is_empty() {
                    None
                } else {
                    Some((index, name.to_string()))
                }
            })
            .collect()
    }

    /// Parse a single-value temperature query, e.g. `47`
    fn parse_temperature(output: &str) -> Result<f64, SensorError> {
        output.trim().parse().map_err(|_| {
            SensorError::DeviceUnavailable(format!(
                "unparseable nvidia-smi temperature output '{}'",
                output.trim()
            ))
        })
    }
}

impl SensorAdapter for NvidiaAdapter {
    fn name(&self) -> &str {
        "nvidia"
    }

    fn discover(&mut self) -> Result<Vec<Sensor>, SensorError> {
        self.indices.clear();

        let mut cmd = Command::new("nvidia-smi");
        cmd.args(["--query-gpu=index,name", "--format=csv,noheader"]);
        let output = run_with_timeout(cmd, self.timeout)?;
        if !output.success {
            return Err(SensorError::DeviceUnavailable(
                "nvidia-smi exited with an error during discovery".to_string(),
            ));
        }

        let sensors = Self::parse_discovery(&output.stdout)
            .into_iter()
            .map(|(index, name)| {
                let id = format!("nvidia{}", index);
                self.indices.insert(id.clone(), index);
                Sensor {
                    id,
                    label: name,
                    class: SensorClass::Temperature,
                    poll_interval: self.poll_interval,
                    adapter: "nvidia".to_string(),
                }
            })
            .collect::<Vec<_>>();

        debug!("nvidia discovery found {} GPUs", sensors.len());
        Ok(sensors)
    }

    fn poll(&mut self, sensor: &Sensor) -> Result<Sample, SensorError> {
        let index = *self.indices.get(&sensor.id).ok_or_else(|| {
            SensorError::DeviceUnavailable(format!("unknown GPU sensor '{}'", sensor.id))
        })?;

        let mut cmd = Command::new("nvidia-smi");
        cmd.args([
            "--query-gpu=temperature.gpu",
            "--format=csv,noheader,nounits",
            "-i",
            &index.to_string(),
        ]);
        let output = run_with_timeout(cmd, self.timeout)?;
        if !output.success {
            return Err(SensorError::DeviceUnavailable(format!(
                "nvidia-smi exited with an error polling '{}'",
                sensor.id
            )));
        }

        let value = Self::parse_temperature(&output.stdout)?;
        Ok(Sample::new(sensor.id.clone(), value))
    }
}
