//! Sensor adapters translating hardware families into uniform samples

/// Linux hwmon sysfs adapter (CPU package, motherboard, fans, voltages)
pub mod hwmon;

/// NVIDIA GPU adapter backed by nvidia-smi
pub mod nvidia;

/// Disk temperature adapter backed by smartctl
pub mod smart;

/// Deterministic in-process adapter for demos and tests
pub mod synthetic;

pub use hwmon::HwmonAdapter;
pub use nvidia::NvidiaAdapter;
pub use smart::SmartAdapter;
pub use synthetic::SyntheticAdapter;

use crate::error::SensorError;
use crate::sensors::{Sample, Sensor};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Uniform polling interface over heterogeneous hardware sensors
///
/// `discover` runs once at startup and fixes sensor identity for the process
/// lifetime. `poll` returns a typed error and never panics past this
/// boundary; the scheduler treats every error as "skip this cycle".
#[cfg_attr(test, mockall::automock)]
pub trait SensorAdapter: Send {
    /// Short adapter name, used as the `Sensor::adapter` tag
    fn name(&self) -> &str;

    /// Enumerate the sensors this adapter can currently see
    fn discover(&mut self) -> Result<Vec<Sensor>, SensorError>;

    /// Take one reading from a previously discovered sensor
    fn poll(&mut self, sensor: &Sensor) -> Result<Sample, SensorError>;
}

/// Captured output of a time-boxed subprocess run
pub(crate) struct CommandOutput {
    pub success: bool,
    pub stdout: String,
}

/// Run a subprocess with a hard deadline
///
/// The child is spawned with stdout piped (drained on a helper thread so a
/// chatty tool cannot block on a full pipe) and killed if it outlives the
/// deadline, which maps to `SensorError::Timeout`.
pub(crate) fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<CommandOutput, SensorError> {
    let program = command.get_program().to_string_lossy().to_string();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = command
        .spawn()
        .map_err(|e| SensorError::from_io(&program, e))?;

    let stdout = child.stdout.take();
    let reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut out) = stdout {
            let _ = out.read_to_string(&mut buf);
        }
        buf
    });

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let stdout = reader.join().unwrap_or_default();
                return Ok(CommandOutput {
                    success: status.success(),
                    stdout,
                });
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(SensorError::Timeout(timeout));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = reader.join();
                return Err(SensorError::from_io(&program, e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_timeout_captures_output() {
        let mut cmd = Command::new("echo");
        cmd.arg("42");
        let output = run_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "42");
    }

    #[test]
    fn test_run_with_timeout_kills_hung_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let result = run_with_timeout(cmd, Duration::from_millis(100));
        assert!(matches!(result, Err(SensorError::Timeout(_))));
    }

    #[test]
    fn test_run_with_timeout_missing_binary() {
        let cmd = Command::new("definitely-not-a-real-binary-name");
        let result = run_with_timeout(cmd, Duration::from_secs(1));
        assert!(matches!(result, Err(SensorError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_run_with_timeout_reports_failure_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 1"]);
        let output = run_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert!(!output.success);
    }
}
