use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thermwatch::adapters::{
    HwmonAdapter, NvidiaAdapter, SensorAdapter, SmartAdapter, SyntheticAdapter,
};
use thermwatch::alerts::{AlertEngine, RateLimiter, ThresholdRule};
use thermwatch::config::Config;
use thermwatch::error::ConfigError;
use thermwatch::history::HistoryBuffer;
use thermwatch::registry::SensorRegistry;
use thermwatch::scheduler::{PollScheduler, PollTuning};
use thermwatch::sensors::{SchedulerEvent, Sensor};
use thermwatch::sink::{build_sink, Flusher, JsonlStore, Record, ReportSink};

/// Exit code for configuration problems
const EXIT_CONFIG_ERROR: i32 = 2;
/// Exit code when no sensors could be discovered
const EXIT_NO_SENSORS: i32 = 3;

/// Command-line arguments for the hardware monitoring daemon
#[derive(Parser)]
#[command(
    name = "thermwatch",
    about = "Hardware sensor monitoring and health-reporting daemon",
    long_about = "Discovers hardware temperature, fan and voltage sensors, polls them on \
                  independent schedules, evaluates threshold rules with hysteresis, and \
                  flushes samples and alert transitions to durable storage and an optional \
                  notification sink."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Only reject paths that exist but are not files; missing files
            // fall back to defaults in Config::load_or_default
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Convert the config path to a string, handling non-UTF-8 paths
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Unrecoverable startup failures, mapped to distinct exit codes
#[derive(Debug)]
enum StartupError {
    Config(ConfigError),
    NoSensors,
}

impl From<ConfigError> for StartupError {
    fn from(e: ConfigError) -> Self {
        StartupError::Config(e)
    }
}

/// Build the adapters enabled by configuration
fn build_adapters(config: &Config) -> Vec<Box<dyn SensorAdapter>> {
    let timeout = Duration::from_millis(config.poll.timeout_ms);
    let mut adapters: Vec<Box<dyn SensorAdapter>> = Vec::new();

    if config.adapters.hwmon {
        adapters.push(Box::new(HwmonAdapter::new(Duration::from_millis(
            config.poll.hwmon_interval_ms,
        ))));
    }
    if config.adapters.nvidia {
        adapters.push(Box::new(NvidiaAdapter::new(
            Duration::from_millis(config.poll.nvidia_interval_ms),
            timeout,
        )));
    }
    if config.adapters.smart {
        adapters.push(Box::new(SmartAdapter::new(
            Duration::from_millis(config.poll.smart_interval_ms),
            timeout,
        )));
    }
    if config.adapters.synthetic {
        adapters.push(Box::new(SyntheticAdapter::new(
            3,
            Duration::from_millis(config.poll.hwmon_interval_ms),
        )));
    }

    adapters
}

/// Main application struct wiring all monitoring components together
///
/// HealthMonitor owns the poller threads, the evaluation thread (the single
/// writer for history and alert state), and the flusher. It manages the
/// component lifecycle and graceful shutdown.
pub struct HealthMonitor {
    config: Config,

    /// Adapters and the sensors each one discovered, consumed at start
    adapters: Vec<(Box<dyn SensorAdapter>, Vec<Sensor>)>,

    /// Sensor registry, moved into the evaluation thread at start
    registry: Option<SensorRegistry>,

    /// Threshold rules built from configuration, consumed at start
    rules: Vec<ThresholdRule>,

    /// Durable record store, moved into the flusher at start
    store: Option<JsonlStore>,

    /// Notification sink, if configured
    sink: Option<Box<dyn ReportSink>>,

    /// Poller threads
    scheduler: PollScheduler,

    /// Flush thread, present after start
    flusher: Option<Flusher>,

    /// Channel from pollers to the evaluation thread
    event_sender: Option<Sender<SchedulerEvent>>,
    event_receiver: Option<Receiver<SchedulerEvent>>,

    /// Channel from the evaluation thread to the flusher
    record_sender: Option<Sender<Record>>,
    record_receiver: Option<Receiver<Record>>,

    /// Evaluation thread lifecycle
    eval_running: Arc<Mutex<bool>>,
    eval_handle: Option<JoinHandle<()>>,

    /// Shutdown signal
    shutdown_sender: Sender<()>,
    shutdown_receiver: Receiver<()>,
}

impl HealthMonitor {
    /// Create a monitor: build rules, run discovery, open storage
    ///
    /// # Errors
    ///
    /// Returns `StartupError::NoSensors` when every enabled adapter came up
    /// empty, and `StartupError::Config` for invalid rules or an unusable
    /// storage path. Individual adapter failures are logged and skipped;
    /// monitoring continues with whatever hardware is visible.
    fn new(config: Config) -> Result<Self, StartupError> {
        info!("Initializing HealthMonitor");

        let rules = config
            .effective_thresholds()
            .iter()
            .map(ThresholdRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        info!("Loaded {} threshold rules", rules.len());

        let mut registry = SensorRegistry::new();
        let mut adapters = Vec::new();
        for mut adapter in build_adapters(&config) {
            match adapter.discover() {
                Ok(sensors) => {
                    let mut owned = Vec::new();
                    for sensor in sensors {
                        if registry.register(sensor.clone()) {
                            owned.push(sensor);
                        }
                    }
                    info!(
                        "Adapter '{}' contributed {} sensors",
                        adapter.name(),
                        owned.len()
                    );
                    adapters.push((adapter, owned));
                }
                Err(e) => {
                    warn!(
                        "Adapter '{}' discovery failed, continuing without it: {}",
                        adapter.name(),
                        e
                    );
                }
            }
        }

        if registry.is_empty() {
            return Err(StartupError::NoSensors);
        }
        info!("Discovered {} sensors in total", registry.len());

        let store = JsonlStore::open(Path::new(&config.storage.path)).map_err(|e| {
            StartupError::Config(ConfigError::Invalid(format!(
                "storage path unusable: {}",
                e
            )))
        })?;

        let sink = build_sink(&config.notify).map_err(|e| {
            StartupError::Config(ConfigError::Invalid(format!(
                "notification sink unusable: {}",
                e
            )))
        })?;

        let (event_sender, event_receiver) = mpsc::channel();
        let (record_sender, record_receiver) = mpsc::channel();
        let (shutdown_sender, shutdown_receiver) = mpsc::channel();

        Ok(Self {
            config,
            adapters,
            registry: Some(registry),
            rules,
            store: Some(store),
            sink,
            scheduler: PollScheduler::new(),
            flusher: None,
            event_sender: Some(event_sender),
            event_receiver: Some(event_receiver),
            record_sender: Some(record_sender),
            record_receiver: Some(record_receiver),
            eval_running: Arc::new(Mutex::new(true)),
            eval_handle: None,
            shutdown_sender,
            shutdown_receiver,
        })
    }

    /// Start all component threads
    pub fn start(&mut self) -> anyhow::Result<()> {
        info!("Starting HealthMonitor components");

        let store = self.store.take().context("monitor already started")?;
        let record_receiver = self
            .record_receiver
            .take()
            .context("monitor already started")?;
        self.flusher = Some(Flusher::start(
            Box::new(store),
            record_receiver,
            &self.config.storage,
        ));

        let registry = self.registry.take().context("monitor already started")?;
        let event_receiver = self
            .event_receiver
            .take()
            .context("monitor already started")?;
        let record_sender = self
            .record_sender
            .take()
            .context("monitor already started")?;
        let engine = AlertEngine::new(std::mem::take(&mut self.rules));
        let limiter = RateLimiter::new(
            self.config.notify.rate_limit,
            self.config.notify.rate_window_secs,
        );
        let sink = self.sink.take();
        let running = Arc::clone(&self.eval_running);
        let retention = self.config.retention.clone();
        let history = HistoryBuffer::new(
            chrono::Duration::seconds(retention.raw_window_secs as i64),
            retention.max_raw_samples,
            chrono::Duration::seconds(retention.bucket_width_secs as i64),
            chrono::Duration::seconds(retention.bucket_retention_secs as i64),
        );

        self.eval_handle = Some(std::thread::spawn(move || {
            evaluation_loop(
                event_receiver,
                registry,
                history,
                engine,
                limiter,
                sink,
                record_sender,
                running,
            );
        }));

        let event_sender = self.event_sender.take().context("monitor already started")?;
        let tuning = PollTuning::from_config(&self.config.poll);
        for (adapter, sensors) in self.adapters.drain(..) {
            self.scheduler
                .spawn_poller(adapter, sensors, event_sender.clone(), tuning.clone());
        }
        info!("Started {} poller threads", self.scheduler.poller_count());

        Ok(())
    }

    /// Stop all components within a bounded grace period
    pub fn stop(&mut self) {
        info!("Stopping HealthMonitor components");

        // Pollers first so no new samples arrive
        self.scheduler.stop();

        // Then the evaluation thread
        {
            let mut running = self.eval_running.lock().unwrap();
            *running = false;
        }
        if let Some(handle) = self.eval_handle.take() {
            if handle.join().is_err() {
                error!("Evaluation thread panicked during shutdown");
            }
        }

        // The flusher last, so records emitted during shutdown still land
        if let Some(mut flusher) = self.flusher.take() {
            flusher.stop();
            let dropped = flusher.dropped_records();
            if dropped > 0 {
                warn!("{} records were dropped during this run", dropped);
            }
        }

        info!("HealthMonitor stopped");
    }

    /// Block until a shutdown signal is received
    pub fn wait_for_shutdown(&self) {
        info!("Monitoring; press Ctrl+C to stop");
        if let Err(e) = self.shutdown_receiver.recv() {
            error!("Shutdown channel closed unexpectedly: {}", e);
        }
    }
}

/// Evaluation loop: the single writer for history, alert state and the
/// sensor registry
///
/// All poller threads feed this loop over one channel, which serializes
/// every cross-sensor structure without further locking.
#[allow(clippy::too_many_arguments)]
fn evaluation_loop(
    receiver: Receiver<SchedulerEvent>,
    mut registry: SensorRegistry,
    mut history: HistoryBuffer,
    mut engine: AlertEngine,
    mut limiter: RateLimiter,
    mut sink: Option<Box<dyn ReportSink>>,
    record_sender: Sender<Record>,
    running: Arc<Mutex<bool>>,
) {
    info!("Evaluation loop started");

    while *running.lock().unwrap() {
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(SchedulerEvent::Sample(sample)) => {
                let Some(sensor) = registry.get(&sample.sensor_id).cloned() else {
                    warn!("Dropping sample for unknown sensor '{}'", sample.sensor_id);
                    continue;
                };

                history.insert(sample.clone());
                if record_sender.send(Record::Sample(sample.clone())).is_err() {
                    debug!("Record channel closed");
                }

                for event in engine.evaluate(&sensor, &sample) {
                    warn!("Alert transition: {}", event.summary());
                    if record_sender.send(Record::Alert(event.clone())).is_err() {
                        debug!("Record channel closed");
                    }
                    if let Some(sink) = sink.as_mut() {
                        if limiter.can_send() {
                            match sink.report(&event) {
                                Ok(()) => limiter.record_delivery(),
                                Err(e) => error!(
                                    "Notification delivery via '{}' failed: {}",
                                    sink.name(),
                                    e
                                ),
                            }
                        } else {
                            info!(
                                "Notification rate limit reached, not pushing '{}'",
                                event.summary()
                            );
                        }
                    }
                }
            }
            Ok(SchedulerEvent::SensorDegraded {
                sensor_id,
                consecutive_failures,
            }) => {
                warn!(
                    "Sensor '{}' degraded after {} consecutive poll failures, backing off",
                    sensor_id, consecutive_failures
                );
            }
            Ok(SchedulerEvent::SensorRetired { sensor_id }) => {
                registry.retire(&sensor_id);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("All pollers gone, evaluation loop exiting");
                break;
            }
        }

        history.prune_at(Utc::now());
    }

    info!("Evaluation loop stopped");
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting thermwatch");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };

    let config = match Config::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let mut monitor = match HealthMonitor::new(config) {
        Ok(monitor) => monitor,
        Err(StartupError::NoSensors) => {
            error!("No sensors discovered by any enabled adapter");
            std::process::exit(EXIT_NO_SENSORS);
        }
        Err(StartupError::Config(e)) => {
            error!("Startup failed: {}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(e) = monitor.start() {
        error!("Failed to start monitoring: {}", e);
        std::process::exit(1);
    }

    // Graceful shutdown on SIGINT
    let shutdown_sender = monitor.shutdown_sender.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .expect("Error setting SIGINT handler for graceful shutdown");

    monitor.wait_for_shutdown();
    monitor.stop();

    info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermwatch::config::{AdaptersConfig, SinkConfig};

    #[test]
    fn test_cli_validation_with_existing_file() {
        let temp_file = std::env::temp_dir().join("thermwatch_test_config.toml");
        std::fs::write(&temp_file, "[poll]\nhwmon_interval_ms = 1000").unwrap();

        let cli = Cli {
            config: Some(temp_file.clone()),
            verbose: false,
        };

        assert!(cli.validate().is_ok());

        std::fs::remove_file(&temp_file).unwrap();
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/config.toml")),
            verbose: false,
        };

        // Missing files are handled gracefully with defaults
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let cli = Cli {
            config: Some(PathBuf::from("/tmp")),
            verbose: false,
        };

        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_validation_no_config() {
        let cli = Cli {
            config: None,
            verbose: false,
        };

        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_config_path_str_with_valid_path() {
        let cli = Cli {
            config: Some(PathBuf::from("config.toml")),
            verbose: false,
        };

        assert_eq!(cli.config_path_str().unwrap(), Some("config.toml"));
    }

    #[test]
    fn test_config_path_str_no_config() {
        let cli = Cli {
            config: None,
            verbose: false,
        };

        assert_eq!(cli.config_path_str().unwrap(), None);
    }

    #[test]
    fn test_build_adapters_respects_enable_flags() {
        let mut config = Config::default();
        config.adapters = AdaptersConfig {
            hwmon: false,
            nvidia: false,
            smart: false,
            synthetic: true,
        };
        let adapters = build_adapters(&config);
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].name(), "synthetic");

        config.adapters = AdaptersConfig {
            hwmon: true,
            nvidia: true,
            smart: true,
            synthetic: false,
        };
        assert_eq!(build_adapters(&config).len(), 3);
    }

    /// Config for an end-to-end run: synthetic sensors only, fast cadence,
    /// records in a temp dir
    fn synthetic_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.adapters = AdaptersConfig {
            hwmon: false,
            nvidia: false,
            smart: false,
            synthetic: true,
        };
        config.poll.hwmon_interval_ms = 10;
        config.storage.path = dir
            .join("records.jsonl")
            .to_string_lossy()
            .to_string();
        config.storage.flush_interval_ms = 50;
        config.notify.sink = SinkConfig::None;
        config
    }

    #[test]
    fn test_monitor_end_to_end_with_synthetic_sensors() {
        let dir = tempfile::tempdir().unwrap();
        let config = synthetic_config(dir.path());
        let store_path = config.storage.path.clone();

        let mut monitor = HealthMonitor::new(config).unwrap();
        monitor.start().unwrap();
        std::thread::sleep(Duration::from_millis(400));
        monitor.stop();

        let contents = std::fs::read_to_string(&store_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert!(
            !lines.is_empty(),
            "expected flushed sample records after the run"
        );
        assert!(lines[0].contains("\"record\":\"sample\""));
        assert!(lines[0].contains("synthetic/temp"));
    }

    #[test]
    fn test_monitor_without_sensors_fails_distinctly() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = synthetic_config(dir.path());
        config.adapters.synthetic = false;
        // hwmon/nvidia/smart disabled too: discovery must come up empty
        let result = HealthMonitor::new(config);
        assert!(matches!(result, Err(StartupError::NoSensors)));
    }

    #[test]
    fn test_monitor_with_unusable_storage_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = synthetic_config(dir.path());
        config.storage.path = "/nonexistent/dir/records.jsonl".to_string();
        let result = HealthMonitor::new(config);
        assert!(matches!(result, Err(StartupError::Config(_))));
    }
}
