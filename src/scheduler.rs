//! Sampling scheduler
//!
//! Drives every sensor's poll on its own interval, one poller thread per
//! adapter so a hang in one hardware family never delays another. Poll
//! intervals carry a small jitter to avoid synchronized bursts against the
//! hardware. Failures are isolated per sensor: three consecutive failures
//! degrade the sensor and back its interval off exponentially, sustained
//! device absence retires it.

use crate::adapters::SensorAdapter;
use crate::error::SensorError;
use crate::sensors::{Sample, Sensor, SensorClass, SchedulerEvent};
use log::{debug, info, warn};
use rand::Rng;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Consecutive failures before a sensor is reported degraded
const DEGRADED_AFTER_FAILURES: u32 = 3;

/// Largest plausible temperature change between two consecutive polls;
/// bigger jumps are flagged as invalid readings
const MAX_TEMP_JUMP: f64 = 20.0;

/// Scheduler tuning shared by all pollers
#[derive(Debug, Clone)]
pub struct PollTuning {
    /// Consecutive device-absent polls before retirement
    pub absence_retire_polls: u32,
    /// Backoff cap as a multiple of the base interval
    pub max_backoff_multiplier: u32,
}

impl PollTuning {
    pub fn from_config(config: &crate::config::PollConfig) -> Self {
        Self {
            absence_retire_polls: config.absence_retire_polls,
            max_backoff_multiplier: config.max_backoff_multiplier,
        }
    }
}

/// Per-sensor polling state owned by exactly one poller thread
pub(crate) struct PollState {
    sensor: Sensor,
    base_interval: Duration,
    current_interval: Duration,
    consecutive_failures: u32,
    consecutive_absent: u32,
    retired: bool,
    last_value: Option<f64>,
    next_due: Instant,
}

impl PollState {
    pub(crate) fn new(sensor: Sensor, now: Instant) -> Self {
        let base_interval = sensor.poll_interval;
        Self {
            sensor,
            base_interval,
            current_interval: base_interval,
            consecutive_failures: 0,
            consecutive_absent: 0,
            retired: false,
            last_value: None,
            next_due: now,
        }
    }

    #[cfg(test)]
    pub(crate) fn retired(&self) -> bool {
        self.retired
    }

    #[cfg(test)]
    pub(crate) fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Record a successful poll: reset failure accounting and apply the
    /// spike guard
    ///
    /// A temperature reading that jumps implausibly far from the previous
    /// one is kept but flagged invalid. The new value still becomes the
    /// comparison baseline, so a genuine step change is accepted on the
    /// next poll.
    pub(crate) fn on_success(&mut self, mut sample: Sample) -> Sample {
        self.consecutive_failures = 0;
        self.consecutive_absent = 0;
        self.current_interval = self.base_interval;

        if self.sensor.class == SensorClass::Temperature {
            if let Some(last) = self.last_value {
                if (sample.value - last).abs() > MAX_TEMP_JUMP {
                    warn!(
                        "Implausible jump on '{}': {:.1} -> {:.1}, flagging sample invalid",
                        self.sensor.id, last, sample.value
                    );
                    sample.valid = false;
                }
            }
        }
        self.last_value = Some(sample.value);
        sample
    }

    /// Record a failed poll, possibly emitting a degraded or retired event
    pub(crate) fn on_failure(
        &mut self,
        error: &SensorError,
        tuning: &PollTuning,
    ) -> Option<SchedulerEvent> {
        self.consecutive_failures += 1;
        if matches!(error, SensorError::DeviceUnavailable(_)) {
            self.consecutive_absent += 1;
        } else {
            self.consecutive_absent = 0;
        }

        if self.consecutive_absent >= tuning.absence_retire_polls {
            self.retired = true;
            return Some(SchedulerEvent::SensorRetired {
                sensor_id: self.sensor.id.clone(),
            });
        }

        if self.consecutive_failures >= DEGRADED_AFTER_FAILURES {
            let cap = self.base_interval * tuning.max_backoff_multiplier;
            self.current_interval = (self.current_interval * 2).min(cap);
            if self.consecutive_failures == DEGRADED_AFTER_FAILURES {
                return Some(SchedulerEvent::SensorDegraded {
                    sensor_id: self.sensor.id.clone(),
                    consecutive_failures: self.consecutive_failures,
                });
            }
        }
        None
    }

    /// Schedule the next poll with ±10% jitter on the current interval
    fn schedule_next(&mut self, now: Instant, rng: &mut impl Rng) {
        let factor = rng.gen_range(0.9..=1.1);
        self.next_due = now + self.current_interval.mul_f64(factor);
    }
}

/// Owns the poller threads and their shared shutdown flag
pub struct PollScheduler {
    running: Arc<Mutex<bool>>,
    thread_handles: Vec<JoinHandle<()>>,
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PollScheduler {
    pub fn new() -> Self {
        Self {
            running: Arc::new(Mutex::new(true)),
            thread_handles: Vec::new(),
        }
    }

    /// Spawn one poller thread owning an adapter and its sensors
    pub fn spawn_poller(
        &mut self,
        adapter: Box<dyn SensorAdapter>,
        sensors: Vec<Sensor>,
        events: Sender<SchedulerEvent>,
        tuning: PollTuning,
    ) {
        if sensors.is_empty() {
            debug!("Adapter '{}' has no sensors, not spawning poller", adapter.name());
            return;
        }

        let running = Arc::clone(&self.running);
        let handle = thread::spawn(move || {
            Self::poller_thread(adapter, sensors, events, tuning, running);
        });
        self.thread_handles.push(handle);
    }

    /// Number of live poller threads
    pub fn poller_count(&self) -> usize {
        self.thread_handles.len()
    }

    /// Signal all pollers to stop and wait for them to finish
    ///
    /// Pollers check the flag at least every 100 ms, so joins complete
    /// within a bounded grace period.
    pub fn stop(&mut self) {
        info!("Stopping poll scheduler");
        {
            let mut running = self.running.lock().unwrap();
            *running = false;
        }
        for handle in self.thread_handles.drain(..) {
            if handle.join().is_err() {
                warn!("Poller thread panicked during shutdown");
            }
        }
        info!("Poll scheduler stopped");
    }

    fn poller_thread(
        mut adapter: Box<dyn SensorAdapter>,
        sensors: Vec<Sensor>,
        events: Sender<SchedulerEvent>,
        tuning: PollTuning,
        running: Arc<Mutex<bool>>,
    ) {
        let adapter_name = adapter.name().to_string();
        info!(
            "Poller for adapter '{}' started with {} sensors",
            adapter_name,
            sensors.len()
        );

        let mut rng = rand::thread_rng();
        let now = Instant::now();
        let mut states: Vec<PollState> = sensors
            .into_iter()
            .map(|sensor| PollState::new(sensor, now))
            .collect();

        while *running.lock().unwrap() {
            let now = Instant::now();

            for state in states.iter_mut() {
                if state.retired || state.next_due > now {
                    continue;
                }

                match adapter.poll(&state.sensor) {
                    Ok(sample) => {
                        let sample = state.on_success(sample);
                        if events.send(SchedulerEvent::Sample(sample)).is_err() {
                            debug!("Event channel closed, poller '{}' exiting", adapter_name);
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(
                            "Poll of '{}' failed ({} consecutive): {}",
                            state.sensor.id,
                            state.consecutive_failures + 1,
                            e
                        );
                        if let Some(event) = state.on_failure(&e, &tuning) {
                            if events.send(event).is_err() {
                                debug!("Event channel closed, poller '{}' exiting", adapter_name);
                                return;
                            }
                        }
                    }
                }
                state.schedule_next(Instant::now(), &mut rng);
            }

            if states.iter().all(|state| state.retired) {
                info!(
                    "All sensors of adapter '{}' retired, poller exiting",
                    adapter_name
                );
                return;
            }

            // Sleep until the earliest pending poll, but wake at least every
            // 100 ms to honor shutdown
            let now = Instant::now();
            let until_next = states
                .iter()
                .filter(|state| !state.retired)
                .map(|state| state.next_due.saturating_duration_since(now))
                .min()
                .unwrap_or(Duration::from_millis(100));
            thread::sleep(until_next.min(Duration::from_millis(100)).max(Duration::from_millis(1)));
        }

        info!("Poller for adapter '{}' stopped", adapter_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockSensorAdapter;
    use std::sync::mpsc;

    fn test_sensor(id: &str, interval_ms: u64) -> Sensor {
        Sensor {
            id: id.to_string(),
            label: id.to_string(),
            class: SensorClass::Temperature,
            poll_interval: Duration::from_millis(interval_ms),
            adapter: "mock".to_string(),
        }
    }

    fn tuning() -> PollTuning {
        PollTuning {
            absence_retire_polls: 10,
            max_backoff_multiplier: 10,
        }
    }

    #[test]
    fn test_three_timeouts_degrade_and_double_interval() {
        let mut state = PollState::new(test_sensor("ssd1", 1000), Instant::now());
        let timeout = SensorError::Timeout(Duration::from_millis(500));

        assert!(state.on_failure(&timeout, &tuning()).is_none());
        assert!(state.on_failure(&timeout, &tuning()).is_none());
        assert_eq!(state.current_interval(), Duration::from_millis(1000));

        let event = state.on_failure(&timeout, &tuning());
        assert_eq!(
            event,
            Some(SchedulerEvent::SensorDegraded {
                sensor_id: "ssd1".to_string(),
                consecutive_failures: 3,
            })
        );
        assert_eq!(state.current_interval(), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_caps_at_multiplier() {
        let mut state = PollState::new(test_sensor("ssd1", 1000), Instant::now());
        let timeout = SensorError::Timeout(Duration::from_millis(500));

        for _ in 0..12 {
            state.on_failure(&timeout, &tuning());
        }
        assert_eq!(state.current_interval(), Duration::from_millis(10000));
    }

    #[test]
    fn test_degraded_event_fires_once_per_episode() {
        let mut state = PollState::new(test_sensor("ssd1", 1000), Instant::now());
        let timeout = SensorError::Timeout(Duration::from_millis(500));

        let events: Vec<_> = (0..6)
            .filter_map(|_| state.on_failure(&timeout, &tuning()))
            .collect();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_success_resets_backoff_and_failures() {
        let mut state = PollState::new(test_sensor("ssd1", 1000), Instant::now());
        let timeout = SensorError::Timeout(Duration::from_millis(500));

        for _ in 0..4 {
            state.on_failure(&timeout, &tuning());
        }
        assert!(state.current_interval() > Duration::from_millis(1000));

        state.on_success(Sample::new("ssd1", 40.0));
        assert_eq!(state.current_interval(), Duration::from_millis(1000));

        // Degradation requires a fresh run of three failures
        assert!(state.on_failure(&timeout, &tuning()).is_none());
    }

    #[test]
    fn test_retirement_after_sustained_absence() {
        let mut state = PollState::new(test_sensor("sda", 1000), Instant::now());
        let absent = SensorError::DeviceUnavailable("gone".to_string());
        let tuning = PollTuning {
            absence_retire_polls: 4,
            max_backoff_multiplier: 10,
        };

        let mut events = Vec::new();
        for _ in 0..4 {
            events.extend(state.on_failure(&absent, &tuning));
        }

        assert!(state.retired());
        assert!(events.contains(&SchedulerEvent::SensorRetired {
            sensor_id: "sda".to_string()
        }));
    }

    #[test]
    fn test_non_absence_errors_reset_absence_count() {
        let mut state = PollState::new(test_sensor("sda", 1000), Instant::now());
        let absent = SensorError::DeviceUnavailable("gone".to_string());
        let timeout = SensorError::Timeout(Duration::from_millis(500));
        let tuning = PollTuning {
            absence_retire_polls: 3,
            max_backoff_multiplier: 10,
        };

        state.on_failure(&absent, &tuning);
        state.on_failure(&absent, &tuning);
        // A timeout is not evidence of removal
        state.on_failure(&timeout, &tuning);
        state.on_failure(&absent, &tuning);

        assert!(!state.retired());
    }

    #[test]
    fn test_spike_guard_flags_and_recovers() {
        let mut state = PollState::new(test_sensor("cpu0", 1000), Instant::now());

        let first = state.on_success(Sample::new("cpu0", 50.0));
        assert!(first.valid);

        // 50 -> 85 within one poll is implausible
        let spike = state.on_success(Sample::new("cpu0", 85.0));
        assert!(!spike.valid);

        // The spike became the baseline, so a sustained new level passes
        let settled = state.on_success(Sample::new("cpu0", 86.0));
        assert!(settled.valid);
    }

    #[test]
    fn test_spike_guard_only_applies_to_temperatures() {
        let mut sensor = test_sensor("fan0", 1000);
        sensor.class = SensorClass::FanSpeed;
        let mut state = PollState::new(sensor, Instant::now());

        state.on_success(Sample::new("fan0", 500.0));
        let jump = state.on_success(Sample::new("fan0", 2000.0));
        assert!(jump.valid);
    }

    #[test]
    fn test_poller_thread_delivers_samples_and_stops() {
        let mut adapter = MockSensorAdapter::new();
        adapter.expect_name().return_const("mock".to_string());
        adapter
            .expect_poll()
            .returning(|sensor| Ok(Sample::new(sensor.id.clone(), 42.0)));

        let (sender, receiver) = mpsc::channel();
        let mut scheduler = PollScheduler::new();
        scheduler.spawn_poller(
            Box::new(adapter),
            vec![test_sensor("cpu0", 10)],
            sender,
            tuning(),
        );
        assert_eq!(scheduler.poller_count(), 1);

        let event = receiver.recv_timeout(Duration::from_secs(2)).unwrap();
        match event {
            SchedulerEvent::Sample(sample) => {
                assert_eq!(sample.sensor_id, "cpu0");
                assert_eq!(sample.value, 42.0);
            }
            other => panic!("expected a sample, got {:?}", other),
        }

        scheduler.stop();
    }

    #[test]
    fn test_poller_thread_reports_degradation() {
        let mut adapter = MockSensorAdapter::new();
        adapter.expect_name().return_const("mock".to_string());
        adapter
            .expect_poll()
            .returning(|_| Err(SensorError::Timeout(Duration::from_millis(1))));

        let (sender, receiver) = mpsc::channel();
        let mut scheduler = PollScheduler::new();
        scheduler.spawn_poller(
            Box::new(adapter),
            vec![test_sensor("ssd1", 5)],
            sender,
            tuning(),
        );

        // Failures produce no samples; the first event must be the
        // degradation notice after the third consecutive timeout
        let event = receiver.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            event,
            SchedulerEvent::SensorDegraded {
                sensor_id: "ssd1".to_string(),
                consecutive_failures: 3,
            }
        );

        scheduler.stop();
    }

    #[test]
    fn test_empty_sensor_list_spawns_nothing() {
        let mut adapter = MockSensorAdapter::new();
        adapter.expect_name().return_const("mock".to_string());

        let (sender, _receiver) = mpsc::channel();
        let mut scheduler = PollScheduler::new();
        scheduler.spawn_poller(Box::new(adapter), Vec::new(), sender, tuning());
        assert_eq!(scheduler.poller_count(), 0);
        scheduler.stop();
    }
}
