//! Stateful threshold evaluation
//!
//! The engine keeps one small state machine per (rule, sensor) pair with
//! severities `Normal -> Warning -> Critical`. Escalation and de-escalation
//! are both debounced: a severity change is only accepted after the
//! configured number of consecutive qualifying samples. De-escalation is
//! additionally gated by the hysteresis margin, so a value hovering at a
//! threshold cannot make an alert flap.

use crate::alerts::rules::ThresholdRule;
use crate::sensors::{AlertEvent, AlertKind, Sample, Sensor, SensorId, Severity, Timestamp};
use log::debug;
use std::collections::HashMap;

/// Direction a pending transition is accumulating toward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Current alert state for one (rule, sensor) pair
#[derive(Debug, Clone)]
pub struct AlertState {
    /// Severity currently in effect
    pub severity: Severity,
    /// When the current severity was entered
    pub since: Timestamp,
    /// Operator acknowledgement; side channel only, never affects
    /// transitions
    pub acknowledged: bool,
    /// Qualifying-sample streak toward the next transition
    pending: Option<(Direction, u32)>,
}

impl AlertState {
    fn new(since: Timestamp) -> Self {
        Self {
            severity: Severity::Normal,
            since,
            acknowledged: false,
            pending: None,
        }
    }
}

/// Evaluates samples against all configured threshold rules
pub struct AlertEngine {
    rules: Vec<ThresholdRule>,
    states: HashMap<(String, SensorId), AlertState>,
}

impl AlertEngine {
    /// Create an engine from the rules built at startup
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self {
            rules,
            states: HashMap::new(),
        }
    }

    /// Number of configured rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate one new sample against every matching rule
    ///
    /// Returns the alert transitions this sample completed. Samples flagged
    /// invalid by the spike guard are ignored entirely: they neither advance
    /// nor reset a debounce streak.
    pub fn evaluate(&mut self, sensor: &Sensor, sample: &Sample) -> Vec<AlertEvent> {
        if !sample.valid {
            return Vec::new();
        }

        let mut events = Vec::new();
        let rules: Vec<usize> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(sensor))
            .map(|(idx, _)| idx)
            .collect();

        for idx in rules {
            let rule = self.rules[idx].clone();
            if let Some(event) = self.step(&rule, sample) {
                events.push(event);
            }
        }
        events
    }

    /// Set the acknowledged flag for an active alert state
    ///
    /// Returns `false` when no state exists for the pair yet.
    pub fn acknowledge(&mut self, rule_id: &str, sensor_id: &str) -> bool {
        match self
            .states
            .get_mut(&(rule_id.to_string(), sensor_id.to_string()))
        {
            Some(state) => {
                state.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Current state for a (rule, sensor) pair, if any sample has been seen
    pub fn state(&self, rule_id: &str, sensor_id: &str) -> Option<&AlertState> {
        self.states
            .get(&(rule_id.to_string(), sensor_id.to_string()))
    }

    /// Advance one (rule, sensor) state machine by one sample
    fn step(&mut self, rule: &ThresholdRule, sample: &Sample) -> Option<AlertEvent> {
        let key = (rule.id.clone(), sample.sensor_id.clone());
        let state = self
            .states
            .entry(key)
            .or_insert_with(|| AlertState::new(sample.timestamp));

        let next = if rule.debounce_samples == 0 {
            // Immediate mode: settle in one evaluation; escalation may skip
            // straight to the target severity
            let settled = Self::settle(rule, state.severity, sample.value);
            if settled == state.severity {
                None
            } else {
                Some(settled)
            }
        } else {
            match Self::qualifying_step(rule, state.severity, sample.value) {
                Some(next) => {
                    let direction = if next > state.severity {
                        Direction::Up
                    } else {
                        Direction::Down
                    };
                    let streak = match state.pending {
                        Some((d, count)) if d == direction => count + 1,
                        _ => 1,
                    };
                    if streak >= rule.debounce_samples {
                        Some(next)
                    } else {
                        state.pending = Some((direction, streak));
                        None
                    }
                }
                None => {
                    state.pending = None;
                    None
                }
            }
        };

        let next = next?;
        let previous = state.severity;
        state.severity = next;
        state.since = sample.timestamp;
        state.acknowledged = false;
        state.pending = None;

        debug!(
            "Alert transition for rule '{}' on '{}': {:?} -> {:?} at value {:.1}",
            rule.id, sample.sensor_id, previous, next, sample.value
        );

        Some(AlertEvent {
            rule_id: rule.id.clone(),
            sensor_id: sample.sensor_id.clone(),
            kind: if next == Severity::Normal {
                AlertKind::Cleared
            } else {
                AlertKind::Raised
            },
            previous,
            severity: next,
            value: sample.value,
            timestamp: sample.timestamp,
        })
    }

    /// The single severity step this value qualifies for, if any
    ///
    /// Escalation moves one step toward the value's target band;
    /// de-escalation requires the value to sit below the current band's
    /// threshold minus the hysteresis margin.
    fn qualifying_step(rule: &ThresholdRule, current: Severity, value: f64) -> Option<Severity> {
        let target = rule.target_severity(value);
        if target > current {
            return Some(match current {
                Severity::Normal => Severity::Warning,
                _ => Severity::Critical,
            });
        }
        if let Some(exit) = rule.exit_level(current) {
            if value < exit {
                return Some(match current {
                    Severity::Critical => Severity::Warning,
                    _ => Severity::Normal,
                });
            }
        }
        None
    }

    /// Severity the state settles at with debounce disabled
    fn settle(rule: &ThresholdRule, mut current: Severity, value: f64) -> Severity {
        let target = rule.target_severity(value);
        if target > current {
            return target;
        }
        while let Some(next) = Self::qualifying_step(rule, current, value) {
            current = next;
        }
        current
    }
}
