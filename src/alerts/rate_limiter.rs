use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Rate limiter for notification deliveries
///
/// Tracks recent deliveries in a sliding window and enforces a maximum per
/// window. Over-limit alert events are still persisted by the flusher; only
/// the push to the notification sink is suppressed.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum deliveries allowed per window
    max_per_window: usize,
    /// Window length
    window: Duration,
    /// Timestamps of recent deliveries inside the window
    recent: VecDeque<DateTime<Utc>>,
}

impl RateLimiter {
    /// Create a rate limiter allowing `max_per_window` deliveries per
    /// `window_secs` seconds
    pub fn new(max_per_window: usize, window_secs: u64) -> Self {
        Self {
            max_per_window,
            window: Duration::seconds(window_secs as i64),
            recent: VecDeque::new(),
        }
    }

    /// Whether a delivery can happen now without exceeding the limit
    pub fn can_send(&mut self) -> bool {
        self.cleanup(Utc::now());
        self.recent.len() < self.max_per_window
    }

    /// Record a delivery at the current time
    pub fn record_delivery(&mut self) {
        self.record_delivery_at(Utc::now());
    }

    /// Record a delivery at a specific time (test seam)
    pub fn record_delivery_at(&mut self, timestamp: DateTime<Utc>) {
        self.recent.push_back(timestamp);
        self.cleanup(Utc::now());
    }

    /// Deliveries currently inside the window
    pub fn current_count(&mut self) -> usize {
        self.cleanup(Utc::now());
        self.recent.len()
    }

    /// Drop recorded deliveries that fell out of the window
    fn cleanup(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.recent.retain(|&time| time > cutoff);
    }
}
