/// Threshold rules and sensor selectors
pub mod rules;

/// Stateful alert engine with hysteresis and debounce
pub mod engine;

/// Notification rate limiting
pub mod rate_limiter;

pub use engine::{AlertEngine, AlertState};
pub use rate_limiter::RateLimiter;
pub use rules::{SensorSelector, ThresholdRule};
