/// Append-only record storage
pub mod storage;

/// Notification sinks for alert events
pub mod notify;

/// Batch flush loop with retry and drop accounting
pub mod flusher;

pub use flusher::Flusher;
pub use notify::{build_sink, CommandSink, LogSink, ReportSink, WebhookSink};
pub use storage::{JsonlStore, Record, SampleStore};
