//! Notification sinks
//!
//! Alert events can be pushed to an external collaborator: the application
//! log, an HTTP webhook, or a user-supplied command. The sink is an abstract
//! push interface; delivery failures are reported, logged by the caller and
//! never interrupt monitoring.

use crate::config::{NotifyConfig, SinkConfig};
use crate::error::ReportError;
use crate::sensors::AlertEvent;
use log::{info, warn};
use std::process::Command;
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Abstract push interface for alert events
pub trait ReportSink: Send {
    /// Short sink name for diagnostics
    fn name(&self) -> &str;

    /// Deliver one alert event
    fn report(&mut self, event: &AlertEvent) -> Result<(), ReportError>;
}

/// Build the configured sink, or `None` when notifications are disabled
pub fn build_sink(config: &NotifyConfig) -> Result<Option<Box<dyn ReportSink>>, ReportError> {
    match &config.sink {
        SinkConfig::None => Ok(None),
        SinkConfig::Log => Ok(Some(Box::new(LogSink))),
        SinkConfig::Webhook { url } => Ok(Some(Box::new(WebhookSink::new(url.clone())?))),
        SinkConfig::Command { program } => Ok(Some(Box::new(CommandSink::new(program.clone())))),
    }
}

/// Sink writing alert summaries to the application log
pub struct LogSink;

impl ReportSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn report(&mut self, event: &AlertEvent) -> Result<(), ReportError> {
        warn!("ALERT {}", event.summary());
        Ok(())
    }
}

/// Sink POSTing alert events as JSON to an HTTP endpoint
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl WebhookSink {
    pub fn new(url: String) -> Result<Self, ReportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ReportError::DeliveryFailed(format!("tokio runtime: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self {
            url,
            client,
            runtime,
        })
    }
}

impl ReportSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn report(&mut self, event: &AlertEvent) -> Result<(), ReportError> {
        let request = self.client.post(&self.url).json(event);
        self.runtime.block_on(async {
            let response = request.send().await?;
            response.error_for_status()?;
            Ok::<(), ReportError>(())
        })?;
        info!("Delivered alert webhook for '{}'", event.sensor_id);
        Ok(())
    }
}

/// Sink invoking a user command with the alert summary as its argument
///
/// Replaces the desktop toast/sound notifications of a GUI deployment; the
/// command receives the severity and the summary line.
pub struct CommandSink {
    program: String,
}

impl CommandSink {
    pub fn new(program: String) -> Self {
        Self { program }
    }
}

impl ReportSink for CommandSink {
    fn name(&self) -> &str {
        "command"
    }

    fn report(&mut self, event: &AlertEvent) -> Result<(), ReportError> {
        let severity = format!("{:?}", event.severity).to_lowercase();
        let output = Command::new(&self.program)
            .arg(&severity)
            .arg(event.summary())
            .output()
            .map_err(|e| {
                ReportError::DeliveryFailed(format!("failed to run '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReportError::DeliveryFailed(format!(
                "'{}' exited with {}: {}",
                self.program, output.status, stderr
            )));
        }

        info!("Delivered alert command for '{}'", event.sensor_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{AlertKind, Severity};
    use chrono::Utc;

    fn test_event() -> AlertEvent {
        AlertEvent {
            rule_id: "cpu-temp".to_string(),
            sensor_id: "cpu0".to_string(),
            kind: AlertKind::Raised,
            previous: Severity::Normal,
            severity: Severity::Warning,
            value: 86.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_log_sink_always_succeeds() {
        let mut sink = LogSink;
        assert_eq!(sink.name(), "log");
        assert!(sink.report(&test_event()).is_ok());
    }

    #[test]
    fn test_command_sink_success() {
        let mut sink = CommandSink::new("true".to_string());
        assert!(sink.report(&test_event()).is_ok());
    }

    #[test]
    fn test_command_sink_failure_status() {
        let mut sink = CommandSink::new("false".to_string());
        assert!(matches!(
            sink.report(&test_event()),
            Err(ReportError::DeliveryFailed(_))
        ));
    }

    #[test]
    fn test_command_sink_missing_program() {
        let mut sink = CommandSink::new("definitely-not-a-real-notifier".to_string());
        assert!(matches!(
            sink.report(&test_event()),
            Err(ReportError::DeliveryFailed(_))
        ));
    }

    #[test]
    fn test_build_sink_variants() {
        let mut config = NotifyConfig::default();

        config.sink = SinkConfig::None;
        assert!(build_sink(&config).unwrap().is_none());

        config.sink = SinkConfig::Log;
        let sink = build_sink(&config).unwrap().unwrap();
        assert_eq!(sink.name(), "log");

        config.sink = SinkConfig::Command {
            program: "notify-send".to_string(),
        };
        let sink = build_sink(&config).unwrap().unwrap();
        assert_eq!(sink.name(), "command");

        config.sink = SinkConfig::Webhook {
            url: "http://localhost:9/hook".to_string(),
        };
        let sink = build_sink(&config).unwrap().unwrap();
        assert_eq!(sink.name(), "webhook");
    }

    #[test]
    fn test_webhook_sink_unreachable_endpoint() {
        // Port 9 (discard) is almost never listening; delivery must fail
        // with a typed error, not hang or panic
        let mut sink = WebhookSink::new("http://127.0.0.1:9/hook".to_string()).unwrap();
        assert!(sink.report(&test_event()).is_err());
    }
}
