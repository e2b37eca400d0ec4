//! Monitoring sink trait for host integrations.
//!
//! Host-side monitoring, alerting, and error capture go through a single
//! narrow trait. The engine never depends on a concrete monitoring vendor;
//! hosts plug in their own implementation or get the tracing-backed
//! internal sink.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Severity of an alert raised through the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    /// Informational, no action required.
    Info,
    /// Degraded behavior worth attention.
    Warning,
    /// An operation failed and was not recovered.
    Critical,
}

impl AlertSeverity {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Capability set exposed to host monitoring integrations.
#[async_trait]
pub trait MonitoringSink: Send + Sync {
    /// Record a numeric metric sample.
    async fn record_metric(&self, name: &str, value: f64, tags: &HashMap<String, String>);

    /// Raise an alert.
    async fn record_alert(&self, severity: AlertSeverity, message: &str);

    /// Capture an error for host-side error tracking.
    async fn capture_error(&self, operation: &str, message: &str);

    /// Forward an audit payload to a host audit pipeline.
    async fn log_audit(&self, kind: &str, payload: &Value);
}

/// Sink that discards everything. Used when monitoring is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl MonitoringSink for NoopSink {
    async fn record_metric(&self, _name: &str, _value: f64, _tags: &HashMap<String, String>) {}

    async fn record_alert(&self, _severity: AlertSeverity, _message: &str) {}

    async fn capture_error(&self, _operation: &str, _message: &str) {}

    async fn log_audit(&self, _kind: &str, _payload: &Value) {}
}

/// Internal sink that emits through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl MonitoringSink for TracingSink {
    async fn record_metric(&self, name: &str, value: f64, tags: &HashMap<String, String>) {
        info!(target: "pilot_metrics", metric = name, value = value, tags = ?tags, "metric");
    }

    async fn record_alert(&self, severity: AlertSeverity, message: &str) {
        match severity {
            AlertSeverity::Info => info!(target: "pilot_alerts", "{message}"),
            AlertSeverity::Warning => warn!(target: "pilot_alerts", "{message}"),
            AlertSeverity::Critical => error!(target: "pilot_alerts", "{message}"),
        }
    }

    async fn capture_error(&self, operation: &str, message: &str) {
        error!(target: "pilot_errors", operation = operation, "{message}");
    }

    async fn log_audit(&self, kind: &str, payload: &Value) {
        info!(target: "audit", kind = kind, payload = %payload, "audit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_sink_accepts_everything() {
        let sink = NoopSink;
        sink.record_metric("telemetry.accepted", 1.0, &HashMap::new())
            .await;
        sink.record_alert(AlertSeverity::Warning, "coverage low").await;
        sink.capture_error("create_index", "lock busy").await;
        sink.log_audit("create_index", &serde_json::json!({"table": "users"}))
            .await;
    }

    #[tokio::test]
    async fn test_tracing_sink_is_object_safe() {
        let sink: Box<dyn MonitoringSink> = Box::new(TracingSink);
        sink.record_alert(AlertSeverity::Info, "started").await;
    }

    #[test]
    fn test_severity_names() {
        assert_eq!(AlertSeverity::Critical.as_str(), "critical");
    }
}
