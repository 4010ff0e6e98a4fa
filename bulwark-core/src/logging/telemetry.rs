//! Telemetry sink contract
//!
//! The logger hands one flat [`TelemetryEvent`] per logged failure to an
//! optional sink. Delivery is fire-and-forget on the current tokio runtime; a
//! sink failure is never reported back to the code that logged the error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, Category, ErrorCode, Severity};

/// Flat event record delivered to a telemetry sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub event: String,
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub category: Category,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
    pub user_agent: Option<String>,
}

impl TelemetryEvent {
    pub const ERROR_EVENT: &'static str = "app_error";

    pub fn from_error(
        error: &AppError,
        session_id: &str,
        url: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            event: Self::ERROR_EVENT.to_string(),
            code: error.code(),
            message: error.message().to_string(),
            severity: error.severity(),
            category: error.category(),
            session_id: session_id.to_string(),
            timestamp: error.timestamp(),
            url,
            user_agent,
        }
    }
}

/// Receiver of telemetry events
#[async_trait]
pub trait TelemetrySink: Send + Sync + fmt::Debug {
    async fn send(&self, event: TelemetryEvent) -> Result<(), AppError>;
}

/// Forwards events to `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn send(&self, event: TelemetryEvent) -> Result<(), AppError> {
        info!(
            target: "bulwark::telemetry",
            event = %event.event,
            code = %event.code,
            severity = %event.severity,
            category = %event.category,
            session_id = %event.session_id,
            "Telemetry event"
        );
        Ok(())
    }
}

/// Keeps every delivered event in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn send(&self, event: TelemetryEvent) -> Result<(), AppError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Hand `event` to `sink` without waiting for delivery.
///
/// Outside a tokio runtime the event is dropped.
pub(crate) fn dispatch(sink: Arc<dyn TelemetrySink>, event: TelemetryEvent) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!(code = %event.code, "No runtime available, telemetry event dropped");
        return;
    };

    handle.spawn(async move {
        let code = event.code;
        if let Err(e) = sink.send(event).await {
            debug!(code = %code, error = %e, "Telemetry delivery failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FailingSink;

    #[async_trait]
    impl TelemetrySink for FailingSink {
        async fn send(&self, _event: TelemetryEvent) -> Result<(), AppError> {
            Err(AppError::network("collector unreachable"))
        }
    }

    fn sample_event() -> TelemetryEvent {
        let error = AppError::from_code(ErrorCode::NetworkServerError);
        TelemetryEvent::from_error(&error, "session-1", Some("app://atlas".into()), None)
    }

    #[tokio::test]
    async fn test_dispatch_delivers_to_sink() {
        let sink = RecordingSink::new();
        dispatch(Arc::new(sink.clone()), sample_event());
        tokio::task::yield_now().await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "app_error");
        assert_eq!(events[0].code, ErrorCode::NetworkServerError);
        assert_eq!(events[0].url.as_deref(), Some("app://atlas"));
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        dispatch(Arc::new(FailingSink), sample_event());
        tokio::task::yield_now().await;
    }

    #[test]
    fn test_dispatch_without_runtime_is_noop() {
        let sink = RecordingSink::new();
        dispatch(Arc::new(sink.clone()), sample_event());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(json["sessionId"], "session-1");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["category"], "network");
        assert!(json.get("userAgent").is_some());
    }
}
