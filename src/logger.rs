//! Structured event sink used by the request pipeline.

use std::time::Duration;

use serde_json::Value;

use crate::ApiError;

/// One request/response exchange as seen by the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiLogEntry {
    pub method: String,
    pub path: String,
    pub request_id: Option<String>,
    pub request_body: Value,
    /// `None` while the request is still outbound.
    pub response_body: Option<Value>,
    /// Zero while the request is still outbound.
    pub duration: Duration,
}

/// Receives pipeline events. Implementations must not block.
pub trait Logger: Send + Sync {
    fn api_log(&self, entry: &ApiLogEntry);
    fn debug(&self, message: &str, context: &Value);
    fn info(&self, message: &str, context: &Value);
    fn warn(&self, message: &str, context: &Value);
    fn error(&self, message: &str, context: &Value);
    fn capture_error(&self, error: &ApiError, context: &str, extra: &Value);
}

/// Default [`Logger`] forwarding to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn api_log(&self, entry: &ApiLogEntry) {
        let response_body = entry.response_body.as_ref().unwrap_or(&Value::Null);
        tracing::debug!(
            target: "careers_http",
            method = %entry.method,
            path = %entry.path,
            request_id = entry.request_id.as_deref().unwrap_or(""),
            request_body = %entry.request_body,
            response_body = %response_body,
            duration_ms = entry.duration.as_millis() as u64,
            "api call"
        );
    }

    fn debug(&self, message: &str, context: &Value) {
        tracing::debug!(target: "careers_http", context = %context, "{}", message);
    }

    fn info(&self, message: &str, context: &Value) {
        tracing::info!(target: "careers_http", context = %context, "{}", message);
    }

    fn warn(&self, message: &str, context: &Value) {
        tracing::warn!(target: "careers_http", context = %context, "{}", message);
    }

    fn error(&self, message: &str, context: &Value) {
        tracing::error!(target: "careers_http", context = %context, "{}", message);
    }

    fn capture_error(&self, error: &ApiError, context: &str, extra: &Value) {
        tracing::error!(
            target: "careers_http",
            error = %error,
            extra = %extra,
            "{}",
            context
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiLogEntry, Logger, TracingLogger};
    use crate::ApiError;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn tracing_logger_accepts_pending_and_completed_entries() {
        let logger = TracingLogger;
        let mut entry = ApiLogEntry {
            method: "GET".to_owned(),
            path: "/jobs".to_owned(),
            request_id: None,
            request_body: serde_json::Value::Null,
            response_body: None,
            duration: Duration::ZERO,
        };
        logger.api_log(&entry);

        entry.request_id = Some("1_abcdefghi".to_owned());
        entry.response_body = Some(json!({"items": []}));
        entry.duration = Duration::from_millis(12);
        logger.api_log(&entry);

        logger.capture_error(&ApiError::Unauthenticated, "api request failed", &json!({}));
    }
}
