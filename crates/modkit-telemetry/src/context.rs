//! Request context for correlation across operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::logger::{BoundLogger, Logger};

/// Generate a fresh request ID (UUID v4, hyphenated).
#[must_use]
pub fn request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Request context for correlation across operations.
///
/// Bind it onto a logger with [`RequestContext::bind_to`] so every record
/// produced while serving the request carries its IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Unique request identifier.
    pub request_id: Uuid,
    /// Correlation ID shared by a request and all of its sub-requests.
    pub correlation_id: Uuid,
    /// Parent request ID if this is a sub-request.
    pub parent_id: Option<Uuid>,
    /// When the request started.
    pub started_at: DateTime<Utc>,
    /// Component that created this context.
    pub source: String,
    /// Operation being performed.
    pub operation: Option<String>,
    /// Additional metadata, bound as context alongside the IDs.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RequestContext {
    /// Create a new request context.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            request_id: id,
            correlation_id: id,
            parent_id: None,
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Create a child context that inherits correlation info and metadata.
    #[must_use]
    pub fn child(&self, source: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            parent_id: Some(self.request_id),
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
            metadata: self.metadata.clone(),
        }
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = id;
        self
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Add metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Get elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        // Utc::now() >= self.started_at unless the wall clock moved back
        #[allow(clippy::arithmetic_side_effects)]
        let elapsed = Utc::now() - self.started_at;
        elapsed
    }

    /// Get elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed().num_milliseconds()
    }

    /// Check if this context has a parent.
    #[must_use]
    pub fn has_parent(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Get a short identifier for logging.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.request_id.simple().to_string()[..8].to_string()
    }

    /// Context entries this request contributes to records.
    #[must_use]
    pub fn fields(&self) -> Vec<(String, serde_json::Value)> {
        let mut fields = vec![
            ("request_id".to_string(), self.request_id.to_string().into()),
            (
                "correlation_id".to_string(),
                self.correlation_id.to_string().into(),
            ),
            ("source".to_string(), self.source.clone().into()),
        ];
        if let Some(parent) = self.parent_id {
            fields.push(("parent_id".to_string(), parent.to_string().into()));
        }
        if let Some(operation) = &self.operation {
            fields.push(("operation".to_string(), operation.clone().into()));
        }
        fields.extend(
            self.metadata
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone()))),
        );
        fields
    }

    /// Derive a handle from `logger` carrying this request's fields.
    #[must_use]
    pub fn bind_to(&self, logger: impl Into<BoundLogger>) -> BoundLogger {
        let logger: BoundLogger = logger.into();
        logger.bind(self.fields())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// Logs when a request starts and completes.
#[derive(Debug)]
pub struct RequestGuard {
    context: RequestContext,
    logger: BoundLogger,
}

impl RequestGuard {
    /// Bind `context` onto `logger` and log `Request started` at DEBUG.
    #[must_use]
    pub fn new(context: RequestContext, logger: &Logger) -> Self {
        let logger = context.bind_to(logger);
        logger.debug("Request started");
        Self { context, logger }
    }

    /// Get the request context.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Handle carrying the request's fields.
    #[must_use]
    pub fn logger(&self) -> &BoundLogger {
        &self.logger
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.logger
            .with("elapsed_ms", self.context.elapsed_ms())
            .debug("Request completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::testing::capture;

    #[test]
    fn test_request_id_is_uuid() {
        let id = request_id();
        assert_eq!(id.len(), 36);
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, request_id());
    }

    #[test]
    fn test_request_context_creation() {
        let ctx = RequestContext::new("test");
        assert_eq!(ctx.source, "test");
        assert_eq!(ctx.request_id, ctx.correlation_id);
        assert!(ctx.parent_id.is_none());
        assert!(!ctx.has_parent());
    }

    #[test]
    fn test_request_context_builder() {
        let correlation = Uuid::new_v4();

        let ctx = RequestContext::new("test")
            .with_correlation_id(correlation)
            .with_operation("test_op")
            .with_metadata("key", "value");

        assert_eq!(ctx.correlation_id, correlation);
        assert_eq!(ctx.operation, Some("test_op".to_string()));
        assert_eq!(ctx.metadata.get("key"), Some(&"value".to_string()));
    }

    #[test]
    fn test_child_context() {
        let parent = RequestContext::new("parent").with_metadata("inherited", "yes");

        let child = parent.child("child");

        assert_ne!(child.request_id, parent.request_id);
        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.parent_id, Some(parent.request_id));
        assert_eq!(child.metadata.get("inherited"), Some(&"yes".to_string()));
    }

    #[test]
    fn test_elapsed() {
        let ctx = RequestContext::new("test");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(ctx.elapsed_ms() >= 10);
    }

    #[test]
    fn test_short_id() {
        let ctx = RequestContext::new("test");
        assert_eq!(ctx.short_id().len(), 8);
    }

    #[test]
    fn test_serialization() {
        let ctx = RequestContext::new("test")
            .with_operation("test_op")
            .with_metadata("key", "value");

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("\"source\":\"test\""));
        assert!(json.contains("\"operation\":\"test_op\""));

        let parsed: RequestContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.source, "test");
        assert_eq!(parsed.operation, Some("test_op".to_string()));
    }

    #[test]
    fn test_bind_to_carries_ids() {
        let (logger, records) = capture(Level::Trace);
        let ctx = RequestContext::new("dashboard")
            .with_operation("voucher_report")
            .with_metadata("reseller", "r-17");
        let child = ctx.child("pg");

        child.bind_to(&logger).info("query done");

        let records = records.take();
        let fields = &records[0].context;
        assert_eq!(fields["request_id"], child.request_id.to_string());
        assert_eq!(fields["correlation_id"], ctx.request_id.to_string());
        assert_eq!(fields["parent_id"], ctx.request_id.to_string());
        assert_eq!(fields["source"], "pg");
        assert_eq!(fields["reseller"], "r-17");
        assert!(!fields.contains_key("operation"));
    }

    #[test]
    fn test_request_guard_logs_start_and_completion() {
        let (logger, records) = capture(Level::Debug);
        {
            let guard = RequestGuard::new(RequestContext::new("api"), &logger);
            guard.logger().info("handling");
        }
        let records = records.take();
        let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["Request started", "handling", "Request completed"]);
        assert!(records[2].context.contains_key("elapsed_ms"));
        assert_eq!(records[2].context["source"], "api");
    }
}
