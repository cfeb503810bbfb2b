//! Correlation ID and tracing context management
//!
//! Every sealed batch gets a correlation ID. Its dispatch, retries and outcome report
//! are logged inside a span carrying that ID, so one batch can be followed end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::Span;
use uuid::Uuid;

/// Global counter for generating sequential correlation IDs
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A correlation ID that uniquely identifies a batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new correlation ID using timestamp and counter
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::SeqCst);

        // Format: timestamp-counter for readability and uniqueness
        CorrelationId(format!("{}-{}", timestamp, counter))
    }

    /// Generate a UUID-based correlation ID, unique across restarts; used for batch IDs
    pub fn new_uuid() -> Self {
        CorrelationId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tracing context that holds correlation and span information
#[derive(Debug, Clone)]
pub struct TracingContext {
    pub correlation_id: CorrelationId,
    pub span: Span,
}

impl TracingContext {
    /// Create a tracing context for a specific correlation ID
    pub fn with_correlation_id(correlation_id: CorrelationId) -> Self {
        let span = tracing::info_span!(
            "batch",
            correlation_id = %correlation_id,
            component = "stream2http"
        );

        Self {
            correlation_id,
            span,
        }
    }

    /// Create a child context for a specific operation
    pub fn child_context(&self, operation: &str) -> Self {
        let span = tracing::info_span!(
            parent: &self.span,
            "batch_operation",
            correlation_id = %self.correlation_id,
            operation = operation,
            attempt = tracing::field::Empty,
            records = tracing::field::Empty,
        );

        Self {
            correlation_id: self.correlation_id.clone(),
            span,
        }
    }

    /// Record a field declared on the span
    pub fn record<V: tracing::Value>(&self, field: &str, value: V) -> &Self {
        self.span.record(field, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_generation() {
        let id1 = CorrelationId::new();
        let id2 = CorrelationId::new();

        assert_ne!(id1, id2);
        assert!(!id1.as_str().is_empty());
    }

    #[test]
    fn test_correlation_id_uuid() {
        let id1 = CorrelationId::new_uuid();
        let id2 = CorrelationId::new_uuid();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 36);
    }

    #[test]
    fn test_tracing_context() {
        let context = TracingContext::with_correlation_id(CorrelationId::new());
        let child_context = context.child_context("dispatch");
        child_context.record("attempt", 1u32);

        assert_eq!(context.correlation_id, child_context.correlation_id);
    }
}
