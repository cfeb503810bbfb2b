//! Error types for the HTTP sink
//! Provides structured error handling using thiserror for better error reporting

use std::time::Duration;

use thiserror::Error;

use crate::batch::Batch;

/// Main error type for the HTTP sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// Invalid or missing configuration, fatal at startup
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A record could not be turned into a request body
    #[error("Encoding error: {message}")]
    Encoding {
        message: String,
        context: Option<String>,
    },

    /// Payload encryption failed for a single record
    #[error("Encryption error: {message}")]
    Encryption { message: String },

    /// No dispatch slot became free within the admission timeout
    #[error("Capacity exceeded: {in_flight} batches in flight, waited {waited:?}")]
    CapacityExceeded { in_flight: usize, waited: Duration },

    /// The sink no longer admits batches
    #[error("Sink is closed")]
    Closed,

    /// Callback plugin could not be created
    #[error("Callback error: {message}")]
    Callback { message: String, callback: String },

    /// Network/IO related errors
    #[error("Network IO error")]
    NetworkIO(#[from] std::io::Error),

    /// Task execution errors for async operations
    #[error("Task execution error")]
    TaskExecution(#[from] tokio::task::JoinError),
}

/// Result type alias for convenience
pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl SinkError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an encoding error
    pub fn encoding<S: Into<String>>(message: S) -> Self {
        Self::Encoding {
            message: message.into(),
            context: None,
        }
    }

    /// Create an encoding error with context
    pub fn encoding_with_context<S: Into<String>, C: Into<String>>(message: S, context: C) -> Self {
        Self::Encoding {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create an encryption error
    pub fn encryption<S: Into<String>>(message: S) -> Self {
        Self::Encryption {
            message: message.into(),
        }
    }

    /// Create a callback error
    pub fn callback<S: Into<String>, N: Into<String>>(callback: N, message: S) -> Self {
        Self::Callback {
            message: message.into(),
            callback: callback.into(),
        }
    }

    /// Whether the caller may retry the same operation later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// A batch the sink refused to admit, handed back to the caller untouched
#[derive(Error, Debug)]
#[error("batch {} was not admitted: {reason}", .batch.id())]
pub struct SubmitError {
    pub batch: Batch,
    #[source]
    pub reason: SinkError,
}

impl SubmitError {
    pub fn new(batch: Batch, reason: SinkError) -> Self {
        Self { batch, reason }
    }

    /// Take the batch back for a later resubmission
    pub fn into_batch(self) -> Batch {
        self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = SinkError::config("url is required");
        assert_eq!(err.to_string(), "Configuration error: url is required");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_capacity_exceeded_is_transient() {
        let err = SinkError::CapacityExceeded {
            in_flight: 4,
            waited: Duration::from_millis(10),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("4 batches in flight"));
    }
}
