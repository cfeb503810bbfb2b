//! Outcome classification and reports

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::encoding::Record;
use crate::retry::FailureKind;
use crate::tracing_context::CorrelationId;

use super::transport::TransportError;

/// Terminal outcome of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    PermanentFailure,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Success => write!(f, "success"),
            OutcomeKind::PermanentFailure => write!(f, "permanent_failure"),
        }
    }
}

/// Response received from the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Retry-After` given in seconds; HTTP dates are ignored
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
            .and_then(|(_, value)| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    Retryable { failure: FailureKind, reason: String },
    Permanent { reason: String },
}

/// Classify the result of one attempt
///
/// 2xx is success. 5xx, the configured retryable codes, timeouts and network errors
/// are retryable. Everything else is permanent.
pub fn classify(
    result: &Result<HttpResponse, TransportError>,
    retryable_status_codes: &BTreeSet<u16>,
) -> Classification {
    match result {
        Ok(response) if response.is_success() => Classification::Success,
        Ok(response) => {
            let reason = format!("endpoint returned HTTP {}", response.status);
            if (500..600).contains(&response.status)
                || retryable_status_codes.contains(&response.status)
            {
                Classification::Retryable {
                    failure: FailureKind::Status {
                        code: response.status,
                        retry_after: response.retry_after(),
                    },
                    reason,
                }
            } else {
                Classification::Permanent { reason }
            }
        }
        Err(TransportError::Timeout) => Classification::Retryable {
            failure: FailureKind::Timeout,
            reason: TransportError::Timeout.to_string(),
        },
        Err(e @ (TransportError::Connect(_) | TransportError::Network(_))) => {
            Classification::Retryable {
                failure: FailureKind::Network,
                reason: e.to_string(),
            }
        }
        Err(e @ TransportError::Invalid(_)) => Classification::Permanent {
            reason: e.to_string(),
        },
    }
}

/// Everything the post-request callback learns about a finished batch
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub batch_id: CorrelationId,
    pub outcome: OutcomeKind,
    /// Attempts made; 0 when the records never reached the endpoint
    pub attempts: u32,
    /// Member records in batch order
    pub records: Vec<Record>,
    pub response: Option<HttpResponse>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.outcome == OutcomeKind::Success
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}
