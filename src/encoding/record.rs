//! Upstream record type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{SinkError, SinkResult};

/// One logical unit received from the upstream stream, immutable once received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Optional record key, carried through to outcome reports
    pub key: Option<String>,
    /// Record payload
    pub value: Value,
    /// When the record entered the sink
    pub received_at: DateTime<Utc>,
}

impl Record {
    pub fn new(value: Value) -> Self {
        Self {
            key: None,
            value,
            received_at: Utc::now(),
        }
    }

    pub fn with_key<S: Into<String>>(mut self, key: S) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Build a record from one line of newline-delimited JSON
    pub fn from_json_line(line: &str) -> SinkResult<Self> {
        let value: Value = serde_json::from_str(line).map_err(|e| {
            SinkError::encoding_with_context(format!("Invalid JSON record: {}", e), line)
        })?;
        Ok(Self::new(value))
    }
}
