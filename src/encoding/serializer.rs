//! Pluggable record serializers
//!
//! A serializer turns one record into the bytes of a request body. The sink does not
//! care about the format beyond the content type and how bodies of a batch are joined.

use std::sync::Arc;

use crate::core::config::RequestFormat;
use crate::core::errors::{SinkError, SinkResult};

use super::Record;

/// Serializer trait producing one body per record
pub trait RecordSerializer: Send + Sync {
    /// Format name as used in the `format` option
    fn name(&self) -> &'static str;

    /// Content type of a body produced by this serializer
    fn content_type(&self) -> &'static str;

    /// Serialize a record into body bytes
    fn serialize(&self, record: &Record) -> SinkResult<Vec<u8>>;
}

/// Serializes the record value as JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl RecordSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize(&self, record: &Record) -> SinkResult<Vec<u8>> {
        serde_json::to_vec(&record.value)
            .map_err(|e| SinkError::encoding(format!("Failed to serialize record: {}", e)))
    }
}

/// Sends string values verbatim
#[derive(Debug, Default, Clone, Copy)]
pub struct RawSerializer;

impl RecordSerializer for RawSerializer {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    fn serialize(&self, record: &Record) -> SinkResult<Vec<u8>> {
        match record.value.as_str() {
            Some(text) => Ok(text.as_bytes().to_vec()),
            None => Err(SinkError::encoding_with_context(
                "raw format requires a string record value",
                record.value.to_string(),
            )),
        }
    }
}

/// Serializer for the configured format
pub fn serializer_for(format: RequestFormat) -> Arc<dyn RecordSerializer> {
    match format {
        RequestFormat::Json => Arc::new(JsonSerializer),
        RequestFormat::Raw => Arc::new(RawSerializer),
    }
}
