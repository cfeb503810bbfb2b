//! Record to request encoding
//!
//! Turns one upstream record into one [`EncodedRequest`]: the serializer produces the
//! body, the encryption module transforms it, then headers are attached.

pub mod encryption;
pub mod record;
pub mod serializer;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::core::config::{HttpMethod, SinkConfig};
use crate::core::errors::SinkResult;

pub use encryption::{
    EncryptionConfig, EncryptionMode, EncryptionModule, KeyedEncryption, KeyedEnvelope,
    PlainEncryption, build_encryption,
};
pub use record::Record;
pub use serializer::{JsonSerializer, RawSerializer, RecordSerializer, serializer_for};

/// One record ready to be sent, produced 1:1 from a [`Record`]
#[derive(Debug, Clone)]
pub struct EncodedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub record: Record,
}

impl EncodedRequest {
    /// Body size counted against the batch byte limit
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Encodes records into requests; stateless, shareable across tasks
#[derive(Clone)]
pub struct RequestEncoder {
    method: HttpMethod,
    url: String,
    headers: BTreeMap<String, String>,
    serializer: Arc<dyn RecordSerializer>,
    encryption: Arc<dyn EncryptionModule>,
}

impl RequestEncoder {
    /// Build the encoder from configuration
    ///
    /// The encryption module is constructed here so missing key material fails before
    /// any record is processed.
    pub fn new(config: &SinkConfig) -> SinkResult<Self> {
        let encryption = build_encryption(&config.encryption)?;
        Ok(Self::with_parts(
            config.method,
            config.url.clone(),
            config.headers.clone(),
            serializer_for(config.format),
            encryption,
        ))
    }

    pub fn with_parts(
        method: HttpMethod,
        url: String,
        static_headers: BTreeMap<String, String>,
        serializer: Arc<dyn RecordSerializer>,
        encryption: Arc<dyn EncryptionModule>,
    ) -> Self {
        let mut headers = static_headers;
        if !headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"))
        {
            let content_type = encryption
                .content_type()
                .unwrap_or_else(|| serializer.content_type());
            headers.insert("Content-Type".to_string(), content_type.to_string());
        }
        headers.extend(encryption.headers());

        Self {
            method,
            url,
            headers,
            serializer,
            encryption,
        }
    }

    pub fn encryption_mode(&self) -> EncryptionMode {
        self.encryption.mode()
    }

    /// Encode one record
    ///
    /// Fails with an encoding error when the serializer cannot produce bytes, or an
    /// encryption error when the transform fails.
    pub fn encode(&self, record: &Record) -> SinkResult<EncodedRequest> {
        let serialized = self.serializer.serialize(record)?;
        let body = self.encryption.transform(&serialized)?;
        trace!(
            "Encoded record into {} byte body ({} before transform)",
            body.len(),
            serialized.len()
        );

        Ok(EncodedRequest {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
            record: record.clone(),
        })
    }
}
