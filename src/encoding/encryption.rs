//! Payload encryption applied to serialized request bodies
//!
//! Two modes exist:
//! - `plain`: bodies are sent as serialized
//! - `keyed`: each body is sealed with a fresh AES-256-GCM data key; the data key is
//!   wrapped with the receiver's RSA public key and the application id is bound in as
//!   associated data
//!
//! Key material is validated once when the module is built, never per record.

use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{SinkError, SinkResult};

pub const MODE_HEADER: &str = "X-Encryption-Mode";
pub const APP_ID_HEADER: &str = "X-App-Id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EncryptionMode {
    #[default]
    Plain,
    Keyed,
}

impl std::fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncryptionMode::Plain => write!(f, "plain"),
            EncryptionMode::Keyed => write!(f, "keyed"),
        }
    }
}

/// Encryption settings; `keyed` needs both the public key and the application id
#[derive(Clone, Debug, Default)]
pub struct EncryptionConfig {
    pub mode: EncryptionMode,
    pub public_key: Option<String>,
    pub app_id: Option<String>,
}

impl EncryptionConfig {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn keyed<K: Into<String>, A: Into<String>>(public_key: K, app_id: A) -> Self {
        Self {
            mode: EncryptionMode::Keyed,
            public_key: Some(public_key.into()),
            app_id: Some(app_id.into()),
        }
    }
}

/// Transformation applied to every serialized body
pub trait EncryptionModule: Send + Sync {
    fn mode(&self) -> EncryptionMode;

    /// Transform a serialized body
    fn transform(&self, body: &[u8]) -> SinkResult<Vec<u8>>;

    /// Extra headers describing the transformation
    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Content type of the transformed body when it differs from the serializer's
    fn content_type(&self) -> Option<&'static str> {
        None
    }
}

/// Identity transform
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainEncryption;

impl EncryptionModule for PlainEncryption {
    fn mode(&self) -> EncryptionMode {
        EncryptionMode::Plain
    }

    fn transform(&self, body: &[u8]) -> SinkResult<Vec<u8>> {
        Ok(body.to_vec())
    }
}

/// Body produced by [`KeyedEncryption`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyedEnvelope {
    pub app_id: String,
    /// RSA-wrapped data key, base64
    pub encrypt_key: String,
    /// 96-bit GCM nonce, base64
    pub nonce: String,
    /// Ciphertext with authentication tag, base64
    pub data: String,
}

/// Public-key envelope encryption
pub struct KeyedEncryption {
    public_key: RsaPublicKey,
    app_id: String,
}

impl std::fmt::Debug for KeyedEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedEncryption")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

impl KeyedEncryption {
    /// Validate the key material and build the module
    ///
    /// The public key is either PEM (SPKI or PKCS#1) or base64 encoded DER.
    pub fn new(public_key: &str, app_id: &str) -> SinkResult<Self> {
        if public_key.trim().is_empty() {
            return Err(SinkError::config(
                "keyed encryption requires a non-blank public key",
            ));
        }
        if app_id.trim().is_empty() {
            return Err(SinkError::config(
                "keyed encryption requires a non-blank app id",
            ));
        }

        let public_key = parse_public_key(public_key)?;
        debug!("Keyed encryption initialized for app id {}", app_id.trim());

        Ok(Self {
            public_key,
            app_id: app_id.trim().to_string(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}

impl EncryptionModule for KeyedEncryption {
    fn mode(&self) -> EncryptionMode {
        EncryptionMode::Keyed
    }

    fn transform(&self, body: &[u8]) -> SinkResult<Vec<u8>> {
        let data_key = Aes256Gcm::generate_key(&mut OsRng);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let cipher = Aes256Gcm::new(&data_key);

        let data = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: body,
                    aad: self.app_id.as_bytes(),
                },
            )
            .map_err(|_| SinkError::encryption("AES-GCM encryption failed"))?;

        let wrapped_key = self
            .public_key
            .encrypt(&mut rsa::rand_core::OsRng, Pkcs1v15Encrypt, data_key.as_slice())
            .map_err(|e| SinkError::encryption(format!("Failed to wrap data key: {}", e)))?;

        let envelope = KeyedEnvelope {
            app_id: self.app_id.clone(),
            encrypt_key: STANDARD.encode(wrapped_key),
            nonce: STANDARD.encode(nonce.as_slice()),
            data: STANDARD.encode(data),
        };

        serde_json::to_vec(&envelope)
            .map_err(|e| SinkError::encryption(format!("Failed to serialize envelope: {}", e)))
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (MODE_HEADER.to_string(), EncryptionMode::Keyed.to_string()),
            (APP_ID_HEADER.to_string(), self.app_id.clone()),
        ]
    }

    fn content_type(&self) -> Option<&'static str> {
        Some("application/json")
    }
}

fn parse_public_key(raw: &str) -> SinkResult<RsaPublicKey> {
    let raw = raw.trim();
    if raw.contains("-----BEGIN") {
        return RsaPublicKey::from_public_key_pem(raw)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(raw))
            .map_err(|e| SinkError::config(format!("Invalid PEM public key: {}", e)));
    }

    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SinkError::config(format!("Public key is not valid base64: {}", e)))?;

    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| SinkError::config(format!("Invalid DER public key: {}", e)))
}

/// Build the module selected by the configuration
///
/// Fails with a configuration error if `keyed` is selected without usable key material.
pub fn build_encryption(config: &EncryptionConfig) -> SinkResult<Arc<dyn EncryptionModule>> {
    match config.mode {
        EncryptionMode::Plain => Ok(Arc::new(PlainEncryption)),
        EncryptionMode::Keyed => {
            let public_key = config.public_key.as_deref().unwrap_or("");
            let app_id = config.app_id.as_deref().unwrap_or("");
            Ok(Arc::new(KeyedEncryption::new(public_key, app_id)?))
        }
    }
}
