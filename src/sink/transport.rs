//! HTTP transport used by the sink
//!
//! The sink talks to the endpoint through the [`HttpTransport`] trait so the dispatch
//! logic can be exercised without a network. [`ReqwestTransport`] is the real client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::batch::Batch;
use crate::core::config::{HttpMethod, RequestFormat, RequestMode};
use crate::core::errors::{SinkError, SinkResult};

use super::outcome::HttpResponse;

/// Response bodies kept for reports are cut at this many bytes
const MAX_RESPONSE_BODY: usize = 4096;

/// How the member bodies of a batch are laid out in one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLayout {
    /// `[b1,b2,...]`
    JsonArray,
    /// `b1\nb2\n...`
    NewlineDelimited,
    /// The single member's body as is
    Single,
}

impl BodyLayout {
    pub fn for_config(format: RequestFormat, mode: RequestMode) -> Self {
        match (mode, format) {
            (RequestMode::Single, _) => BodyLayout::Single,
            (RequestMode::Batch, RequestFormat::Json) => BodyLayout::JsonArray,
            (RequestMode::Batch, RequestFormat::Raw) => BodyLayout::NewlineDelimited,
        }
    }

    fn join<'a, I>(&self, bodies: I) -> Vec<u8>
    where
        I: ExactSizeIterator<Item = &'a [u8]>,
    {
        let count = bodies.len();
        let mut out = Vec::new();
        match self {
            BodyLayout::JsonArray => {
                out.push(b'[');
                for (i, body) in bodies.enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    out.extend_from_slice(body);
                }
                out.push(b']');
            }
            BodyLayout::Single if count == 1 => {
                for body in bodies {
                    out.extend_from_slice(body);
                }
            }
            BodyLayout::Single | BodyLayout::NewlineDelimited => {
                for (i, body) in bodies.enumerate() {
                    if i > 0 {
                        out.push(b'\n');
                    }
                    out.extend_from_slice(body);
                }
            }
        }
        out
    }
}

/// One HTTP call carrying a whole batch
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Build the request for a batch
    ///
    /// Method, URL and headers come from the first member; the encoder gives every
    /// member the same values.
    pub fn from_batch(batch: &Batch, layout: BodyLayout, timeout: Duration) -> Self {
        let first = batch.requests().first();
        Self {
            method: first.map(|r| r.method).unwrap_or(HttpMethod::Post),
            url: first.map(|r| r.url.clone()).unwrap_or_default(),
            headers: first.map(|r| r.headers.clone()).unwrap_or_default(),
            body: layout.join(batch.requests().iter().map(|r| r.body.as_slice())),
            timeout,
        }
    }
}

/// Failure below the HTTP status level
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Sends a request and returns the response
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by a pooled reqwest client
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> SinkResult<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SinkError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::Invalid(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.as_reqwest_method(), &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(map_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let mut body = response.text().await.map_err(map_error)?;
        if body.len() > MAX_RESPONSE_BODY {
            let mut cut = MAX_RESPONSE_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        debug!("{} {} -> {}", request.method, request.url, status);
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_for_config() {
        assert_eq!(
            BodyLayout::for_config(RequestFormat::Json, RequestMode::Batch),
            BodyLayout::JsonArray
        );
        assert_eq!(
            BodyLayout::for_config(RequestFormat::Raw, RequestMode::Batch),
            BodyLayout::NewlineDelimited
        );
        assert_eq!(
            BodyLayout::for_config(RequestFormat::Json, RequestMode::Single),
            BodyLayout::Single
        );
    }

    #[test]
    fn test_join_bodies() {
        let bodies: Vec<&[u8]> = vec![b"{\"a\":1}", b"{\"b\":2}"];
        assert_eq!(
            BodyLayout::JsonArray.join(bodies.iter().copied()),
            b"[{\"a\":1},{\"b\":2}]".to_vec()
        );
        assert_eq!(
            BodyLayout::NewlineDelimited.join(bodies.iter().copied()),
            b"{\"a\":1}\n{\"b\":2}".to_vec()
        );

        let single: Vec<&[u8]> = vec![b"hello"];
        assert_eq!(BodyLayout::Single.join(single.iter().copied()), b"hello".to_vec());
    }
}
