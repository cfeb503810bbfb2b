//! Configuration management for the HTTP sink
//!
//! Options arrive as string key/value pairs (an options file, `--option` flags and a
//! few environment overrides for secrets). They are validated once against a fixed
//! schema and turned into an immutable [`SinkConfig`] before any record is processed.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use super::{SinkError, SinkResult};
use crate::batch::BatchConfig;
use crate::encoding::{EncryptionConfig, EncryptionMode};
use crate::retry::RetryConfig;
use crate::utils::parse_duration;

pub const URL: &str = "url";
pub const FORMAT: &str = "format";
pub const INSERT_METHOD: &str = "insert-method";
pub const REQUEST_CALLBACK: &str = "request-callback";
pub const REQUEST_MODE: &str = "sink.request.mode";
pub const BATCH_MAX_SIZE: &str = "sink.batch.max-size";
pub const FLUSH_BUFFER_SIZE: &str = "sink.flush-buffer.size";
pub const FLUSH_BUFFER_TIMEOUT: &str = "sink.flush-buffer.timeout";
pub const MAX_IN_FLIGHT: &str = "sink.requests.max-inflight";
pub const ADMISSION_TIMEOUT: &str = "sink.requests.admission-timeout";
pub const REQUEST_TIMEOUT: &str = "http.sink.request.timeout";
pub const RETRY_CODES: &str = "http.sink.retry-codes";
pub const RETRY_MAX_RETRIES: &str = "sink.retry.max-retries";
pub const RETRY_INITIAL_DELAY: &str = "sink.retry.initial-delay";
pub const RETRY_MULTIPLIER: &str = "sink.retry.multiplier";
pub const RETRY_MAX_DELAY: &str = "sink.retry.max-delay";
pub const RETRY_JITTER: &str = "sink.retry.jitter";
pub const RETRY_JITTER_SEED: &str = "sink.retry.jitter-seed";
pub const ENCRYPTION_MODE: &str = "request-encryption.mode";
pub const ENCRYPTION_PUBLIC_KEY: &str = "request-encryption.keyed.public-key";
pub const ENCRYPTION_APP_ID: &str = "request-encryption.keyed.app-id";

/// Upper bound for concurrently dispatched batches
pub const MAX_IN_FLIGHT_LIMIT: usize = 10_000;

/// Prefix for static request headers, e.g. `http.sink.header.Authorization`
pub const HEADER_PREFIX: &str = "http.sink.header.";

/// Environment variables that override secrets
pub const ENV_PUBLIC_KEY: &str = "STREAM2HTTP_ENCRYPTION_PUBLIC_KEY";
pub const ENV_APP_ID: &str = "STREAM2HTTP_ENCRYPTION_APP_ID";

/// One recognized option key
#[derive(Debug, Clone, Copy)]
pub struct ConfigOption {
    pub key: &'static str,
    pub default: Option<&'static str>,
    pub required: bool,
}

const fn required(key: &'static str) -> ConfigOption {
    ConfigOption {
        key,
        default: None,
        required: true,
    }
}

const fn optional(key: &'static str, default: Option<&'static str>) -> ConfigOption {
    ConfigOption {
        key,
        default,
        required: false,
    }
}

/// Every option the sink understands
pub const OPTIONS: &[ConfigOption] = &[
    required(URL),
    required(FORMAT),
    optional(INSERT_METHOD, Some("POST")),
    optional(REQUEST_CALLBACK, Some("logger")),
    optional(REQUEST_MODE, Some("batch")),
    optional(BATCH_MAX_SIZE, Some("500")),
    optional(FLUSH_BUFFER_SIZE, Some("5242880")),
    optional(FLUSH_BUFFER_TIMEOUT, Some("5s")),
    optional(MAX_IN_FLIGHT, Some("50")),
    optional(ADMISSION_TIMEOUT, Some("30s")),
    optional(REQUEST_TIMEOUT, Some("30s")),
    optional(RETRY_CODES, Some("429")),
    optional(RETRY_MAX_RETRIES, Some("3")),
    optional(RETRY_INITIAL_DELAY, Some("1s")),
    optional(RETRY_MULTIPLIER, Some("2.0")),
    optional(RETRY_MAX_DELAY, Some("30s")),
    optional(RETRY_JITTER, Some("0.0")),
    optional(RETRY_JITTER_SEED, None),
    optional(ENCRYPTION_MODE, Some("plain")),
    optional(ENCRYPTION_PUBLIC_KEY, None),
    optional(ENCRYPTION_APP_ID, None),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_reqwest_method(&self) -> reqwest::Method {
        match self {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
        }
    }
}

/// Body encoding of a single record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestFormat {
    Json,
    Raw,
}

impl fmt::Display for RequestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestFormat::Json => write!(f, "json"),
            RequestFormat::Raw => write!(f, "raw"),
        }
    }
}

/// Whether a request carries one record or a whole batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestMode {
    Batch,
    Single,
}

/// Raw key/value options as supplied by the operator
#[derive(Debug, Clone, Default)]
pub struct ConnectorOptions {
    values: BTreeMap<String, String>,
}

impl ConnectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value if present and not blank
    fn get_non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Parse a single `key=value` pair
    pub fn insert_pair(&mut self, pair: &str) -> SinkResult<()> {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            SinkError::config(format!("Expected 'key=value', got '{}'", pair))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(SinkError::config(format!("Empty option key in '{}'", pair)));
        }
        self.insert(key, value.trim());
        Ok(())
    }

    /// Read `key=value` lines; blank lines and `#` comments are ignored
    pub fn from_file<P: AsRef<Path>>(path: P) -> SinkResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SinkError::config(format!(
                "Failed to read options file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> SinkResult<Self> {
        let mut options = Self::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            options.insert_pair(line)?;
        }
        Ok(options)
    }

    /// Apply environment variable overrides for secrets
    ///
    /// Only the encryption key material is taken from the environment so it does
    /// not have to live in an options file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(public_key) = env::var(ENV_PUBLIC_KEY) {
            self.insert(ENCRYPTION_PUBLIC_KEY, public_key);
        }
        if let Ok(app_id) = env::var(ENV_APP_ID) {
            self.insert(ENCRYPTION_APP_ID, app_id);
        }
    }
}

/// Immutable configuration snapshot of the sink
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub url: String,
    pub method: HttpMethod,
    pub format: RequestFormat,
    pub request_mode: RequestMode,
    pub callback: String,
    pub headers: BTreeMap<String, String>,
    pub batch: BatchConfig,
    pub max_in_flight: usize,
    pub admission_timeout: Duration,
    pub request_timeout: Duration,
    pub retryable_status_codes: BTreeSet<u16>,
    pub retry: RetryConfig,
    pub encryption: EncryptionConfig,
}

impl SinkConfig {
    /// Validate the raw options and build the configuration
    ///
    /// Every value is checked here, before any record is processed. Blank values
    /// fall back to the schema default in [`OPTIONS`].
    ///
    /// # Arguments
    ///
    /// * `options` - Raw key/value pairs from the options file, flags and environment
    ///
    /// # Options
    ///
    /// Required:
    /// - `url`: Endpoint, `http://` or `https://`
    /// - `format`: Record body format, "json" or "raw"
    ///
    /// Optional (with defaults):
    /// - `insert-method`: "POST" or "PUT" (default: "POST")
    /// - `sink.request.mode`: "batch" or "single" (default: "batch")
    /// - `sink.batch.max-size`, `sink.flush-buffer.size`, `sink.flush-buffer.timeout`: batch thresholds
    /// - `sink.requests.max-inflight`: concurrent batches, 1 to 10000 (default: 50)
    /// - `sink.retry.*`, `http.sink.retry-codes`: retry policy
    /// - `request-encryption.mode`: "plain" or "keyed" (default: "plain")
    ///
    /// Optional (keyed encryption only):
    /// - `request-encryption.keyed.public-key` and `request-encryption.keyed.app-id`
    ///
    /// Static headers are given as `http.sink.header.<Name>`.
    ///
    /// # Returns
    ///
    /// The validated configuration, or a configuration error naming the offending key.
    /// Unknown keys are rejected.
    pub fn from_options(options: &ConnectorOptions) -> SinkResult<Self> {
        let unknown: Vec<&str> = options
            .keys()
            .filter(|key| !key.starts_with(HEADER_PREFIX))
            .filter(|key| !OPTIONS.iter().any(|o| o.key == *key))
            .collect();
        if !unknown.is_empty() {
            return Err(SinkError::config(format!(
                "Unsupported options: {}",
                unknown.join(", ")
            )));
        }

        for option in OPTIONS.iter().filter(|o| o.required) {
            if options.get_non_blank(option.key).is_none() {
                return Err(SinkError::config(format!(
                    "Missing required option '{}'",
                    option.key
                )));
            }
        }

        let value = |key: &str| option_value(options, key);

        // Required: endpoint and record format
        let url = parse_url(value(URL)?)?;
        let format = parse_format(value(FORMAT)?)?;
        let method = parse_method(value(INSERT_METHOD)?)?;
        let request_mode = parse_request_mode(value(REQUEST_MODE)?)?;
        let callback = value(REQUEST_CALLBACK)?.trim().to_string();

        // Optional: static headers, checked against HTTP header syntax
        let headers = parse_headers(options)?;

        // Optional with defaults: batch thresholds
        let mut max_count = parse_number::<usize>(BATCH_MAX_SIZE, value(BATCH_MAX_SIZE)?)?;
        if max_count == 0 {
            return Err(SinkError::config(format!("'{}' must be at least 1", BATCH_MAX_SIZE)));
        }
        if request_mode == RequestMode::Single {
            max_count = 1;
        }
        let max_bytes = parse_number::<usize>(FLUSH_BUFFER_SIZE, value(FLUSH_BUFFER_SIZE)?)?;
        if max_bytes == 0 {
            return Err(SinkError::config(format!(
                "'{}' must be at least 1",
                FLUSH_BUFFER_SIZE
            )));
        }
        let linger = parse_duration(FLUSH_BUFFER_TIMEOUT, value(FLUSH_BUFFER_TIMEOUT)?)?;
        if linger.is_zero() {
            return Err(SinkError::config(format!(
                "'{}' must be greater than zero",
                FLUSH_BUFFER_TIMEOUT
            )));
        }

        // Optional with defaults: dispatch concurrency and timeouts
        let max_in_flight = parse_number::<usize>(MAX_IN_FLIGHT, value(MAX_IN_FLIGHT)?)?;
        if !(1..=MAX_IN_FLIGHT_LIMIT).contains(&max_in_flight) {
            return Err(SinkError::config(format!(
                "'{}' must be between 1 and {}",
                MAX_IN_FLIGHT, MAX_IN_FLIGHT_LIMIT
            )));
        }
        let admission_timeout = parse_duration(ADMISSION_TIMEOUT, value(ADMISSION_TIMEOUT)?)?;
        let request_timeout = parse_duration(REQUEST_TIMEOUT, value(REQUEST_TIMEOUT)?)?;
        if request_timeout.is_zero() {
            return Err(SinkError::config(format!(
                "'{}' must be greater than zero",
                REQUEST_TIMEOUT
            )));
        }

        // Optional with defaults: retry policy and encryption
        let retryable_status_codes = parse_status_codes(value(RETRY_CODES)?)?;
        let retry = parse_retry(options)?;
        let encryption = parse_encryption(options, value(ENCRYPTION_MODE)?)?;

        Ok(Self {
            url,
            method,
            format,
            request_mode,
            callback,
            headers,
            batch: BatchConfig {
                max_count,
                max_bytes,
                linger,
            },
            max_in_flight,
            admission_timeout,
            request_timeout,
            retryable_status_codes,
            retry,
            encryption,
        })
    }
}

/// The supplied value when non-blank, otherwise the schema default
fn option_or_default<'a>(options: &'a ConnectorOptions, key: &str) -> Option<&'a str> {
    options.get_non_blank(key).or_else(|| {
        OPTIONS
            .iter()
            .find(|o| o.key == key)
            .and_then(|o| o.default)
    })
}

fn option_value<'a>(options: &'a ConnectorOptions, key: &str) -> SinkResult<&'a str> {
    option_or_default(options, key)
        .ok_or_else(|| SinkError::config(format!("Missing option '{}'", key)))
}

fn parse_url(raw: &str) -> SinkResult<String> {
    let url = raw.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(SinkError::config(format!(
            "Invalid option '{}'. It must start with http:// or https://",
            URL
        )));
    }
    reqwest::Url::parse(url)
        .map_err(|e| SinkError::config(format!("Invalid option '{}': {}", URL, e)))?;
    Ok(url.to_string())
}

fn parse_method(raw: &str) -> SinkResult<HttpMethod> {
    match raw.trim() {
        "POST" => Ok(HttpMethod::Post),
        "PUT" => Ok(HttpMethod::Put),
        _ => Err(SinkError::config(format!(
            "Invalid option '{}'. It is expected to be either 'POST' or 'PUT'.",
            INSERT_METHOD
        ))),
    }
}

fn parse_format(raw: &str) -> SinkResult<RequestFormat> {
    match raw.trim().to_lowercase().as_str() {
        "json" => Ok(RequestFormat::Json),
        "raw" => Ok(RequestFormat::Raw),
        other => Err(SinkError::config(format!(
            "Invalid option '{}', value: '{}'. It is expected to be either 'json' or 'raw'.",
            FORMAT, other
        ))),
    }
}

fn parse_request_mode(raw: &str) -> SinkResult<RequestMode> {
    match raw.trim().to_lowercase().as_str() {
        "batch" => Ok(RequestMode::Batch),
        "single" => Ok(RequestMode::Single),
        other => Err(SinkError::config(format!(
            "Invalid option '{}', value: '{}'. It is expected to be either 'batch' or 'single'.",
            REQUEST_MODE, other
        ))),
    }
}

fn parse_headers(options: &ConnectorOptions) -> SinkResult<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    for (key, value) in &options.values {
        let Some(name) = key.strip_prefix(HEADER_PREFIX) else {
            continue;
        };
        if name.trim().is_empty() {
            return Err(SinkError::config(format!(
                "Header options must name a header after '{}'",
                HEADER_PREFIX
            )));
        }
        reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            SinkError::config(format!(
                "Invalid option '{}': '{}' is not a valid header name",
                key, name
            ))
        })?;
        reqwest::header::HeaderValue::from_str(value).map_err(|_| {
            SinkError::config(format!(
                "Invalid option '{}': the value is not a valid header value",
                key
            ))
        })?;
        headers.insert(name.to_string(), value.clone());
    }
    Ok(headers)
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> SinkResult<T> {
    raw.trim().parse::<T>().map_err(|_| {
        SinkError::config(format!(
            "Invalid option '{}', value: '{}'. Expected a number.",
            key, raw
        ))
    })
}

fn parse_status_codes(raw: &str) -> SinkResult<BTreeSet<u16>> {
    let mut codes = BTreeSet::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let code = parse_number::<u16>(RETRY_CODES, part)?;
        if !(400..=599).contains(&code) {
            return Err(SinkError::config(format!(
                "Invalid option '{}': status code {} is not in 400-599",
                RETRY_CODES, code
            )));
        }
        codes.insert(code);
    }
    Ok(codes)
}

fn parse_retry(options: &ConnectorOptions) -> SinkResult<RetryConfig> {
    let value = |key: &str| option_value(options, key);

    let max_retries = parse_number::<u32>(RETRY_MAX_RETRIES, value(RETRY_MAX_RETRIES)?)?;
    let initial_delay = parse_duration(RETRY_INITIAL_DELAY, value(RETRY_INITIAL_DELAY)?)?;
    let multiplier = parse_number::<f64>(RETRY_MULTIPLIER, value(RETRY_MULTIPLIER)?)?;
    let max_delay = parse_duration(RETRY_MAX_DELAY, value(RETRY_MAX_DELAY)?)?;
    let jitter = parse_number::<f64>(RETRY_JITTER, value(RETRY_JITTER)?)?;
    let jitter_seed = option_or_default(options, RETRY_JITTER_SEED)
        .map(|raw| parse_number::<u64>(RETRY_JITTER_SEED, raw))
        .transpose()?;

    let retry = RetryConfig {
        max_retries,
        initial_delay,
        multiplier,
        max_delay,
        jitter,
        jitter_seed,
    };
    retry.validate()?;
    Ok(retry)
}

fn parse_encryption(options: &ConnectorOptions, raw_mode: &str) -> SinkResult<EncryptionConfig> {
    let mode = match raw_mode.trim().to_lowercase().as_str() {
        "plain" => EncryptionMode::Plain,
        "keyed" => EncryptionMode::Keyed,
        _ => {
            return Err(SinkError::config(format!(
                "Invalid option '{}', value: '{}'. It is expected to be either 'plain' or 'keyed'.",
                ENCRYPTION_MODE, raw_mode
            )));
        }
    };

    let public_key = options.get(ENCRYPTION_PUBLIC_KEY).map(str::to_string);
    let app_id = options.get(ENCRYPTION_APP_ID).map(str::to_string);

    if mode == EncryptionMode::Keyed {
        let key = public_key.as_deref().unwrap_or("");
        if key.trim().is_empty() {
            return Err(SinkError::config(format!(
                "If the encryption method is keyed, current value is [{}], the public key is required.",
                key
            )));
        }
        let id = app_id.as_deref().unwrap_or("");
        if id.trim().is_empty() {
            return Err(SinkError::config(format!(
                "If the encryption method is keyed, current value is [{}], the app id is required.",
                id
            )));
        }
    }

    Ok(EncryptionConfig {
        mode,
        public_key,
        app_id,
    })
}
