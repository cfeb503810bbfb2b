//! Asynchronous, batched, retrying HTTP sink
//!
//! Records are encoded into HTTP requests, optionally encrypted, grouped into batches
//! and delivered with bounded concurrency. Every record ends with exactly one outcome
//! reported to a post-request callback.

pub mod batch;
pub mod callback;
pub mod core;
pub mod encoding;
pub mod retry;
pub mod sink;
pub mod telemetry;
pub mod tracing_context;
pub mod utils;
pub mod writer;

pub use batch::{Batch, BatchConfig, Batcher};
pub use callback::{CallbackRegistry, PostRequestCallback};
pub use core::{ConnectorOptions, SinkConfig, SinkError, SinkResult, SubmitError};
pub use encoding::{EncodedRequest, Record, RequestEncoder};
pub use retry::{RetryConfig, RetryPolicy};
pub use sink::{AsyncHttpSink, DispatchReport, HttpTransport, OutcomeKind, ReqwestTransport};
pub use writer::HttpSinkWriter;
