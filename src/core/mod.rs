//! Core module containing configuration and error types
//!
//! This module provides the basic building blocks of the HTTP sink: option parsing and
//! validation, and the error types shared by every component.

pub mod config;
pub mod errors;

// Re-export for convenience
pub use config::{ConnectorOptions, SinkConfig};
pub use errors::{SinkError, SinkResult, SubmitError};
