//! Utility functions for the HTTP sink
//!
//! This module provides utility functions organized by category:
//! - Human-readable duration parsing for option values
//! - Timestamp formatting for outcome reports

pub mod duration;
pub mod timestamp;

// Re-export for convenience
pub use duration::parse_duration;
pub use timestamp::format_timestamp;
