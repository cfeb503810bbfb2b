//! Timestamp formatting utilities
//!
//! Provides the single textual timestamp format used in outcome reports
//! and notification messages.

use chrono::{DateTime, Utc};

/// Convert a UTC timestamp to a formatted date string.
///
/// # Returns
/// A `String` in "YYYY-MM-DD HH:MM:SS.sss UTC" format
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        let ts = DateTime::from_timestamp(946_684_800, 123_000_000).unwrap();
        assert_eq!(format_timestamp(ts), "2000-01-01 00:00:00.123 UTC");
    }
}
