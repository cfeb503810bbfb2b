//! Duration parsing for option values
//!
//! Values use humantime spellings (`250ms`, `5s`, `2min`, `1h 30m`). A bare number is
//! read as milliseconds.

use std::time::Duration;

use crate::core::errors::{SinkError, SinkResult};

/// Parse a duration option value
///
/// # Arguments
/// * `key` - Option key, used in the error message
/// * `raw` - Option value as written by the user
///
/// # Returns
/// The parsed duration, or a configuration error naming `key`
pub fn parse_duration(key: &str, raw: &str) -> SinkResult<Duration> {
    let value = raw.trim();
    let invalid = |detail: String| {
        SinkError::config(format!(
            "Invalid option '{}', value: '{}'. Expected a duration such as '500ms', '5s' or '1min' ({}).",
            key, raw, detail
        ))
    };

    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| invalid(e.to_string()));
    }

    humantime::parse_duration(value).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("k", "250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("k", "5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("k", "2min").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("k", " 40 ").unwrap(), Duration::from_millis(40));
    }

    #[test]
    fn test_parse_humantime_spellings() {
        assert_eq!(parse_duration("k", "1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("k", "1m").unwrap(), Duration::from_secs(60));
        assert_eq!(
            parse_duration("k", "1s 500ms").unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_duration("sink.flush-buffer.timeout", "soon").unwrap_err();
        assert!(err.to_string().contains("sink.flush-buffer.timeout"));
        assert!(parse_duration("k", "-5s").is_err());
        assert!(parse_duration("k", "").is_err());
    }
}
