//! Timestamp convention at the wire boundary.
//!
//! The engine stores timestamps as signed epoch milliseconds. Clients may
//! send either that integer or an RFC 3339 string; responses always carry
//! the integer.

use crate::error::{ProtocolError, ProtocolResult};
use serde_json::Value as Json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Parses a JSON timestamp into epoch milliseconds.
///
/// Accepts an integer (already milliseconds) or an RFC 3339 string.
pub fn parse_timestamp(value: &Json) -> ProtocolResult<i64> {
    match value {
        Json::Number(n) => n.as_i64().ok_or_else(|| ProtocolError::InvalidTimestamp {
            value: n.to_string(),
        }),
        Json::String(s) => parse_rfc3339(s),
        other => Err(ProtocolError::InvalidTimestamp {
            value: other.to_string(),
        }),
    }
}

/// Parses an RFC 3339 string into epoch milliseconds.
pub fn parse_rfc3339(s: &str) -> ProtocolResult<i64> {
    let invalid = || ProtocolError::InvalidTimestamp {
        value: s.to_string(),
    };
    let parsed = OffsetDateTime::parse(s, &Rfc3339).map_err(|_| invalid())?;
    i64::try_from(parsed.unix_timestamp_nanos().div_euclid(NANOS_PER_MILLI)).map_err(|_| invalid())
}

/// Formats epoch milliseconds as an RFC 3339 string (UTC).
pub fn format_rfc3339(millis: i64) -> ProtocolResult<String> {
    let invalid = || ProtocolError::InvalidTimestamp {
        value: millis.to_string(),
    };
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI)
        .map_err(|_| invalid())?
        .format(&Rfc3339)
        .map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_pass_through() {
        assert_eq!(parse_timestamp(&json!(1_700_000_000_123_i64)).unwrap(), 1_700_000_000_123);
        assert_eq!(parse_timestamp(&json!(-5)).unwrap(), -5);
    }

    #[test]
    fn rfc3339_strings_become_millis() {
        assert_eq!(parse_timestamp(&json!("1970-01-01T00:00:01.5Z")).unwrap(), 1_500);
        assert_eq!(
            parse_timestamp(&json!("2023-11-14T22:13:20+00:00")).unwrap(),
            1_700_000_000_000
        );
        assert_eq!(parse_rfc3339("1970-01-01T01:00:00+01:00").unwrap(), 0);
    }

    #[test]
    fn pre_epoch_rounds_down() {
        assert_eq!(parse_rfc3339("1969-12-31T23:59:59.9995Z").unwrap(), -1);
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(parse_timestamp(&json!(1.5)).is_err());
        assert!(parse_timestamp(&json!(true)).is_err());
        assert!(parse_timestamp(&json!("yesterday")).is_err());
    }

    #[test]
    fn formats_utc() {
        let formatted = format_rfc3339(1_500).unwrap();
        assert!(formatted.starts_with("1970-01-01T00:00:01.5"));
        assert!(formatted.ends_with('Z'));
        assert_eq!(
            parse_rfc3339(&format_rfc3339(1_700_000_000_123).unwrap()).unwrap(),
            1_700_000_000_123
        );
    }
}
