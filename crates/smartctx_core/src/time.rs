//! Timestamp formatting shared by every persisted record.
//!
//! # Invariants
//! - Persisted timestamps are RFC 3339 UTC with millisecond precision and a
//!   trailing `Z`, so lexical order matches chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

/// Formats an instant in the persisted timestamp shape.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in the persisted timestamp shape.
pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

/// Parses a persisted timestamp, accepting any RFC 3339 offset.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// `YYYYMMDD` stamp used in context IDs.
pub fn date_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d").to_string()
}

/// `YYYY-MM` bucket used for archived contexts.
pub fn month_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}
