//! Conversions between instants and wall-clock representations.
//!
//! All instants are UTC; the wall-clock formatter renders UTC so the
//! scheduler stays pure and test output is stable across hosts.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Human wall-clock rendering used by the board header and CLI output.
pub fn format_wall(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a caller-supplied instant. Accepts RFC 3339 (the API contract) and
/// the bare `YYYY-MM-DD HH:MM:SS` wall form (interpreted as UTC) for
/// operator convenience.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whole minutes from `from` to `to`; negative when `to` precedes `from`.
pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_minutes()
}
