//! Timestamp utilities

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a day count into a chrono duration (used for freshness windows)
pub fn days(count: u32) -> Duration {
    Duration::days(i64::from(count))
}

/// True when `timestamp` lies strictly before `now - window`
pub fn is_older_than(timestamp: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    timestamp < now - window
}

/// Format a timestamp the way it is persisted
///
/// Fixed-width RFC 3339 (nanoseconds, `Z` suffix) so stored values sort
/// lexicographically in time order.
pub fn to_storage(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a persisted RFC 3339 timestamp
pub fn from_storage(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("Invalid stored timestamp '{}': {}", value, e)))
}
