//! Time helpers.

use chrono::{DateTime, TimeZone, Utc};

/// A UTC timestamp.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Convert a unix timestamp in seconds, as returned by rate APIs.
/// Out-of-range values yield `None`.
pub fn from_unix_seconds(seconds: i64) -> Option<Timestamp> {
    Utc.timestamp_opt(seconds, 0).single()
}
