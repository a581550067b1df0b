//! Timestamp helpers.
//!
//! Every timestamp Expensync stores or compares is held at millisecond
//! precision. That is the resolution clients send on the wire and the
//! resolution the SQLite store persists, so a value read back always compares
//! equal to the value that was written.

use chrono::{DateTime, TimeDelta, Utc};

/// Current time, truncated to milliseconds.
pub fn now() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

/// Drop sub-millisecond precision.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Next last-modified value for a record currently at `previous`.
///
/// Returns `candidate` unless that would not move strictly past `previous`,
/// in which case `previous + 1ms` is used.
pub fn advance(previous: DateTime<Utc>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + TimeDelta::milliseconds(1);
    let candidate = truncate_to_millis(candidate);
    if candidate < floor {
        floor
    } else {
        candidate
    }
}
