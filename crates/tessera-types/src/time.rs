//! Epoch-second time helpers.
//!
//! Cache expirations are stored as signed UNIX timestamps in seconds, matching
//! the `expiration INTEGER` column of the call cache table.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Current wall-clock time in seconds since the UNIX epoch.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Absolute expiration `ttl` after `now`, saturating at `i64::MAX`.
pub fn expiration_after(now: i64, ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    now.saturating_add(ttl)
}

/// Render an epoch timestamp as RFC 3339, or the raw number if out of range.
pub fn format_epoch(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
