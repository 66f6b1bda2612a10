//! Timestamp freshness windows.
//!
//! Two independent tolerances bound replay of time-stamped artifacts:
//! a server-issued timestamp is accepted by a client within ±24 hours,
//! a client-issued timestamp is accepted by the server within ±60 seconds.
//! Both bounds are exclusive.

use crate::crypto::current_timestamp;

/// Tolerance for timestamps the server issued (seconds).
pub const SERVER_TS_WINDOW_SECS: u64 = 60 * 60 * 24;

/// Tolerance for timestamps a client issued (seconds).
pub const CLIENT_TS_WINDOW_SECS: u64 = 60;

/// True if `timestamp` lies strictly within `window` seconds of `now`.
pub fn within_window(timestamp: u64, now: u64, window: u64) -> bool {
    timestamp.abs_diff(now) < window
}

/// Client-side check of a timestamp carried in a server message.
pub fn validate_server_ts(timestamp: u64) -> bool {
    within_window(timestamp, current_timestamp(), SERVER_TS_WINDOW_SECS)
}

/// Server-side check of a timestamp carried in a client message.
pub fn validate_client_ts(timestamp: u64) -> bool {
    within_window(timestamp, current_timestamp(), CLIENT_TS_WINDOW_SECS)
}
