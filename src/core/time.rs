//! Timestamp and identifier helpers.

use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Seconds since the unix epoch, `0` if the clock is before it.
pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Renders an elapsed span as `HH:MM:SS`.
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
