//! Time utilities for session scheduling

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Scheduler tick cadence: one logical second per tick
pub const SCHEDULER_TICK_SECS: u64 = 1;

/// Duration of one scheduler tick
pub fn scheduler_tick() -> Duration {
    Duration::from_secs(SCHEDULER_TICK_SECS)
}
