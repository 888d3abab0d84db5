use std::time::Duration;

use crate::is_ci;

// Timeout constants

/// How long a fake server waits for the next client frame.
pub const FRAME_WAIT_SECS: u64 = 5;
pub const FRAME_WAIT_CI_SECS: u64 = 20;

/// Request timeout handed to sessions under test.
pub const REQUEST_SECS: u64 = 5;
pub const REQUEST_CI_SECS: u64 = 20;

/// Shutdown grace handed to sessions under test.
pub const SHUTDOWN_GRACE_MILLIS: u64 = 300;
pub const SHUTDOWN_GRACE_CI_MILLIS: u64 = 1_000;

/// Deadline used by tests that expect a timeout to fire.
pub const SHORT_DEADLINE_MILLIS: u64 = 100;

/// Stress test timeout.
pub const STRESS_BASE_SECS: u64 = 10;

// Helper functions

/// Get frame wait timeout based on environment.
pub fn frame_wait() -> Duration {
    if is_ci() {
        Duration::from_secs(FRAME_WAIT_CI_SECS)
    } else {
        Duration::from_secs(FRAME_WAIT_SECS)
    }
}

/// Get request timeout based on environment.
pub fn request() -> Duration {
    if is_ci() {
        Duration::from_secs(REQUEST_CI_SECS)
    } else {
        Duration::from_secs(REQUEST_SECS)
    }
}

/// Get shutdown grace based on environment.
pub fn shutdown_grace() -> Duration {
    if is_ci() {
        Duration::from_millis(SHUTDOWN_GRACE_CI_MILLIS)
    } else {
        Duration::from_millis(SHUTDOWN_GRACE_MILLIS)
    }
}

/// Get the deadline for calls that are meant to time out.
pub fn short_deadline() -> Duration {
    Duration::from_millis(SHORT_DEADLINE_MILLIS)
}

/// Get stress test timeout with multiplier for CI.
pub fn stress_timeout() -> Duration {
    let secs = if is_ci() {
        STRESS_BASE_SECS * 3
    } else {
        STRESS_BASE_SECS
    };
    Duration::from_secs(secs)
}
