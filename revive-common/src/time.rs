//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Linear backoff: `attempt × base`, capped at `max`
///
/// Attempt numbers start at 1.
pub fn linear_backoff(
    attempt: u32,
    base: std::time::Duration,
    max: std::time::Duration,
) -> std::time::Duration {
    base.saturating_mul(attempt.max(1)).min(max)
}
