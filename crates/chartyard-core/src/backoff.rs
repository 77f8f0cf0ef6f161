//! Retry scheduling
//!
//! Both control loops are driven by pure functions of the recorded history:
//! releases back off exponentially, repository syncs back off linearly, and
//! successful repositories resync on their configured period.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Upper bound for release redeploy delays
pub const RELEASE_BACKOFF_CAP: Duration = Duration::from_secs(180);

/// Per-failure step for repository sync retries
pub const SYNC_FAILURE_STEP: Duration = Duration::from_secs(60);

/// Upper bound for repository sync retry delays
pub const SYNC_BACKOFF_CAP: Duration = Duration::from_secs(600);

/// Minimum interval between periodic repository syncs
pub const MIN_SYNC_PERIOD: Duration = Duration::from_secs(180);

/// `min(2^failures, cap)` seconds
pub fn release_retry_after(consecutive_failures: u32, cap: Duration) -> Duration {
    let secs = 1u64
        .checked_shl(consecutive_failures)
        .unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(cap)
}

/// `min(step * failures, cap)`
pub fn sync_retry_after(consecutive_failures: u32, step: Duration, cap: Duration) -> Duration {
    step.saturating_mul(consecutive_failures).min(cap)
}

/// Effective periodic interval; `None` when periodic syncing is disabled
pub fn sync_period(configured: Duration, floor: Duration) -> Option<Duration> {
    if configured.is_zero() {
        None
    } else {
        Some(configured.max(floor))
    }
}

/// Time left until `since + wait`, or `None` once it has elapsed
pub fn remaining(since: DateTime<Utc>, wait: Duration, now: DateTime<Utc>) -> Option<Duration> {
    let elapsed = now
        .signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO);
    wait.checked_sub(elapsed).filter(|left| !left.is_zero())
}
