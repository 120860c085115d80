//! Window snapshots and admission decisions.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Snapshot of a key's current counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowInfo {
    /// When the current window began
    pub start: DateTime<Utc>,
    /// Requests counted in this window, including the current one
    pub calls: u64,
}

impl WindowInfo {
    /// A window opened by a request at `start`.
    pub fn opened_at(start: DateTime<Utc>) -> Self {
        Self { start, calls: 1 }
    }

    /// Whether a request at `at` falls outside this window.
    ///
    /// A request exactly `window` after the start still belongs to the window.
    pub fn has_expired(&self, at: DateTime<Utc>, window: Duration) -> bool {
        match TimeDelta::from_std(window) {
            Ok(window) => at - self.start > window,
            // A window too long for chrono never ends.
            Err(_) => false,
        }
    }
}

/// Outcome of a single `allow` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateInfo {
    /// The admission verdict
    pub allowed: bool,
    /// The instant this request was evaluated at
    pub last_call: DateTime<Utc>,
    /// Quota left in the window after counting this request, floored at zero
    pub remaining_calls: u64,
    /// Time until the window closes, floored at zero
    pub reset_in: Duration,
    /// Start of the window this request was counted in
    pub window_start: DateTime<Utc>,
    /// The configured maximum calls per window
    pub limit: u64,
}

/// Signed time left in a window that started at `start`, as seen at `now`.
///
/// Negative when the window has already run out but no request has rolled it
/// over yet.
pub fn time_until_reset(window: Duration, start: DateTime<Utc>, now: DateTime<Utc>) -> TimeDelta {
    let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
    window.checked_sub(&(now - start)).unwrap_or(TimeDelta::MAX)
}

/// Clamp a signed remainder to a non-negative duration.
pub fn clamp_reset(remaining: TimeDelta) -> Duration {
    remaining.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn test_opened_window_counts_one_call() {
        let info = WindowInfo::opened_at(at_millis(0));
        assert_eq!(info.calls, 1);
        assert_eq!(info.start, at_millis(0));
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let info = WindowInfo::opened_at(at_millis(0));
        let window = Duration::from_millis(100);

        assert!(!info.has_expired(at_millis(99), window));
        assert!(!info.has_expired(at_millis(100), window));
        assert!(info.has_expired(at_millis(101), window));
    }

    #[test]
    fn test_time_until_reset_inside_window() {
        let remaining = time_until_reset(Duration::from_millis(100), at_millis(0), at_millis(30));
        assert_eq!(remaining, TimeDelta::milliseconds(70));
        assert_eq!(clamp_reset(remaining), Duration::from_millis(70));
    }

    #[test]
    fn test_time_until_reset_after_window_is_negative_before_clamp() {
        let remaining = time_until_reset(Duration::from_millis(100), at_millis(0), at_millis(130));
        assert_eq!(remaining, TimeDelta::milliseconds(-30));
        assert_eq!(clamp_reset(remaining), Duration::ZERO);
    }

    #[test]
    fn test_time_until_reset_exactly_at_boundary() {
        let remaining = time_until_reset(Duration::from_millis(100), at_millis(0), at_millis(100));
        assert_eq!(remaining, TimeDelta::zero());
        assert_eq!(clamp_reset(remaining), Duration::ZERO);
    }
}
