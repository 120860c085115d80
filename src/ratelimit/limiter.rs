//! Fixed-window rate limiter.

use std::time::Duration;
use tracing::{debug, trace};

use super::backend::Storage;
use super::clock::{Clock, SystemClock};
use super::memory::MemoryStorage;
use super::window::{clamp_reset, time_until_reset, RateInfo};
use crate::error::{Result, TallyError};

/// Admits at most `max_calls` requests per key in each window.
///
/// The limiter holds no window state of its own; everything lives in the
/// configured storage. It never blocks waiting for quota: a denial is
/// reported, not delayed.
pub struct FixedWindowLimiter<S: Storage = MemoryStorage, C: Clock = SystemClock> {
    /// Maximum requests allowed per window
    max_calls: u64,
    /// Length of each window
    window: Duration,
    /// Where window state is counted
    storage: S,
    /// Source of "now" for each decision
    clock: C,
}

impl FixedWindowLimiter {
    /// Create a limiter counting in process memory.
    pub fn new(max_calls: u64, window: Duration) -> Result<Self> {
        Self::with_storage(max_calls, window, MemoryStorage::new())
    }
}

impl<S: Storage> FixedWindowLimiter<S> {
    /// Create a limiter counting in the given storage.
    pub fn with_storage(max_calls: u64, window: Duration, storage: S) -> Result<Self> {
        if max_calls == 0 {
            return Err(TallyError::Config("max_calls must be positive".to_string()));
        }
        if window.is_zero() {
            return Err(TallyError::Config("window must be positive".to_string()));
        }

        Ok(Self {
            max_calls,
            window,
            storage,
            clock: SystemClock,
        })
    }
}

impl<S: Storage, C: Clock> FixedWindowLimiter<S, C> {
    /// Replace the time source.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> FixedWindowLimiter<S, C2> {
        FixedWindowLimiter {
            max_calls: self.max_calls,
            window: self.window,
            storage: self.storage,
            clock,
        }
    }

    /// Maximum requests allowed per window.
    pub fn max_calls(&self) -> u64 {
        self.max_calls
    }

    /// Length of each window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The storage this limiter counts in.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Count a request for `key` and decide whether it is allowed.
    ///
    /// Every call increments the key's counter exactly once, including calls
    /// that end up denied. Errors come only from the storage; no decision is
    /// made up when it fails.
    pub async fn allow(&self, key: &str) -> Result<RateInfo> {
        let now = self.clock.now();
        let info = self.storage.count_request(key, now, self.window).await?;

        let allowed = info.calls <= self.max_calls;
        let remaining_calls = self.max_calls.saturating_sub(info.calls);
        let reset_in = clamp_reset(time_until_reset(self.window, info.start, now));

        trace!(
            key = %key,
            calls = info.calls,
            remaining = remaining_calls,
            "Checked rate limit"
        );

        if !allowed {
            debug!(
                key = %key,
                calls = info.calls,
                limit = self.max_calls,
                "Rate limit exceeded"
            );
        }

        Ok(RateInfo {
            allowed,
            last_call: now,
            remaining_calls,
            reset_in,
            window_start: info.start,
            limit: self.max_calls,
        })
    }

    /// Release the storage's resources.
    pub async fn close(&self) -> Result<()> {
        self.storage.close().await
    }
}
