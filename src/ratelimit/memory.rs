//! Process-local window counters.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use super::backend::Storage;
use super::window::WindowInfo;
use crate::error::Result;

/// Window state for every key seen by this process.
#[derive(Debug, Default)]
struct Counters {
    /// Start of each key's current window
    starts: HashMap<String, DateTime<Utc>>,
    /// Requests counted in each key's current window
    calls: HashMap<String, u64>,
}

/// In-memory storage guarded by a single mutex.
///
/// Keys are never evicted on their own. A process that sees an unbounded
/// number of distinct keys grows this map without bound; use
/// [`MemoryStorage::reset_counter`] to drop a key explicitly.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    counters: Mutex<Counters>,
}

impl MemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything recorded for `key`.
    pub fn reset_counter(&self, key: &str) {
        let mut counters = self.counters.lock();
        counters.starts.remove(key);
        counters.calls.remove(key);
    }

    /// Number of keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.counters.lock().starts.len()
    }

    fn count(&self, key: &str, at: DateTime<Utc>, window: Duration) -> WindowInfo {
        let mut counters = self.counters.lock();

        let current = counters
            .starts
            .get(key)
            .copied()
            .filter(|start| !WindowInfo::opened_at(*start).has_expired(at, window));

        let start = match current {
            Some(start) => start,
            None => {
                trace!(key = %key, start = %at, "Opening new window");
                counters.starts.insert(key.to_string(), at);
                counters.calls.insert(key.to_string(), 0);
                at
            }
        };

        let calls = counters.calls.entry(key.to_string()).or_insert(0);
        *calls += 1;

        WindowInfo { start, calls: *calls }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn count_request(
        &self,
        key: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowInfo> {
        Ok(self.count(key, at, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_574_107_200, 0).unwrap()
    }

    #[tokio::test]
    async fn test_requests_within_window_accumulate() {
        let storage = MemoryStorage::new();
        let window = Duration::from_millis(100);

        storage.count_request("test_key", base(), window).await.unwrap();
        let info = storage
            .count_request("test_key", base() + TimeDelta::milliseconds(50), window)
            .await
            .unwrap();

        assert_eq!(info.calls, 2);
        assert_eq!(info.start, base());
    }

    #[tokio::test]
    async fn test_request_after_window_starts_new_one() {
        let storage = MemoryStorage::new();
        let window = Duration::from_millis(100);

        for i in 0..3 {
            let at = base() + TimeDelta::milliseconds(60 * i);
            storage.count_request("test_key", at, window).await.unwrap();
        }

        let info = storage
            .count_request("test_key", base() + TimeDelta::milliseconds(120), window)
            .await
            .unwrap();
        // The third request (t=120ms) opened a window, so this is its second call.
        assert_eq!(info.calls, 2);
        assert_eq!(info.start, base() + TimeDelta::milliseconds(120));
    }

    #[tokio::test]
    async fn test_request_exactly_at_boundary_stays_in_window() {
        let storage = MemoryStorage::new();
        let window = Duration::from_millis(100);

        storage.count_request("k", base(), window).await.unwrap();
        let info = storage
            .count_request("k", base() + TimeDelta::milliseconds(100), window)
            .await
            .unwrap();

        assert_eq!(info.calls, 2);
        assert_eq!(info.start, base());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let storage = MemoryStorage::new();
        let window = Duration::from_secs(1);

        storage.count_request("a", base(), window).await.unwrap();
        storage.count_request("a", base(), window).await.unwrap();
        let b = storage.count_request("b", base(), window).await.unwrap();
        let empty = storage.count_request("", base(), window).await.unwrap();

        assert_eq!(b.calls, 1);
        assert_eq!(empty.calls, 1);
        assert_eq!(storage.tracked_keys(), 3);
    }

    #[tokio::test]
    async fn test_reset_counter() {
        let storage = MemoryStorage::new();
        let window = Duration::from_secs(1);

        storage.count_request("k", base(), window).await.unwrap();
        storage.count_request("k", base(), window).await.unwrap();
        storage.reset_counter("k");
        assert_eq!(storage.tracked_keys(), 0);

        let later = base() + TimeDelta::milliseconds(10);
        let info = storage.count_request("k", later, window).await.unwrap();
        assert_eq!(info, WindowInfo::opened_at(later));
    }
}
