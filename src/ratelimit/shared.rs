//! Window counters shared between processes through a remote store.
//!
//! Each key maps to one hash record holding a call counter and the window's
//! start instant. Atomicity comes from the store's own transaction primitive;
//! nothing here takes a lock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, trace, warn};

use super::backend::Storage;
use super::redis_store::RedisWindowStore;
use super::window::WindowInfo;
use crate::config::SharedStorageConfig;
use crate::error::{Result, TallyError};

/// Namespace prepended to every caller key.
pub const KEY_PREFIX: &str = "ratelimit:";
/// Hash field holding the call counter.
pub const CALLS_FIELD: &str = "calls";
/// Hash field holding the window start in nanoseconds since the epoch.
pub const START_FIELD: &str = "start_timestamp";

/// Reply of the increment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReply {
    /// Counter value after the increment
    pub calls: u64,
    /// Whether this transaction wrote the start field
    pub created: bool,
    /// The start field as stored, in nanoseconds since the epoch
    pub start_nanos: i64,
}

/// Primitive operations on window records in a remote store.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// In one transaction: increment the `calls` field, set `start_timestamp`
    /// to `start_nanos` only if absent, and read `start_timestamp` back.
    async fn increment(&self, record: &str, start_nanos: i64) -> Result<WindowReply>;

    /// Expire `record` at `at`.
    async fn expire_at(&self, record: &str, at: DateTime<Utc>) -> Result<()>;

    /// Delete `record`.
    async fn delete(&self, record: &str) -> Result<()>;

    /// Release connections to the store.
    async fn close(&self) -> Result<()>;
}

/// Storage whose state lives in a remote store shared by many processes.
pub struct SharedStorage<W: WindowStore> {
    store: W,
}

impl SharedStorage<RedisWindowStore> {
    /// Connect to Redis using the given configuration.
    pub async fn connect(config: &SharedStorageConfig) -> Result<Self> {
        let store = RedisWindowStore::connect(&config.url, config.pool_size).await?;
        Ok(Self::new(store))
    }
}

impl<W: WindowStore> SharedStorage<W> {
    /// Wrap a window store.
    pub fn new(store: W) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &W {
        &self.store
    }

    /// Record name for a caller key.
    pub fn record_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    /// Best-effort removal of a record after a failed sequence.
    async fn discard(&self, record: &str) {
        if let Err(e) = self.store.delete(record).await {
            warn!(record = %record, error = %e, "Failed to delete window record after error");
        }
    }

    async fn count(&self, record: &str, at: DateTime<Utc>, window: Duration) -> Result<WindowInfo> {
        let start_nanos = to_nanos(at)?;
        let reply = self.store.increment(record, start_nanos).await?;
        let start = DateTime::from_timestamp_nanos(reply.start_nanos);

        if reply.created {
            debug!(record = %record, start = %start, "Opened new shared window");
            self.store.expire_at(record, expiry(start, window)?).await?;
        }

        trace!(record = %record, calls = reply.calls, "Counted shared request");
        Ok(WindowInfo {
            start,
            calls: reply.calls,
        })
    }
}

#[async_trait]
impl<W: WindowStore> Storage for SharedStorage<W> {
    async fn count_request(
        &self,
        key: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowInfo> {
        let record = Self::record_key(key);
        match self.count(&record, at, window).await {
            Ok(info) => Ok(info),
            Err(e) => {
                self.discard(&record).await;
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}

fn to_nanos(at: DateTime<Utc>) -> Result<i64> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| TallyError::InvalidTimestamp(at.to_rfc3339()))
}

/// When a window opened at `start` should vanish from the store.
fn expiry(start: DateTime<Utc>, window: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|window| start.checked_add_signed(window))
        .ok_or_else(|| TallyError::Config(format!("window of {:?} is too long", window)))
}
