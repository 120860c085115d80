//! Storage trait for abstracting in-memory and shared window counters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::window::WindowInfo;
use crate::error::Result;

/// Trait for window counting backends.
///
/// This trait abstracts over both the process-local `MemoryStorage` and the
/// Redis-backed `SharedStorage` so the limiter can work with either.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Count a request for `key` made at `at`.
    ///
    /// If `at` lies within `window` of the key's recorded start the count is
    /// incremented and the existing start returned. Otherwise a new window
    /// begins at `at` with a count of one. The whole operation is atomic with
    /// respect to other callers using the same key.
    async fn count_request(
        &self,
        key: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowInfo>;

    /// Release any resources held by the backend.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn count_request(
        &self,
        key: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowInfo> {
        (**self).count_request(key, at, window).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Box<S> {
    async fn count_request(
        &self,
        key: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowInfo> {
        (**self).count_request(key, at, window).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
