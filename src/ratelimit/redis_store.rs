//! Redis window store and connection pool.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::{Client, ErrorKind, RedisError};
use tracing::{debug, info};

use super::shared::{WindowReply, WindowStore, CALLS_FIELD, START_FIELD};
use crate::error::{Result, TallyError};

/// A fixed set of multiplexed Redis connections handed out round-robin.
pub struct RedisPool {
    /// Open connections; empty once the pool is closed
    connections: RwLock<Vec<MultiplexedConnection>>,
    /// Index of the next connection to hand out
    next: AtomicUsize,
}

impl RedisPool {
    /// Open `size` connections to the server at `url`.
    pub async fn connect(url: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(TallyError::Config(
                "Redis pool size must be positive".to_string(),
            ));
        }

        info!(url = %sanitize_url(url), size = size, "Creating Redis connection pool");
        let client = Client::open(url)?;

        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(client.get_multiplexed_async_connection().await?);
        }

        info!("Redis connection pool created");
        Ok(Self {
            connections: RwLock::new(connections),
            next: AtomicUsize::new(0),
        })
    }

    /// Check out a connection.
    ///
    /// The handle is a cheap clone of a pooled connection and goes back to
    /// the pool when dropped.
    pub fn get(&self) -> Result<MultiplexedConnection> {
        let connections = self.connections.read();
        if connections.is_empty() {
            return Err(RedisError::from((ErrorKind::IoError, "connection pool is closed")).into());
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % connections.len();
        Ok(connections[index].clone())
    }

    /// Number of open connections.
    pub fn size(&self) -> usize {
        self.connections.read().len()
    }

    /// Drop every pooled connection.
    pub fn close(&self) {
        let closed = std::mem::take(&mut *self.connections.write());
        info!(connections = closed.len(), "Closed Redis connection pool");
    }
}

/// Hide the password of a Redis URL for logging.
fn sanitize_url(url: &str) -> String {
    match url.split_once('@') {
        Some((credentials, host)) => match credentials.rsplit_once(':') {
            Some((user, _)) if user.contains("//") => format!("{}:***@{}", user, host),
            _ => format!("{}@{}", credentials, host),
        },
        None => url.to_string(),
    }
}

/// Window store backed by Redis hashes.
pub struct RedisWindowStore {
    pool: RedisPool,
}

impl RedisWindowStore {
    /// Connect a store with a pool of `pool_size` connections.
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self> {
        Ok(Self::new(RedisPool::connect(url, pool_size).await?))
    }

    /// Wrap an existing pool.
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Access the connection pool.
    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn increment(&self, record: &str, start_nanos: i64) -> Result<WindowReply> {
        let mut conn = self.pool.get()?;
        let (calls, created, start_nanos): (u64, bool, i64) = redis::pipe()
            .atomic()
            .hincr(record, CALLS_FIELD, 1)
            .hset_nx(record, START_FIELD, start_nanos)
            .hget(record, START_FIELD)
            .query_async(&mut conn)
            .await?;

        Ok(WindowReply {
            calls,
            created,
            start_nanos,
        })
    }

    async fn expire_at(&self, record: &str, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.pool.get()?;
        let _: () = redis::cmd("PEXPIREAT")
            .arg(record)
            .arg(at.timestamp_millis())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, record: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        let _: () = redis::cmd("DEL").arg(record).query_async(&mut conn).await?;
        debug!(record = %record, "Deleted window record");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}
