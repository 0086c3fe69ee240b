//! Redis-backed store over a multiplexed async connection.
//!
//! Requires the `redis` cargo feature. TTLs are applied with `SET ... EX`,
//! so expiry is enforced server-side and the cache never has to sweep keys.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::{Store, StoreError};

/// A [`Store`] backed by a Redis server.
///
/// The multiplexed connection is cheap to clone and safe to share across
/// tasks; the connection pool itself is owned by the `redis` client.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connects to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    /// Wraps an existing multiplexed connection.
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // Redis EX takes whole seconds; never write an entry that cannot expire.
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value.as_ref(), secs).await?;
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(keys.to_vec()).await?;
        Ok(())
    }
}
