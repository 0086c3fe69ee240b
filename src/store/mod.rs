//! Store client — abstraction over the remote key-value store.
//!
//! The cache only needs three primitives from its store: `get`, `set` with a
//! TTL, and multi-key `del`. Eviction is delegated entirely to the store's
//! own TTL expiry; the cache never scans or enumerates keys.
//!
//! [`MemoryStore`] is an in-process implementation for tests and local
//! development. A Redis-backed implementation is available behind the
//! `redis` cargo feature.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;

/// Errors produced by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The operation did not complete within its deadline.
    #[error("store operation timed out")]
    Timeout,

    /// Transport or backend failure.
    #[error("store backend error: {0}")]
    Backend(String),

    /// Redis client error.
    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] ::redis::RedisError),
}

/// The remote key-value store capability.
///
/// `get` must report "key absent" (`Ok(None)`) distinctly from a transport
/// error: the cache treats the former as an ordinary miss and the latter as
/// a dependency failure that feeds the circuit breaker.
///
/// Implementations are shared behind `&self` by every concurrent caller.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Fetches the bytes stored under `key`, or `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError>;

    /// Deletes every key in `keys` in one request. Absent keys are ignored.
    async fn del(&self, keys: &[&str]) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        (**self).set(key, value, ttl).await
    }

    async fn del(&self, keys: &[&str]) -> Result<(), StoreError> {
        (**self).del(keys).await
    }
}
