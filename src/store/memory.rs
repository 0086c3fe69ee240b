//! In-process store with lazy TTL expiry.
//!
//! Intended for tests and local development; it honors the same contract as
//! a remote store (TTL expiry, distinguishable not-found) without any I/O.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::{Store, StoreError};

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

/// An in-memory [`Store`] keyed by string, expiring entries lazily on read.
///
/// Uses [`tokio::time::Instant`] so tests can drive expiry with
/// `tokio::time::pause` and `advance`.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        entries.values().filter(|e| e.expires_at > now).count()
    }

    /// Returns `true` when the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes raw bytes without going through the cache, for tests that need
    /// to plant corrupt or hand-crafted entries.
    pub fn insert_raw(&self, key: &str, value: impl Into<Bytes>, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.into(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                // Expired — reclaim on read.
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
