//! # aside
//!
//! A resilient cache-aside layer between application code and a slower
//! backing store, backed by a remote key-value store.
//!
//! `aside` keeps the backing store out of the hot path and degrades
//! gracefully when the cache itself is unhealthy:
//!
//! - **Request coalescing** — concurrent lookups for one key collapse into a
//!   single execution whose result every caller shares.
//! - **Negative caching** — confirmed-absent keys are remembered with a
//!   placeholder so they stop falling through to the backing store.
//! - **TTL jitter** — expiry is randomized within the configured bound so
//!   keys written together do not expire together.
//! - **Circuit breaking** — store operations fail fast once the remote
//!   store is deemed unhealthy; reads fall back to the backing store.
//! - **Approximate stats** — atomic counters reported periodically through
//!   `tracing`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aside::{Cache, CacheError, MemoryStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let cache = Cache::builder(MemoryStore::new()).build();
//!
//!     let user: User = cache
//!         .query("user:1", || async {
//!             // Hit the backing store; Ok(None) means "confirmed absent".
//!             Ok::<_, std::io::Error>(Some(User { id: 1, name: "ada".into() }))
//!         })
//!         .await?;
//!     println!("{}", user.name);
//!     Ok(())
//! }
//! ```

// ── Core modules ──────────────────────────────────────────────────────────────
pub mod breaker;
pub mod cache;
pub mod coalesce;
pub mod codec;
pub mod error;
pub mod stats;
pub mod store;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use breaker::BreakerConfig;
pub use cache::{BreakerScope, Cache, CacheBuilder};
pub use codec::{Codec, CodecError, Json};
pub use error::CacheError;
pub use store::{MemoryStore, Store, StoreError};

#[cfg(feature = "redis")]
pub use store::RedisStore;
