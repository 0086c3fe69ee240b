//! Cache facade — the public cache-aside surface.
//!
//! [`Cache`] composes the store client, codec, circuit breaker, request
//! coalescer, and stat reporter into the cache-aside protocol:
//!
//! - [`Cache::get`] / [`Cache::set`] / [`Cache::del`] — direct cache access
//!   through the circuit breaker.
//! - [`Cache::query`] — read-through: check the cache, coalesce concurrent
//!   callers per key, fall back to the caller-supplied loader on miss, and
//!   negatively cache confirmed-absent keys with a placeholder marker.
//! - [`Cache::exec`] — write-then-invalidate: run a mutation and delete the
//!   affected keys only if it succeeds.
//!
//! Every value write uses a TTL drawn uniformly from `(0, expire]` so that
//! keys populated together do not all expire together.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::breaker::{BreakerConfig, BreakerRegistry};
use crate::coalesce::Flight;
use crate::codec::{Codec, CodecError, Json};
use crate::error::CacheError;
use crate::stats::{Stats, report_loop};
use crate::store::{Store, StoreError};

/// Negative-cache marker: the stored bytes meaning "confirmed absent in the
/// backing store". Compared before any decode attempt, so it can never be
/// confused with an encoded value or a corrupt entry.
const PLACEHOLDER: &[u8] = b"*";

/// How store operations are mapped onto breaker instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakerScope {
    /// One breaker per `(operation, key)` pair: failures on one key never
    /// trip the breaker for another. Breaker state grows with the number of
    /// distinct keys and is never reclaimed.
    #[default]
    PerKey,
    /// One breaker per operation (`get`, `set`, `del`): bounded state for
    /// high-cardinality key spaces, at the cost of keys sharing a breaker.
    PerOperation,
}

struct Config {
    expire: Duration,
    stat_interval: Duration,
    op_timeout: Option<Duration>,
    scope: BreakerScope,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expire: Duration::from_secs(60),
            stat_interval: Duration::from_secs(60),
            op_timeout: None,
            scope: BreakerScope::default(),
        }
    }
}

/// Builder for [`Cache`]. Created by [`Cache::builder`].
pub struct CacheBuilder<S, C = Json> {
    store: S,
    codec: C,
    cfg: Config,
    breaker: BreakerConfig,
}

impl<S: Store, C: Codec> CacheBuilder<S, C> {
    /// Replaces the default JSON codec.
    pub fn codec<C2: Codec>(self, codec: C2) -> CacheBuilder<S, C2> {
        CacheBuilder {
            store: self.store,
            codec,
            cfg: self.cfg,
            breaker: self.breaker,
        }
    }

    /// Base expiry for jittered writes. Default one minute.
    pub fn expire(mut self, expire: Duration) -> Self {
        self.cfg.expire = expire;
        self
    }

    /// Stat reporting interval. Default one minute.
    pub fn stat_interval(mut self, interval: Duration) -> Self {
        self.cfg.stat_interval = interval;
        self
    }

    /// Deadline applied to each individual store call. Overruns surface as
    /// [`CacheError::Timeout`] and count as breaker failures. Default none.
    pub fn op_timeout(mut self, deadline: Duration) -> Self {
        self.cfg.op_timeout = Some(deadline);
        self
    }

    /// Circuit breaker tuning parameters.
    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Breaker identity scope. Default [`BreakerScope::PerKey`].
    pub fn breaker_scope(mut self, scope: BreakerScope) -> Self {
        self.cfg.scope = scope;
        self
    }

    /// Builds the cache and starts its stat reporter task.
    ///
    /// Must be called within a tokio runtime; the reporter is aborted when
    /// the cache is dropped.
    pub fn build(self) -> Cache<S, C> {
        let stats = Arc::new(Stats::default());
        let reporter = tokio::spawn(report_loop(Arc::clone(&stats), self.cfg.stat_interval));
        Cache {
            store: self.store,
            codec: self.codec,
            breakers: BreakerRegistry::new(self.breaker),
            flight: Flight::new(),
            stats,
            reporter,
            cfg: self.cfg,
        }
    }
}

/// Result of one coalesced query execution, shared with every waiter.
///
/// The payload is type-erased so a single in-flight group can serve queries
/// of any value type; each caller downcasts back to its own `T`.
#[derive(Clone)]
enum QueryOutcome {
    Found(Arc<dyn Any + Send + Sync>),
    Absent,
}

/// What a cache lookup produced, before any decoding.
enum Lookup {
    Value(Bytes),
    Placeholder,
    Miss,
}

/// Outcome of a breaker-guarded store call.
enum GuardError {
    Open,
    Timeout,
    Store(StoreError),
}

impl From<GuardError> for CacheError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Open => CacheError::BreakerOpen,
            GuardError::Timeout => CacheError::Timeout,
            GuardError::Store(err) => err.into(),
        }
    }
}

/// The resilient cache-aside facade.
///
/// Safe for concurrent use behind `&self`; wrap in [`Arc`] to share across
/// tasks.
///
/// # Examples
///
/// ```rust,no_run
/// use aside::{Cache, MemoryStore};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), aside::CacheError> {
///     let cache = Cache::builder(MemoryStore::new()).build();
///
///     let user: User = cache
///         .query("user:1", || async {
///             // Backing-store lookup; Ok(None) means "confirmed absent".
///             Ok::<_, std::io::Error>(Some(User { id: 1, name: "ada".into() }))
///         })
///         .await?;
///     println!("{}", user.name);
///     Ok(())
/// }
/// ```
pub struct Cache<S, C = Json> {
    store: S,
    codec: C,
    cfg: Config,
    breakers: BreakerRegistry,
    flight: Flight<QueryOutcome>,
    stats: Arc<Stats>,
    reporter: JoinHandle<()>,
}

impl<S: Store> Cache<S> {
    /// Starts building a cache over `store` with the default JSON codec.
    pub fn builder(store: S) -> CacheBuilder<S, Json> {
        CacheBuilder {
            store,
            codec: Json,
            cfg: Config::default(),
            breaker: BreakerConfig::default(),
        }
    }

    /// Builds a cache over `store` with all defaults.
    pub fn new(store: S) -> Self {
        Self::builder(store).build()
    }
}

impl<S: Store, C: Codec> Cache<S, C> {
    /// Fetches and decodes the value cached under `key`.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Miss`] — key absent, store unreachable, breaker open,
    ///   or the entry was corrupt (logged and best-effort deleted).
    /// - [`CacheError::Placeholder`] — the key is negatively cached.
    /// - [`CacheError::Timeout`] — the store call exceeded its deadline.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        match self.lookup(key).await? {
            Lookup::Miss => Err(CacheError::Miss),
            Lookup::Placeholder => Err(CacheError::Placeholder),
            Lookup::Value(bytes) => match self.codec.decode(&bytes) {
                Ok(value) => Ok(value),
                Err(err) => {
                    self.self_heal(key, &err).await;
                    Err(CacheError::Miss)
                }
            },
        }
    }

    /// Encodes `value` and stores it under `key` with a jittered TTL drawn
    /// from `(0, expire]`.
    ///
    /// Serialization failure is returned without attempting a store call;
    /// breaker-open and store failures are hard errors here.
    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.set_with_expire(key, value, jittered(self.cfg.expire))
            .await
    }

    /// As [`Cache::set`] with a caller-specified TTL. No jitter is applied.
    pub async fn set_with_expire<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = self.codec.encode(value)?;
        self.write(key, bytes, ttl).await
    }

    /// Deletes every key in `keys` in one store request.
    ///
    /// An empty slice is a no-op success. Failures are logged and returned.
    pub async fn del(&self, keys: &[&str]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let name = self.op_name("del", &keys.join(","));
        match self.guarded(name, self.store.del(keys)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = CacheError::from(err);
                error!(?keys, error = %err, "cache del failed");
                Err(err)
            }
        }
    }

    /// Read-through lookup: the cache-aside entry point.
    ///
    /// Concurrent calls for the same key are coalesced into one execution
    /// whose result every caller shares; all coalesced callers for one key
    /// must use the same `T`. On a cache miss the caller-supplied `load` is
    /// invoked: `Ok(Some(v))` caches and returns the value, `Ok(None)` writes
    /// the negative-cache placeholder and yields [`CacheError::NotFound`],
    /// and a loader error is propagated verbatim with nothing cached.
    ///
    /// The read path never surfaces serialization or transport errors: a
    /// corrupt or unreachable cache falls through to `load`.
    pub async fn query<T, F, Fut, E>(&self, key: &str, load: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (outcome, shared) = self.flight.run(key, || self.leader_query(key, load)).await;
        if shared {
            self.stats.incr_total();
            self.stats.incr_shared();
        }
        match outcome? {
            QueryOutcome::Absent => Err(CacheError::NotFound),
            QueryOutcome::Found(value) => match value.downcast::<T>() {
                Ok(value) => Ok((*value).clone()),
                Err(_) => Err(CacheError::TypeMismatch),
            },
        }
    }

    /// Runs `mutate` against the backing store; on success, invalidates
    /// `keys`.
    ///
    /// A failed mutation is propagated and nothing is invalidated — the
    /// write itself did not happen, so the cache is still accurate.
    pub async fn exec<T, F, Fut, E>(&self, mutate: F, keys: &[&str]) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let out = mutate().await.map_err(CacheError::loader)?;
        self.del(keys).await?;
        Ok(out)
    }

    /// The leader's side of a coalesced query.
    async fn leader_query<T, F, Fut, E>(
        &self,
        key: &str,
        load: F,
    ) -> Result<QueryOutcome, CacheError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match self.lookup(key).await? {
            Lookup::Placeholder => return Ok(QueryOutcome::Absent),
            Lookup::Value(bytes) => match self.codec.decode::<T>(&bytes) {
                Ok(value) => return Ok(QueryOutcome::Found(Arc::new(value))),
                Err(err) => {
                    // Corrupt entry: heal and fall through to the loader.
                    self.self_heal(key, &err).await;
                }
            },
            Lookup::Miss => {}
        }

        let loaded = match load().await {
            Ok(loaded) => loaded,
            Err(err) => {
                self.stats.incr_db_fails();
                return Err(CacheError::loader(err));
            }
        };

        match loaded {
            None => {
                let ttl = jittered(self.cfg.expire);
                if let Err(err) = self.write(key, Bytes::from_static(PLACEHOLDER), ttl).await {
                    warn!(key, error = %err, "failed to write negative-cache placeholder");
                }
                Ok(QueryOutcome::Absent)
            }
            Some(value) => {
                if let Err(err) = self.set(key, &value).await {
                    warn!(key, error = %err, "failed to cache loaded value");
                }
                Ok(QueryOutcome::Found(Arc::new(value)))
            }
        }
    }

    /// Raw breaker-guarded fetch, with stats accounting.
    ///
    /// Store transport failures and breaker-open are downgraded to a miss so
    /// read paths fall through to the backing store; only a deadline overrun
    /// surfaces as its own error.
    async fn lookup(&self, key: &str) -> Result<Lookup, CacheError> {
        self.stats.incr_total();
        match self
            .guarded(self.op_name("get", key), self.store.get(key))
            .await
        {
            Ok(Some(bytes)) => {
                self.stats.incr_hit();
                if bytes.as_ref() == PLACEHOLDER {
                    Ok(Lookup::Placeholder)
                } else {
                    Ok(Lookup::Value(bytes))
                }
            }
            Ok(None) => {
                self.stats.incr_miss();
                Ok(Lookup::Miss)
            }
            Err(GuardError::Open) => {
                self.stats.incr_miss();
                Ok(Lookup::Miss)
            }
            Err(GuardError::Timeout) => {
                self.stats.incr_miss();
                Err(CacheError::Timeout)
            }
            Err(GuardError::Store(err)) => {
                self.stats.incr_miss();
                warn!(key, error = %err, "cache get failed; treating as miss");
                Ok(Lookup::Miss)
            }
        }
    }

    /// Breaker-guarded store write. Unlike reads, every failure is a hard
    /// error for the caller.
    async fn write(&self, key: &str, bytes: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.guarded(self.op_name("set", key), self.store.set(key, bytes, ttl))
            .await
            .map_err(CacheError::from)
    }

    /// Logs a corrupt entry and best-effort deletes it. Deletion failures are
    /// logged by [`Cache::del`] and swallowed here.
    async fn self_heal(&self, key: &str, err: &CodecError) {
        error!(key, error = %err, "corrupt cache entry; deleting");
        let _ = self.del(&[key]).await;
    }

    /// Wraps one store call in its breaker and optional deadline.
    async fn guarded<T, Fut>(&self, name: String, call: Fut) -> Result<T, GuardError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let breaker = self.breakers.acquire(&name);
        if !breaker.allow() {
            return Err(GuardError::Open);
        }
        let result = match self.cfg.op_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            },
            None => call.await,
        };
        match result {
            Ok(value) => {
                breaker.on_success();
                Ok(value)
            }
            Err(StoreError::Timeout) => {
                breaker.on_failure();
                Err(GuardError::Timeout)
            }
            Err(err) => {
                breaker.on_failure();
                Err(GuardError::Store(err))
            }
        }
    }

    fn op_name(&self, op: &str, key: &str) -> String {
        match self.cfg.scope {
            BreakerScope::PerKey => format!("{op}:{key}"),
            BreakerScope::PerOperation => op.to_owned(),
        }
    }
}

impl<S, C> Drop for Cache<S, C> {
    fn drop(&mut self) {
        self.reporter.abort();
    }
}

/// Draws a TTL uniformly from `(0, base]`, rounded up to whole seconds.
///
/// Independent per write, from the process-wide thread-local generator.
/// Randomizing expiry keeps keys written together from expiring together.
fn jittered(base: Duration) -> Duration {
    let unit: f64 = rand::rng().random();
    let secs = (unit * base.as_secs_f64()).ceil().max(1.0);
    Duration::from_secs(secs as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Record {
        a: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Label {
        name: String,
    }

    /// A store whose every call fails, counting round trips.
    #[derive(Default)]
    struct OfflineStore {
        calls: AtomicU32,
    }

    impl OfflineStore {
        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail(&self) -> StoreError {
            self.calls.fetch_add(1, Ordering::SeqCst);
            StoreError::Backend("store offline".into())
        }
    }

    #[async_trait]
    impl Store for OfflineStore {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
            Err(self.fail())
        }

        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), StoreError> {
            Err(self.fail())
        }

        async fn del(&self, _keys: &[&str]) -> Result<(), StoreError> {
            Err(self.fail())
        }
    }

    /// A store that never responds, for deadline tests.
    struct StuckStore;

    #[async_trait]
    impl Store for StuckStore {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn del(&self, _keys: &[&str]) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn touchy_breaker() -> BreakerConfig {
        BreakerConfig {
            error_rate: 0.5,
            min_requests: 2,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
            probes: 1,
        }
    }

    #[tokio::test]
    async fn get_unknown_key_is_miss() {
        let cache = Cache::new(MemoryStore::new());
        let result: Result<Record, _> = cache.get("never-written").await;
        assert!(result.unwrap_err().is_miss());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = Cache::new(MemoryStore::new());
        let record = Record { a: 1 };
        cache.set("k", &record).await.unwrap();
        let back: Record = cache.get("k").await.unwrap();
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn del_absent_key_is_idempotent() {
        let cache = Cache::new(MemoryStore::new());
        cache.del(&["ghost"]).await.unwrap();
        cache.del(&["ghost"]).await.unwrap();
    }

    #[tokio::test]
    async fn del_empty_slice_is_noop() {
        let cache = Cache::new(OfflineStore::default());
        // No keys, no store round trip, no error even with a dead store.
        cache.del(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn scenario_hit_then_miss_counters() {
        let cache = Cache::new(MemoryStore::new());
        cache.set("k", &Record { a: 1 }).await.unwrap();

        let got: Record = cache.get("k").await.unwrap();
        assert_eq!(got, Record { a: 1 });
        assert_eq!(cache.stats.peek().hit, 1);

        cache.del(&["k"]).await.unwrap();
        let result: Result<Record, _> = cache.get("k").await;
        assert!(matches!(result, Err(CacheError::Miss)));
        assert_eq!(cache.stats.peek().miss, 1);
        assert_eq!(cache.stats.peek().total, 2);
    }

    #[tokio::test]
    async fn query_populates_cache_from_loader() {
        let cache = Cache::new(MemoryStore::new());
        let loads = AtomicU32::new(0);

        let got: Record = cache
            .query("k", || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(Some(Record { a: 7 }))
            })
            .await
            .unwrap();
        assert_eq!(got, Record { a: 7 });

        // Second query is served from the cache.
        let again: Record = cache
            .query("k", || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(Some(Record { a: 0 }))
            })
            .await
            .unwrap();
        assert_eq!(again, Record { a: 7 });
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn query_negative_caches_absent_keys() {
        let cache = Cache::new(MemoryStore::new());
        let loads = AtomicU32::new(0);

        for _ in 0..2 {
            let result: Result<Record, _> = cache
                .query("missing", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(None)
                })
                .await;
            assert!(result.unwrap_err().is_not_found());
        }
        // The placeholder answered the second query without a loader call.
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn placeholder_expiry_re_invokes_loader() {
        tokio::time::pause();
        let cache = Cache::builder(MemoryStore::new())
            .expire(Duration::from_secs(30))
            .build();
        let loads = AtomicU32::new(0);

        let load = || async {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<Record>, std::io::Error>(None)
        };
        let _ = cache.query("missing", load).await;
        // The jittered placeholder TTL is at most the base expiry.
        tokio::time::advance(Duration::from_secs(31)).await;
        let _ = cache.query("missing", load).await;
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn placeholder_surfaces_distinctly_on_get() {
        let cache = Cache::new(MemoryStore::new());
        let _: Result<Record, _> = cache
            .query("missing", || async { Ok::<_, std::io::Error>(None) })
            .await;
        let result: Result<Record, _> = cache.get("missing").await;
        assert!(matches!(result, Err(CacheError::Placeholder)));
    }

    #[tokio::test]
    async fn loader_error_propagates_and_caches_nothing() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(Arc::clone(&store));

        let result: Result<Record, _> = cache
            .query("k", || async {
                Err::<Option<Record>, _>(std::io::Error::other("db down"))
            })
            .await;
        assert!(matches!(result, Err(CacheError::Loader(_))));
        assert_eq!(cache.stats.peek().db_fails, 1);
        // Neither a value nor a placeholder was written.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn stampede_collapses_to_one_load() {
        let cache = Arc::new(Cache::new(MemoryStore::new()));
        let loads = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            handles.push(tokio::spawn(async move {
                cache
                    .query("hot", || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, std::io::Error>(Some(Record { a: 9 }))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Record { a: 9 });
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats.peek().shared, 9);
    }

    #[tokio::test]
    async fn coalesced_callers_must_agree_on_value_type() {
        let cache = Arc::new(Cache::new(MemoryStore::new()));

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .query("k", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, std::io::Error>(Some(Record { a: 1 }))
                    })
                    .await
            })
        };
        // Let the leader take the key before the second caller arrives.
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Same key, different value type: the coalesced result cannot be
        // downcast for this caller.
        let result: Result<Label, _> = cache
            .query("k", || async {
                Ok::<_, std::io::Error>(Some(Label { name: "x".into() }))
            })
            .await;
        assert!(matches!(result, Err(CacheError::TypeMismatch)));

        // The leader itself is unaffected.
        assert_eq!(leader.await.unwrap().unwrap(), Record { a: 1 });
    }

    #[tokio::test]
    async fn corrupt_entry_self_heals_on_get() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw("k", &b"{not json"[..], Duration::from_secs(60));
        let cache = Cache::new(Arc::clone(&store));

        let result: Result<Record, _> = cache.get("k").await;
        assert!(matches!(result, Err(CacheError::Miss)));
        // The offending key was deleted.
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_entry_falls_through_to_loader_on_query() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw("k", &b"{not json"[..], Duration::from_secs(60));
        let cache = Cache::new(Arc::clone(&store));

        let got: Record = cache
            .query("k", || async { Ok::<_, std::io::Error>(Some(Record { a: 3 })) })
            .await
            .unwrap();
        assert_eq!(got, Record { a: 3 });
        // The healed key now holds the loaded value.
        let back: Record = cache.get("k").await.unwrap();
        assert_eq!(back, Record { a: 3 });
    }

    #[tokio::test]
    async fn unreachable_store_reads_fall_through_to_loader() {
        let cache = Cache::new(OfflineStore::default());
        let got: Record = cache
            .query("k", || async { Ok::<_, std::io::Error>(Some(Record { a: 5 })) })
            .await
            .unwrap();
        assert_eq!(got, Record { a: 5 });
    }

    #[tokio::test]
    async fn tripped_breaker_short_circuits_get() {
        let cache = Cache::builder(OfflineStore::default())
            .breaker(touchy_breaker())
            .build();

        for _ in 0..2 {
            let result: Result<Record, _> = cache.get("k").await;
            assert!(matches!(result, Err(CacheError::Miss)));
        }
        let round_trips = cache.store.calls();
        assert_eq!(round_trips, 2);

        // Breaker is open: still a miss, but without a store round trip.
        let result: Result<Record, _> = cache.get("k").await;
        assert!(matches!(result, Err(CacheError::Miss)));
        assert_eq!(cache.store.calls(), round_trips);
    }

    #[tokio::test]
    async fn tripped_breaker_is_hard_error_for_writes() {
        let cache = Cache::builder(OfflineStore::default())
            .breaker(touchy_breaker())
            .build();

        for _ in 0..2 {
            let result = cache.set("k", &Record { a: 1 }).await;
            assert!(matches!(result, Err(CacheError::Store(_))));
        }
        let result = cache.set("k", &Record { a: 1 }).await;
        assert!(matches!(result, Err(CacheError::BreakerOpen)));
    }

    #[tokio::test]
    async fn breakers_are_scoped_per_key() {
        let cache = Cache::builder(OfflineStore::default())
            .breaker(touchy_breaker())
            .build();

        for _ in 0..2 {
            let _ = cache.set("a", &Record { a: 1 }).await;
        }
        // "a" has tripped; "b" still reaches the store.
        assert!(matches!(
            cache.set("a", &Record { a: 1 }).await,
            Err(CacheError::BreakerOpen)
        ));
        assert!(matches!(
            cache.set("b", &Record { a: 1 }).await,
            Err(CacheError::Store(_))
        ));
    }

    #[tokio::test]
    async fn per_operation_scope_shares_one_breaker_across_keys() {
        let cache = Cache::builder(OfflineStore::default())
            .breaker(touchy_breaker())
            .breaker_scope(BreakerScope::PerOperation)
            .build();

        for _ in 0..2 {
            let _ = cache.set("a", &Record { a: 1 }).await;
        }
        // Failures on "a" tripped the single `set` breaker, so "b" is
        // rejected without a store round trip.
        let round_trips = cache.store.calls();
        assert!(matches!(
            cache.set("b", &Record { a: 1 }).await,
            Err(CacheError::BreakerOpen)
        ));
        assert_eq!(cache.store.calls(), round_trips);
        assert_eq!(cache.breakers.len(), 1);
    }

    #[tokio::test]
    async fn store_deadline_surfaces_as_timeout() {
        tokio::time::pause();
        let cache = Cache::builder(StuckStore)
            .op_timeout(Duration::from_millis(10))
            .build();
        let result: Result<Record, _> = cache.get("k").await;
        assert!(matches!(result, Err(CacheError::Timeout)));
    }

    #[tokio::test]
    async fn exec_invalidates_on_success() {
        let cache = Cache::new(MemoryStore::new());
        cache.set("k", &Record { a: 1 }).await.unwrap();

        cache
            .exec(|| async { Ok::<_, std::io::Error>(()) }, &["k"])
            .await
            .unwrap();
        let result: Result<Record, _> = cache.get("k").await;
        assert!(matches!(result, Err(CacheError::Miss)));
    }

    #[tokio::test]
    async fn exec_keeps_cache_on_failure() {
        let cache = Cache::new(MemoryStore::new());
        cache.set("k", &Record { a: 1 }).await.unwrap();

        let result = cache
            .exec(
                || async { Err::<(), _>(std::io::Error::other("constraint violation")) },
                &["k"],
            )
            .await;
        assert!(matches!(result, Err(CacheError::Loader(_))));
        // The failed write did not invalidate the cached value.
        let got: Record = cache.get("k").await.unwrap();
        assert_eq!(got, Record { a: 1 });
    }

    #[test]
    fn jitter_stays_within_base_expiry() {
        let base = Duration::from_secs(60);
        for _ in 0..1000 {
            let ttl = jittered(base);
            assert!(ttl > Duration::ZERO);
            assert!(ttl <= base);
        }
    }

    #[test]
    fn jitter_rounds_up_to_a_whole_second() {
        let ttl = jittered(Duration::from_millis(100));
        assert_eq!(ttl, Duration::from_secs(1));
    }
}
