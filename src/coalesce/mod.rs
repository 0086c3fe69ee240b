//! Request coalescing — at most one in-flight producer per key.
//!
//! [`Flight`] deduplicates concurrent work: the first caller for a key (the
//! leader) runs the producer; every caller that arrives while that call is
//! in flight waits and receives the leader's result instead of starting a
//! redundant execution. Nothing is retained once the call completes — this
//! is pure de-duplication of concurrent work, not a value cache.
//!
//! If the leader's future is dropped before it produces a result (caller
//! timeout, task abort), a guard removes the in-flight record and releases
//! the waiters with [`CacheError::Canceled`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::Notify;

use crate::error::CacheError;

struct Call<T> {
    result: OnceLock<Result<T, CacheError>>,
    done: Notify,
}

impl<T> Call<T> {
    fn new() -> Self {
        Self {
            result: OnceLock::new(),
            done: Notify::new(),
        }
    }
}

/// A group of in-flight keyed calls.
///
/// The result type must be `Clone` so one execution can satisfy every
/// waiter; payloads that are expensive to clone should be wrapped in `Arc`
/// by the caller.
pub struct Flight<T> {
    calls: Mutex<HashMap<String, Arc<Call<T>>>>,
}

impl<T> Default for Flight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Flight<T> {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> Flight<T> {
    /// Runs `producer` for `key`, coalescing with any in-flight execution.
    ///
    /// Returns the call's result and whether this caller shared another
    /// caller's execution (`true`) or triggered its own (`false`).
    pub async fn run<F, Fut>(&self, key: &str, producer: F) -> (Result<T, CacheError>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let (call, is_leader) = {
            let mut calls = self.calls.lock().unwrap();
            match calls.get(key) {
                Some(call) => (Arc::clone(call), false),
                None => {
                    let call = Arc::new(Call::new());
                    calls.insert(key.to_owned(), Arc::clone(&call));
                    (call, true)
                }
            }
        };

        if !is_leader {
            return (self.wait(&call).await, true);
        }

        let guard = LeaderGuard {
            flight: self,
            key,
            call: &call,
        };
        let result = producer().await;
        guard.complete(result.clone());
        (result, false)
    }

    async fn wait(&self, call: &Call<T>) -> Result<T, CacheError> {
        loop {
            // Register for notification before checking, so a completion
            // between the check and the await cannot be missed.
            let notified = call.done.notified();
            if let Some(result) = call.result.get() {
                return result.clone();
            }
            notified.await;
        }
    }

    fn finish(&self, key: &str, call: &Call<T>, result: Result<T, CacheError>) {
        // Remove the record before waking waiters so the next burst for this
        // key starts a fresh execution.
        self.calls.lock().unwrap().remove(key);
        let _ = call.result.set(result);
        call.done.notify_waiters();
    }
}

/// Releases waiters with [`CacheError::Canceled`] when the leader's future
/// is dropped mid-flight.
struct LeaderGuard<'a, T> {
    flight: &'a Flight<T>,
    key: &'a str,
    call: &'a Call<T>,
}

impl<T: Clone> LeaderGuard<'_, T> {
    fn complete(self, result: Result<T, CacheError>) {
        self.flight.finish(self.key, self.call, result);
        std::mem::forget(self);
    }
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        self.flight.calls.lock().unwrap().remove(self.key);
        let _ = self.call.result.set(Err(CacheError::Canceled));
        self.call.done.notify_waiters();
    }
}
