//! Crate-wide error taxonomy.
//!
//! [`CacheError`] is `Clone`: a single coalesced result (including its error)
//! is handed to every waiter of an in-flight call, so non-cloneable sources
//! are wrapped in [`Arc`].

use std::sync::Arc;

use thiserror::Error;

use crate::codec::CodecError;
use crate::store::StoreError;

/// Errors produced by the cache facade.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The key is absent from the cache store, or the store was unreachable.
    ///
    /// This is the signal to fall through to the backing store: `query` reacts
    /// to it by invoking the caller-supplied loader.
    #[error("key not present in cache store")]
    Miss,

    /// The key holds the negative-cache placeholder: the backing store has
    /// already confirmed the record does not exist.
    ///
    /// `query` translates this into [`CacheError::NotFound`] without touching
    /// the backing store.
    #[error("key is negatively cached")]
    Placeholder,

    /// No such record, as established by the backing store.
    #[error("record not found")]
    NotFound,

    /// The circuit breaker for this operation is open; the store was not
    /// contacted.
    ///
    /// Reads downgrade this to [`CacheError::Miss`] internally; writes
    /// surface it to the caller.
    #[error("circuit breaker is open")]
    BreakerOpen,

    /// The store call exceeded the configured deadline.
    #[error("store operation timed out")]
    Timeout,

    /// The in-flight call this caller was waiting on was canceled before it
    /// produced a result.
    #[error("in-flight call was canceled")]
    Canceled,

    /// Two coalesced callers used the same key with different value types.
    #[error("coalesced callers disagree on the value type for this key")]
    TypeMismatch,

    /// Encoding the value failed; nothing was stored.
    #[error("serialization failed: {0}")]
    Serialization(Arc<CodecError>),

    /// The store rejected or failed a write operation.
    #[error("store error: {0}")]
    Store(Arc<StoreError>),

    /// The caller-supplied loader or mutation failed. Propagated verbatim;
    /// nothing is cached.
    #[error("loader failed: {0}")]
    Loader(Arc<dyn std::error::Error + Send + Sync>),
}

impl From<CodecError> for CacheError {
    fn from(err: CodecError) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => Self::Timeout,
            other => Self::Store(Arc::new(other)),
        }
    }
}

impl CacheError {
    /// Wraps an arbitrary loader/mutation error.
    pub(crate) fn loader<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Loader(Arc::from(err.into()))
    }

    /// Returns `true` for [`CacheError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns `true` for [`CacheError::Miss`].
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}
