//! Value codec — the pluggable serialization seam.
//!
//! The cache stores opaque bytes; a [`Codec`] converts application values to
//! and from that representation. [`Json`] is the default implementation and
//! is what most callers want; alternative formats plug in by implementing
//! [`Codec`] and passing the implementation to the cache builder.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors produced while encoding or decoding a cached value.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode value: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Converts application values to and from the stored byte representation.
///
/// Implementations must be stateless or internally synchronized: one codec
/// instance is shared by every concurrent caller of the cache.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a value into the bytes written to the store.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError>;

    /// Decodes bytes previously produced by [`Codec::encode`].
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
///
/// Note that no JSON document is ever the single byte `*`, so encoded values
/// can never collide with the negative-cache placeholder marker.
#[derive(Debug, Default, Clone, Copy)]
pub struct Json;

impl Codec for Json {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}
