//! Error types surfaced by the cache engine.

use thiserror::Error;

use crate::store::BlobError;

/// Errors returned by [`KvCache`](crate::cache::engine::KvCache) operations.
///
/// Misses are not errors: a lookup that matches nothing returns an empty
/// result, and a handle for a never-stored block cannot be constructed.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The caller supplied arguments the operation cannot act on, e.g. too
    /// few tokens for the requested block index or a zero block size.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// The object behind a previously returned handle is gone; it was
    /// evicted between lookup and load.
    #[error("stale handle: {0} is no longer resident")]
    StaleHandle(String),

    /// The blob store failed in a way that may succeed on retry (network
    /// error, 5xx, timeout).
    #[error("transient blob store failure: {0}")]
    Transient(String),

    /// The configuration cannot produce a working engine or fingerprint.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Map a blob failure observed while loading a handle. A missing object
    /// means the handle went stale; anything else is transient.
    pub(crate) fn from_load_failure(key: &str, err: BlobError) -> Self {
        match err {
            BlobError::NotFound => CacheError::StaleHandle(key.to_string()),
            BlobError::Transient(msg) => CacheError::Transient(msg),
        }
    }
}
