//! Blob storage behind the cache engine.
//!
//! - [`s3`]: S3-compatible adapter (MinIO, AWS) used in production
//! - [`memory`]: in-process adapter for tests and benchmarks
//!
//! The engine sees blobs only through [`BlobStore`]: opaque bytes addressed
//! by string key, with no semantics beyond durability on successful put.

pub mod memory;
pub mod s3;

use thiserror::Error;

/// Failures surfaced by a blob store.
#[derive(Error, Debug)]
pub enum BlobError {
    /// The key has no object behind it.
    #[error("object not found")]
    NotFound,

    /// The operation failed in a way that may succeed on retry.
    #[error("transient failure: {0}")]
    Transient(String),
}

/// An opaque byte store keyed by string.
///
/// Calls may block arbitrarily long on network I/O and must be safe to issue
/// from multiple threads at once; the engine never holds its lock across
/// them.
pub trait BlobStore: Send + Sync {
    /// Fetch the full bytes of an object.
    fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Write an object. The object is durable once this returns `Ok`;
    /// existing objects are overwritten.
    fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError>;

    /// Delete an object. Deleting a missing key may report
    /// [`BlobError::NotFound`], which callers treat as success.
    fn delete(&self, key: &str) -> Result<(), BlobError>;
}
