//! kv-prefix-cache: prefix-addressed KV block cache for LLM inference.
//!
//! Inference engines recompute attention key/value tensors for every prompt
//! token; prompts that share a leading token sequence can reuse the KV
//! blocks computed for it. This crate persists fixed-size KV blocks in an
//! S3-compatible object store, keyed by a content fingerprint of the
//! producing prefix, and serves longest-prefix lookups to new requests.
//!
//! The entry point is [`cache::engine::KvCache`]:
//!
//! ```no_run
//! use kv_prefix_cache::cache::engine::KvCache;
//! use kv_prefix_cache::config::Config;
//!
//! # fn main() -> Result<(), kv_prefix_cache::error::CacheError> {
//! let cache = KvCache::new(Config::default())?;
//!
//! let tokens: Vec<u32> = (0..512).collect();
//! let hit = cache.lookup(&tokens);
//! for handle in &hit.handles {
//!     let bytes = cache.load(handle)?;
//!     // feed `bytes` back into the inference engine
//!     # let _ = bytes;
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod store;

pub use cache::engine::{BlockRef, KvCache, LookupResult};
pub use config::Config;
pub use error::CacheError;
