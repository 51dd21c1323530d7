//! The cache engine: lookup, load, store, and background eviction.
//!
//! One engine-wide mutex protects the metadata store, the prefix index, and
//! the capacity target. Blob I/O never happens under the lock: store puts
//! the object before committing metadata, and eviction removes metadata
//! before deleting the object, so a handle can at worst dangle briefly in
//! the blob store and never the other way around.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::cache::index::PrefixIndex;
use crate::cache::metadata::BlockMetaStore;
use crate::config::Config;
use crate::error::CacheError;
use crate::fingerprint::{fingerprint, object_key, parse_object_key, ModelId};
use crate::store::s3::S3BlobStore;
use crate::store::{BlobError, BlobStore};

/// Handle to one resident block, valid until that block is evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    /// Key of the object in the blob store.
    pub object_key: String,
    /// Size of the block in bytes at lookup time.
    pub size: u64,
    /// Block index within the matched prefix.
    pub index: u32,
}

/// Result of a prefix lookup. A miss is `{0, []}`, not an error.
#[derive(Debug, Clone, Default)]
pub struct LookupResult {
    /// Number of leading tokens covered by `handles`, block-aligned.
    pub matched_tokens: u32,
    /// One handle per matched block, in block order.
    pub handles: Vec<BlockRef>,
}

/// State guarded by the engine mutex.
struct State {
    meta: BlockMetaStore,
    index: PrefixIndex,
    capacity_bytes: u64,
    stop: bool,
}

struct Shared {
    model_id: ModelId,
    block_size: u32,
    blob: Arc<dyn BlobStore>,
    state: Mutex<State>,
    reclaim: Condvar,
}

/// Prefix-addressed block cache over a blob store.
///
/// Construction spawns the eviction worker; drop stops and joins it.
/// All methods are safe to call from multiple threads.
pub struct KvCache {
    shared: Arc<Shared>,
    reclaimer: Option<thread::JoinHandle<()>>,
}

impl KvCache {
    /// Build an engine wired to an S3-compatible store per the config's
    /// resolved settings. The config is validated before the S3 client and
    /// its runtime are constructed.
    pub fn new(config: Config) -> Result<Self, CacheError> {
        Self::validate(&config)?;
        let settings = config.s3.resolve();
        let blob = Arc::new(S3BlobStore::new(&settings)?);
        Self::with_store(config, blob)
    }

    /// Build an engine over any blob store. This is the seam tests and
    /// benchmarks use with [`MemoryBlobStore`](crate::store::memory::MemoryBlobStore).
    pub fn with_store(config: Config, blob: Arc<dyn BlobStore>) -> Result<Self, CacheError> {
        let model_id = Self::validate(&config)?;

        info!(
            model_id = %model_id,
            block_size = config.block_size_tokens,
            capacity_bytes = config.capacity_bytes,
            "cache engine starting"
        );

        let shared = Arc::new(Shared {
            model_id,
            block_size: config.block_size_tokens,
            blob,
            state: Mutex::new(State {
                meta: BlockMetaStore::new(),
                index: PrefixIndex::new(),
                capacity_bytes: config.capacity_bytes,
                stop: false,
            }),
            reclaim: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let reclaimer = thread::Builder::new()
            .name("kvc-evict".to_string())
            .spawn(move || worker_shared.reclaim_loop())
            .map_err(|e| CacheError::Config(format!("failed to spawn eviction worker: {e}")))?;

        Ok(Self {
            shared,
            reclaimer: Some(reclaimer),
        })
    }

    /// Check the config constraints that make an engine impossible.
    fn validate(config: &Config) -> Result<ModelId, CacheError> {
        if config.block_size_tokens == 0 {
            return Err(CacheError::InvalidArg(
                "block_size_tokens must be greater than zero".to_string(),
            ));
        }
        ModelId::new(config.model_id.clone())
    }

    /// Find the longest block-aligned prefix of `tokens` with resident
    /// blocks and return one handle per block. Matched handles are touched
    /// to MRU. Never probes the blob store.
    pub fn lookup(&self, tokens: &[u32]) -> LookupResult {
        let block = self.shared.block_size as usize;
        let full_blocks = tokens.len() / block;
        if full_blocks == 0 {
            return LookupResult::default();
        }

        let mut state = self.shared.state.lock();

        for blocks in (1..=full_blocks).rev() {
            let k = blocks * block;
            let pk = fingerprint(&tokens[..k], self.shared.block_size, &self.shared.model_id);
            let Some(hwm) = state.index.lookup(&pk) else {
                continue;
            };

            // Each block lives under the fingerprint of its own prefix. The
            // hwm may overstate residency after evictions elsewhere in the
            // run; truncate to the contiguous run actually resident.
            let expected = blocks.min(hwm as usize + 1);
            let mut handles = Vec::with_capacity(expected);
            for i in 0..expected {
                let block_pk = if i + 1 == blocks {
                    pk
                } else {
                    fingerprint(
                        &tokens[..(i + 1) * block],
                        self.shared.block_size,
                        &self.shared.model_id,
                    )
                };
                let key =
                    object_key(&self.shared.model_id, self.shared.block_size, &block_pk, i as u32);
                match state.meta.size_of(&key) {
                    Some(size) => handles.push(BlockRef {
                        object_key: key,
                        size,
                        index: i as u32,
                    }),
                    None => break,
                }
            }

            for handle in &handles {
                state.meta.touch(&handle.object_key);
            }
            return LookupResult {
                matched_tokens: (handles.len() * block) as u32,
                handles,
            };
        }

        LookupResult::default()
    }

    /// Fetch the bytes of one block. Returns [`CacheError::StaleHandle`] if
    /// the block was evicted after the handle was issued.
    pub fn load(&self, handle: &BlockRef) -> Result<Vec<u8>, CacheError> {
        let bytes = self
            .shared
            .blob
            .get(&handle.object_key)
            .map_err(|e| CacheError::from_load_failure(&handle.object_key, e))?;

        // The block may have been evicted while the get was in flight;
        // touch is a no-op then.
        self.shared.state.lock().meta.touch(&handle.object_key);
        Ok(bytes)
    }

    /// Persist one block for the prefix ending at `block_index`. The object
    /// is written before any metadata changes; on a put failure the cache
    /// state is untouched.
    pub fn store(&self, tokens: &[u32], block_index: u32, bytes: &[u8]) -> Result<(), CacheError> {
        let block = self.shared.block_size as usize;
        let prefix_len = (block_index as usize + 1) * block;
        if tokens.len() < prefix_len {
            return Err(CacheError::InvalidArg(format!(
                "storing block {} requires {} tokens, got {}",
                block_index,
                prefix_len,
                tokens.len()
            )));
        }

        let pk = fingerprint(
            &tokens[..prefix_len],
            self.shared.block_size,
            &self.shared.model_id,
        );
        let key = object_key(&self.shared.model_id, self.shared.block_size, &pk, block_index);

        self.shared.blob.put(&key, bytes).map_err(|e| match e {
            BlobError::Transient(msg) => CacheError::Transient(msg),
            BlobError::NotFound => CacheError::Transient("put reported a missing object".to_string()),
        })?;

        let size = bytes.len() as u64;
        let mut state = self.shared.state.lock();
        if state.meta.size_of(&key).is_some() {
            state.meta.update_size(key.clone(), size);
        } else {
            state.meta.insert(key.clone(), size);
        }

        // The prefix becomes matchable only if its parent chain is intact:
        // non-contiguous stores keep their object but extend nothing.
        let chain_intact = block_index == 0 || {
            let parent = fingerprint(
                &tokens[..block_index as usize * block],
                self.shared.block_size,
                &self.shared.model_id,
            );
            state.index.lookup(&parent) == Some(block_index - 1)
        };
        if chain_intact {
            state.index.record_store(pk, block_index);
        }

        debug!(key = %key, size, block_index, used_bytes = state.meta.used_bytes(), "stored block");

        if state.meta.used_bytes() > state.capacity_bytes {
            self.shared.reclaim.notify_one();
        }
        Ok(())
    }

    /// Bytes currently resident.
    pub fn used_bytes(&self) -> u64 {
        self.shared.state.lock().meta.used_bytes()
    }

    /// Soft capacity bound the eviction worker steers toward.
    pub fn capacity_bytes(&self) -> u64 {
        self.shared.state.lock().capacity_bytes
    }

    /// Change the capacity bound, waking the eviction worker if the cache
    /// is now over it.
    pub fn set_capacity_bytes(&self, cap: u64) {
        let mut state = self.shared.state.lock();
        state.capacity_bytes = cap;
        if state.meta.used_bytes() > state.capacity_bytes {
            self.shared.reclaim.notify_one();
        }
    }
}

impl Drop for KvCache {
    fn drop(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.reclaim.notify_one();
        if let Some(handle) = self.reclaimer.take() {
            let _ = handle.join();
        }
    }
}

impl Shared {
    /// Eviction worker: wake on signal or every second, then pop LRU tails
    /// until resident bytes fit the capacity. The object delete happens
    /// after the metadata removal and outside the lock, so lookups never
    /// hand out a handle whose metadata is mid-removal.
    fn reclaim_loop(&self) {
        loop {
            let mut state = self.state.lock();
            let _ = self.reclaim.wait_while_for(
                &mut state,
                |s| !s.stop && s.meta.used_bytes() <= s.capacity_bytes,
                Duration::from_secs(1),
            );

            if state.stop {
                break;
            }

            while state.meta.used_bytes() > state.capacity_bytes {
                let Some((key, size)) = state.meta.remove_lru() else {
                    break;
                };
                if let Some((pk, index)) = parse_object_key(&key) {
                    state.index.retreat(&pk, index);
                }
                drop(state);

                debug!(key = %key, size, "evicted block");
                match self.blob.delete(&key) {
                    // A missing object just means someone got there first.
                    Ok(()) | Err(BlobError::NotFound) => {}
                    Err(BlobError::Transient(msg)) => {
                        // The object may leak in the store; its metadata is
                        // gone so it will never be re-referenced.
                        warn!(key = %key, error = %msg, "failed to delete evicted object");
                    }
                }

                state = self.state.lock();
            }
        }
    }
}
