//! Block metadata and LRU accounting.
//!
//! Tracks every resident block's size and recency position, plus the
//! aggregate `used_bytes` the eviction loop steers by. All operations are
//! O(1); callers hold the engine lock.

use lru::LruCache;

/// Metadata store: object key → size, ordered most- to least-recently used.
pub struct BlockMetaStore {
    entries: LruCache<String, u64>,
    used_bytes: u64,
}

impl Default for BlockMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockMetaStore {
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            used_bytes: 0,
        }
    }

    /// Register a new block at the MRU position. The key must be absent;
    /// use [`update_size`](Self::update_size) for rewrites.
    pub fn insert(&mut self, key: String, size: u64) {
        let previous = self.entries.put(key, size);
        debug_assert!(previous.is_none(), "insert over an existing block key");
        self.used_bytes += size;
    }

    /// Replace the size of an existing block and move it to MRU.
    pub fn update_size(&mut self, key: String, new_size: u64) {
        if let Some(old) = self.entries.put(key, new_size) {
            self.used_bytes = self.used_bytes - old + new_size;
        } else {
            debug_assert!(false, "update_size on an unknown block key");
            self.used_bytes += new_size;
        }
    }

    /// Move a key to the MRU position if present; no-op otherwise.
    pub fn touch(&mut self, key: &str) {
        let _ = self.entries.get(key);
    }

    /// Pop the least-recently-used block, shrinking `used_bytes`.
    pub fn remove_lru(&mut self) -> Option<(String, u64)> {
        let (key, size) = self.entries.pop_lru()?;
        self.used_bytes -= size;
        Some((key, size))
    }

    /// Remove a specific block, shrinking `used_bytes`.
    pub fn remove(&mut self, key: &str) -> Option<u64> {
        let size = self.entries.pop(key)?;
        self.used_bytes -= size;
        Some(size)
    }

    /// Size of a resident block, without touching its LRU position.
    pub fn size_of(&self, key: &str) -> Option<u64> {
        self.entries.peek(key).copied()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from most- to least-recently used.
    pub fn keys_mru_to_lru(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}
