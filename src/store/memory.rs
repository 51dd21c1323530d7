//! In-memory blob store for tests and benchmarks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::store::{BlobError, BlobStore};

/// A [`BlobStore`] backed by a process-local map.
///
/// Put failures can be injected to exercise transient-error paths.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `put` calls fail with [`BlobError::Transient`].
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Number of objects currently stored.
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Whether an object exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().contains_key(key)
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or(BlobError::NotFound)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BlobError::Transient("injected put failure".to_string()));
        }
        self.objects.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), BlobError> {
        match self.objects.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(BlobError::NotFound),
        }
    }
}
