//! Integration tests for capacity enforcement and the eviction worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kv_prefix_cache::cache::engine::KvCache;
use kv_prefix_cache::config::Config;
use kv_prefix_cache::error::CacheError;
use kv_prefix_cache::store::memory::MemoryBlobStore;
use kv_prefix_cache::store::BlobStore;

const BLOCK_BYTES: usize = 100;

fn engine(block_size: u32, capacity: u64) -> (KvCache, Arc<MemoryBlobStore>) {
    let store = Arc::new(MemoryBlobStore::new());
    let config = Config {
        model_id: "evict-test".to_string(),
        block_size_tokens: block_size,
        capacity_bytes: capacity,
        ..Default::default()
    };
    let cache = KvCache::with_store(config, store.clone() as Arc<dyn BlobStore>).unwrap();
    (cache, store)
}

/// Poll until `predicate` holds, failing after `timeout`.
fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

#[test]
fn eviction_bounds_used_bytes() {
    let capacity = 3 * BLOCK_BYTES as u64;
    let (cache, store) = engine(2, capacity);
    let payload = vec![1u8; BLOCK_BYTES];

    let prefixes: [[u32; 2]; 4] = [[10, 11], [20, 21], [30, 31], [40, 41]];
    for prefix in &prefixes {
        cache.store(prefix, 0, &payload).unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(2), || cache.used_bytes() <= capacity),
        "eviction did not bring used_bytes under capacity in time"
    );
    assert_eq!(cache.used_bytes(), capacity);
    assert_eq!(store.object_count(), 3);

    // The least-recently-used prefix (the first stored) is the one evicted.
    assert_eq!(cache.lookup(&prefixes[0]).matched_tokens, 0);
    for prefix in &prefixes[1..] {
        assert_eq!(cache.lookup(prefix).matched_tokens, 2);
    }
}

#[test]
fn lookup_touch_protects_from_eviction() {
    let (cache, store) = engine(2, 1 << 20);
    let payload = vec![2u8; BLOCK_BYTES];

    cache.store(&[1, 2], 0, &payload).unwrap();
    cache.store(&[3, 4], 0, &payload).unwrap();

    // Touch the older prefix so the newer one becomes the LRU tail.
    let protected = cache.lookup(&[1, 2]);
    assert_eq!(protected.matched_tokens, 2);

    cache.set_capacity_bytes(BLOCK_BYTES as u64);
    assert!(wait_until(Duration::from_secs(2), || {
        cache.used_bytes() <= BLOCK_BYTES as u64
    }));

    assert_eq!(cache.lookup(&[1, 2]).matched_tokens, 2);
    assert_eq!(cache.lookup(&[3, 4]).matched_tokens, 0);
    assert!(store.contains(&protected.handles[0].object_key));
}

#[test]
fn stale_handle_after_forced_eviction() {
    let (cache, store) = engine(2, 1 << 20);

    cache.store(&[7, 8], 0, b"payload").unwrap();
    let handle = cache.lookup(&[7, 8]).handles.remove(0);

    cache.set_capacity_bytes(0);
    assert!(wait_until(Duration::from_secs(2), || cache.used_bytes() == 0));
    assert_eq!(store.object_count(), 0);

    let err = cache.load(&handle).unwrap_err();
    assert!(matches!(err, CacheError::StaleHandle(_)));
}

#[test]
fn shrinking_capacity_drains_lru_first() {
    let (cache, _) = engine(2, 1 << 20);
    let payload = vec![3u8; BLOCK_BYTES];

    for (i, prefix) in [[1u32, 2], [3, 4], [5, 6]].iter().enumerate() {
        cache.store(prefix, 0, &payload).unwrap();
        assert_eq!(cache.used_bytes(), (i as u64 + 1) * BLOCK_BYTES as u64);
    }

    cache.set_capacity_bytes(2 * BLOCK_BYTES as u64);
    assert!(wait_until(Duration::from_secs(2), || {
        cache.used_bytes() <= 2 * BLOCK_BYTES as u64
    }));

    assert_eq!(cache.lookup(&[1, 2]).matched_tokens, 0);
    assert_eq!(cache.lookup(&[3, 4]).matched_tokens, 2);
    assert_eq!(cache.lookup(&[5, 6]).matched_tokens, 2);
}

#[test]
fn eviction_retreats_prefix_records() {
    let (cache, _) = engine(2, 1 << 20);
    let tokens: Vec<u32> = (0..6).collect();
    let payload = vec![4u8; BLOCK_BYTES];

    for i in 0..3 {
        cache.store(&tokens, i, &payload).unwrap();
    }
    assert_eq!(cache.lookup(&tokens).matched_tokens, 6);

    // Evict one block; the base block is the LRU tail after the lookup
    // touched handles in block order.
    cache.set_capacity_bytes(2 * BLOCK_BYTES as u64);
    assert!(wait_until(Duration::from_secs(2), || {
        cache.used_bytes() <= 2 * BLOCK_BYTES as u64
    }));

    // With block 0 gone no prefix of the sequence is loadable, and the
    // match must say so rather than hand out dangling handles.
    let result = cache.lookup(&tokens);
    assert_eq!(result.matched_tokens, 0);
    assert!(result.handles.is_empty());
}

#[test]
fn restore_after_full_drain_is_matchable_again() {
    let (cache, _) = engine(2, 1 << 20);
    let tokens = [9u32, 10];

    cache.store(&tokens, 0, b"first").unwrap();
    cache.set_capacity_bytes(0);
    assert!(wait_until(Duration::from_secs(2), || cache.used_bytes() == 0));

    cache.set_capacity_bytes(1 << 20);
    cache.store(&tokens, 0, b"second").unwrap();

    let result = cache.lookup(&tokens);
    assert_eq!(result.matched_tokens, 2);
    assert_eq!(cache.load(&result.handles[0]).unwrap(), b"second");
}

#[test]
fn concurrent_stores_stay_within_bounds() {
    let capacity = 20 * BLOCK_BYTES as u64;
    let (cache, _) = engine(2, capacity);
    let cache = Arc::new(cache);

    let workers: Vec<_> = (0..4u32)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let payload = vec![t as u8; BLOCK_BYTES];
                for i in 0..50u32 {
                    let prefix = [t * 1000 + i, i];
                    cache.store(&prefix, 0, &payload).unwrap();
                    let _ = cache.lookup(&prefix);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || {
        cache.used_bytes() <= capacity
    }));
}
