//! Microbenches for the hot in-memory paths: prefix fingerprinting,
//! metadata insert/touch/evict churn, and lookups that hit or miss a
//! resident multi-block prefix.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use kv_prefix_cache::cache::engine::KvCache;
use kv_prefix_cache::cache::metadata::BlockMetaStore;
use kv_prefix_cache::config::Config;
use kv_prefix_cache::fingerprint::{fingerprint, ModelId};
use kv_prefix_cache::store::memory::MemoryBlobStore;
use kv_prefix_cache::store::BlobStore;

fn bench_fingerprint(c: &mut Criterion) {
    let model = ModelId::new("bench-model").unwrap();

    // A 2048-token prompt at block size 256.
    let tokens: Vec<u32> = (0..2048).collect();

    c.bench_function("fingerprint_2048_tokens", |b| {
        b.iter(|| {
            let pk = fingerprint(black_box(&tokens), 256, &model);
            black_box(pk);
        })
    });
}

fn bench_metadata_churn(c: &mut Criterion) {
    c.bench_function("metadata_insert_touch_evict_10k", |b| {
        b.iter(|| {
            let mut meta = BlockMetaStore::new();
            for i in 0..10_000u32 {
                meta.insert(format!("m/b256/{i:032x}/0.kv"), 1024);
            }
            for i in (0..10_000u32).step_by(7) {
                meta.touch(&format!("m/b256/{i:032x}/0.kv"));
            }
            while meta.remove_lru().is_some() {}
            black_box(meta.used_bytes());
        })
    });
}

fn bench_lookup_hit(c: &mut Criterion) {
    let store = Arc::new(MemoryBlobStore::new());
    let config = Config {
        model_id: "bench-model".to_string(),
        block_size_tokens: 256,
        ..Default::default()
    };
    let cache = KvCache::with_store(config, store as Arc<dyn BlobStore>).unwrap();

    // An 8-block resident prefix.
    let tokens: Vec<u32> = (0..2048).collect();
    let payload = vec![0u8; 4096];
    for i in 0..8 {
        cache.store(&tokens, i, &payload).unwrap();
    }

    c.bench_function("lookup_8_block_hit", |b| {
        b.iter(|| {
            let result = cache.lookup(black_box(&tokens));
            black_box(result.matched_tokens);
        })
    });

    let miss: Vec<u32> = (50_000..52_048).collect();
    c.bench_function("lookup_8_block_miss", |b| {
        b.iter(|| {
            let result = cache.lookup(black_box(&miss));
            black_box(result.matched_tokens);
        })
    });
}

criterion_group!(benches, bench_fingerprint, bench_metadata_churn, bench_lookup_hit);
criterion_main!(benches);
