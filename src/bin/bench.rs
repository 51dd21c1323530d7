//! Closed-loop benchmark harness for the prefix KV cache.
//!
//! Spawns worker threads that mix lookups, stores, and loads over a
//! pre-generated prefix population with a configurable reuse probability,
//! then reports throughput, hit ratio, and latency. Runs against the
//! configured S3 endpoint, or fully in-process with `--memory`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use kv_prefix_cache::cache::engine::KvCache;
use kv_prefix_cache::config::{Cli, Config};
use kv_prefix_cache::store::memory::MemoryBlobStore;
use kv_prefix_cache::store::BlobStore;

#[derive(Default)]
struct Stats {
    ops: AtomicU64,
    hits: AtomicU64,
    bytes_stored: AtomicU64,
    gets: AtomicU64,
    get_nanos: AtomicU64,
    puts: AtomicU64,
    put_nanos: AtomicU64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "kv_prefix_cache=debug,kvc_bench=debug"
    } else {
        "kv_prefix_cache=info,kvc_bench=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    let mut config = Config::load(&cli.config)?;
    if let Some(cap) = cli.capacity_bytes {
        config.capacity_bytes = cap;
    }
    if let Some(bucket) = cli.s3_bucket.clone() {
        config.s3.bucket = Some(bucket);
    }

    info!(
        iterations = cli.iterations,
        threads = cli.threads,
        block_size = config.block_size_tokens,
        capacity_bytes = config.capacity_bytes,
        memory = cli.memory,
        "starting benchmark"
    );

    let cache = if cli.memory {
        KvCache::with_store(
            config.clone(),
            Arc::new(MemoryBlobStore::new()) as Arc<dyn BlobStore>,
        )?
    } else {
        KvCache::new(config.clone())?
    };
    let cache = Arc::new(cache);

    // Prefix population the workers draw reuse candidates from.
    info!(num_prefixes = cli.num_prefixes, "generating prefix population");
    let block_size = config.block_size_tokens as usize;
    let mut rng = StdRng::seed_from_u64(0);
    let prefixes: Arc<Vec<Vec<u32>>> = Arc::new(
        (0..cli.num_prefixes)
            .map(|_| random_tokens(&mut rng, block_size))
            .collect(),
    );

    let stats = Arc::new(Stats::default());
    let reuse_prob = cli.reuse_prob.clamp(0.0, 1.0);
    let per_thread = cli.iterations / cli.threads.max(1);
    let started = Instant::now();

    let workers: Vec<_> = (0..cli.threads)
        .map(|thread_id| {
            let cache = Arc::clone(&cache);
            let prefixes = Arc::clone(&prefixes);
            let stats = Arc::clone(&stats);
            let block_bytes = cli.block_bytes;
            thread::spawn(move || {
                run_worker(
                    &cache, &prefixes, &stats, thread_id, per_thread, reuse_prob, block_size,
                    block_bytes,
                )
            })
        })
        .collect();

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("benchmark worker panicked"))?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    let ops = stats.ops.load(Ordering::Relaxed);
    let hits = stats.hits.load(Ordering::Relaxed);
    let gets = stats.gets.load(Ordering::Relaxed);
    let puts = stats.puts.load(Ordering::Relaxed);

    let ops_per_sec = if elapsed > 0.0 { ops as f64 / elapsed } else { 0.0 };
    let hit_ratio = if ops > 0 { hits as f64 / ops as f64 } else { 0.0 };
    let avg_get_ms = if gets > 0 {
        stats.get_nanos.load(Ordering::Relaxed) as f64 / gets as f64 / 1e6
    } else {
        0.0
    };
    let avg_put_ms = if puts > 0 {
        stats.put_nanos.load(Ordering::Relaxed) as f64 / puts as f64 / 1e6
    } else {
        0.0
    };
    let mib = 1024.0 * 1024.0;

    println!("--- Results ---");
    println!("Total duration:      {elapsed:.2} s");
    println!("Ops/sec:             {ops_per_sec:.2}");
    println!("Hit ratio:           {:.2}%", hit_ratio * 100.0);
    println!(
        "Bytes stored:        {:.2} MiB",
        stats.bytes_stored.load(Ordering::Relaxed) as f64 / mib
    );
    println!("Average GET latency: {avg_get_ms:.2} ms");
    println!("Average PUT latency: {avg_put_ms:.2} ms");
    println!(
        "Final used bytes:    {:.2} MiB / {:.2} MiB",
        cache.used_bytes() as f64 / mib,
        cache.capacity_bytes() as f64 / mib
    );

    Ok(())
}

/// A random token sequence of 1..=8 full blocks.
fn random_tokens(rng: &mut StdRng, block_size: usize) -> Vec<u32> {
    let blocks = rng.gen_range(1..=8usize);
    (0..blocks * block_size)
        .map(|_| rng.gen_range(0..100_000))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    cache: &KvCache,
    prefixes: &[Vec<u32>],
    stats: &Stats,
    thread_id: usize,
    iterations: usize,
    reuse_prob: f64,
    block_size: usize,
    block_bytes: usize,
) {
    let mut rng = StdRng::seed_from_u64(thread_id as u64);

    for _ in 0..iterations {
        let tokens: Vec<u32> = if !prefixes.is_empty() && rng.gen_bool(reuse_prob) {
            prefixes[rng.gen_range(0..prefixes.len())].clone()
        } else {
            random_tokens(&mut rng, block_size)
        };

        let hit = cache.lookup(&tokens);
        stats.ops.fetch_add(1, Ordering::Relaxed);
        if hit.matched_tokens > 0 {
            stats.hits.fetch_add(1, Ordering::Relaxed);
        }

        // Extend the prefix by one block where the cache left off.
        let full_blocks = tokens.len() / block_size;
        let matched_blocks = hit.matched_tokens as usize / block_size;
        if matched_blocks < full_blocks {
            let payload = vec![thread_id as u8; block_bytes];
            let put_started = Instant::now();
            if cache.store(&tokens, matched_blocks as u32, &payload).is_ok() {
                stats
                    .put_nanos
                    .fetch_add(put_started.elapsed().as_nanos() as u64, Ordering::Relaxed);
                stats.puts.fetch_add(1, Ordering::Relaxed);
                stats
                    .bytes_stored
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
            }
        }

        if !hit.handles.is_empty() {
            let pick = rng.gen_range(0..hit.handles.len());
            let get_started = Instant::now();
            if cache.load(&hit.handles[pick]).is_ok() {
                stats
                    .get_nanos
                    .fetch_add(get_started.elapsed().as_nanos() as u64, Ordering::Relaxed);
                stats.gets.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
