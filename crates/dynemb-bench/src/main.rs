//! Load driver for the sharded embedding store.
//!
//! Measures, for a map of `num_keys` embeddings:
//! - put and get throughput from a rayon thread pool
//! - async_apply submission and drain time
//! - scan_top_k latency

use clap::Parser;
use dynemb_store::{Entry, ShardedConcurrentMap, StoreConfig};
use rayon::prelude::*;
use std::time::Instant;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value_t = 100_000)]
    num_keys: usize,

    #[arg(long, default_value_t = 32)]
    dim: usize,

    #[arg(long, default_value_t = 64)]
    num_shards: usize,

    /// Scan workers (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long, default_value_t = 10)]
    iters: usize,

    #[arg(long, default_value_t = 100)]
    k: usize,
}

fn dot_with_ones(_: &[u8], entry: &Entry<Vec<f32>>) -> f32 {
    entry.vector().iter().sum()
}

fn avg_us(elapsed: std::time::Duration, iters: usize) -> f64 {
    (elapsed.as_micros() as f64) / (iters.max(1) as f64)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let mut config = StoreConfig::builder()
        .num_shards(args.num_shards)
        .dim(args.dim)
        .build();
    config.executor.num_workers = args.workers;
    let map: ShardedConcurrentMap = ShardedConcurrentMap::new(&config)?;

    let keys: Vec<String> = (0..args.num_keys).map(|i| format!("item:{i}")).collect();

    let start = Instant::now();
    for iter in 0..args.iters {
        keys.par_iter().enumerate().try_for_each(|(i, key)| {
            map.put(key, vec![(i + iter) as f32 * 1e-3; args.dim]).map(|_| ())
        })?;
    }
    tracing::info!(
        num_keys = args.num_keys,
        dim = args.dim,
        num_shards = args.num_shards,
        iters = args.iters,
        avg_us = avg_us(start.elapsed(), args.iters),
        "put benchmark"
    );

    let start = Instant::now();
    let mut checksum = 0.0f64;
    for _ in 0..args.iters {
        checksum += keys
            .par_iter()
            .map(|key| map.get(key).map(|entry| entry.vector[0] as f64))
            .try_reduce(|| 0.0, |a, b| Ok(a + b))?;
    }
    tracing::info!(
        num_keys = args.num_keys,
        iters = args.iters,
        avg_us = avg_us(start.elapsed(), args.iters),
        checksum,
        "get benchmark"
    );

    let start = Instant::now();
    for key in &keys {
        map.async_apply(key, |old| {
            let mut vector = old.cloned().unwrap_or_default();
            for x in vector.iter_mut() {
                *x += 0.01;
            }
            vector
        })?;
    }
    let submitted = start.elapsed();
    map.flush();
    tracing::info!(
        num_keys = args.num_keys,
        submit_us = submitted.as_micros() as u64,
        total_us = start.elapsed().as_micros() as u64,
        "async_apply benchmark"
    );

    let start = Instant::now();
    let mut best = None;
    for _ in 0..args.iters {
        let top = map.scan_top_k(dot_with_ones, args.k)?;
        best = top.items().first().map(|item| item.score);
    }
    tracing::info!(
        num_keys = args.num_keys,
        k = args.k,
        workers = map.executor().num_workers(),
        iters = args.iters,
        avg_us = avg_us(start.elapsed(), args.iters),
        best_score = ?best,
        "scan_top_k benchmark"
    );

    Ok(())
}
