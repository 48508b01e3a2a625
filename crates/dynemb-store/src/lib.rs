//! Sharded concurrent storage for embeddings keyed by opaque bytes.
//!
//! This crate provides an in-memory key/embedding map that many threads can
//! read and update at once, plus the parallel machinery used to scan it.
//!
//! # Overview
//!
//! The main components are:
//!
//! - [`ShardedConcurrentMap`] - Key → embedding map split into independently locked shards
//! - [`ParallelExecutor`] - Fixed worker pool that runs a batch of tasks and aggregates their outcomes
//! - [`BoundedTopK`] - Keeps the `k` highest-scoring items seen, mergeable across partitions
//! - [`initializer`] - Values inserted by [`ShardedConcurrentMap::lookup_or_init`]
//!
//! # Example
//!
//! ```
//! use dynemb_store::{ShardedConcurrentMap, StoreConfig};
//!
//! let config = StoreConfig::builder().num_shards(8).dim(3).num_workers(2).build();
//! let map: ShardedConcurrentMap = ShardedConcurrentMap::new(&config).unwrap();
//!
//! map.put("a", vec![1.0, 0.0, 0.0]).unwrap();
//! map.put("b", vec![0.0, 2.0, 0.0]).unwrap();
//!
//! // Optimistic update.
//! let version = map.get("a").unwrap().version;
//! map.compare_and_swap("a", version, vec![3.0, 0.0, 0.0]).unwrap();
//!
//! // Fire-and-forget accumulation.
//! map.async_apply("b", |old| {
//!     let mut v = old.cloned().unwrap_or_else(|| vec![0.0; 3]);
//!     v[1] += 2.0;
//!     v
//! })
//! .unwrap();
//! map.flush();
//!
//! let top = map
//!     .scan_top_k(|_, entry| entry.vector().iter().sum::<f32>(), 1)
//!     .unwrap();
//! assert_eq!(top.items()[0].payload.key, b"b".to_vec());
//! ```

mod config;
mod entry;
mod error;
mod executor;
mod hasher;
pub mod initializer;
mod map;
mod topk;

pub use config::{ConfigError, ExecutorConfig, StoreConfig, StoreConfigBuilder};
pub use entry::{EmbeddingValue, Entry, EntrySnapshot};
pub use error::{ErrorKind, Result, StoreError};
pub use executor::{AggregateResult, ParallelExecutor, Task, TaskOutcome};
pub use hasher::ShardHasher;
pub use initializer::{
    ConstantInitializer, DefaultEmbeddingInitializer, Initializer, RandomUniformInitializer,
    ZerosInitializer,
};
pub use map::ShardedConcurrentMap;
pub use topk::{BoundedTopK, Score, TopKItem};
