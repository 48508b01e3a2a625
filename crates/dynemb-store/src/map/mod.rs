//! Sharded concurrent map from byte keys to embeddings.

mod async_apply;
mod shard;

use std::hash::BuildHasher;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace, warn};

use crate::config::StoreConfig;
use crate::entry::{EmbeddingValue, Entry, EntrySnapshot};
use crate::error::{Result, StoreError};
use crate::executor::ParallelExecutor;
use crate::hasher::{shard_for_key, ShardHasher};
use crate::initializer::{Initializer, ZerosInitializer};
use crate::topk::{BoundedTopK, Score};

use self::async_apply::AsyncApplier;
use self::shard::{PendingApply, Shard, Table};

/// State shared between the map handle, scan tasks and the async applier.
pub(crate) struct MapCore<V, S> {
    shards: Box<[Shard<V>]>,
    hasher: S,
    dim: Option<usize>,
    next_seq: AtomicU64,
}

impl<V: EmbeddingValue, S: BuildHasher> MapCore<V, S> {
    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        shard_for_key(&self.hasher, key, self.shards.len())
    }

    fn check_dim(&self, vector: &V) -> Result<()> {
        match self.dim {
            Some(expected) if vector.dim() != expected => Err(StoreError::DimensionMismatch {
                expected,
                actual: vector.dim(),
            }),
            _ => Ok(()),
        }
    }

    /// Shared guard on a shard, taken after its queued merges are applied.
    fn read_shard(&self, index: usize) -> RwLockReadGuard<'_, Table<V>> {
        let shard = &self.shards[index];
        if shard.has_pending() {
            let mut table = shard.write();
            self.apply_pending(shard, &mut table);
            RwLockWriteGuard::downgrade(table)
        } else {
            shard.read()
        }
    }

    /// Exclusive guard on a shard, taken after its queued merges are applied.
    fn write_shard(&self, index: usize) -> RwLockWriteGuard<'_, Table<V>> {
        let shard = &self.shards[index];
        let mut table = shard.write();
        if shard.has_pending() {
            self.apply_pending(shard, &mut table);
        }
        table
    }

    pub(crate) fn drain_shard(&self, index: usize) {
        if self.shards[index].has_pending() {
            drop(self.write_shard(index));
        }
    }

    pub(crate) fn flush(&self) {
        for index in 0..self.shards.len() {
            self.drain_shard(index);
        }
    }

    fn apply_pending(&self, shard: &Shard<V>, table: &mut RwLockWriteGuard<'_, Table<V>>) {
        let batch = shard.take_pending(table);
        let count = batch.len();
        for PendingApply { key, merge } in batch {
            let current = table.get(&*key).map(Entry::vector);
            let merged = match panic::catch_unwind(AssertUnwindSafe(|| merge(current))) {
                Ok(merged) => merged,
                Err(_) => {
                    warn!(key = %String::from_utf8_lossy(&key), "async merge panicked; entry left unchanged");
                    continue;
                }
            };
            if let Err(err) = self.check_dim(&merged) {
                warn!(key = %String::from_utf8_lossy(&key), error = %err, "async merge rejected");
                continue;
            }
            self.upsert(table, &key, merged);
        }
        shard.finish_pending(table, count);
        trace!(count, "applied queued merges");
    }

    /// Inserts at version 1 or replaces and bumps the version. Returns the
    /// resulting version.
    fn upsert(&self, table: &mut Table<V>, key: &[u8], vector: V) -> u64 {
        if let Some(entry) = table.get_mut(key) {
            return entry.replace(vector);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        table.insert(key.into(), Entry::new(vector, seq));
        1
    }

    fn scan_shards<Sc, F>(
        &self,
        shards: impl Iterator<Item = usize>,
        k: usize,
        score_fn: &F,
    ) -> Result<BoundedTopK<Sc, EntrySnapshot<V>>>
    where
        Sc: Score,
        F: Fn(&[u8], &Entry<V>) -> Sc,
    {
        let mut local = BoundedTopK::new(k)?;
        for index in shards {
            let table = self.read_shard(index);
            for (key, entry) in table.iter() {
                let key: &[u8] = key;
                let score = score_fn(key, entry);
                let seq = entry.insertion_seq();
                if local.would_admit(score, seq) {
                    local.insert_with_seq(
                        score,
                        seq,
                        EntrySnapshot {
                            key: key.to_vec(),
                            vector: entry.vector().clone(),
                            version: entry.version(),
                        },
                    );
                }
            }
        }
        Ok(local)
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::invalid_argument("key must not be empty"));
    }
    Ok(())
}

/// A map from opaque byte keys to embeddings, split into a fixed,
/// power-of-two number of shards.
///
/// Every key lives in exactly one shard, chosen by hashing the key with `S`
/// and masking by the shard count. Each shard has its own reader-writer
/// lock: mutations on one shard are totally ordered, and operations on
/// different shards never wait on each other. Single-key operations touch
/// only the owning shard; [`scan_top_k`](Self::scan_top_k) fans out over the
/// executor.
///
/// # Example
///
/// ```
/// use dynemb_store::{ShardedConcurrentMap, StoreConfig};
///
/// let config = StoreConfig::builder().num_shards(4).dim(2).num_workers(2).build();
/// let map: ShardedConcurrentMap = ShardedConcurrentMap::new(&config).unwrap();
///
/// assert_eq!(map.put("user:1", vec![0.5, 1.5]).unwrap(), 1);
/// let entry = map.get("user:1").unwrap();
/// assert_eq!(entry.vector, vec![0.5, 1.5]);
/// assert_eq!(entry.version, 1);
///
/// let top = map
///     .scan_top_k(|_, entry| entry.vector().iter().sum::<f32>(), 1)
///     .unwrap();
/// assert_eq!(top.items()[0].payload.key, b"user:1".to_vec());
/// ```
pub struct ShardedConcurrentMap<V = Vec<f32>, S = ShardHasher> {
    core: Arc<MapCore<V, S>>,
    executor: Arc<ParallelExecutor>,
    applier: AsyncApplier,
    scan_tasks: usize,
}

impl<V, S> std::fmt::Debug for ShardedConcurrentMap<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedConcurrentMap")
            .field("num_shards", &self.core.shards.len())
            .field("dim", &self.core.dim)
            .field("scan_tasks", &self.scan_tasks)
            .field("executor", &self.executor)
            .finish()
    }
}

impl<V: EmbeddingValue> ShardedConcurrentMap<V, ShardHasher> {
    /// Creates a map with the default shard hasher and its own executor.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If the configuration is invalid
    pub fn new(config: &StoreConfig) -> Result<Self> {
        Self::with_hasher(config, ShardHasher::default())
    }
}

impl<V, S> ShardedConcurrentMap<V, S>
where
    V: EmbeddingValue,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Creates a map with a caller-supplied shard hasher.
    pub fn with_hasher(config: &StoreConfig, hasher: S) -> Result<Self> {
        config.validate()?;
        let executor = Arc::new(ParallelExecutor::new(&config.executor)?);
        Self::with_executor(config, hasher, executor)
    }

    /// Creates a map that runs its scans on an existing executor.
    ///
    /// `config.executor` is ignored.
    pub fn with_executor(
        config: &StoreConfig,
        hasher: S,
        executor: Arc<ParallelExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        let shards = (0..config.num_shards).map(|_| Shard::new()).collect();
        let core = Arc::new(MapCore {
            shards,
            hasher,
            dim: config.dim,
            next_seq: AtomicU64::new(0),
        });
        let applier = AsyncApplier::spawn(Arc::clone(&core))?;
        let scan_tasks = config.scan_tasks.unwrap_or_else(|| executor.num_workers());

        debug!(
            num_shards = config.num_shards,
            dim = ?config.dim,
            scan_tasks,
            "sharded map created"
        );
        Ok(Self {
            core,
            executor,
            applier,
            scan_tasks,
        })
    }

    /// Returns the number of shards.
    pub fn num_shards(&self) -> usize {
        self.core.shards.len()
    }

    /// Returns the fixed dimension, if any.
    pub fn dim(&self) -> Option<usize> {
        self.core.dim
    }

    /// Returns the executor used for scans.
    pub fn executor(&self) -> &Arc<ParallelExecutor> {
        &self.executor
    }

    /// Returns the shard that owns `key`.
    pub fn shard_index(&self, key: impl AsRef<[u8]>) -> usize {
        self.core.shard_index(key.as_ref())
    }

    /// Returns a copy of the entry stored under `key`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::NotFound`] - If the key is absent
    /// * [`StoreError::InvalidArgument`] - If the key is empty
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<EntrySnapshot<V>> {
        let key = key.as_ref();
        check_key(key)?;
        let table = self.core.read_shard(self.core.shard_index(key));
        table
            .get(key)
            .map(|entry| EntrySnapshot {
                key: key.to_vec(),
                vector: entry.vector().clone(),
                version: entry.version(),
            })
            .ok_or_else(|| StoreError::not_found(key))
    }

    /// Returns `true` if `key` is stored.
    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        let key = key.as_ref();
        !key.is_empty()
            && self
                .core
                .read_shard(self.core.shard_index(key))
                .contains_key(key)
    }

    /// Inserts or replaces the vector for `key`. Returns the new version.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If the key is empty
    /// * [`StoreError::DimensionMismatch`] - If the map has a fixed dimension
    ///   that `vector` does not match
    pub fn put(&self, key: impl AsRef<[u8]>, vector: V) -> Result<u64> {
        let key = key.as_ref();
        check_key(key)?;
        self.core.check_dim(&vector)?;
        let mut table = self.core.write_shard(self.core.shard_index(key));
        Ok(self.core.upsert(&mut table, key, vector))
    }

    /// Replaces the vector only if the stored version equals
    /// `expected_version`. Returns the new version.
    ///
    /// An expected version of 0 means "absent": the call inserts the key if
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Conflict`] - If the stored version differs; nothing
    ///   is modified
    /// * [`StoreError::InvalidArgument`] / [`StoreError::DimensionMismatch`] -
    ///   As for [`put`](Self::put)
    pub fn compare_and_swap(
        &self,
        key: impl AsRef<[u8]>,
        expected_version: u64,
        vector: V,
    ) -> Result<u64> {
        let key = key.as_ref();
        check_key(key)?;
        self.core.check_dim(&vector)?;
        let mut table = self.core.write_shard(self.core.shard_index(key));
        let actual = table.get(key).map(Entry::version);
        match actual {
            Some(version) if version == expected_version => {}
            None if expected_version == 0 => {}
            _ => {
                return Err(StoreError::Conflict {
                    expected: expected_version,
                    actual,
                })
            }
        }
        Ok(self.core.upsert(&mut table, key, vector))
    }

    /// Runs `merge` on the current vector (or `None`) under the shard's
    /// exclusive lock and stores its result. Returns the new version.
    ///
    /// `merge` must not access the map.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If the key is empty
    /// * [`StoreError::DimensionMismatch`] - If the merged vector has the
    ///   wrong dimension; nothing is modified
    pub fn apply<F>(&self, key: impl AsRef<[u8]>, merge: F) -> Result<u64>
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let key = key.as_ref();
        check_key(key)?;
        let mut table = self.core.write_shard(self.core.shard_index(key));
        let merged = merge(table.get(key).map(Entry::vector));
        self.core.check_dim(&merged)?;
        Ok(self.core.upsert(&mut table, key, merged))
    }

    /// Queues `merge` for `key` and returns without waiting for it to run.
    ///
    /// Queued merges run under the owning shard's exclusive lock, either on
    /// the background applier or ahead of the next operation on that shard,
    /// in submission order. A merge that panics or returns a vector of the
    /// wrong dimension is dropped and logged. `merge` must not access the
    /// map.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If the key is empty
    pub fn async_apply<F>(&self, key: impl AsRef<[u8]>, merge: F) -> Result<()>
    where
        F: FnOnce(Option<&V>) -> V + Send + 'static,
    {
        let key = key.as_ref();
        check_key(key)?;
        let index = self.core.shard_index(key);
        let first = self.core.shards[index].enqueue(PendingApply {
            key: key.into(),
            merge: Box::new(merge),
        });
        if first {
            self.applier.notify(index);
        }
        Ok(())
    }

    /// Applies every queued merge before returning.
    pub fn flush(&self) {
        self.core.flush();
    }

    /// Returns the number of queued merges not applied yet.
    pub fn pending_async(&self) -> usize {
        self.core.shards.iter().map(Shard::pending_len).sum()
    }

    /// Removes `key`. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If the key is empty
    pub fn erase(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key.as_ref();
        check_key(key)?;
        let mut table = self.core.write_shard(self.core.shard_index(key));
        Ok(table.remove(key).is_some())
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        (0..self.num_shards())
            .map(|index| self.core.read_shard(index).len())
            .sum()
    }

    /// Returns `true` if no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of entries in each shard.
    pub fn shard_sizes(&self) -> Vec<usize> {
        (0..self.num_shards())
            .map(|index| self.core.read_shard(index).len())
            .collect()
    }

    /// Removes every entry, after applying queued merges.
    pub fn clear(&self) {
        for index in 0..self.num_shards() {
            self.core.write_shard(index).clear();
        }
    }

    /// Scores every entry and returns the `k` best.
    ///
    /// Shards are split round-robin into tasks on the executor. Each task
    /// visits its shards one at a time under a shared lock, so the result
    /// reflects each shard as of its visit rather than one global instant.
    /// Score ties go to the key inserted first.
    ///
    /// `score_fn` runs while a shard lock is held and must not access the
    /// map.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If `k` is 0
    /// * [`StoreError::TaskFailure`] - If `score_fn` panicked in a task
    pub fn scan_top_k<Sc, F>(&self, score_fn: F, k: usize) -> Result<BoundedTopK<Sc, EntrySnapshot<V>>>
    where
        Sc: Score,
        F: Fn(&[u8], &Entry<V>) -> Sc + Send + Sync + 'static,
    {
        BoundedTopK::<Sc, EntrySnapshot<V>>::new(k)?;

        let num_shards = self.num_shards();
        let num_tasks = self.scan_tasks.clamp(1, num_shards);
        let score_fn = Arc::new(score_fn);

        let tasks = (0..num_tasks).map(|task| {
            let core = Arc::clone(&self.core);
            let score_fn = Arc::clone(&score_fn);
            move || core.scan_shards((task..num_shards).step_by(num_tasks), k, &*score_fn)
        });
        let partials = self.executor.run(tasks).into_outputs()?;
        let merged = BoundedTopK::merge_all(partials, k)?;

        debug!(k, num_tasks, num_shards, hits = merged.len(), "scan_top_k finished");
        Ok(merged)
    }

    /// Looks up a batch of keys, inserting the initializer's value for keys
    /// not stored yet.
    ///
    /// Empty keys are never stored; they yield a zero vector of the map's
    /// dimension.
    ///
    /// On a variable-dimension map the initializer is called with `dim` 0,
    /// so it must produce its own length, as
    /// [`DefaultEmbeddingInitializer`](crate::DefaultEmbeddingInitializer)
    /// does.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If a key is empty and the map has
    ///   no fixed dimension, or if the initializer produced an empty vector
    ///   for a variable-dimension map
    /// * [`StoreError::DimensionMismatch`] - If the initializer produced a
    ///   vector of the wrong dimension
    pub fn lookup_or_init<K, I>(&self, keys: &[K], initializer: &I) -> Result<Vec<V>>
    where
        K: AsRef<[u8]>,
        I: Initializer<V> + ?Sized,
        ZerosInitializer: Initializer<V>,
    {
        let dim = self.core.dim;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            if key.is_empty() {
                let dim = dim.ok_or_else(|| {
                    StoreError::invalid_argument("empty keys require a fixed-dimension map")
                })?;
                out.push(<ZerosInitializer as Initializer<V>>::initialize(
                    &ZerosInitializer,
                    dim,
                ));
                continue;
            }

            let index = self.core.shard_index(key);
            if let Some(entry) = self.core.read_shard(index).get(key) {
                out.push(entry.vector().clone());
                continue;
            }

            let mut table = self.core.write_shard(index);
            let vector = match table.get(key) {
                Some(entry) => entry.vector().clone(),
                None => {
                    let vector = initializer.initialize(dim.unwrap_or_default());
                    if dim.is_none() && vector.dim() == 0 {
                        return Err(StoreError::invalid_argument(format!(
                            "initializer `{}` produced an empty embedding; variable-dimension maps need an initializer that sets its own length",
                            initializer.name()
                        )));
                    }
                    self.core.check_dim(&vector)?;
                    self.core.upsert(&mut table, key, vector.clone());
                    vector
                }
            };
            out.push(vector);
        }
        Ok(out)
    }

    /// Puts a batch of vectors and returns the stored values.
    ///
    /// Values paired with an empty key are ignored and come back as zeros.
    /// Every vector is validated before anything is written.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If the key and vector counts differ
    /// * [`StoreError::DimensionMismatch`] - If a vector has the wrong dimension
    pub fn update_batch<K>(&self, keys: &[K], vectors: Vec<V>) -> Result<Vec<V>>
    where
        K: AsRef<[u8]>,
        ZerosInitializer: Initializer<V>,
    {
        if keys.len() != vectors.len() {
            return Err(StoreError::invalid_argument(format!(
                "key count ({}) doesn't match vector count ({})",
                keys.len(),
                vectors.len()
            )));
        }
        for (key, vector) in keys.iter().zip(&vectors) {
            if !key.as_ref().is_empty() {
                self.core.check_dim(vector)?;
            }
        }

        keys.iter()
            .zip(vectors)
            .map(|(key, vector)| {
                let key = key.as_ref();
                if key.is_empty() {
                    return Ok(<ZerosInitializer as Initializer<V>>::initialize(
                        &ZerosInitializer,
                        vector.dim(),
                    ));
                }
                self.put(key, vector.clone())?;
                Ok(vector)
            })
            .collect()
    }
}
