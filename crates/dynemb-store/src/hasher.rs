//! Shard assignment hashing.

use std::hash::{BuildHasher, BuildHasherDefault};

use twox_hash::XxHash64;

/// Default hasher for shard assignment: XXH64 with seed 0.
///
/// The seed is fixed, so a key lands on the same shard in every process.
pub type ShardHasher = BuildHasherDefault<XxHash64>;

/// Maps a key to a shard index. `num_shards` must be a power of two.
#[inline]
pub(crate) fn shard_for_key<S: BuildHasher>(hasher: &S, key: &[u8], num_shards: usize) -> usize {
    debug_assert!(num_shards.is_power_of_two());
    (hasher.hash_one(key) as usize) & (num_shards - 1)
}
