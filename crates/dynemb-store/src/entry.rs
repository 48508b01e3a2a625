//! Entry types for embedding storage.

use serde::{Deserialize, Serialize};

/// A value that can be stored in the map.
///
/// Values are opaque sequences of fixed-width numerics; the map only needs
/// their dimension to enforce a fixed-dimension configuration.
pub trait EmbeddingValue: Clone + Send + Sync + 'static {
    /// Returns the number of components in this value.
    fn dim(&self) -> usize;
}

impl<T: Copy + Send + Sync + 'static> EmbeddingValue for Vec<T> {
    #[inline]
    fn dim(&self) -> usize {
        self.len()
    }
}

impl<T: Copy + Send + Sync + 'static> EmbeddingValue for Box<[T]> {
    #[inline]
    fn dim(&self) -> usize {
        self.len()
    }
}

/// A stored embedding together with its versioning metadata.
///
/// Each entry contains:
/// - The embedding vector
/// - A version bumped on every successful mutation
/// - A map-global insertion stamp used to break score ties in scans
///
/// # Example
///
/// ```
/// use dynemb_store::Entry;
///
/// let entry = Entry::new(vec![0.1f32, 0.2, 0.3, 0.4], 7);
/// assert_eq!(entry.version(), 1);
/// assert_eq!(entry.insertion_seq(), 7);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<V> {
    vector: V,
    version: u64,
    insertion_seq: u64,
}

impl<V> Entry<V> {
    /// Creates a freshly inserted entry at version 1.
    pub fn new(vector: V, insertion_seq: u64) -> Self {
        Self {
            vector,
            version: 1,
            insertion_seq,
        }
    }

    /// Returns a reference to the embedding vector.
    #[inline]
    pub fn vector(&self) -> &V {
        &self.vector
    }

    /// Returns the current version.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the insertion stamp assigned when the key was first stored.
    #[inline]
    pub fn insertion_seq(&self) -> u64 {
        self.insertion_seq
    }

    /// Replaces the vector and bumps the version. Returns the new version.
    pub(crate) fn replace(&mut self, vector: V) -> u64 {
        self.vector = vector;
        self.version += 1;
        self.version
    }
}

impl<V: EmbeddingValue> Entry<V> {
    /// Returns the dimension of the embedding.
    #[inline]
    pub fn dim(&self) -> usize {
        self.vector.dim()
    }
}

/// A copy of an entry returned from [`get`](crate::ShardedConcurrentMap::get).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot<V> {
    /// The key.
    pub key: Vec<u8>,
    /// The embedding vector at the time of the read.
    pub vector: V,
    /// The version at the time of the read.
    pub version: u64,
}
