//! Embedding initializers for keys seen for the first time.
//!
//! [`ShardedConcurrentMap::lookup_or_init`](crate::ShardedConcurrentMap::lookup_or_init)
//! inserts the initializer's output for every key it has not stored yet.
//!
//! - [`ZerosInitializer`] - All components zero
//! - [`ConstantInitializer`] - All components set to one value
//! - [`DefaultEmbeddingInitializer`] - A fixed, caller-provided vector
//! - [`RandomUniformInitializer`] - Uniform random `f32` components
//!
//! # Example
//!
//! ```
//! use dynemb_store::initializer::{DefaultEmbeddingInitializer, Initializer};
//!
//! let initializer = DefaultEmbeddingInitializer::new(vec![1.0f32, 2.0]);
//! let embedding: Vec<f32> = initializer.initialize(2);
//! assert_eq!(embedding, vec![1.0, 2.0]);
//! ```

use rand::Rng;

use crate::error::{Result, StoreError};

/// Produces the value stored for a key on first lookup.
///
/// All initializers must be `Send + Sync`; they are called while the owning
/// shard's exclusive lock is held and must not touch the map.
pub trait Initializer<V>: Send + Sync {
    /// Creates a value with `dim` components.
    fn initialize(&self, dim: usize) -> V;

    /// Returns the name of this initializer.
    fn name(&self) -> &str;
}

/// Initializer that sets all values to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZerosInitializer;

impl<T> Initializer<Vec<T>> for ZerosInitializer
where
    T: Default + Copy + Send + Sync,
{
    fn initialize(&self, dim: usize) -> Vec<T> {
        vec![T::default(); dim]
    }

    fn name(&self) -> &str {
        "zeros"
    }
}

/// Initializer that sets all values to a constant.
///
/// # Example
///
/// ```
/// use dynemb_store::initializer::{ConstantInitializer, Initializer};
///
/// let initializer = ConstantInitializer::new(0.5f32);
/// assert_eq!(initializer.initialize(3), vec![0.5, 0.5, 0.5]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ConstantInitializer<T> {
    value: T,
}

impl<T: Copy> ConstantInitializer<T> {
    /// Creates a new constant initializer with the given value.
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// Returns the constant value.
    pub fn value(&self) -> T {
        self.value
    }
}

impl<T> Initializer<Vec<T>> for ConstantInitializer<T>
where
    T: Copy + Send + Sync,
{
    fn initialize(&self, dim: usize) -> Vec<T> {
        vec![self.value; dim]
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Initializer that returns a fixed default embedding.
///
/// The `dim` argument is ignored; if the default's length does not match the
/// map's fixed dimension, the insert is rejected by the map.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultEmbeddingInitializer<T> {
    embedding: Vec<T>,
}

impl<T> DefaultEmbeddingInitializer<T> {
    /// Creates an initializer that always yields `embedding`.
    pub fn new(embedding: Vec<T>) -> Self {
        Self { embedding }
    }

    /// Returns the default embedding.
    pub fn embedding(&self) -> &[T] {
        &self.embedding
    }
}

impl<T> Initializer<Vec<T>> for DefaultEmbeddingInitializer<T>
where
    T: Clone + Send + Sync,
{
    fn initialize(&self, _dim: usize) -> Vec<T> {
        self.embedding.clone()
    }

    fn name(&self) -> &str {
        "default_embedding"
    }
}

/// Initializer that samples from a uniform distribution over
/// `[min_val, max_val)`.
///
/// # Example
///
/// ```
/// use dynemb_store::initializer::{Initializer, RandomUniformInitializer};
///
/// let initializer = RandomUniformInitializer::new(-0.05, 0.05).unwrap();
/// let embedding = initializer.initialize(64);
/// assert_eq!(embedding.len(), 64);
/// for &val in &embedding {
///     assert!(val >= -0.05 && val < 0.05);
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RandomUniformInitializer {
    min_val: f32,
    max_val: f32,
}

impl RandomUniformInitializer {
    /// Creates a new uniform random initializer.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If `min_val >= max_val`
    pub fn new(min_val: f32, max_val: f32) -> Result<Self> {
        // Written so that NaN bounds are rejected too.
        if !(min_val < max_val) {
            return Err(StoreError::invalid_argument(format!(
                "min_val ({min_val}) must be less than max_val ({max_val})"
            )));
        }
        Ok(Self { min_val, max_val })
    }

    /// Returns the minimum value.
    pub fn min_val(&self) -> f32 {
        self.min_val
    }

    /// Returns the maximum value.
    pub fn max_val(&self) -> f32 {
        self.max_val
    }
}

impl Default for RandomUniformInitializer {
    fn default() -> Self {
        Self {
            min_val: -0.05,
            max_val: 0.05,
        }
    }
}

impl Initializer<Vec<f32>> for RandomUniformInitializer {
    fn initialize(&self, dim: usize) -> Vec<f32> {
        let mut rng = rand::thread_rng();
        (0..dim)
            .map(|_| rng.gen_range(self.min_val..self.max_val))
            .collect()
    }

    fn name(&self) -> &str {
        "random_uniform"
    }
}
