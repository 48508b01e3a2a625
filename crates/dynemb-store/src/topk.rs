//! Bounded top-k selection.
//!
//! [`BoundedTopK`] keeps the `capacity` best items seen so far in a binary
//! heap whose root is the worst retained item, so the admission check is
//! O(1) and an eviction is O(log k).
//!
//! Items are ranked by score descending and then by sequence number
//! ascending. Sequence numbers are either assigned locally by
//! [`BoundedTopK::insert`] or supplied by the caller through
//! [`BoundedTopK::insert_with_seq`]; when several selectors are merged the
//! sequence numbers must come from one global counter, otherwise ties are
//! not resolved consistently.
//!
//! # Example
//!
//! ```
//! use dynemb_store::BoundedTopK;
//!
//! let mut topk = BoundedTopK::new(3).unwrap();
//! for (i, score) in [5, 9, 2, 9, 7, 1].into_iter().enumerate() {
//!     topk.insert(score, i);
//! }
//! let items = topk.items();
//! let scores: Vec<i32> = items.iter().map(|item| item.score).collect();
//! assert_eq!(scores, vec![9, 9, 7]);
//! assert_eq!(items[0].payload, 1);
//! assert_eq!(items[1].payload, 3);
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A score with a total order.
///
/// Floating point scores are ordered with `total_cmp`, so comparisons never
/// fail: positive `NaN` ranks above `+inf` and negative `NaN` below `-inf`.
pub trait Score: Copy + Send + Sync + 'static {
    /// Compares two scores.
    fn cmp_score(&self, other: &Self) -> Ordering;
}

impl Score for f32 {
    #[inline]
    fn cmp_score(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl Score for f64 {
    #[inline]
    fn cmp_score(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

macro_rules! impl_integer_score {
    ($($t:ty),*) => {
        $(
            impl Score for $t {
                #[inline]
                fn cmp_score(&self, other: &Self) -> Ordering {
                    self.cmp(other)
                }
            }
        )*
    };
}

impl_integer_score!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

/// An item held by a [`BoundedTopK`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopKItem<S, P> {
    /// Ranking score; higher is better.
    pub score: S,
    /// Tie-break index; lower was inserted earlier.
    pub seq: u64,
    /// Caller payload.
    pub payload: P,
}

impl<S: Score, P> TopKItem<S, P> {
    #[inline]
    fn rank_cmp(&self, other: &Self) -> Ordering {
        rank_cmp(self.score, self.seq, other.score, other.seq)
    }
}

/// `Less` means `(a, a_seq)` ranks ahead of `(b, b_seq)`.
#[inline]
fn rank_cmp<S: Score>(a: S, a_seq: u64, b: S, b_seq: u64) -> Ordering {
    b.cmp_score(&a).then(a_seq.cmp(&b_seq))
}

/// Heap adaptor: the greatest element is the worst-ranked item.
#[derive(Debug, Clone)]
struct Ranked<S, P>(TopKItem<S, P>);

impl<S: Score, P> PartialEq for Ranked<S, P> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<S: Score, P> Eq for Ranked<S, P> {}

impl<S: Score, P> Ord for Ranked<S, P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank_cmp(&other.0)
    }
}

impl<S: Score, P> PartialOrd for Ranked<S, P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Fixed-capacity selector retaining the highest-scoring items.
#[derive(Debug, Clone)]
pub struct BoundedTopK<S, P> {
    heap: BinaryHeap<Ranked<S, P>>,
    capacity: usize,
    next_seq: u64,
}

impl<S: Score, P> BoundedTopK<S, P> {
    /// Creates an empty selector.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If `capacity` is 0
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StoreError::invalid_argument(
                "top-k capacity must be greater than 0",
            ));
        }
        Ok(Self {
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1).min(1 << 20)),
            capacity,
            next_seq: 0,
        })
    }

    /// Returns the maximum number of retained items.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of retained items.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if no item is retained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns `true` once `capacity` items are retained.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Returns the lowest retained score.
    pub fn min_score(&self) -> Option<S> {
        self.heap.peek().map(|worst| worst.0.score)
    }

    /// Returns `true` if an item with this score and sequence number would
    /// be retained. Lets callers skip building payloads that would be
    /// discarded.
    pub fn would_admit(&self, score: S, seq: u64) -> bool {
        match self.heap.peek() {
            Some(worst) if self.is_full() => {
                rank_cmp(score, seq, worst.0.score, worst.0.seq) == Ordering::Less
            }
            _ => true,
        }
    }

    /// Offers an item, stamping it with the next local sequence number.
    ///
    /// Once the selector is full, the item is admitted only if its score is
    /// strictly greater than the current minimum; equal scores keep the
    /// earlier item. Returns whether the item was retained.
    pub fn insert(&mut self, score: S, payload: P) -> bool {
        let seq = self.next_seq;
        self.insert_with_seq(score, seq, payload)
    }

    /// Offers an item carrying a caller-assigned sequence number.
    ///
    /// On a score tie with the current minimum, the item with the lower
    /// sequence number is retained.
    pub fn insert_with_seq(&mut self, score: S, seq: u64, payload: P) -> bool {
        self.next_seq = self.next_seq.max(seq.saturating_add(1));
        let item = TopKItem { score, seq, payload };

        if self.heap.len() < self.capacity {
            self.heap.push(Ranked(item));
            return true;
        }

        match self.heap.peek_mut() {
            Some(mut worst) if item.rank_cmp(&worst.0) == Ordering::Less => {
                *worst = Ranked(item);
                true
            }
            _ => false,
        }
    }

    /// Replays every item of `other` into `self`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If the capacities differ
    pub fn absorb(&mut self, other: Self) -> Result<()> {
        self.check_capacity(&other)?;
        for Ranked(item) in other.heap.into_vec() {
            self.insert_with_seq(item.score, item.seq, item.payload);
        }
        Ok(())
    }

    /// Merges any number of selectors of equal capacity, pairwise.
    ///
    /// An empty input yields an empty selector of `capacity`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If `capacity` is 0 or the
    ///   capacities differ
    pub fn merge_all(parts: Vec<Self>, capacity: usize) -> Result<Self> {
        let mut level = parts;
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut iter = level.into_iter();
            while let Some(mut left) = iter.next() {
                if let Some(right) = iter.next() {
                    left.absorb(right)?;
                }
                next.push(left);
            }
            level = next;
        }
        match level.pop() {
            Some(merged) if merged.capacity == capacity => Ok(merged),
            Some(merged) => Err(StoreError::invalid_argument(format!(
                "expected top-k capacity {capacity}, got {}",
                merged.capacity
            ))),
            None => Self::new(capacity),
        }
    }

    /// Consumes the selector and returns its items, best first.
    pub fn into_items(self) -> Vec<TopKItem<S, P>> {
        let mut items: Vec<TopKItem<S, P>> =
            self.heap.into_vec().into_iter().map(|r| r.0).collect();
        items.sort_by(TopKItem::rank_cmp);
        items
    }

    fn check_capacity(&self, other: &Self) -> Result<()> {
        if self.capacity != other.capacity {
            return Err(StoreError::invalid_argument(format!(
                "cannot merge top-k selectors of capacity {} and {}",
                self.capacity, other.capacity
            )));
        }
        Ok(())
    }
}

impl<S: Score, P: Clone> BoundedTopK<S, P> {
    /// Returns the retained items sorted by descending score, ties broken by
    /// sequence number. Does not modify the selector.
    pub fn items(&self) -> Vec<TopKItem<S, P>> {
        self.clone().into_items()
    }

    /// Returns a new selector holding the top items of `self` and `other`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If the capacities differ
    pub fn merge(&self, other: &Self) -> Result<Self> {
        self.check_capacity(other)?;
        let mut merged = self.clone();
        merged.absorb(other.clone())?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores<P>(items: &[TopKItem<i32, P>]) -> Vec<i32> {
        items.iter().map(|item| item.score).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = BoundedTopK::<f32, ()>::new(0);
        assert!(matches!(result, Err(StoreError::InvalidArgument { .. })));
    }

    #[test]
    fn test_insert_until_full() {
        let mut topk = BoundedTopK::new(4).unwrap();
        assert!(topk.insert(3, "a"));
        assert!(topk.insert(1, "b"));
        assert_eq!(topk.len(), 2);
        assert!(!topk.is_full());
        assert_eq!(topk.min_score(), Some(1));
        assert_eq!(scores(&topk.items()), vec![3, 1]);
    }

    #[test]
    fn test_equal_score_at_capacity_is_dropped() {
        let mut topk = BoundedTopK::new(2).unwrap();
        topk.insert(4, "first");
        topk.insert(2, "second");
        assert!(!topk.insert(2, "late"));
        assert!(!topk.insert(1, "lower"));
        assert!(topk.insert(3, "higher"));

        let items = topk.items();
        assert_eq!(scores(&items), vec![4, 3]);
        assert_eq!(items[1].payload, "higher");
    }

    #[test]
    fn test_items_is_non_destructive() {
        let mut topk = BoundedTopK::new(2).unwrap();
        topk.insert(1.5f64, 0u8);
        topk.insert(2.5f64, 1u8);
        assert_eq!(topk.items(), topk.items());
        assert_eq!(topk.len(), 2);
    }

    #[test]
    fn test_float_nan_is_totally_ordered() {
        let mut topk = BoundedTopK::new(2).unwrap();
        topk.insert(f32::NAN, "nan");
        topk.insert(1.0, "one");
        topk.insert(0.5, "half");
        let payloads: Vec<_> = topk.items().into_iter().map(|i| i.payload).collect();
        assert_eq!(payloads, vec!["nan", "one"]);
    }

    #[test]
    fn test_negative_nan_ranks_last() {
        let mut topk = BoundedTopK::new(2).unwrap();
        topk.insert(-f64::NAN, "neg-nan");
        topk.insert(f64::NEG_INFINITY, "neg-inf");
        topk.insert(-1.0, "minus-one");
        let payloads: Vec<_> = topk.items().into_iter().map(|i| i.payload).collect();
        assert_eq!(payloads, vec!["minus-one", "neg-inf"]);
    }

    #[test]
    fn test_explicit_seq_breaks_ties_on_merge() {
        let mut a = BoundedTopK::new(1).unwrap();
        a.insert_with_seq(5, 1, "later");
        let mut b = BoundedTopK::new(1).unwrap();
        b.insert_with_seq(5, 0, "earlier");

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.items()[0].payload, "earlier");
        let merged = b.merge(&a).unwrap();
        assert_eq!(merged.items()[0].payload, "earlier");
    }

    #[test]
    fn test_local_seq_continues_after_explicit_seq() {
        let mut topk = BoundedTopK::new(3).unwrap();
        topk.insert_with_seq(1, 10, ());
        topk.insert(1, ());
        let seqs: Vec<u64> = topk.items().iter().map(|i| i.seq).collect();
        assert_eq!(seqs, vec![10, 11]);
    }

    #[test]
    fn test_would_admit_matches_insert() {
        let mut topk = BoundedTopK::new(2).unwrap();
        topk.insert_with_seq(5, 4, ());
        topk.insert_with_seq(3, 6, ());
        assert!(topk.would_admit(4, 9));
        assert!(topk.would_admit(3, 5));
        assert!(!topk.would_admit(3, 7));
        assert!(!topk.would_admit(2, 0));
    }

    #[test]
    fn test_merge_all_pairwise() {
        let parts: Vec<BoundedTopK<i32, usize>> = (0..5)
            .map(|p| {
                let mut part = BoundedTopK::new(3).unwrap();
                for i in (p..20).step_by(5) {
                    part.insert_with_seq(i as i32 % 7, i as u64, i);
                }
                part
            })
            .collect();

        let merged = BoundedTopK::merge_all(parts, 3).unwrap();
        let payloads: Vec<usize> = merged.items().into_iter().map(|i| i.payload).collect();
        // Scores: 6 at i = 6, 13; 5 at i = 5, 12, 19.
        assert_eq!(payloads, vec![6, 13, 5]);

        let empty = BoundedTopK::<i32, usize>::merge_all(Vec::new(), 4).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.capacity(), 4);
    }

    #[test]
    fn test_merge_capacity_mismatch() {
        let a = BoundedTopK::<i32, ()>::new(2).unwrap();
        let b = BoundedTopK::<i32, ()>::new(3).unwrap();
        assert!(matches!(
            a.merge(&b),
            Err(StoreError::InvalidArgument { .. })
        ));
    }
}
