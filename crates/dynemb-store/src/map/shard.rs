//! A single partition of the key space.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entry::Entry;

pub(crate) type Table<V> = HashMap<Box<[u8]>, Entry<V>>;

/// Merge function queued by `async_apply`.
pub(crate) type MergeFn<V> = Box<dyn FnOnce(Option<&V>) -> V + Send + 'static>;

pub(crate) struct PendingApply<V> {
    pub(crate) key: Box<[u8]>,
    pub(crate) merge: MergeFn<V>,
}

/// One shard: a table behind a reader-writer lock plus the FIFO of merges
/// that have been queued for it but not applied yet.
///
/// Lock order is always `table` before `pending`. `pending` is only popped
/// while `table` is held exclusively, so queued merges are applied in
/// submission order. `pending_len` counts merges queued or in flight: it
/// drops only once a taken batch has been applied.
pub(crate) struct Shard<V> {
    table: RwLock<Table<V>>,
    pending: Mutex<VecDeque<PendingApply<V>>>,
    pending_len: AtomicUsize,
}

impl<V> Shard<V> {
    pub(crate) fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            pending_len: AtomicUsize::new(0),
        }
    }

    /// Queues a merge. Returns `true` if the queue was empty before, in
    /// which case the caller must wake the applier.
    pub(crate) fn enqueue(&self, apply: PendingApply<V>) -> bool {
        let mut pending = self.pending.lock();
        let was_empty = pending.is_empty();
        pending.push_back(apply);
        self.pending_len.fetch_add(1, Ordering::AcqRel);
        was_empty
    }

    #[inline]
    pub(crate) fn has_pending(&self) -> bool {
        self.pending_len.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending_len.load(Ordering::Acquire)
    }

    /// Takes every queued merge. Callers must hold the table write guard
    /// and call [`finish_pending`](Self::finish_pending) with the batch size
    /// once the batch is applied, before releasing the guard.
    pub(crate) fn take_pending(
        &self,
        _guard: &mut RwLockWriteGuard<'_, Table<V>>,
    ) -> Vec<PendingApply<V>> {
        self.pending.lock().drain(..).collect()
    }

    pub(crate) fn finish_pending(&self, _guard: &mut RwLockWriteGuard<'_, Table<V>>, count: usize) {
        self.pending_len.fetch_sub(count, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Table<V>> {
        self.table.read()
    }

    #[inline]
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Table<V>> {
        self.table.write()
    }
}
