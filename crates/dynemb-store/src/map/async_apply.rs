//! Background applier for queued merges.

use std::hash::BuildHasher;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, warn};

use super::MapCore;
use crate::entry::EmbeddingValue;
use crate::error::{Result, StoreError};

/// Owns the thread that drains shard queues after `async_apply`.
///
/// The thread is woken with the index of a shard whose queue went from
/// empty to non-empty. It exits once the sender is dropped.
pub(super) struct AsyncApplier {
    notify: Option<Sender<usize>>,
    handle: Option<JoinHandle<()>>,
}

impl AsyncApplier {
    pub(super) fn spawn<V, S>(core: Arc<MapCore<V, S>>) -> Result<Self>
    where
        V: EmbeddingValue,
        S: BuildHasher + Send + Sync + 'static,
    {
        let (notify, wakeups) = unbounded::<usize>();
        let handle = thread::Builder::new()
            .name("dynemb-async-apply".to_string())
            .spawn(move || {
                for shard in wakeups.iter() {
                    core.drain_shard(shard);
                }
                core.flush();
            })
            .map_err(|e| {
                StoreError::invalid_argument(format!("failed to spawn async applier: {e}"))
            })?;

        debug!("async applier started");
        Ok(Self {
            notify: Some(notify),
            handle: Some(handle),
        })
    }

    pub(super) fn notify(&self, shard: usize) {
        if let Some(notify) = &self.notify {
            // Only fails during shutdown, when the map flushes every shard itself.
            let _ = notify.send(shard);
        }
    }

    /// Stops the thread after it has handled every wakeup sent so far.
    pub(super) fn shutdown(&mut self) {
        drop(self.notify.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("async applier exited with a panic");
            }
            debug!("async applier stopped");
        }
    }
}

impl Drop for AsyncApplier {
    fn drop(&mut self) {
        self.shutdown();
    }
}
