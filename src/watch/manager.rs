//! Broadcasts cache events to in-process watchers.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::types::{CacheEvent, DropReason, WatchConfig, WatchFilter, WatchHandle, WatchId};

struct Watcher {
    filter: WatchFilter,
    sender: Sender<CacheEvent>,
}

impl Watcher {
    /// Returns false if the buffer is full or the receiver is gone.
    fn try_send(&self, event: CacheEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

/// Fans cache events out to watchers, dropping the ones that fall behind.
pub struct WatchManager {
    watchers: RwLock<HashMap<WatchId, Watcher>>,
    next_id: AtomicU64,
}

impl WatchManager {
    pub fn new() -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn watch(&self, config: WatchConfig) -> WatchHandle {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.watchers.write().insert(
            id,
            Watcher {
                filter: config.filter,
                sender,
            },
        );

        WatchHandle { id, receiver }
    }

    pub fn unwatch(&self, id: WatchId) {
        if let Some(watcher) = self.watchers.write().remove(&id) {
            let _ = watcher.sender.try_send(CacheEvent::Dropped {
                reason: DropReason::Unwatched,
            });
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }

    /// Deliver an event to every matching watcher.
    pub fn publish(&self, event: &CacheEvent) {
        let mut to_remove = Vec::new();

        {
            let watchers = self.watchers.read();
            for (id, watcher) in watchers.iter() {
                if watcher.filter.matches(event) && !watcher.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut watchers = self.watchers.write();
            for id in to_remove {
                if let Some(watcher) = watchers.remove(&id) {
                    debug!(watcher = id.0, "dropping slow watcher");
                    let _ = watcher.sender.try_send(CacheEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for WatchManager {
    fn default() -> Self {
        Self::new()
    }
}
