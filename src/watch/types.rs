//! Watcher types for derived-view updates.

use crate::types::{CounterKey, Domain, EntityId, Scope};
use serde::{Deserialize, Serialize};

/// Configuration for a watcher.
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Max buffered events before the watcher is dropped.
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: WatchFilter,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            filter: WatchFilter::all(),
        }
    }
}

/// Filter criteria for watchers.
#[derive(Clone, Debug, Default)]
pub struct WatchFilter {
    /// Restrict to these domains (None = all).
    pub domains: Option<Vec<Domain>>,

    /// Restrict to these scopes (None = all).
    pub scopes: Option<Vec<Scope>>,

    /// Include record events.
    pub include_entities: bool,

    /// Include counter events.
    pub include_counters: bool,
}

impl WatchFilter {
    /// Watch record changes in specific domains.
    pub fn domains(domains: Vec<Domain>) -> Self {
        Self {
            domains: Some(domains),
            include_entities: true,
            ..Default::default()
        }
    }

    /// Watch record changes under one scope.
    pub fn scope(scope: Scope) -> Self {
        Self {
            scopes: Some(vec![scope]),
            include_entities: true,
            ..Default::default()
        }
    }

    /// Watch counters only.
    pub fn counters() -> Self {
        Self {
            include_counters: true,
            ..Default::default()
        }
    }

    /// Watch everything.
    pub fn all() -> Self {
        Self {
            include_entities: true,
            include_counters: true,
            ..Default::default()
        }
    }

    pub(crate) fn matches(&self, event: &CacheEvent) -> bool {
        match event {
            CacheEvent::Upserted { domain, scope, .. }
            | CacheEvent::Removed { domain, scope, .. }
            | CacheEvent::Reloaded { domain, scope, .. } => {
                self.include_entities
                    && self.domains.as_ref().map_or(true, |d| d.contains(domain))
                    && self.scopes.as_ref().map_or(true, |s| s.contains(scope))
            }
            CacheEvent::Counter { .. } => self.include_counters,
            CacheEvent::Cleared | CacheEvent::Dropped { .. } => true,
        }
    }
}

/// Events emitted by the entity store after each mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A record was inserted or replaced.
    Upserted {
        domain: Domain,
        scope: Scope,
        id: EntityId,
    },

    /// A record was removed (deleted or evicted).
    Removed {
        domain: Domain,
        scope: Scope,
        id: EntityId,
    },

    /// A bulk load finished for a scope.
    Reloaded {
        domain: Domain,
        scope: Scope,
        count: usize,
    },

    /// A counter changed value.
    Counter { key: CounterKey, value: u32 },

    /// The whole cache was cleared (logout).
    Cleared,

    /// Watcher was dropped.
    Dropped { reason: DropReason },
}

/// Why a watcher was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unwatched.
    Unwatched,
}

/// Unique identifier for a watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Handle to receive cache events.
pub struct WatchHandle {
    pub id: WatchId,
    pub receiver: crossbeam_channel::Receiver<CacheEvent>,
}

impl WatchHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<CacheEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<CacheEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<CacheEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered right now.
    pub fn drain(&self) -> Vec<CacheEvent> {
        self.receiver.try_iter().collect()
    }
}
