//! Bookkeeping for the bulk-load / live-stream overlap window.

use crate::types::{Domain, EntityId, Scope};
use std::collections::{HashMap, HashSet};

/// What a live change did to a record while a bulk load was in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Touch {
    Upserted,
    Removed,
}

/// An open load window for one (domain, scope).
#[derive(Debug, PartialEq, Eq)]
pub struct LoadTicket {
    pub(crate) id: u64,
    pub domain: Domain,
    pub scope: Scope,
}

#[derive(Debug)]
struct LoadWindow {
    domain: Domain,
    scope: Scope,
    touched: HashMap<EntityId, Touch>,
}

#[derive(Debug, Default)]
pub(crate) struct LoadTracker {
    next_id: u64,
    windows: HashMap<u64, LoadWindow>,
    loaded: HashSet<(Domain, Scope)>,
}

impl LoadTracker {
    pub(crate) fn begin(&mut self, domain: Domain, scope: Scope) -> LoadTicket {
        self.next_id += 1;
        let id = self.next_id;
        self.windows.insert(
            id,
            LoadWindow {
                domain,
                scope: scope.clone(),
                touched: HashMap::new(),
            },
        );
        LoadTicket { id, domain, scope }
    }

    /// Close a window, returning the records touched live while it was open.
    ///
    /// `None` means the window was cancelled (logout, viewer switch or scope
    /// teardown) and the snapshot must be discarded.
    pub(crate) fn finish(&mut self, ticket: &LoadTicket) -> Option<HashMap<EntityId, Touch>> {
        let window = self.windows.remove(&ticket.id)?;
        self.loaded.insert((ticket.domain, ticket.scope.clone()));
        Some(window.touched)
    }

    pub(crate) fn abort(&mut self, ticket: &LoadTicket) {
        self.windows.remove(&ticket.id);
    }

    pub(crate) fn note(&mut self, domain: Domain, scope: &Scope, id: &EntityId, touch: Touch) {
        for window in self.windows.values_mut() {
            if window.domain == domain && &window.scope == scope {
                window.touched.insert(id.clone(), touch);
            }
        }
    }

    pub(crate) fn is_loaded(&self, domain: Domain, scope: &Scope) -> bool {
        self.loaded.contains(&(domain, scope.clone()))
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.windows.len()
    }

    /// Forget a scope's loaded domains and cancel its open windows.
    pub(crate) fn forget_scope(&mut self, scope: &Scope) {
        self.loaded.retain(|(_, loaded)| loaded != scope);
        self.windows.retain(|_, window| &window.scope != scope);
    }

    pub(crate) fn clear(&mut self) {
        self.windows.clear();
        self.loaded.clear();
    }
}
