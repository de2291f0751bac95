//! Keyed record collection with per-scope ordered indices.

use crate::entities::SyncEntity;
use crate::types::{EntityId, Scope};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Presentation order of a collection's scope indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// Oldest first (messages, comments).
    Chronological,
    /// Newest first (notifications, conversation list).
    NewestFirst,
}

/// Normalized records of one domain.
///
/// Each id maps to exactly one record, and each record's id appears exactly
/// once in the index of the scope it belongs to.
#[derive(Debug)]
pub struct Collection<E> {
    order: Order,
    /// Max records per scope; oldest by sort key are evicted first.
    retention: Option<usize>,
    records: HashMap<EntityId, E>,
    index: HashMap<Scope, Vec<EntityId>>,
}

impl<E: SyncEntity> Collection<E> {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            retention: None,
            records: HashMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn with_retention(order: Order, retention: usize) -> Self {
        Self {
            retention: Some(retention),
            ..Self::new(order)
        }
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn retention(&self) -> Option<usize> {
        self.retention
    }

    pub fn get(&self, id: &EntityId) -> Option<&E> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.records.contains_key(id)
    }

    /// Scope a cached record is listed under.
    pub fn locate(&self, id: &EntityId) -> Option<Scope> {
        self.records.get(id).map(SyncEntity::scope)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ordered ids of a scope.
    pub fn ids(&self, scope: &Scope) -> &[EntityId] {
        self.index.get(scope).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ordered records of a scope.
    pub fn list(&self, scope: &Scope) -> Vec<E> {
        self.ids(scope)
            .iter()
            .filter_map(|id| self.records.get(id))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.records.values()
    }

    /// Insert or replace a record and repair its scope's order.
    ///
    /// Returns the replaced record, if any.
    pub fn upsert(&mut self, entity: E) -> Option<E> {
        let id = entity.id().clone();
        let scope = entity.scope();
        let previous = self.records.insert(id.clone(), entity);

        match &previous {
            Some(old) if old.scope() != scope => {
                self.unindex(&old.scope(), &id);
                self.index.entry(scope.clone()).or_default().push(id);
            }
            Some(_) => {}
            None => self.index.entry(scope.clone()).or_default().push(id),
        }

        self.sort_scope(&scope);
        previous
    }

    /// Mutate a cached record in place and repair its scope's order.
    pub fn modify<F>(&mut self, id: &EntityId, f: F) -> bool
    where
        F: FnOnce(&mut E),
    {
        let scope = match self.records.get_mut(id) {
            Some(record) => {
                f(record);
                record.scope()
            }
            None => return false,
        };
        self.sort_scope(&scope);
        true
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<E> {
        let removed = self.records.remove(id)?;
        self.unindex(&removed.scope(), id);
        Some(removed)
    }

    /// Evict records beyond the retention cap, oldest by sort key first.
    pub fn enforce_retention(&mut self, scope: &Scope) -> Vec<E> {
        let cap = match self.retention {
            Some(cap) => cap,
            None => return Vec::new(),
        };
        let Some(ids) = self.index.get_mut(scope) else {
            return Vec::new();
        };
        if ids.len() <= cap {
            return Vec::new();
        }

        let excess = ids.len() - cap;
        let evicted_ids: Vec<EntityId> = match self.order {
            Order::NewestFirst => ids.split_off(cap),
            Order::Chronological => ids.drain(..excess).collect(),
        };

        evicted_ids
            .iter()
            .filter_map(|id| self.records.remove(id))
            .collect()
    }

    /// Drop every record listed under a scope.
    pub fn clear_scope(&mut self, scope: &Scope) -> Vec<E> {
        let ids = self.index.remove(scope).unwrap_or_default();
        ids.iter().filter_map(|id| self.records.remove(id)).collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }

    fn unindex(&mut self, scope: &Scope, id: &EntityId) {
        if let Some(ids) = self.index.get_mut(scope) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.index.remove(scope);
            }
        }
    }

    fn sort_scope(&mut self, scope: &Scope) {
        let Some(mut ids) = self.index.remove(scope) else {
            return;
        };
        let records = &self.records;
        let order = self.order;
        ids.sort_by(|a, b| match (records.get(a), records.get(b)) {
            (Some(a), Some(b)) => compare(order, a, b),
            _ => Ordering::Equal,
        });
        self.index.insert(scope.clone(), ids);
    }
}

/// Ties on the sort key are broken by id so ordering and eviction stay
/// deterministic.
fn compare<E: SyncEntity>(order: Order, a: &E, b: &E) -> Ordering {
    let ascending = a
        .sort_key()
        .cmp(&b.sort_key())
        .then_with(|| a.id().cmp(b.id()));
    match order {
        Order::Chronological => ascending,
        Order::NewestFirst => ascending.reverse(),
    }
}
