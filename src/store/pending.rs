//! Optimistic local actions awaiting their network echo.

use crate::types::{ActionId, Domain, EntityId, Operation, Timestamp};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAction {
    pub id: ActionId,
    pub domain: Domain,
    pub entity: EntityId,
    pub operation: Operation,
    pub created: Timestamp,
}

/// At most one outstanding action per record; a newer local action on the
/// same record replaces the older one.
#[derive(Debug)]
pub struct PendingActions {
    ttl: Duration,
    next_id: u64,
    actions: HashMap<(Domain, EntityId), PendingAction>,
}

impl PendingActions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_id: 1,
            actions: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        domain: Domain,
        entity: EntityId,
        operation: Operation,
        now: Timestamp,
    ) -> ActionId {
        let id = ActionId(self.next_id);
        self.next_id += 1;
        self.actions.insert(
            (domain, entity.clone()),
            PendingAction {
                id,
                domain,
                entity,
                operation,
                created: now,
            },
        );
        id
    }

    /// Outstanding, unexpired action on a record.
    pub fn get(&self, domain: Domain, entity: &EntityId, now: Timestamp) -> Option<&PendingAction> {
        self.actions
            .get(&(domain, entity.clone()))
            .filter(|action| !self.is_expired(action, now))
    }

    /// Resolve an action with its confirmation.
    pub fn take(&mut self, domain: Domain, entity: &EntityId, now: Timestamp) -> Option<PendingAction> {
        let action = self.actions.remove(&(domain, entity.clone()))?;
        (!self.is_expired(&action, now)).then_some(action)
    }

    /// Drop expired actions. Returns how many were dropped.
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let before = self.actions.len();
        let ttl = self.ttl;
        self.actions
            .retain(|_, action| action.created.saturating_add(ttl) > now);
        before - self.actions.len()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    fn is_expired(&self, action: &PendingAction, now: Timestamp) -> bool {
        action.created.saturating_add(self.ttl) <= now
    }
}
