//! Applies single changes to the entity store under the cache invariants.
//!
//! The generic rules live here and hold for every domain:
//! - an insert for an id already cached is a no-op (dedupe)
//! - an inbound change that confirms the viewer's own pending action is
//!   recognized as such and clears the action (self-echo)
//! - an update for an uncached record is treated as an insert
//! - an update older than the cached version is dropped
//! - deletes are re-validated against the scope being displayed
//! - every counter change is paired with the record transition that caused it
//!
//! Domain modules plug in through [`Reconcile`]: which counter a record
//! feeds, whether it is admitted at all, how it merges with the cached copy,
//! and follow-up work on other collections.

mod conversations;
mod events;
mod messages;
mod notifications;
mod social;

pub use conversations::{is_candidate, upsert_summary};
pub use messages::{delete_listed_message, insert_with_parent, mark_conversation_read};
pub use notifications::mark_all_read;

use crate::entities::SyncEntity;
use crate::store::{StoreState, Touch};
use crate::types::{CounterKey, EntityId, Operation, Origin, Scope, Timestamp};
use crate::watch::CacheEvent;
use tracing::trace;

/// Per-domain reconciliation hooks.
pub trait Reconcile: SyncEntity {
    /// Counter this record currently contributes to.
    fn counter_key(&self, _state: &StoreState) -> Option<CounterKey> {
        None
    }

    /// Whether the record may enter the cache.
    fn admit(&self, _state: &StoreState) -> bool {
        true
    }

    /// Combine an inbound record with the cached copy it replaces.
    fn merge(self, _existing: &Self) -> Self {
        self
    }

    fn after_upsert(&self, _state: &mut StoreState) {}

    fn after_remove(&self, _state: &mut StoreState) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind<E> {
    Insert(E),
    Update(E),
    Delete {
        id: EntityId,
        /// Scope the receiving channel displays; the cached record must
        /// belong to it.
        scope: Option<Scope>,
    },
}

/// One normalized change, tagged with where it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change<E> {
    pub origin: Origin,
    pub kind: ChangeKind<E>,
}

impl<E> Change<E> {
    pub fn insert(entity: E) -> Self {
        Self {
            origin: Origin::Remote,
            kind: ChangeKind::Insert(entity),
        }
    }

    pub fn update(entity: E) -> Self {
        Self {
            origin: Origin::Remote,
            kind: ChangeKind::Update(entity),
        }
    }

    pub fn delete(id: EntityId) -> Self {
        Self {
            origin: Origin::Remote,
            kind: ChangeKind::Delete { id, scope: None },
        }
    }

    pub fn delete_in(id: EntityId, scope: Scope) -> Self {
        Self {
            origin: Origin::Remote,
            kind: ChangeKind::Delete {
                id,
                scope: Some(scope),
            },
        }
    }

    /// Mark the change as an optimistic local action.
    pub fn local(mut self) -> Self {
        self.origin = Origin::Local;
        self
    }
}

/// What applying a change did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Updated,
    Deleted,
    /// Insert for a record already cached.
    Duplicate,
    /// Echo of the viewer's own pending action.
    Confirmed,
    /// Update older than the cached version.
    Stale,
    Ignored(IgnoreReason),
}

impl Outcome {
    /// Whether the cache changed.
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            Outcome::Inserted | Outcome::Updated | Outcome::Deleted | Outcome::Confirmed
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Delete for a record that is not cached.
    Missing,
    /// Record belongs to a scope that is not displayed.
    OutOfScope,
    /// Record is filtered out of the cache.
    NotCandidate,
    /// Record fell outside the retention cap on arrival.
    Evicted,
    /// The viewer deleted the record locally and the delete is pending.
    LocallyDeleted,
}

/// Apply one change to the store.
pub fn apply<E: Reconcile>(state: &mut StoreState, change: Change<E>) -> Outcome {
    let now = Timestamp::now();
    state.pending.prune(now);

    let outcome = match (change.origin, change.kind) {
        (Origin::Remote, ChangeKind::Insert(entity)) => remote_insert(state, entity, now),
        (Origin::Remote, ChangeKind::Update(entity)) => remote_update(state, entity, now),
        (Origin::Remote, ChangeKind::Delete { id, scope }) => {
            remote_delete::<E>(state, &id, scope.as_ref(), now)
        }
        (Origin::Local, ChangeKind::Insert(entity)) => local_insert(state, entity, now),
        (Origin::Local, ChangeKind::Update(entity)) => local_update(state, entity, now),
        (Origin::Local, ChangeKind::Delete { id, .. }) => local_delete::<E>(state, &id, now),
    };

    trace!(domain = ?E::DOMAIN, ?outcome, "change reconciled");
    outcome
}

fn remote_insert<E: Reconcile>(state: &mut StoreState, entity: E, now: Timestamp) -> Outcome {
    if pending_delete::<E>(state, entity.id(), now) {
        return Outcome::Ignored(IgnoreReason::LocallyDeleted);
    }

    if E::collection(state).contains(entity.id()) {
        if is_self_echo(state, &entity, now) {
            return confirm(state, entity, now);
        }
        return Outcome::Duplicate;
    }

    if !entity.admit(state) {
        return Outcome::Ignored(IgnoreReason::NotCandidate);
    }

    inserted(store_record(state, entity, Counting::Diff))
}

fn remote_update<E: Reconcile>(state: &mut StoreState, entity: E, now: Timestamp) -> Outcome {
    let existing = E::collection(state).get(entity.id()).cloned();

    let Some(existing) = existing else {
        if pending_delete::<E>(state, entity.id(), now) {
            return Outcome::Ignored(IgnoreReason::LocallyDeleted);
        }
        if !entity.admit(state) {
            return Outcome::Ignored(IgnoreReason::NotCandidate);
        }
        return inserted(store_record(state, entity, Counting::Diff));
    };

    if is_self_echo(state, &entity, now) {
        return confirm(state, entity, now);
    }

    if entity.version() < existing.version() {
        return Outcome::Stale;
    }

    store_record(state, entity.merge(&existing), Counting::Diff);
    Outcome::Updated
}

fn remote_delete<E: Reconcile>(
    state: &mut StoreState,
    id: &EntityId,
    expected: Option<&Scope>,
    now: Timestamp,
) -> Outcome {
    let Some(located) = E::collection(state).locate(id) else {
        if pending_delete::<E>(state, id, now) {
            state.pending.take(E::DOMAIN, id, now);
            return Outcome::Confirmed;
        }
        return Outcome::Ignored(IgnoreReason::Missing);
    };

    if expected.is_some_and(|scope| scope != &located) || !state.is_scope_active(&located) {
        return Outcome::Ignored(IgnoreReason::OutOfScope);
    }

    remove_record::<E>(state, id);
    Outcome::Deleted
}

fn local_insert<E: Reconcile>(state: &mut StoreState, entity: E, now: Timestamp) -> Outcome {
    if E::collection(state).contains(entity.id()) {
        return Outcome::Duplicate;
    }
    let id = entity.id().clone();
    let outcome = inserted(store_record(state, entity, Counting::Diff));
    state.pending.register(E::DOMAIN, id, Operation::Insert, now);
    outcome
}

fn local_update<E: Reconcile>(state: &mut StoreState, entity: E, now: Timestamp) -> Outcome {
    let id = entity.id().clone();
    let existing = E::collection(state).get(&id).cloned();
    let outcome = match existing {
        Some(existing) => {
            store_record(state, entity.merge(&existing), Counting::Diff);
            Outcome::Updated
        }
        None => inserted(store_record(state, entity, Counting::Diff)),
    };
    state.pending.register(E::DOMAIN, id, Operation::Update, now);
    outcome
}

fn local_delete<E: Reconcile>(state: &mut StoreState, id: &EntityId, now: Timestamp) -> Outcome {
    if remove_record::<E>(state, id).is_none() {
        return Outcome::Ignored(IgnoreReason::Missing);
    }
    state.pending.register(E::DOMAIN, id.clone(), Operation::Delete, now);
    Outcome::Deleted
}

/// The inbound record confirms an outstanding action the viewer took.
fn is_self_echo<E: Reconcile>(state: &StoreState, entity: &E, now: Timestamp) -> bool {
    state.is_viewer(entity.actor()) && state.pending.get(E::DOMAIN, entity.id(), now).is_some()
}

fn pending_delete<E: Reconcile>(state: &StoreState, id: &EntityId, now: Timestamp) -> bool {
    state
        .pending
        .get(E::DOMAIN, id, now)
        .is_some_and(|action| action.operation == Operation::Delete)
}

/// Replace the optimistic copy with the server's and resolve the action.
fn confirm<E: Reconcile>(state: &mut StoreState, entity: E, now: Timestamp) -> Outcome {
    state.pending.take(E::DOMAIN, entity.id(), now);
    let entity = match E::collection(state).get(entity.id()) {
        Some(existing) => entity.merge(existing),
        None => entity,
    };
    store_record(state, entity, Counting::Diff);
    Outcome::Confirmed
}

fn inserted(retained: bool) -> Outcome {
    if retained {
        Outcome::Inserted
    } else {
        Outcome::Ignored(IgnoreReason::Evicted)
    }
}

/// Whether storing a record adjusts counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Counting {
    /// Shift counters by the record's before/after transition.
    Diff,
    /// The counter was seeded from an authoritative source that already
    /// includes this record.
    Skip,
}

/// Upsert a record, maintain its counter, enforce retention.
///
/// Returns false if the record was evicted right away.
pub(crate) fn store_record<E: Reconcile>(state: &mut StoreState, entity: E, counting: Counting) -> bool {
    let id = entity.id().clone();
    let scope = entity.scope();

    let before = E::collection(state)
        .get(&id)
        .and_then(|existing| existing.counter_key(state));
    let after = entity.counter_key(state);

    E::collection_mut(state).upsert(entity.clone());
    if counting == Counting::Diff {
        shift_counter(state, before, after);
    }
    entity.after_upsert(state);

    state.note_touch(E::DOMAIN, &scope, &id, Touch::Upserted);
    state.emit(CacheEvent::Upserted {
        domain: E::DOMAIN,
        scope: scope.clone(),
        id: id.clone(),
    });

    let mut retained = true;
    for evicted in E::collection_mut(state).enforce_retention(&scope) {
        if evicted.id() == &id {
            retained = false;
        }
        forget(state, &evicted);
    }
    retained
}

/// Remove a cached record and undo its counter contribution.
pub(crate) fn remove_record<E: Reconcile>(state: &mut StoreState, id: &EntityId) -> Option<E> {
    let removed = E::collection_mut(state).remove(id)?;
    state.note_touch(E::DOMAIN, &removed.scope(), id, Touch::Removed);
    forget(state, &removed);
    Some(removed)
}

fn forget<E: Reconcile>(state: &mut StoreState, removed: &E) {
    if let Some(key) = removed.counter_key(state) {
        state.decrement_counter(&key);
    }
    removed.after_remove(state);
    state.emit(CacheEvent::Removed {
        domain: E::DOMAIN,
        scope: removed.scope(),
        id: removed.id().clone(),
    });
}

fn shift_counter(state: &mut StoreState, before: Option<CounterKey>, after: Option<CounterKey>) {
    if before == after {
        return;
    }
    if let Some(key) = before {
        state.decrement_counter(&key);
    }
    if let Some(key) = after {
        state.increment_counter(&key);
    }
}
