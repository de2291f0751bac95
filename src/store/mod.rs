//! The entity store: normalized collections, counters and pending actions.
//!
//! All mutations go through [`EntityStore::write`], which runs a closure
//! against [`StoreState`] under one write lock and publishes the resulting
//! cache events after the lock is released. The lock is never held across
//! an `.await`, so each mutation is atomic with respect to every other
//! channel callback.

mod collection;
mod counters;
mod loads;
mod pending;

pub use collection::{Collection, Order};
pub use counters::Counters;
pub use loads::{LoadTicket, Touch};
pub use pending::{PendingAction, PendingActions};

use crate::config::SyncConfig;
use crate::entities::{
    Comment, Contribution, Conversation, EventParticipant, Friendship, Message, Notification,
    PendingRequest, SyncEntity,
};
use crate::reconcile::{self, Change, Outcome, Reconcile};
use crate::types::{CounterKey, Domain, EntityId, Scope, UserId};
use crate::watch::{CacheEvent, WatchConfig, WatchHandle, WatchId, WatchManager};
use loads::LoadTracker;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Everything the cache holds. Only reachable through [`EntityStore`].
#[derive(Debug)]
pub struct StoreState {
    viewer: Option<UserId>,
    active_conversation: Option<EntityId>,
    active_scopes: HashSet<Scope>,

    pub(crate) conversations: Collection<Conversation>,
    pub(crate) messages: Collection<Message>,
    pub(crate) notifications: Collection<Notification>,
    pub(crate) friendships: Collection<Friendship>,
    pub(crate) pending_requests: Collection<PendingRequest>,
    pub(crate) participants: Collection<EventParticipant>,
    pub(crate) comments: Collection<Comment>,
    pub(crate) contributions: Collection<Contribution>,

    counters: Counters,
    pub(crate) pending: PendingActions,
    loads: LoadTracker,

    /// Events produced by the current mutation, published after unlock.
    events: Vec<CacheEvent>,
}

impl StoreState {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            viewer: None,
            active_conversation: None,
            active_scopes: HashSet::new(),
            conversations: Collection::new(Order::NewestFirst),
            messages: Collection::new(Order::Chronological),
            notifications: Collection::with_retention(
                Order::NewestFirst,
                config.notification_retention,
            ),
            friendships: Collection::new(Order::NewestFirst),
            pending_requests: Collection::new(Order::NewestFirst),
            participants: Collection::new(Order::Chronological),
            comments: Collection::new(Order::Chronological),
            contributions: Collection::new(Order::Chronological),
            counters: Counters::new(),
            pending: PendingActions::new(config.pending_action_ttl),
            loads: LoadTracker::default(),
            events: Vec::new(),
        }
    }

    // --- Views ---

    pub fn viewer(&self) -> Option<&UserId> {
        self.viewer.as_ref()
    }

    pub fn is_viewer(&self, user: Option<&UserId>) -> bool {
        matches!((self.viewer.as_ref(), user), (Some(viewer), Some(user)) if viewer == user)
    }

    /// The conversation currently on screen, if any.
    pub fn active_conversation(&self) -> Option<&EntityId> {
        self.active_conversation.as_ref()
    }

    /// Whether a scope is currently displayed.
    pub fn is_scope_active(&self, scope: &Scope) -> bool {
        self.active_scopes.contains(scope)
    }

    pub fn collection<E: SyncEntity>(&self) -> &Collection<E> {
        E::collection(self)
    }

    pub fn counter(&self, key: &CounterKey) -> u32 {
        self.counters.get(key)
    }

    pub fn total_unread_messages(&self) -> u32 {
        self.counters.total_unread_messages()
    }

    pub fn pending(&self) -> &PendingActions {
        &self.pending
    }

    pub fn is_loaded(&self, domain: Domain, scope: &Scope) -> bool {
        self.loads.is_loaded(domain, scope)
    }

    pub fn loads_in_flight(&self) -> usize {
        self.loads.in_flight()
    }

    // --- Scope lifecycle ---

    pub(crate) fn activate_viewer(&mut self, viewer: UserId) {
        if self.viewer.as_ref() != Some(&viewer) {
            self.clear();
        }
        self.viewer = Some(viewer);
        self.active_scopes.insert(Scope::Viewer);
    }

    pub(crate) fn activate_scope(&mut self, scope: Scope) {
        self.active_scopes.insert(scope);
    }

    pub(crate) fn deactivate_scope(&mut self, scope: &Scope) {
        self.active_scopes.remove(scope);
        self.loads.forget_scope(scope);
        if let Scope::Conversation(id) = scope {
            if self.active_conversation.as_ref() == Some(id) {
                self.active_conversation = None;
            }
        }
    }

    pub(crate) fn set_active_conversation(&mut self, conversation: Option<EntityId>) {
        self.active_conversation = conversation;
    }

    // --- Counters ---

    pub(crate) fn increment_counter(&mut self, key: &CounterKey) {
        let value = self.counters.increment(key);
        self.emit(CacheEvent::Counter {
            key: key.clone(),
            value,
        });
    }

    pub(crate) fn decrement_counter(&mut self, key: &CounterKey) {
        let before = self.counters.get(key);
        let value = self.counters.decrement(key);
        if before != value {
            self.emit(CacheEvent::Counter {
                key: key.clone(),
                value,
            });
        }
    }

    pub(crate) fn set_counter(&mut self, key: &CounterKey, value: u32) {
        if self.counters.get(key) != value {
            self.counters.set(key, value);
            self.emit(CacheEvent::Counter {
                key: key.clone(),
                value,
            });
        }
    }

    pub(crate) fn remove_counter(&mut self, key: &CounterKey) {
        if self.counters.remove(key).unwrap_or(0) > 0 {
            self.emit(CacheEvent::Counter {
                key: key.clone(),
                value: 0,
            });
        }
    }

    // --- Load windows ---

    pub(crate) fn begin_load(&mut self, domain: Domain, scope: Scope) -> LoadTicket {
        self.loads.begin(domain, scope)
    }

    pub(crate) fn finish_load(&mut self, ticket: &LoadTicket) -> Option<HashMap<EntityId, Touch>> {
        self.loads.finish(ticket)
    }

    pub(crate) fn abort_load(&mut self, ticket: &LoadTicket) {
        self.loads.abort(ticket);
    }

    pub(crate) fn note_touch(&mut self, domain: Domain, scope: &Scope, id: &EntityId, touch: Touch) {
        self.loads.note(domain, scope, id, touch);
    }

    // --- Events ---

    pub(crate) fn emit(&mut self, event: CacheEvent) {
        self.events.push(event);
    }

    fn take_events(&mut self) -> Vec<CacheEvent> {
        std::mem::take(&mut self.events)
    }

    /// Forget everything (logout or viewer switch).
    pub(crate) fn clear(&mut self) {
        self.viewer = None;
        self.active_conversation = None;
        self.active_scopes.clear();
        self.conversations.clear();
        self.messages.clear();
        self.notifications.clear();
        self.friendships.clear();
        self.pending_requests.clear();
        self.participants.clear();
        self.comments.clear();
        self.contributions.clear();
        self.counters.clear();
        self.pending.clear();
        self.loads.clear();
        self.emit(CacheEvent::Cleared);
    }
}

/// Single owner of the cache; shared by routers, the loader and the
/// application.
pub struct EntityStore {
    state: RwLock<StoreState>,
    watchers: WatchManager,
}

impl EntityStore {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            state: RwLock::new(StoreState::new(config)),
            watchers: WatchManager::new(),
        }
    }

    /// Bind the cache to a signed-in user. Switching users clears it.
    pub fn activate_viewer(&self, viewer: UserId) {
        self.write(|state| state.activate_viewer(viewer));
    }

    /// Run a read-only view over the current state.
    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.state.read())
    }

    /// Run one atomic mutation, then publish its cache events.
    pub fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        let (result, events) = {
            let mut state = self.state.write();
            let result = f(&mut state);
            (result, state.take_events())
        };

        for event in &events {
            self.watchers.publish(event);
        }
        result
    }

    /// Apply one change under the domain's reconciliation rules.
    pub fn apply<E: Reconcile>(&self, change: Change<E>) -> Outcome {
        self.write(|state| reconcile::apply(state, change))
    }

    /// Ordered records of a domain under a scope.
    pub fn entities<E: SyncEntity>(&self, scope: &Scope) -> Vec<E> {
        self.read(|state| E::collection(state).list(scope))
    }

    pub fn get<E: SyncEntity>(&self, id: &EntityId) -> Option<E> {
        self.read(|state| E::collection(state).get(id).cloned())
    }

    pub fn counter(&self, key: &CounterKey) -> u32 {
        self.read(|state| state.counter(key))
    }

    pub fn total_unread_messages(&self) -> u32 {
        self.read(StoreState::total_unread_messages)
    }

    pub fn watch(&self, config: WatchConfig) -> WatchHandle {
        self.watchers.watch(config)
    }

    pub fn unwatch(&self, id: WatchId) {
        self.watchers.unwatch(id);
    }

    pub fn clear(&self) {
        self.write(StoreState::clear);
    }
}
