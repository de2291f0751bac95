//! Change routers: one channel's bindings plus the callbacks that turn its
//! raw payloads into reconciled changes.
//!
//! Routers normalize and enrich; all cache mutation goes through the
//! entity store. Every callback re-reads the store after each `.await`
//! since other channels may have mutated it in between.

mod conversations;
mod events;
mod messages;
mod notifications;
mod profiles;
mod social;

pub use conversations::ConversationsRouter;
pub use events::EventRouter;
pub use messages::MessagesRouter;
pub use notifications::NotificationsRouter;
pub use profiles::ProfileCache;
pub use social::{FriendshipsRouter, RequestsRouter};

use crate::capabilities::DataAccess;
use crate::entities::SyncEntity;
use crate::error::Result;
use crate::reconcile::{Change, Outcome, Reconcile};
use crate::store::EntityStore;
use crate::subscriptions::{ChangeHandler, ChannelSpec, RawChange};
use crate::types::{Scope, UserId};
use std::sync::Arc;
use tracing::debug;

/// A change handler that knows which channel it belongs on.
pub trait Router: ChangeHandler + 'static {
    fn spec(&self) -> ChannelSpec;
}

/// What every router needs to reach.
#[derive(Clone)]
pub struct RouterContext {
    pub store: Arc<EntityStore>,
    pub data: Arc<dyn DataAccess>,
    pub profiles: Arc<ProfileCache>,
}

impl RouterContext {
    pub fn new(store: Arc<EntityStore>, data: Arc<dyn DataAccess>, profiles: Arc<ProfileCache>) -> Self {
        Self {
            store,
            data,
            profiles,
        }
    }

    pub fn viewer(&self) -> Option<UserId> {
        self.store.read(|state| state.viewer().cloned())
    }

    pub(crate) fn insert<E: Reconcile>(&self, entity: E) -> Outcome {
        observe::<E>(self.store.apply(Change::insert(entity)))
    }

    pub(crate) fn update<E: Reconcile>(&self, entity: E) -> Outcome {
        observe::<E>(self.store.apply(Change::update(entity)))
    }

    /// Delete the row named by the change's old record, only if it is
    /// cached under `scope`.
    pub(crate) fn delete<E: Reconcile>(&self, change: &RawChange, scope: Scope) -> Result<Outcome> {
        let id = change.old_id()?;
        Ok(observe::<E>(self.store.apply(Change::<E>::delete_in(id, scope))))
    }
}

fn observe<E: SyncEntity>(outcome: Outcome) -> Outcome {
    if !outcome.mutated() {
        debug!(domain = ?E::DOMAIN, ?outcome, "change had no effect");
    }
    outcome
}
