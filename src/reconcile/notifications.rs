//! Notification reconciliation and the unread badge.

use super::{store_record, Counting, Reconcile};
use crate::entities::Notification;
use crate::store::StoreState;
use crate::types::{CounterKey, Domain, EntityId, Operation, Scope, Timestamp};

impl Reconcile for Notification {
    fn counter_key(&self, state: &StoreState) -> Option<CounterKey> {
        let viewer = state.viewer()?;
        if self.read || &self.user_id != viewer || self.actor_id.as_ref() == Some(viewer) {
            return None;
        }
        Some(CounterKey::UnreadNotifications)
    }
}

/// Optimistically mark every cached notification read.
///
/// Each change is registered as a pending action so the server's echo is
/// recognized as a confirmation.
pub fn mark_all_read(state: &mut StoreState) -> Vec<EntityId> {
    let now = Timestamp::now();
    let unread: Vec<Notification> = state
        .notifications
        .list(&Scope::Viewer)
        .into_iter()
        .filter(|notification| !notification.read)
        .collect();

    let mut changed = Vec::with_capacity(unread.len());
    for mut notification in unread {
        notification.read = true;
        let id = notification.id.clone();
        store_record(state, notification, Counting::Diff);
        state
            .pending
            .register(Domain::Notifications, id.clone(), Operation::Update, now);
        changed.push(id);
    }
    changed
}
