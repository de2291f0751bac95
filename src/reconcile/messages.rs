//! Message reconciliation and per-conversation unread counters.

use super::{conversations, remove_record, store_record, Counting, IgnoreReason, Outcome, Reconcile};
use crate::entities::{ConversationSummary, Message};
use crate::store::StoreState;
use crate::types::{CounterKey, Domain, EntityId, Scope, Timestamp};
use crate::watch::CacheEvent;

impl Reconcile for Message {
    /// Unread, from someone else, and not on screen.
    fn counter_key(&self, state: &StoreState) -> Option<CounterKey> {
        let viewer = state.viewer()?;
        if &self.sender_id == viewer
            || self.read_at.is_some()
            || state.active_conversation() == Some(&self.conversation_id)
        {
            return None;
        }
        Some(CounterKey::ConversationUnread(self.conversation_id.clone()))
    }

    /// Keeps the enriched sender, and a read mark once one is known.
    fn merge(mut self, existing: &Self) -> Self {
        if self.sender.is_none() {
            self.sender = existing.sender.clone();
        }
        if self.read_at.is_none() {
            self.read_at = existing.read_at;
        }
        self
    }

    fn after_upsert(&self, state: &mut StoreState) {
        conversations::record_activity(state, &self.conversation_id, self.created_at, &self.content);
    }
}

/// Insert a message together with its freshly fetched conversation.
///
/// The summary's unread count is computed server-side and already includes
/// the message, so the message itself does not move the counter.
pub fn insert_with_parent(state: &mut StoreState, summary: ConversationSummary, message: Message) -> Outcome {
    if let Outcome::Ignored(reason) = conversations::upsert_summary(state, summary) {
        return Outcome::Ignored(reason);
    }

    if state.messages.contains(&message.id) {
        return Outcome::Duplicate;
    }

    if store_record(state, message, Counting::Skip) {
        Outcome::Inserted
    } else {
        Outcome::Ignored(IgnoreReason::Evicted)
    }
}

/// Delete a cached message of any conversation in the viewer's list, open
/// or not, so unread counters of background conversations stay exact.
pub fn delete_listed_message(state: &mut StoreState, id: &EntityId) -> Outcome {
    let Some(conversation) = state.messages.get(id).map(|message| message.conversation_id.clone())
    else {
        return Outcome::Ignored(IgnoreReason::Missing);
    };
    if !state.conversations.contains(&conversation) {
        return Outcome::Ignored(IgnoreReason::OutOfScope);
    }
    remove_record::<Message>(state, id);
    Outcome::Deleted
}

/// Optimistically mark every cached message from others in a conversation
/// as read and zero its unread counter.
///
/// Returns the ids that changed.
pub fn mark_conversation_read(state: &mut StoreState, conversation_id: &EntityId) -> Vec<EntityId> {
    let Some(viewer) = state.viewer().cloned() else {
        return Vec::new();
    };
    let now = Timestamp::now();
    let scope = Scope::Conversation(conversation_id.clone());

    let unread: Vec<EntityId> = state
        .messages
        .list(&scope)
        .into_iter()
        .filter(|message| message.read_at.is_none() && message.sender_id != viewer)
        .map(|message| message.id)
        .collect();

    for id in &unread {
        state.messages.modify(id, |message| message.read_at = Some(now));
        state.emit(CacheEvent::Upserted {
            domain: Domain::Messages,
            scope: scope.clone(),
            id: id.clone(),
        });
    }

    state.set_counter(&CounterKey::ConversationUnread(conversation_id.clone()), 0);
    unread
}
