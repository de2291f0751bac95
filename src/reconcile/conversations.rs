//! Conversation list reconciliation.

use super::{store_record, Counting, IgnoreReason, Outcome, Reconcile};
use crate::entities::{Conversation, ConversationKind, ConversationSummary, FriendshipStatus};
use crate::store::StoreState;
use crate::types::{CounterKey, Domain, EntityId, Scope, Timestamp};
use crate::watch::CacheEvent;

impl Reconcile for Conversation {
    fn admit(&self, state: &StoreState) -> bool {
        is_candidate(state, self)
    }

    /// Message inserts move `last_message_at` locally; a conversation row
    /// that lags behind must not roll it back.
    fn merge(mut self, existing: &Self) -> Self {
        if existing.last_message_at > self.last_message_at {
            self.last_message_at = existing.last_message_at;
            self.last_message_preview = existing.last_message_preview.clone();
        }
        self
    }

    fn after_remove(&self, state: &mut StoreState) {
        let scope = Scope::Conversation(self.id.clone());
        for message in state.messages.clear_scope(&scope) {
            state.emit(CacheEvent::Removed {
                domain: Domain::Messages,
                scope: scope.clone(),
                id: message.id,
            });
        }
        state.remove_counter(&CounterKey::ConversationUnread(self.id.clone()));
    }
}

/// Direct conversations are listed only with accepted friends; groups always.
///
/// Until the friendship set is loaded nothing is filtered.
pub fn is_candidate(state: &StoreState, conversation: &Conversation) -> bool {
    if conversation.kind == ConversationKind::Group {
        return true;
    }
    let Some(viewer) = state.viewer() else {
        return true;
    };
    let Some(counterpart) = conversation.counterpart(viewer) else {
        return true;
    };
    if !state.is_loaded(Domain::Friendships, &Scope::Viewer) {
        return true;
    }

    state.friendships.iter().any(|friendship| {
        friendship.status == FriendshipStatus::Accepted
            && friendship.involves(viewer)
            && friendship.other(viewer) == counterpart
    })
}

/// Insert or refresh a conversation from an authoritative fetch, seeding
/// its unread counter from the server's count.
pub fn upsert_summary(state: &mut StoreState, summary: ConversationSummary) -> Outcome {
    let ConversationSummary {
        conversation,
        unread_count,
    } = summary;

    if !conversation.admit(state) {
        return Outcome::Ignored(IgnoreReason::NotCandidate);
    }

    let id = conversation.id.clone();
    let existing = state.conversations.get(&id).cloned();
    let outcome = match &existing {
        Some(_) => Outcome::Updated,
        None => Outcome::Inserted,
    };
    let conversation = match existing {
        Some(existing) => conversation.merge(&existing),
        None => conversation,
    };

    store_record(state, conversation, Counting::Diff);

    let unread = if state.active_conversation() == Some(&id) {
        0
    } else {
        unread_count
    };
    state.set_counter(&CounterKey::ConversationUnread(id), unread);
    outcome
}

/// Move a conversation's last activity forward after a message insert.
pub(crate) fn record_activity(state: &mut StoreState, id: &EntityId, at: Timestamp, preview: &str) {
    let advances = state
        .conversations
        .get(id)
        .is_some_and(|conversation| conversation.last_message_at.map_or(true, |last| at >= last));
    if !advances {
        return;
    }

    state.conversations.modify(id, |conversation| {
        conversation.last_message_at = Some(at);
        conversation.last_message_preview = Some(preview.to_string());
    });
    state.emit(CacheEvent::Upserted {
        domain: Domain::Conversations,
        scope: Scope::Viewer,
        id: id.clone(),
    });
}
