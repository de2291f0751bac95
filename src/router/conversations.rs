//! The viewer's conversation list channel.

use super::messages::{insert_message, update_message};
use super::{Router, RouterContext};
use crate::entities::{Conversation, ConversationSummary};
use crate::error::{Result, SyncError};
use crate::reconcile::{self, Change, Outcome};
use crate::subscriptions::{Binding, ChangeHandler, ChannelSpec, RawChange};
use crate::types::{Domain, Operation, Scope, UserId};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Conversation rows plus every message change, which keep previews,
/// ordering and unread counters current.
pub struct ConversationsRouter {
    ctx: RouterContext,
    viewer: UserId,
}

impl ConversationsRouter {
    pub fn new(ctx: RouterContext, viewer: UserId) -> Self {
        Self { ctx, viewer }
    }

    /// An update for a conversation that is not cached: fetch the full row
    /// and its unread count, then insert it.
    async fn upsert_missing(&self, row: Conversation) -> Result<Outcome> {
        let fetched = self.ctx.data.fetch_conversation(&row.id, &self.viewer).await;
        let summary = match fetched {
            Ok(Some(summary)) => summary,
            Ok(None) => return Err(SyncError::ParentUnavailable(row.id)),
            Err(e) => {
                warn!(conversation = %row.id, error = %e, "conversation fetch failed");
                return Err(SyncError::ParentUnavailable(row.id));
            }
        };

        // Keep whichever copy is newer.
        let conversation = if summary.conversation.updated_at > row.updated_at {
            summary.conversation
        } else {
            row
        };
        let summary = ConversationSummary {
            conversation,
            unread_count: summary.unread_count,
        };

        Ok(self.ctx.store.write(|state| {
            if state.collection::<Conversation>().contains(&summary.conversation.id) {
                reconcile::apply(state, Change::update(summary.conversation))
            } else {
                reconcile::upsert_summary(state, summary)
            }
        }))
    }
}

impl Router for ConversationsRouter {
    fn spec(&self) -> ChannelSpec {
        ChannelSpec::new(format!("conversations:{}", self.viewer), Scope::Viewer)
            .bind(Binding::all(Domain::Conversations.table()))
            .bind(Binding::on(Domain::Messages.table(), Operation::Insert))
            .bind(Binding::on(Domain::Messages.table(), Operation::Update))
            .bind(Binding::on(Domain::Messages.table(), Operation::Delete))
    }
}

#[async_trait]
impl ChangeHandler for ConversationsRouter {
    async fn on_insert(&self, change: RawChange) -> Result<()> {
        match Domain::from_table(&change.table) {
            Some(Domain::Conversations) => {
                let conversation: Conversation = change.record()?;
                if !conversation.participant_ids.contains(&self.viewer) {
                    debug!(conversation = %conversation.id, "not a participant");
                    return Ok(());
                }
                self.ctx.insert(conversation);
            }
            Some(Domain::Messages) => {
                insert_message(&self.ctx, &change).await?;
            }
            _ => return Err(SyncError::UnknownTable(change.table)),
        }
        Ok(())
    }

    async fn on_update(&self, change: RawChange) -> Result<()> {
        match Domain::from_table(&change.table) {
            Some(Domain::Conversations) => {
                let conversation: Conversation = change.record()?;
                let cached = self
                    .ctx
                    .store
                    .read(|state| state.collection::<Conversation>().contains(&conversation.id));
                if cached {
                    self.ctx.update(conversation);
                } else if conversation.participant_ids.contains(&self.viewer) {
                    self.upsert_missing(conversation).await?;
                }
            }
            Some(Domain::Messages) => {
                update_message(&self.ctx, &change).await?;
            }
            _ => return Err(SyncError::UnknownTable(change.table)),
        }
        Ok(())
    }

    async fn on_delete(&self, change: RawChange) -> Result<()> {
        match Domain::from_table(&change.table) {
            Some(Domain::Conversations) => {
                self.ctx.delete::<Conversation>(&change, Scope::Viewer)?;
                Ok(())
            }
            Some(Domain::Messages) => {
                let id = change.old_id()?;
                let outcome = self
                    .ctx
                    .store
                    .write(|state| reconcile::delete_listed_message(state, &id));
                if !outcome.mutated() {
                    debug!(message = %id, ?outcome, "message delete had no effect");
                }
                Ok(())
            }
            _ => Err(SyncError::UnknownTable(change.table)),
        }
    }
}
