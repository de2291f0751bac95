//! Message changes, shared by the conversation list channel and the
//! per-conversation channel.

use super::{Router, RouterContext};
use crate::entities::{Conversation, Message};
use crate::error::{Result, SyncError};
use crate::reconcile::{self, Change, Outcome};
use crate::subscriptions::{Binding, ChangeHandler, ChannelSpec, Filter, RawChange};
use crate::types::{Domain, EntityId, Scope};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Insert an inbound message, fetching its conversation first if the
/// conversation is not cached yet.
pub(crate) async fn insert_message(ctx: &RouterContext, change: &RawChange) -> Result<Outcome> {
    let mut message: Message = change.record()?;
    message.sender = ctx.profiles.resolve(&message.sender_id, ctx.data.as_ref()).await;

    let has_parent = ctx
        .store
        .read(|state| state.collection::<Conversation>().contains(&message.conversation_id));

    let outcome = if has_parent {
        ctx.insert(message.clone())
    } else {
        let viewer = ctx.viewer().ok_or(SyncError::NotAuthenticated)?;
        let summary = match ctx.data.fetch_conversation(&message.conversation_id, &viewer).await {
            Ok(Some(summary)) => summary,
            Ok(None) => return Err(SyncError::ParentUnavailable(message.conversation_id.clone())),
            Err(e) => {
                warn!(conversation = %message.conversation_id, error = %e, "conversation fetch failed");
                return Err(SyncError::ParentUnavailable(message.conversation_id.clone()));
            }
        };

        let inbound = message.clone();
        ctx.store.write(|state| {
            // The conversation may have arrived on another channel meanwhile.
            if state.collection::<Conversation>().contains(&inbound.conversation_id) {
                reconcile::apply(state, Change::insert(inbound))
            } else {
                reconcile::insert_with_parent(state, summary, inbound)
            }
        })
    };

    if outcome == Outcome::Inserted {
        confirm_read_if_active(ctx, &message).await;
    }
    Ok(outcome)
}

pub(crate) async fn update_message(ctx: &RouterContext, change: &RawChange) -> Result<Outcome> {
    let message: Message = change.record()?;
    Ok(ctx.update(message))
}

/// A message from someone else landing in the conversation on screen is
/// read immediately.
async fn confirm_read_if_active(ctx: &RouterContext, message: &Message) {
    let conversation = &message.conversation_id;
    let viewer = ctx.store.write(|state| {
        let on_screen = state.active_conversation() == Some(conversation)
            && !state.is_viewer(Some(&message.sender_id));
        if !on_screen {
            return None;
        }
        reconcile::mark_conversation_read(state, conversation);
        state.viewer().cloned()
    });

    if let Some(viewer) = viewer {
        if let Err(e) = ctx.data.mark_conversation_read(conversation, &viewer).await {
            warn!(conversation = %conversation, error = %e, "read confirmation failed");
        }
    }
}

/// Live messages of one open conversation.
pub struct MessagesRouter {
    ctx: RouterContext,
    conversation: EntityId,
}

impl MessagesRouter {
    pub fn new(ctx: RouterContext, conversation: EntityId) -> Self {
        Self { ctx, conversation }
    }

    fn scope(&self) -> Scope {
        Scope::Conversation(self.conversation.clone())
    }

    fn belongs(&self, change: &RawChange) -> bool {
        let belongs = change
            .new
            .as_ref()
            .and_then(|row| row.get("conversation_id"))
            .and_then(|id| id.as_str())
            .is_some_and(|id| id == self.conversation.as_str());
        if !belongs {
            debug!(conversation = %self.conversation, "message for another conversation");
        }
        belongs
    }
}

impl Router for MessagesRouter {
    fn spec(&self) -> ChannelSpec {
        ChannelSpec::new(format!("messages:{}", self.conversation), self.scope()).bind(
            Binding::all(Domain::Messages.table())
                .filtered(Filter::eq("conversation_id", &self.conversation)),
        )
    }
}

#[async_trait]
impl ChangeHandler for MessagesRouter {
    async fn on_insert(&self, change: RawChange) -> Result<()> {
        if self.belongs(&change) {
            insert_message(&self.ctx, &change).await?;
        }
        Ok(())
    }

    async fn on_update(&self, change: RawChange) -> Result<()> {
        if self.belongs(&change) {
            update_message(&self.ctx, &change).await?;
        }
        Ok(())
    }

    async fn on_delete(&self, change: RawChange) -> Result<()> {
        self.ctx.delete::<Message>(&change, self.scope())?;
        Ok(())
    }
}
