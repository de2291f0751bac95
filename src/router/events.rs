//! One event page's channel: participants, comments and contributions.

use super::{Router, RouterContext};
use crate::entities::{Comment, Contribution, EventParticipant};
use crate::error::{Result, SyncError};
use crate::reconcile::Reconcile;
use crate::subscriptions::{Binding, ChangeHandler, ChannelSpec, Filter, RawChange};
use crate::types::{Domain, EntityId, Scope};
use async_trait::async_trait;
use tracing::debug;

pub struct EventRouter {
    ctx: RouterContext,
    event: EntityId,
}

impl EventRouter {
    pub fn new(ctx: RouterContext, event: EntityId) -> Self {
        Self { ctx, event }
    }

    fn scope(&self) -> Scope {
        Scope::Event(self.event.clone())
    }

    fn belongs(&self, event_id: &EntityId) -> bool {
        if event_id != &self.event {
            debug!(event = %self.event, other = %event_id, "change for another event");
            return false;
        }
        true
    }

    async fn participant(&self, change: &RawChange) -> Result<Option<EventParticipant>> {
        let mut participant: EventParticipant = change.record()?;
        if !self.belongs(&participant.event_id) {
            return Ok(None);
        }
        participant.profile = self
            .ctx
            .profiles
            .resolve(&participant.user_id, self.ctx.data.as_ref())
            .await;
        Ok(Some(participant))
    }

    async fn comment(&self, change: &RawChange) -> Result<Option<Comment>> {
        let mut comment: Comment = change.record()?;
        if !self.belongs(&comment.event_id) {
            return Ok(None);
        }
        comment.author = self
            .ctx
            .profiles
            .resolve(&comment.author_id, self.ctx.data.as_ref())
            .await;
        Ok(Some(comment))
    }

    fn contribution(&self, change: &RawChange) -> Result<Option<Contribution>> {
        let contribution: Contribution = change.record()?;
        Ok(self.belongs(&contribution.event_id).then_some(contribution))
    }

    async fn upsert(&self, change: RawChange, insert: bool) -> Result<()> {
        match Domain::from_table(&change.table) {
            Some(Domain::Participants) => {
                if let Some(participant) = self.participant(&change).await? {
                    self.apply(participant, insert);
                }
            }
            Some(Domain::Comments) => {
                if let Some(comment) = self.comment(&change).await? {
                    self.apply(comment, insert);
                }
            }
            Some(Domain::Contributions) => {
                if let Some(contribution) = self.contribution(&change)? {
                    self.apply(contribution, insert);
                }
            }
            _ => return Err(SyncError::UnknownTable(change.table)),
        }
        Ok(())
    }

    fn apply<E: Reconcile>(&self, entity: E, insert: bool) {
        if insert {
            self.ctx.insert(entity);
        } else {
            self.ctx.update(entity);
        }
    }
}

impl Router for EventRouter {
    fn spec(&self) -> ChannelSpec {
        let filter = Filter::eq("event_id", &self.event);
        ChannelSpec::new(format!("event:{}", self.event), self.scope())
            .bind(Binding::all(Domain::Participants.table()).filtered(filter.clone()))
            .bind(Binding::all(Domain::Comments.table()).filtered(filter.clone()))
            .bind(Binding::all(Domain::Contributions.table()).filtered(filter))
    }
}

#[async_trait]
impl ChangeHandler for EventRouter {
    async fn on_insert(&self, change: RawChange) -> Result<()> {
        self.upsert(change, true).await
    }

    async fn on_update(&self, change: RawChange) -> Result<()> {
        self.upsert(change, false).await
    }

    async fn on_delete(&self, change: RawChange) -> Result<()> {
        let scope = self.scope();
        match Domain::from_table(&change.table) {
            Some(Domain::Participants) => self.ctx.delete::<EventParticipant>(&change, scope)?,
            Some(Domain::Comments) => self.ctx.delete::<Comment>(&change, scope)?,
            Some(Domain::Contributions) => self.ctx.delete::<Contribution>(&change, scope)?,
            _ => return Err(SyncError::UnknownTable(change.table)),
        };
        Ok(())
    }
}
