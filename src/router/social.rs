//! Friendship and pending-request channels.

use super::{Router, RouterContext};
use crate::entities::{Friendship, PendingRequest};
use crate::error::Result;
use crate::subscriptions::{Binding, ChangeHandler, ChannelSpec, Filter, RawChange};
use crate::types::{Domain, Scope, UserId};
use async_trait::async_trait;
use tracing::debug;

/// Friendships where the viewer is either side.
pub struct FriendshipsRouter {
    ctx: RouterContext,
    viewer: UserId,
}

impl FriendshipsRouter {
    pub fn new(ctx: RouterContext, viewer: UserId) -> Self {
        Self { ctx, viewer }
    }

    fn decode(&self, change: &RawChange) -> Result<Option<Friendship>> {
        let friendship: Friendship = change.record()?;
        if !friendship.involves(&self.viewer) {
            debug!(friendship = %friendship.id, "friendship between other users");
            return Ok(None);
        }
        Ok(Some(friendship))
    }
}

impl Router for FriendshipsRouter {
    fn spec(&self) -> ChannelSpec {
        let table = Domain::Friendships.table();
        ChannelSpec::new(format!("friendships:{}", self.viewer), Scope::Viewer)
            .bind(Binding::all(table).filtered(Filter::eq("requester_id", &self.viewer)))
            .bind(Binding::all(table).filtered(Filter::eq("addressee_id", &self.viewer)))
    }
}

#[async_trait]
impl ChangeHandler for FriendshipsRouter {
    async fn on_insert(&self, change: RawChange) -> Result<()> {
        if let Some(friendship) = self.decode(&change)? {
            self.ctx.insert(friendship);
        }
        Ok(())
    }

    async fn on_update(&self, change: RawChange) -> Result<()> {
        if let Some(friendship) = self.decode(&change)? {
            self.ctx.update(friendship);
        }
        Ok(())
    }

    async fn on_delete(&self, change: RawChange) -> Result<()> {
        self.ctx.delete::<Friendship>(&change, Scope::Viewer)?;
        Ok(())
    }
}

/// Event invites and join requests sent to or by the viewer.
pub struct RequestsRouter {
    ctx: RouterContext,
    viewer: UserId,
}

impl RequestsRouter {
    pub fn new(ctx: RouterContext, viewer: UserId) -> Self {
        Self { ctx, viewer }
    }

    fn decode(&self, change: &RawChange) -> Result<Option<PendingRequest>> {
        let request: PendingRequest = change.record()?;
        if request.recipient_id != self.viewer && request.requester_id != self.viewer {
            debug!(request = %request.id, "request between other users");
            return Ok(None);
        }
        Ok(Some(request))
    }
}

impl Router for RequestsRouter {
    fn spec(&self) -> ChannelSpec {
        let table = Domain::PendingRequests.table();
        ChannelSpec::new(format!("requests:{}", self.viewer), Scope::Viewer)
            .bind(Binding::all(table).filtered(Filter::eq("recipient_id", &self.viewer)))
            .bind(Binding::all(table).filtered(Filter::eq("requester_id", &self.viewer)))
    }
}

#[async_trait]
impl ChangeHandler for RequestsRouter {
    async fn on_insert(&self, change: RawChange) -> Result<()> {
        if let Some(request) = self.decode(&change)? {
            self.ctx.insert(request);
        }
        Ok(())
    }

    async fn on_update(&self, change: RawChange) -> Result<()> {
        if let Some(request) = self.decode(&change)? {
            self.ctx.update(request);
        }
        Ok(())
    }

    async fn on_delete(&self, change: RawChange) -> Result<()> {
        self.ctx.delete::<PendingRequest>(&change, Scope::Viewer)?;
        Ok(())
    }
}
