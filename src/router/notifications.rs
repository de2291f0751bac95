//! The viewer's notification channel.

use super::{Router, RouterContext};
use crate::entities::Notification;
use crate::error::Result;
use crate::subscriptions::{Binding, ChangeHandler, ChannelSpec, Filter, RawChange};
use crate::types::{Domain, Scope, UserId};
use async_trait::async_trait;
use tracing::debug;

pub struct NotificationsRouter {
    ctx: RouterContext,
    viewer: UserId,
}

impl NotificationsRouter {
    pub fn new(ctx: RouterContext, viewer: UserId) -> Self {
        Self { ctx, viewer }
    }

    fn decode(&self, change: &RawChange) -> Result<Option<Notification>> {
        let notification: Notification = change.record()?;
        if notification.user_id != self.viewer {
            debug!(notification = %notification.id, "notification for another user");
            return Ok(None);
        }
        Ok(Some(notification))
    }
}

impl Router for NotificationsRouter {
    fn spec(&self) -> ChannelSpec {
        ChannelSpec::new(format!("notifications:{}", self.viewer), Scope::Viewer).bind(
            Binding::all(Domain::Notifications.table()).filtered(Filter::eq("user_id", &self.viewer)),
        )
    }
}

#[async_trait]
impl ChangeHandler for NotificationsRouter {
    async fn on_insert(&self, change: RawChange) -> Result<()> {
        if let Some(notification) = self.decode(&change)? {
            self.ctx.insert(notification);
        }
        Ok(())
    }

    async fn on_update(&self, change: RawChange) -> Result<()> {
        if let Some(notification) = self.decode(&change)? {
            self.ctx.update(notification);
        }
        Ok(())
    }

    async fn on_delete(&self, change: RawChange) -> Result<()> {
        self.ctx.delete::<Notification>(&change, Scope::Viewer)?;
        Ok(())
    }
}
