//! External collaborators consumed by the sync layer.
//!
//! The engine never talks to the network directly. It is handed an auth
//! session, a request/response data-access API and a change feed, each
//! behind a trait so tests can drive it with in-memory fakes.

use crate::entities::{
    ConversationSummary, EventSnapshot, Friendship, Message, Notification, PendingRequest, Profile,
};
use crate::error::Result;
use crate::subscriptions::{ChannelSpec, FeedSink};
use crate::types::{EntityId, UserId};
use async_trait::async_trait;

/// Authentication capability.
pub trait AuthSession: Send + Sync {
    /// The signed-in user, if any.
    fn current_user(&self) -> Option<UserId>;

    fn has_session(&self) -> bool {
        self.current_user().is_some()
    }
}

/// Bulk reads and point writes against the hosted backend.
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Conversations the viewer takes part in, with server-side unread counts.
    async fn load_conversations(&self, viewer: &UserId) -> Result<Vec<ConversationSummary>>;

    async fn load_messages(&self, conversation: &EntityId) -> Result<Vec<Message>>;

    /// Most recent notifications for the viewer, newest first.
    async fn load_notifications(&self, viewer: &UserId, limit: usize) -> Result<Vec<Notification>>;

    async fn load_friendships(&self, viewer: &UserId) -> Result<Vec<Friendship>>;

    async fn load_pending_requests(&self, viewer: &UserId) -> Result<Vec<PendingRequest>>;

    async fn load_event(&self, event: &EntityId) -> Result<EventSnapshot>;

    /// Point read of one conversation as seen by the viewer.
    async fn fetch_conversation(
        &self,
        conversation: &EntityId,
        viewer: &UserId,
    ) -> Result<Option<ConversationSummary>>;

    async fn fetch_profile(&self, user: &UserId) -> Result<Option<Profile>>;

    /// Persist that the viewer has read everything in a conversation.
    async fn mark_conversation_read(&self, conversation: &EntityId, viewer: &UserId) -> Result<()>;

    async fn mark_notifications_read(&self, viewer: &UserId) -> Result<()>;
}

/// Change-feed subscription API.
pub trait ChangeFeed: Send + Sync {
    /// Attach a channel. Status changes and row changes are delivered
    /// through `sink` until the returned channel is unsubscribed.
    fn subscribe(&self, spec: &ChannelSpec, sink: FeedSink) -> Result<Box<dyn FeedChannel>>;
}

/// A live transport-level subscription.
pub trait FeedChannel: Send {
    fn unsubscribe(&mut self);
}
