//! Core types shared by the store, reconcilers and channels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Stable identifier of a synchronized record.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId(id.to_string())
    }
}

/// Identifier of an application user.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId(id.to_string())
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_millis() as i64))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A logical table synchronized into the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Conversations,
    Messages,
    Notifications,
    Friendships,
    PendingRequests,
    Participants,
    Comments,
    Contributions,
}

impl Domain {
    /// Backend table name carried by change payloads.
    pub fn table(self) -> &'static str {
        match self {
            Domain::Conversations => "conversations",
            Domain::Messages => "messages",
            Domain::Notifications => "notifications",
            Domain::Friendships => "friendships",
            Domain::PendingRequests => "pending_requests",
            Domain::Participants => "event_participants",
            Domain::Comments => "event_comments",
            Domain::Contributions => "event_contributions",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        Some(match table {
            "conversations" => Domain::Conversations,
            "messages" => Domain::Messages,
            "notifications" => Domain::Notifications,
            "friendships" => Domain::Friendships,
            "pending_requests" => Domain::PendingRequests,
            "event_participants" => Domain::Participants,
            "event_comments" => Domain::Comments,
            "event_contributions" => Domain::Contributions,
            _ => return None,
        })
    }
}

/// The owning scope of a record: what has to be on screen for it to matter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    /// Collections belonging to the signed-in user as a whole.
    Viewer,
    Conversation(EntityId),
    Event(EntityId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Viewer => write!(f, "viewer"),
            Scope::Conversation(id) => write!(f, "conversation:{}", id),
            Scope::Event(id) => write!(f, "event:{}", id),
        }
    }
}

/// Change operation reported by the feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// Identifier of an optimistic local action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActionId(pub u64);

/// Where a change came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Delivered by the change feed.
    Remote,
    /// Applied optimistically by the local viewer, awaiting confirmation.
    Local,
}

/// Denormalized counters kept next to the entity collections.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CounterKey {
    /// Unread messages from others in a conversation that is not open.
    ConversationUnread(EntityId),
    UnreadNotifications,
    IncomingFriendRequests,
    PendingRequests,
}
