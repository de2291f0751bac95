//! Synchronized record types.
//!
//! Every record deserializes directly from the `new` snapshot of a change
//! payload. Enrichment fields (profiles) are optional and filled in by the
//! change routers.

use crate::store::{Collection, StoreState};
use crate::types::{Domain, EntityId, Scope, Timestamp, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A record kept in the entity store.
pub trait SyncEntity: Clone + std::fmt::Debug + DeserializeOwned + Send + Sync + 'static {
    const DOMAIN: Domain;

    fn id(&self) -> &EntityId;

    /// Scope the record is listed under.
    fn scope(&self) -> Scope;

    /// Presentation ordering key.
    fn sort_key(&self) -> Timestamp;

    /// Last-modified version, used to reject out-of-order updates.
    fn version(&self) -> Timestamp;

    /// The user whose action produced the current state of the record.
    fn actor(&self) -> Option<&UserId>;

    fn collection(state: &StoreState) -> &Collection<Self>;

    fn collection_mut(state: &mut StoreState) -> &mut Collection<Self>;
}

/// Public profile used to enrich messages, comments and participants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    #[default]
    Direct,
    Group,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: EntityId,
    #[serde(default)]
    pub kind: ConversationKind,
    #[serde(default)]
    pub participant_ids: Vec<UserId>,
    pub created_by: UserId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversation {
    /// The other participant of a direct conversation.
    pub fn counterpart(&self, viewer: &UserId) -> Option<&UserId> {
        match self.kind {
            ConversationKind::Direct => self.participant_ids.iter().find(|id| *id != viewer),
            ConversationKind::Group => None,
        }
    }

    pub fn last_activity(&self) -> Timestamp {
        self.last_message_at.unwrap_or(self.created_at).max(self.created_at)
    }
}

/// Conversation row as returned by bulk reads, with the server-side unread
/// count for the viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: EntityId,
    pub conversation_id: EntityId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub read_at: Option<Timestamp>,
    #[serde(default)]
    pub sender: Option<Profile>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    pub user_id: UserId,
    #[serde(default)]
    pub actor_id: Option<UserId>,
    pub kind: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Declined,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Friendship {
    pub id: EntityId,
    pub requester_id: UserId,
    pub addressee_id: UserId,
    pub status: FriendshipStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Friendship {
    /// The side of the friendship that is not `user`.
    pub fn other(&self, user: &UserId) -> &UserId {
        if &self.requester_id == user {
            &self.addressee_id
        } else {
            &self.requester_id
        }
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.requester_id == user || &self.addressee_id == user
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// The host invited the recipient to an event.
    Invite,
    /// The requester asked to join the recipient's event.
    Join,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: EntityId,
    pub event_id: EntityId,
    pub requester_id: UserId,
    pub recipient_id: UserId,
    pub kind: RequestKind,
    pub created_at: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rsvp {
    Invited,
    Going,
    Maybe,
    Declined,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventParticipant {
    pub id: EntityId,
    pub event_id: EntityId,
    pub user_id: UserId,
    pub rsvp: Rsvp,
    pub joined_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: EntityId,
    pub event_id: EntityId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub author: Option<Profile>,
}

/// A dish or item someone brings to a potluck.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: EntityId,
    pub event_id: EntityId,
    pub contributor_id: UserId,
    pub item: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

fn default_quantity() -> u32 {
    1
}

/// Bulk read result for a single event page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub participants: Vec<EventParticipant>,
    pub comments: Vec<Comment>,
    pub contributions: Vec<Contribution>,
}

macro_rules! bind_collection {
    ($field:ident) => {
        fn collection(state: &StoreState) -> &Collection<Self> {
            &state.$field
        }

        fn collection_mut(state: &mut StoreState) -> &mut Collection<Self> {
            &mut state.$field
        }
    };
}

impl SyncEntity for Conversation {
    const DOMAIN: Domain = Domain::Conversations;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn scope(&self) -> Scope {
        Scope::Viewer
    }

    fn sort_key(&self) -> Timestamp {
        self.last_activity()
    }

    fn version(&self) -> Timestamp {
        self.updated_at
    }

    fn actor(&self) -> Option<&UserId> {
        Some(&self.created_by)
    }

    bind_collection!(conversations);
}

impl SyncEntity for Message {
    const DOMAIN: Domain = Domain::Messages;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn scope(&self) -> Scope {
        Scope::Conversation(self.conversation_id.clone())
    }

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }

    // Excludes read_at: read marks carry the reader's clock.
    fn version(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }

    fn actor(&self) -> Option<&UserId> {
        Some(&self.sender_id)
    }

    bind_collection!(messages);
}

impl SyncEntity for Notification {
    const DOMAIN: Domain = Domain::Notifications;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn scope(&self) -> Scope {
        Scope::Viewer
    }

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }

    fn version(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }

    // Read/unread and dismissal are done by the recipient.
    fn actor(&self) -> Option<&UserId> {
        Some(&self.user_id)
    }

    bind_collection!(notifications);
}

impl SyncEntity for Friendship {
    const DOMAIN: Domain = Domain::Friendships;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn scope(&self) -> Scope {
        Scope::Viewer
    }

    fn sort_key(&self) -> Timestamp {
        self.updated_at
    }

    fn version(&self) -> Timestamp {
        self.updated_at
    }

    fn actor(&self) -> Option<&UserId> {
        match self.status {
            FriendshipStatus::Pending => Some(&self.requester_id),
            FriendshipStatus::Accepted | FriendshipStatus::Declined => Some(&self.addressee_id),
        }
    }

    bind_collection!(friendships);
}

impl SyncEntity for PendingRequest {
    const DOMAIN: Domain = Domain::PendingRequests;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn scope(&self) -> Scope {
        Scope::Viewer
    }

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }

    fn version(&self) -> Timestamp {
        self.created_at
    }

    fn actor(&self) -> Option<&UserId> {
        Some(&self.requester_id)
    }

    bind_collection!(pending_requests);
}

impl SyncEntity for EventParticipant {
    const DOMAIN: Domain = Domain::Participants;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn scope(&self) -> Scope {
        Scope::Event(self.event_id.clone())
    }

    fn sort_key(&self) -> Timestamp {
        self.joined_at
    }

    fn version(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.joined_at)
    }

    fn actor(&self) -> Option<&UserId> {
        Some(&self.user_id)
    }

    bind_collection!(participants);
}

impl SyncEntity for Comment {
    const DOMAIN: Domain = Domain::Comments;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn scope(&self) -> Scope {
        Scope::Event(self.event_id.clone())
    }

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }

    fn version(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }

    fn actor(&self) -> Option<&UserId> {
        Some(&self.author_id)
    }

    bind_collection!(comments);
}

impl SyncEntity for Contribution {
    const DOMAIN: Domain = Domain::Contributions;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn scope(&self) -> Scope {
        Scope::Event(self.event_id.clone())
    }

    fn sort_key(&self) -> Timestamp {
        self.created_at
    }

    fn version(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }

    fn actor(&self) -> Option<&UserId> {
        Some(&self.contributor_id)
    }

    bind_collection!(contributions);
}
