//! In-memory fakes of the capabilities the engine consumes.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use potluck_sync::{
    AuthSession, ChangeFeed, ChannelSpec, ChannelStatus, Conversation, ConversationKind,
    ConversationSummary, EntityId, EventSnapshot, FeedChannel, FeedEvent, FeedSink, Friendship,
    FriendshipStatus, Message, Notification, PendingRequest, Profile, RawChange, Result, SyncEntity,
    SyncError, Timestamp, UserId,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

pub const VIEWER: &str = "me";

/// Route engine logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Let spawned channel tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// --- Auth ---

pub struct FakeAuth {
    user: Mutex<Option<UserId>>,
}

impl FakeAuth {
    pub fn signed_in(user: &str) -> Arc<Self> {
        Arc::new(Self {
            user: Mutex::new(Some(UserId::from(user))),
        })
    }

    pub fn signed_out() -> Arc<Self> {
        Arc::new(Self {
            user: Mutex::new(None),
        })
    }

    pub fn sign_out(&self) {
        *self.user.lock() = None;
    }
}

impl AuthSession for FakeAuth {
    fn current_user(&self) -> Option<UserId> {
        self.user.lock().clone()
    }
}

// --- Change feed ---

#[derive(Default)]
struct FeedState {
    sinks: HashMap<String, (u64, FeedSink)>,
    specs: HashMap<String, ChannelSpec>,
    subscribes: HashMap<String, u32>,
    unsubscribes: u32,
    next_id: u64,
    manual_ack: bool,
    fail_subscribe: bool,
}

/// Change feed whose channels are driven by the test.
#[derive(Clone, Default)]
pub struct FakeFeed {
    state: Arc<Mutex<FeedState>>,
}

impl FakeFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stop acknowledging subscribes automatically.
    pub fn set_manual_ack(&self, manual: bool) {
        self.state.lock().manual_ack = manual;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    pub fn emit(&self, channel: &str, event: FeedEvent) -> bool {
        let sink = self
            .state
            .lock()
            .sinks
            .get(channel)
            .map(|(_, sink)| sink.clone());
        sink.is_some_and(|sink| sink.send(event))
    }

    pub fn status(&self, channel: &str, status: ChannelStatus) -> bool {
        self.emit(channel, FeedEvent::Status(status))
    }

    pub fn change(&self, channel: &str, change: RawChange) -> bool {
        self.emit(channel, FeedEvent::Change(change))
    }

    pub fn subscribe_count(&self, channel: &str) -> u32 {
        self.state.lock().subscribes.get(channel).copied().unwrap_or(0)
    }

    pub fn total_subscribes(&self) -> u32 {
        self.state.lock().subscribes.values().sum()
    }

    pub fn unsubscribes(&self) -> u32 {
        self.state.lock().unsubscribes
    }

    pub fn is_attached(&self, channel: &str) -> bool {
        self.state.lock().sinks.contains_key(channel)
    }

    pub fn spec(&self, channel: &str) -> Option<ChannelSpec> {
        self.state.lock().specs.get(channel).cloned()
    }
}

struct FakeTransport {
    state: Arc<Mutex<FeedState>>,
    name: String,
    id: u64,
}

impl FeedChannel for FakeTransport {
    fn unsubscribe(&mut self) {
        let mut state = self.state.lock();
        state.unsubscribes += 1;
        if state.sinks.get(&self.name).is_some_and(|(id, _)| *id == self.id) {
            state.sinks.remove(&self.name);
        }
    }
}

impl ChangeFeed for FakeFeed {
    fn subscribe(&self, spec: &ChannelSpec, sink: FeedSink) -> Result<Box<dyn FeedChannel>> {
        let mut state = self.state.lock();
        *state.subscribes.entry(spec.name.clone()).or_default() += 1;
        if state.fail_subscribe {
            return Err(SyncError::Transport("connection refused".to_string()));
        }

        state.next_id += 1;
        let id = state.next_id;
        if !state.manual_ack {
            sink.status(ChannelStatus::Subscribed);
        }
        state.sinks.insert(spec.name.clone(), (id, sink));
        state.specs.insert(spec.name.clone(), spec.clone());

        Ok(Box::new(FakeTransport {
            state: self.state.clone(),
            name: spec.name.clone(),
            id,
        }))
    }
}

// --- Backend ---

#[derive(Default)]
pub struct BackendState {
    pub conversations: Vec<ConversationSummary>,
    pub messages: HashMap<EntityId, Vec<Message>>,
    pub notifications: Vec<Notification>,
    pub friendships: Vec<Friendship>,
    pub requests: Vec<PendingRequest>,
    pub events: HashMap<EntityId, EventSnapshot>,
    pub profiles: HashMap<UserId, Profile>,
    /// Tables whose bulk reads fail.
    pub failing: HashSet<&'static str>,
    pub fail_point_reads: bool,
    pub conversations_read: Vec<EntityId>,
    pub notifications_read: u32,
    pub profile_lookups: u32,
}

/// Pauses a bulk read until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct FakeBackend {
    pub state: Mutex<BackendState>,
    gates: Mutex<HashMap<&'static str, Arc<Gate>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Hold the next conversation load until the gate is released.
    pub fn gate_conversations(&self) -> Arc<Gate> {
        self.gate("conversations")
    }

    /// Hold the next load of a table until the gate is released.
    pub fn gate(&self, table: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().insert(table, gate.clone());
        gate
    }

    async fn pass(&self, table: &'static str) {
        let gate = self.gates.lock().remove(table);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
    }

    fn check(&self, table: &'static str) -> Result<()> {
        if self.state.lock().failing.contains(table) {
            return Err(SyncError::Backend(format!("{} unavailable", table)));
        }
        Ok(())
    }
}

#[async_trait]
impl potluck_sync::DataAccess for FakeBackend {
    async fn load_conversations(&self, _viewer: &UserId) -> Result<Vec<ConversationSummary>> {
        self.pass("conversations").await;
        self.check("conversations")?;
        Ok(self.state.lock().conversations.clone())
    }

    async fn load_messages(&self, conversation: &EntityId) -> Result<Vec<Message>> {
        self.pass("messages").await;
        self.check("messages")?;
        Ok(self
            .state
            .lock()
            .messages
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_notifications(&self, _viewer: &UserId, limit: usize) -> Result<Vec<Notification>> {
        self.check("notifications")?;
        let mut notifications = self.state.lock().notifications.clone();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications.truncate(limit);
        Ok(notifications)
    }

    async fn load_friendships(&self, _viewer: &UserId) -> Result<Vec<Friendship>> {
        self.check("friendships")?;
        Ok(self.state.lock().friendships.clone())
    }

    async fn load_pending_requests(&self, _viewer: &UserId) -> Result<Vec<PendingRequest>> {
        self.check("pending_requests")?;
        Ok(self.state.lock().requests.clone())
    }

    async fn load_event(&self, event: &EntityId) -> Result<EventSnapshot> {
        self.check("events")?;
        Ok(self.state.lock().events.get(event).cloned().unwrap_or_default())
    }

    async fn fetch_conversation(
        &self,
        conversation: &EntityId,
        _viewer: &UserId,
    ) -> Result<Option<ConversationSummary>> {
        let state = self.state.lock();
        if state.fail_point_reads {
            return Err(SyncError::Backend("timeout".to_string()));
        }
        Ok(state
            .conversations
            .iter()
            .find(|summary| &summary.conversation.id == conversation)
            .cloned())
    }

    async fn fetch_profile(&self, user: &UserId) -> Result<Option<Profile>> {
        let mut state = self.state.lock();
        state.profile_lookups += 1;
        Ok(state.profiles.get(user).cloned())
    }

    async fn mark_conversation_read(&self, conversation: &EntityId, _viewer: &UserId) -> Result<()> {
        self.state.lock().conversations_read.push(conversation.clone());
        Ok(())
    }

    async fn mark_notifications_read(&self, _viewer: &UserId) -> Result<()> {
        self.state.lock().notifications_read += 1;
        Ok(())
    }
}

// --- Rows ---

pub fn row<T: Serialize>(entity: &T) -> serde_json::Value {
    serde_json::to_value(entity).unwrap()
}

pub fn insert<E: SyncEntity + Serialize>(entity: &E) -> RawChange {
    RawChange::insert(E::DOMAIN.table(), row(entity))
}

pub fn update<E: SyncEntity + Serialize>(entity: &E) -> RawChange {
    RawChange::update(E::DOMAIN.table(), row(entity))
}

pub fn delete<E: SyncEntity>(id: &str) -> RawChange {
    RawChange::delete(E::DOMAIN.table(), serde_json::json!({ "id": id }))
}

pub fn conversation(id: &str, with: &str) -> Conversation {
    Conversation {
        id: EntityId::from(id),
        kind: ConversationKind::Direct,
        participant_ids: vec![UserId::from(VIEWER), UserId::from(with)],
        created_by: UserId::from(with),
        title: None,
        last_message_preview: None,
        last_message_at: None,
        created_at: Timestamp(1),
        updated_at: Timestamp(1),
    }
}

pub fn summary(id: &str, with: &str, unread_count: u32) -> ConversationSummary {
    ConversationSummary {
        conversation: conversation(id, with),
        unread_count,
    }
}

pub fn friend(id: &str, with: &str) -> Friendship {
    Friendship {
        id: EntityId::from(id),
        requester_id: UserId::from(VIEWER),
        addressee_id: UserId::from(with),
        status: FriendshipStatus::Accepted,
        created_at: Timestamp(1),
        updated_at: Timestamp(1),
    }
}

pub fn message(id: &str, conversation: &str, sender: &str, at: i64) -> Message {
    Message {
        id: EntityId::from(id),
        conversation_id: EntityId::from(conversation),
        sender_id: UserId::from(sender),
        content: format!("hello from {}", sender),
        created_at: Timestamp(at),
        updated_at: None,
        read_at: None,
        sender: None,
    }
}

pub fn notification(id: &str, at: i64) -> Notification {
    Notification {
        id: EntityId::from(id),
        user_id: UserId::from(VIEWER),
        actor_id: Some(UserId::from("friend")),
        kind: "comment".to_string(),
        body: None,
        read: false,
        created_at: Timestamp(at),
        updated_at: None,
    }
}

pub fn profile(id: &str, name: &str) -> Profile {
    Profile {
        id: UserId::from(id),
        display_name: name.to_string(),
        avatar_url: None,
    }
}
