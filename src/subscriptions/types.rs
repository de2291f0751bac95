//! Channel types shared by the subscription manager and the change routers.

use crate::error::{Result, SyncError};
use crate::types::{EntityId, Operation, Scope, Timestamp};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

/// Status reported by the transport for a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl ChannelStatus {
    pub fn is_failure(self) -> bool {
        !matches!(self, ChannelStatus::Subscribed)
    }
}

/// Lifecycle of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Subscribing,
    Subscribed,
    Failed(ChannelStatus),
    ReconnectScheduled,
    /// Terminal.
    TornDown,
}

impl ChannelState {
    /// Check if transitioning to `next` is allowed.
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        match (self, next) {
            (TornDown, _) => false,
            (_, TornDown) => true,
            (Idle, Subscribing) => true,
            (Subscribing, Subscribed) | (Subscribing, Failed(_)) => true,
            (Subscribed, Failed(_)) => true,
            (Failed(_), ReconnectScheduled) => true,
            (ReconnectScheduled, Subscribing) => true,
            // The old transport recovered before the timer fired.
            (ReconnectScheduled, Subscribed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Idle => write!(f, "IDLE"),
            ChannelState::Subscribing => write!(f, "SUBSCRIBING"),
            ChannelState::Subscribed => write!(f, "SUBSCRIBED"),
            ChannelState::Failed(status) => write!(f, "{:?}", status),
            ChannelState::ReconnectScheduled => write!(f, "RECONNECT_SCHEDULED"),
            ChannelState::TornDown => write!(f, "TORN_DOWN"),
        }
    }
}

/// Server-side equality filter on one column.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// One (table, operation, filter) registration on a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub table: String,
    /// None binds every operation.
    pub operation: Option<Operation>,
    pub filter: Option<Filter>,
}

impl Binding {
    pub fn all(table: &str) -> Self {
        Self {
            table: table.to_string(),
            operation: None,
            filter: None,
        }
    }

    pub fn on(table: &str, operation: Operation) -> Self {
        Self {
            operation: Some(operation),
            ..Self::all(table)
        }
    }

    pub fn filtered(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    fn accepts(&self, change: &RawChange) -> bool {
        self.table == change.table && self.operation.map_or(true, |op| op == change.operation)
    }
}

/// Everything needed to (re)attach a named channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    /// Scope whose lifetime owns the channel.
    pub scope: Scope,
    pub bindings: Vec<Binding>,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Whether any binding covers the change's table and operation.
    pub fn accepts(&self, change: &RawChange) -> bool {
        self.bindings.iter().any(|binding| binding.accepts(change))
    }
}

/// Row change as delivered by the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: String,
    #[serde(rename = "eventType")]
    pub operation: Operation,
    /// Row after the change (inserts and updates).
    #[serde(default)]
    pub new: Option<Value>,
    /// Row before the change; for deletes often only the primary key.
    #[serde(default)]
    pub old: Option<Value>,
    #[serde(default)]
    pub commit_timestamp: Option<Timestamp>,
}

impl RawChange {
    pub fn insert(table: &str, new: Value) -> Self {
        Self {
            table: table.to_string(),
            operation: Operation::Insert,
            new: Some(new),
            old: None,
            commit_timestamp: None,
        }
    }

    pub fn update(table: &str, new: Value) -> Self {
        Self {
            operation: Operation::Update,
            ..Self::insert(table, new)
        }
    }

    pub fn delete(table: &str, old: Value) -> Self {
        Self {
            table: table.to_string(),
            operation: Operation::Delete,
            new: None,
            old: Some(old),
            commit_timestamp: None,
        }
    }

    /// Decode the new row.
    pub fn record<T: DeserializeOwned>(&self) -> Result<T> {
        let new = self.new.as_ref().ok_or(SyncError::MissingRecord("new"))?;
        Ok(T::deserialize(new)?)
    }

    /// Primary key of the removed row.
    pub fn old_id(&self) -> Result<EntityId> {
        self.old
            .as_ref()
            .and_then(|old| old.get("id"))
            .and_then(Value::as_str)
            .map(EntityId::from)
            .ok_or(SyncError::MissingRecord("old"))
    }
}

/// Something the transport delivers on a channel.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    Status(ChannelStatus),
    Change(RawChange),
}

/// Where a transport pushes events for one subscribe call.
#[derive(Clone, Debug)]
pub struct FeedSink {
    sender: UnboundedSender<FeedEvent>,
}

impl FeedSink {
    pub(crate) fn new(sender: UnboundedSender<FeedEvent>) -> Self {
        Self { sender }
    }

    /// Returns false once the channel has been torn down.
    pub fn status(&self, status: ChannelStatus) -> bool {
        self.sender.send(FeedEvent::Status(status)).is_ok()
    }

    pub fn change(&self, change: RawChange) -> bool {
        self.sender.send(FeedEvent::Change(change)).is_ok()
    }

    pub fn send(&self, event: FeedEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Identifies one opened channel. A handle from a superseded open does
/// not close its replacement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    pub(crate) name: String,
    pub(crate) generation: u64,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Operation callbacks attached to a channel.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_insert(&self, change: RawChange) -> Result<()> {
        let _ = change;
        Ok(())
    }

    async fn on_update(&self, change: RawChange) -> Result<()> {
        let _ = change;
        Ok(())
    }

    async fn on_delete(&self, change: RawChange) -> Result<()> {
        let _ = change;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_transitions() {
        use ChannelState::*;
        assert!(Idle.can_transition_to(Subscribing));
        assert!(Subscribing.can_transition_to(Subscribed));
        assert!(Subscribed.can_transition_to(Failed(ChannelStatus::TimedOut)));
        assert!(Failed(ChannelStatus::Closed).can_transition_to(ReconnectScheduled));
        assert!(ReconnectScheduled.can_transition_to(Subscribing));

        assert!(!Idle.can_transition_to(Subscribed));
        assert!(!ReconnectScheduled.can_transition_to(Failed(ChannelStatus::ChannelError)));
        assert!(!Subscribed.can_transition_to(ReconnectScheduled));
    }

    #[test]
    fn test_torn_down_is_terminal() {
        use ChannelState::*;
        for state in [Idle, Subscribing, Subscribed, ReconnectScheduled] {
            assert!(state.can_transition_to(TornDown));
        }
        for next in [Idle, Subscribing, Subscribed, ReconnectScheduled, TornDown] {
            assert!(!TornDown.can_transition_to(next));
        }
    }

    #[test]
    fn test_status_wire_names() {
        let status: ChannelStatus = serde_json::from_value(json!("CHANNEL_ERROR")).unwrap();
        assert_eq!(status, ChannelStatus::ChannelError);
        assert!(status.is_failure());
        assert!(!ChannelStatus::Subscribed.is_failure());
    }

    #[test]
    fn test_spec_accepts_bound_operations_only() {
        let spec = ChannelSpec::new("conversations:me", Scope::Viewer)
            .bind(Binding::all("conversations"))
            .bind(Binding::on("messages", Operation::Insert));

        assert!(spec.accepts(&RawChange::delete("conversations", json!({"id": "c1"}))));
        assert!(spec.accepts(&RawChange::insert("messages", json!({}))));
        assert!(!spec.accepts(&RawChange::delete("messages", json!({"id": "m1"}))));
        assert!(!spec.accepts(&RawChange::insert("notifications", json!({}))));
    }

    #[test]
    fn test_raw_change_decoding() {
        let change: RawChange = serde_json::from_value(json!({
            "table": "messages",
            "eventType": "DELETE",
            "old": {"id": "m1"},
        }))
        .unwrap();
        assert_eq!(change.operation, Operation::Delete);
        assert_eq!(change.old_id().unwrap(), EntityId::from("m1"));
        assert!(matches!(
            change.record::<serde_json::Value>(),
            Err(SyncError::MissingRecord("new"))
        ));
        assert_eq!(Filter::eq("conversation_id", "c1").to_string(), "conversation_id=eq.c1");
    }
}
