//! # Potluck Sync
//!
//! Realtime change synchronization and local cache reconciliation for a
//! social event-coordination client.
//!
//! ## Core Concepts
//!
//! - **Entity Store**: normalized, keyed collections with ordered indices
//!   and incrementally maintained counters; the single source of truth
//! - **Channels**: named change-feed subscriptions with single-flight
//!   reconnect and scope-bound teardown
//! - **Routers**: per-domain bindings that decode and enrich raw changes
//! - **Reconcilers**: apply one change under dedupe, self-echo, ordering,
//!   retention and counter rules
//! - **Bulk Loader**: initial fetch per scope with a safe handoff to the
//!   live stream
//!
//! ## Example
//!
//! ```ignore
//! use potluck_sync::{SyncConfig, SyncEngine, Scope, Notification, CounterKey};
//!
//! let engine = SyncEngine::new(SyncConfig::default(), feed, backend, auth);
//! engine.start().await?;
//!
//! let notifications: Vec<Notification> = engine.entities(&Scope::Viewer);
//! let badge = engine.counter(&CounterKey::UnreadNotifications);
//!
//! engine.open_conversation(&conversation_id).await?;
//! engine.apply_local_insert(message);
//! ```

pub mod capabilities;
pub mod config;
pub mod engine;
pub mod entities;
pub mod error;
pub mod loader;
pub mod reconcile;
pub mod router;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod watch;

// Re-exports
pub use capabilities::{AuthSession, ChangeFeed, DataAccess, FeedChannel};
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use entities::{
    Comment, Contribution, Conversation, ConversationKind, ConversationSummary, EventParticipant,
    EventSnapshot, Friendship, FriendshipStatus, Message, Notification, PendingRequest, Profile,
    RequestKind, Rsvp, SyncEntity,
};
pub use error::{Result, SyncError};
pub use loader::BulkLoader;
pub use reconcile::{Change, ChangeKind, IgnoreReason, Outcome, Reconcile};
pub use router::{ProfileCache, Router, RouterContext};
pub use store::{Collection, EntityStore, Order, StoreState};
pub use subscriptions::{
    Binding, ChangeHandler, ChannelHandle, ChannelSpec, ChannelState, ChannelStatus, FeedEvent,
    FeedSink, Filter, RawChange, SubscriptionManager,
};
pub use types::*;
pub use watch::{CacheEvent, DropReason, WatchConfig, WatchFilter, WatchHandle, WatchId};
