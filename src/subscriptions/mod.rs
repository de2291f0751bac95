//! Change-feed channels.
//!
//! One named channel per (topic, scope) pair:
//! - opened only with an authenticated session
//! - supervised through the transport's status reports
//! - reconnected after a fixed delay, at most one timer per channel
//! - torn down with its scope, after which nothing it delivered is applied
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new(feed, auth, SyncConfig::default());
//!
//! let spec = ChannelSpec::new("notifications:alice", Scope::Viewer).bind(
//!     Binding::all("notifications").filtered(Filter::eq("user_id", "alice")),
//! );
//! let handle = manager.open(spec, Arc::new(router))?;
//!
//! // Later, when the scope ends.
//! manager.close(&handle);
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    Binding, ChangeHandler, ChannelHandle, ChannelSpec, ChannelState, ChannelStatus, FeedEvent,
    FeedSink, Filter, RawChange,
};
