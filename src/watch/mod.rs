//! In-process watchers for derived views.
//!
//! Every mutation of the entity store is published as a [`CacheEvent`]:
//! - record upserts and removals, tagged with domain and scope
//! - counter changes
//! - bulk reloads and logout clears
//!
//! Watchers have bounded buffers; one that falls behind is dropped and gets
//! a final `Dropped` event, so views should re-read the store when they see it.
//!
//! # Example
//!
//! ```ignore
//! let handle = engine.watch(WatchFilter::scope(Scope::Conversation(conversation_id)));
//!
//! while let Ok(event) = handle.recv() {
//!     match event {
//!         CacheEvent::Upserted { .. } | CacheEvent::Removed { .. } => redraw(),
//!         CacheEvent::Dropped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::WatchManager;
pub use types::{CacheEvent, DropReason, WatchConfig, WatchFilter, WatchHandle, WatchId};
