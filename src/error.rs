//! Error types for the sync layer.

use crate::types::{Domain, EntityId};
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No authenticated session")]
    NotAuthenticated,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Bulk load of {domain:?} failed: {reason}")]
    Load { domain: Domain, reason: String },

    #[error("Parent record unavailable: {0}")]
    ParentUnavailable(EntityId),

    #[error("Payload decode error: {0}")]
    Decode(String),

    #[error("Missing {0} record in change payload")]
    MissingRecord(&'static str),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid channel transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Scope is not active: {0}")]
    ScopeInactive(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
