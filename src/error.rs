//! Error types for the sync layer.

use std::time::Duration;
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    /// The request was superseded or aborted on purpose. Never surfaced to views.
    #[error("Request cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Mutation rejected: {0}")]
    Mutation(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Sync context already released")]
    ContextReleased,
}

impl SyncError {
    /// Whether this failure only reflects an intentional supersession.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            SyncError::Deserialization(e.to_string())
        } else {
            SyncError::Serialization(e.to_string())
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
