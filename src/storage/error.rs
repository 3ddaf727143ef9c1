//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, channel, etc.).

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No persistent store is configured, or it cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Failed to send command to writer actor.
    #[error("failed to send command to writer actor")]
    ChannelSend,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (e.g., task join failure).
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid data in database (e.g., unknown enum value).
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Stable identifier used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database_error",
            Self::Unavailable(_) => "store_unavailable",
            Self::ChannelSend => "store_busy",
            Self::Json(_) => "json_error",
            Self::Internal(_) => "internal_error",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}
