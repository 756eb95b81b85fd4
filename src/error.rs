//! Error types for store access and synchronization.

use thiserror::Error;

use crate::record::RecordError;

/// Errors returned by a [`StoreClient`](crate::store::StoreClient).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] RecordError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised inside the sync core.
///
/// None of these reach business-logic callers: the public sync entry points
/// log them and return booleans or reports.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote store unreachable: {0}")]
    Connectivity(String),

    #[error("Push to remote table '{table}' failed: {source}")]
    Push {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("Pull from remote table '{table}' failed: {source}")]
    Pull {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Record rejected: {0}")]
    InvalidRecord(#[from] RecordError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue persistence error: {0}")]
    Queue(String),
}

impl SyncError {
    /// Whether retrying later through the queue can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity(_) | SyncError::Push { .. } | SyncError::Store(_)
        )
    }
}
