//! Error types for the core library.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::mail::MailStoreError;
use crate::policy::InvalidScoreError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mail store operation failed at batch level.
    #[error("Mail store error: {0}")]
    MailStore(#[from] MailStoreError),

    /// A score record was rejected by the label policy.
    #[error(transparent)]
    InvalidScore(#[from] InvalidScoreError),

    /// Attempt to move the processing window backwards.
    #[error("Ledger conflict: window is at {current}, refusing to move it to {requested}")]
    LedgerConflict {
        /// Window start currently stored.
        current: DateTime<Utc>,
        /// Requested new window start.
        requested: DateTime<Utc>,
    },

    /// Another batch holds the processing lock.
    #[error("Batch already in progress (held by {owner} since {since})")]
    BatchInProgress {
        /// Identifier of the lock holder.
        owner: String,
        /// When the lock was taken.
        since: DateTime<Utc>,
    },

    /// The batch was cancelled before it completed.
    #[error("Batch cancelled after {processed} emails")]
    Cancelled {
        /// Emails durably recorded before cancellation.
        processed: usize,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
