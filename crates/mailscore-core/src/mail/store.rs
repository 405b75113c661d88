//! The mail-store collaborator interface.

use std::future::Future;

use chrono::{DateTime, Utc};

use super::model::{Email, MessageState};

/// Errors reported by a mail store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailStoreError {
    /// The store could not be reached.
    #[error("Mail store unavailable: {0}")]
    Unavailable(String),

    /// The referenced message or label does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation failed.
    #[error("Operation failed: {0}")]
    Operation(String),
}

/// Result type for mail-store calls.
pub type MailStoreResult<T> = std::result::Result<T, MailStoreError>;

/// Operations the pipeline needs from a mail store.
///
/// Implementations bound their own I/O with timeouts. Label names passed in
/// are fully qualified (prefix included).
pub trait MailStore {
    /// List up to `limit` emails received at or after `since`, oldest first.
    fn list_emails(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = MailStoreResult<Vec<Email>>> + Send;

    /// Create a label if it does not exist yet.
    fn ensure_label(
        &self,
        name: &str,
        color: Option<&str>,
    ) -> impl Future<Output = MailStoreResult<()>> + Send;

    /// Add a label to a message.
    fn apply_label(
        &self,
        email_id: &str,
        label: &str,
    ) -> impl Future<Output = MailStoreResult<()>> + Send;

    /// Remove a label from a message.
    fn remove_label(
        &self,
        email_id: &str,
        label: &str,
    ) -> impl Future<Output = MailStoreResult<()>> + Send;

    /// Move a message to spam.
    fn move_to_spam(&self, email_id: &str) -> impl Future<Output = MailStoreResult<()>> + Send;

    /// Archive a message.
    fn archive(&self, email_id: &str) -> impl Future<Output = MailStoreResult<()>> + Send;

    /// Star a message.
    fn star(&self, email_id: &str) -> impl Future<Output = MailStoreResult<()>> + Send;

    /// Current state of a message, `None` if it no longer exists.
    fn message_state(
        &self,
        email_id: &str,
    ) -> impl Future<Output = MailStoreResult<Option<MessageState>>> + Send;
}
