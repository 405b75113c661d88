//! Mail data models shared with the mail-store collaborator.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An email as pulled from the mail store.
///
/// Read-only to the core; everything else refers to it by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// Mail-store identifier.
    pub id: String,
    /// Sender header (`Name <addr>` or bare address).
    pub sender: String,
    /// Subject header.
    #[serde(default)]
    pub subject: String,
    /// Plain-text body or snippet.
    #[serde(default)]
    pub body: String,
    /// HTML body, used when no plain text is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
    /// When the mail store received the message.
    pub received_at: DateTime<Utc>,
}

impl Email {
    /// Creates a plain-text email.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            body_html: None,
            received_at,
        }
    }

    /// The bare sender address, lowercased.
    ///
    /// `"Jane <Jane@Example.com>"` yields `"jane@example.com"`.
    #[must_use]
    pub fn sender_address(&self) -> String {
        sender_address(&self.sender)
    }
}

/// Extract the lowercased address from a sender header.
#[must_use]
pub fn sender_address(sender: &str) -> String {
    let addr = match (sender.rfind('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if start < end => &sender[start + 1..end],
        _ => sender,
    };
    addr.trim().to_lowercase()
}

/// Where a message currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Folder {
    /// Still in the inbox.
    #[default]
    Inbox,
    /// Archived (out of the inbox, kept).
    Archive,
    /// Moved to spam.
    Spam,
    /// Deleted.
    Trash,
}

/// Current label/flag state of a message, as seen by the feedback loop.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageState {
    /// Label names currently on the message.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Whether the user starred the message.
    #[serde(default)]
    pub starred: bool,
    /// Current folder.
    #[serde(default)]
    pub folder: Folder,
}

impl MessageState {
    /// Whether the message was deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.folder == Folder::Trash
    }

    /// Whether the message has left the inbox without being deleted.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.folder == Folder::Archive
    }

    /// Whether the message is in spam.
    #[must_use]
    pub fn is_spam(&self) -> bool {
        self.folder == Folder::Spam
    }
}
