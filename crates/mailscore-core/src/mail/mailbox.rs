//! File-backed mailbox snapshot implementing [`MailStore`].
//!
//! The whole mailbox is held in memory and written back with
//! [`MailboxFile::flush`]. Used by the CLI for local runs and as the mail
//! store in tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{Email, Folder, MessageState};
use super::store::{MailStore, MailStoreError, MailStoreResult};
use crate::Result;

/// A message together with its mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// The email itself.
    #[serde(flatten)]
    pub email: Email,
    /// Labels, star and folder.
    #[serde(flatten)]
    pub state: MessageState,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MailboxData {
    /// Known labels and their colours.
    #[serde(default)]
    labels: BTreeMap<String, Option<String>>,
    #[serde(default)]
    messages: Vec<StoredMessage>,
}

/// In-memory mailbox, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct MailboxFile {
    path: Option<PathBuf>,
    data: Mutex<MailboxData>,
}

impl MailboxFile {
    /// Create an empty mailbox with no backing file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load a mailbox snapshot from disk.
    ///
    /// A missing file yields an empty mailbox that will be created on flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = read_data(&path).await?;
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// Replace the in-memory snapshot with the file's current contents.
    ///
    /// Picks up mail and state changes written by others since the last
    /// load. No-op for in-memory mailboxes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed. The
    /// current snapshot is kept in that case.
    pub async fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let data = read_data(path).await?;
        *self.lock() = data;
        Ok(())
    }

    /// Write the snapshot back to its file. No-op for in-memory mailboxes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let contents = serde_json::to_string_pretty(&*self.lock())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    /// Add a message to the inbox.
    pub fn insert(&self, email: Email) {
        self.lock().messages.push(StoredMessage {
            email,
            state: MessageState::default(),
        });
    }

    /// Mutate a message in place. Returns false if it does not exist.
    pub fn modify(&self, email_id: &str, f: impl FnOnce(&mut StoredMessage)) -> bool {
        let mut data = self.lock();
        data.messages
            .iter_mut()
            .find(|m| m.email.id == email_id)
            .map(f)
            .is_some()
    }

    /// Remove a message entirely (expunged from the store).
    pub fn remove(&self, email_id: &str) -> bool {
        let mut data = self.lock();
        let before = data.messages.len();
        data.messages.retain(|m| m.email.id != email_id);
        data.messages.len() != before
    }

    /// Names of all labels that exist on the store.
    #[must_use]
    pub fn label_names(&self) -> Vec<String> {
        self.lock().labels.keys().cloned().collect()
    }

    /// Number of messages in the mailbox.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    /// Whether the mailbox holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MailboxData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_message<T>(
        &self,
        email_id: &str,
        f: impl FnOnce(&mut StoredMessage) -> T,
    ) -> MailStoreResult<T> {
        let mut data = self.lock();
        data.messages
            .iter_mut()
            .find(|m| m.email.id == email_id)
            .map(f)
            .ok_or_else(|| MailStoreError::NotFound(format!("message {email_id}")))
    }

    fn set_folder(&self, email_id: &str, folder: Folder) -> MailStoreResult<()> {
        self.with_message(email_id, |m| m.state.folder = folder)
    }
}

async fn read_data(path: &Path) -> Result<MailboxData> {
    let data: MailboxData = match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => MailboxData::default(),
        Err(e) => return Err(e.into()),
    };

    tracing::debug!(path = %path.display(), messages = data.messages.len(), "Mailbox loaded");
    Ok(data)
}

impl MailStore for MailboxFile {
    async fn list_emails(&self, since: DateTime<Utc>, limit: usize) -> MailStoreResult<Vec<Email>> {
        let data = self.lock();
        let mut emails: Vec<Email> = data
            .messages
            .iter()
            .filter(|m| matches!(m.state.folder, Folder::Inbox | Folder::Archive))
            .filter(|m| m.email.received_at >= since)
            .map(|m| m.email.clone())
            .collect();
        drop(data);

        emails.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        emails.truncate(limit);
        Ok(emails)
    }

    async fn ensure_label(&self, name: &str, color: Option<&str>) -> MailStoreResult<()> {
        self.lock()
            .labels
            .entry(name.to_string())
            .or_insert_with(|| color.map(ToString::to_string));
        Ok(())
    }

    async fn apply_label(&self, email_id: &str, label: &str) -> MailStoreResult<()> {
        if !self.lock().labels.contains_key(label) {
            return Err(MailStoreError::NotFound(format!("label {label}")));
        }
        self.with_message(email_id, |m| {
            m.state.labels.insert(label.to_string());
        })
    }

    async fn remove_label(&self, email_id: &str, label: &str) -> MailStoreResult<()> {
        self.with_message(email_id, |m| {
            m.state.labels.remove(label);
        })
    }

    async fn move_to_spam(&self, email_id: &str) -> MailStoreResult<()> {
        self.set_folder(email_id, Folder::Spam)
    }

    async fn archive(&self, email_id: &str) -> MailStoreResult<()> {
        self.set_folder(email_id, Folder::Archive)
    }

    async fn star(&self, email_id: &str) -> MailStoreResult<()> {
        self.with_message(email_id, |m| m.state.starred = true)
    }

    async fn message_state(&self, email_id: &str) -> MailStoreResult<Option<MessageState>> {
        let data = self.lock();
        Ok(data
            .messages
            .iter()
            .find(|m| m.email.id == email_id)
            .map(|m| m.state.clone()))
    }
}
