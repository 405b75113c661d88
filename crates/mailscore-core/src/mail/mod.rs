//! Mail-store collaborator: email model, store interface and a file-backed
//! mailbox.

mod mailbox;
mod model;
mod store;

pub use mailbox::{MailboxFile, StoredMessage};
pub use model::{Email, Folder, MessageState, sender_address};
pub use store::{MailStore, MailStoreError, MailStoreResult};
