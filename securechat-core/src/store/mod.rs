//! Local persistence of decrypted history and contacts.
//!
//! The core only talks to [`LocalStore`]; `SqliteStore` is the on-disk
//! adapter and `MemoryStore` backs tests and throwaway sessions.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{Contact, StoredMessage};

/// Store shared between the inbox, senders and the backup pipeline.
///
/// Restore takes the write guard for its whole merge.
pub type SharedStore<S> = Arc<RwLock<S>>;

pub fn shared<S: LocalStore>(store: S) -> SharedStore<S> {
    Arc::new(RwLock::new(store))
}

/// Durable, order-preserving conversation history keyed by conversation id.
pub trait LocalStore: Send + Sync {
    /// Messages of one conversation in stored order; empty if unknown.
    fn get(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

    /// Replace a conversation's history.
    fn put(&self, conversation_id: &str, messages: &[StoredMessage]) -> Result<(), StoreError>;

    /// All conversation ids that have history.
    fn list_keys(&self) -> Result<Vec<String>, StoreError>;

    fn remove(&self, conversation_id: &str) -> Result<(), StoreError>;

    fn contacts(&self) -> Result<Vec<Contact>, StoreError>;

    fn replace_contacts(&self, contacts: &[Contact]) -> Result<(), StoreError>;

    /// Append one message to the end of a conversation.
    fn append(&self, conversation_id: &str, message: &StoredMessage) -> Result<(), StoreError> {
        let mut messages = self.get(conversation_id)?;
        messages.push(message.clone());
        self.put(conversation_id, &messages)
    }

    /// Replace several conversations. Adapters that support transactions
    /// apply all of them or none.
    fn put_many(
        &self,
        conversations: &BTreeMap<String, Vec<StoredMessage>>,
    ) -> Result<(), StoreError> {
        for (conversation_id, messages) in conversations {
            self.put(conversation_id, messages)?;
        }
        Ok(())
    }

    /// Write a restored snapshot: replace the given conversations and the
    /// whole contact list. Adapters that support transactions apply both or
    /// neither.
    fn restore(
        &self,
        conversations: &BTreeMap<String, Vec<StoredMessage>>,
        contacts: &[Contact],
    ) -> Result<(), StoreError> {
        self.put_many(conversations)?;
        self.replace_contacts(contacts)
    }
}
