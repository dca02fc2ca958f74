use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::LocalStore;
use crate::error::StoreError;
use crate::models::{Contact, StoredMessage};

/// Volatile store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<BTreeMap<String, Vec<StoredMessage>>>,
    contacts: Mutex<Vec<Contact>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(conversations.get(conversation_id).cloned().unwrap_or_default())
    }

    fn put(&self, conversation_id: &str, messages: &[StoredMessage]) -> Result<(), StoreError> {
        let mut conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        conversations.insert(conversation_id.to_string(), messages.to_vec());
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(conversations.keys().cloned().collect())
    }

    fn remove(&self, conversation_id: &str) -> Result<(), StoreError> {
        let mut conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        conversations.remove(conversation_id);
        Ok(())
    }

    fn contacts(&self) -> Result<Vec<Contact>, StoreError> {
        Ok(self.contacts.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn replace_contacts(&self, contacts: &[Contact]) -> Result<(), StoreError> {
        *self.contacts.lock().unwrap_or_else(PoisonError::into_inner) = contacts.to_vec();
        Ok(())
    }

    fn append(&self, conversation_id: &str, message: &StoredMessage) -> Result<(), StoreError> {
        let mut conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }
}
