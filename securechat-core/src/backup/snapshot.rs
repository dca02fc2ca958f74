use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use super::envelope::BACKUP_FORMAT_VERSION;
use crate::error::StoreError;
use crate::models::{Contact, StoredMessage};
use crate::store::LocalStore;

/// Plaintext payload of a backup: every conversation plus the contact list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    #[serde(deserialize_with = "version_number")]
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    #[serde(default)]
    pub messages: BTreeMap<String, Vec<StoredMessage>>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub message_count: usize,
    pub contact_count: usize,
}

/// Outcome of merging a snapshot into the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub conversation_count: usize,
    pub message_count: usize,
    pub contact_count: usize,
    pub restored_at: DateTime<Utc>,
}

impl BackupSnapshot {
    pub fn new(
        user_id: &str,
        messages: BTreeMap<String, Vec<StoredMessage>>,
        contacts: Vec<Contact>,
    ) -> Self {
        let metadata = SnapshotMetadata {
            message_count: messages.values().map(Vec::len).sum(),
            contact_count: contacts.len(),
        };
        Self {
            version: BACKUP_FORMAT_VERSION,
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            messages,
            contacts,
            metadata,
        }
    }

    /// Read every conversation and the contact list from `store`.
    pub fn collect<S: LocalStore + ?Sized>(store: &S, user_id: &str) -> Result<Self, StoreError> {
        let mut messages = BTreeMap::new();
        for conversation_id in store.list_keys()? {
            let history = store.get(&conversation_id)?;
            messages.insert(conversation_id, history);
        }
        Ok(Self::new(user_id, messages, store.contacts()?))
    }

    /// Write the snapshot back. Each conversation in the snapshot replaces
    /// the stored one; the contact list is replaced wholesale. Conversations
    /// not in the snapshot are left alone.
    pub fn merge_into<S: LocalStore + ?Sized>(&self, store: &S) -> Result<RestoreSummary, StoreError> {
        store.restore(&self.messages, &self.contacts)?;

        Ok(RestoreSummary {
            conversation_count: self.messages.len(),
            message_count: self.messages.values().map(Vec::len).sum(),
            contact_count: self.contacts.len(),
            restored_at: Utc::now(),
        })
    }
}

/// Older clients wrote the snapshot version as a string such as "1.0".
fn version_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => text
            .split('.')
            .next()
            .and_then(|major| major.trim().parse().ok())
            .ok_or_else(|| de::Error::custom(format!("invalid snapshot version {:?}", text))),
    }
}
