use rusqlite::{params, Connection, Transaction};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::info;

use super::LocalStore;
use crate::error::StoreError;
use crate::models::{Contact, StoredMessage};

/// SQLite-backed history store.
pub struct SqliteStore(Mutex<Connection>);

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened message store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            -- Decrypted message history, ordered by position within a conversation
            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                message_type TEXT DEFAULT 'text',
                status TEXT DEFAULT 'sent',
                created_at INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, position)
            );

            -- Contact list as last received from the backend
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                display_name TEXT,
                public_key TEXT,
                position INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
            ",
        )?;

        Ok(Self(Mutex::new(conn)))
    }

    fn write_conversation(
        tx: &Transaction<'_>,
        conversation_id: &str,
        messages: &[StoredMessage],
    ) -> Result<(), StoreError> {
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            [conversation_id],
        )?;

        let mut stmt = tx.prepare(
            "INSERT INTO messages (conversation_id, position, id, sender_id, content, message_type, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for (position, message) in messages.iter().enumerate() {
            stmt.execute(params![
                conversation_id,
                position as i64,
                message.id,
                message.sender_id,
                message.content,
                message.message_type,
                message.status,
                message.created_at,
            ])?;
        }
        Ok(())
    }

    fn write_contacts(tx: &Transaction<'_>, contacts: &[Contact]) -> Result<(), StoreError> {
        tx.execute("DELETE FROM contacts", [])?;
        let mut stmt = tx.prepare(
            "INSERT INTO contacts (id, username, display_name, public_key, position)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
             username = ?2, display_name = ?3, public_key = ?4, position = ?5",
        )?;
        for (position, contact) in contacts.iter().enumerate() {
            stmt.execute(params![
                contact.id,
                contact.username,
                contact.display_name,
                contact.public_key,
                position as i64,
            ])?;
        }
        Ok(())
    }
}

impl LocalStore for SqliteStore {
    fn get(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, content, message_type, status, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY position ASC",
        )?;

        let messages = stmt
            .query_map([conversation_id], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    content: row.get(2)?,
                    message_type: row.get(3)?,
                    status: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    fn put(&self, conversation_id: &str, messages: &[StoredMessage]) -> Result<(), StoreError> {
        let mut conn = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        Self::write_conversation(&tx, conversation_id, messages)?;
        tx.commit()?;
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT DISTINCT conversation_id FROM messages ORDER BY conversation_id")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn remove(&self, conversation_id: &str) -> Result<(), StoreError> {
        let conn = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            [conversation_id],
        )?;
        Ok(())
    }

    fn contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let conn = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT id, username, display_name, public_key FROM contacts ORDER BY position ASC",
        )?;
        let contacts = stmt
            .query_map([], |row| {
                Ok(Contact {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    display_name: row.get(2)?,
                    public_key: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    fn replace_contacts(&self, contacts: &[Contact]) -> Result<(), StoreError> {
        let mut conn = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        Self::write_contacts(&tx, contacts)?;
        tx.commit()?;
        Ok(())
    }

    fn append(&self, conversation_id: &str, message: &StoredMessage) -> Result<(), StoreError> {
        let conn = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO messages (conversation_id, position, id, sender_id, content, message_type, status, created_at)
             VALUES (?1,
                     (SELECT COALESCE(MAX(position) + 1, 0) FROM messages WHERE conversation_id = ?1),
                     ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                conversation_id,
                message.id,
                message.sender_id,
                message.content,
                message.message_type,
                message.status,
                message.created_at,
            ],
        )?;
        Ok(())
    }

    fn put_many(
        &self,
        conversations: &BTreeMap<String, Vec<StoredMessage>>,
    ) -> Result<(), StoreError> {
        let mut conn = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        for (conversation_id, messages) in conversations {
            Self::write_conversation(&tx, conversation_id, messages)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn restore(
        &self,
        conversations: &BTreeMap<String, Vec<StoredMessage>>,
        contacts: &[Contact],
    ) -> Result<(), StoreError> {
        let mut conn = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        for (conversation_id, messages) in conversations {
            Self::write_conversation(&tx, conversation_id, messages)?;
        }
        Self::write_contacts(&tx, contacts)?;
        tx.commit()?;
        Ok(())
    }
}
