use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backup::{BackupCodec, BackupService, BlobStorage};
use crate::crypto::{CryptoManager, EncryptedMessage};
use crate::error::{ChatError, CryptoError};
use crate::inbox::{DecryptedMessage, Inbox};
use crate::models::{Contact, StoredMessage};
use crate::store::{LocalStore, SharedStore};

/// Everything one logged-in user needs: identity, session keys and history.
///
/// `open` on login, `close` on logout. Nothing here is global; several
/// contexts can live in one process.
pub struct ChatContext<S> {
    user_id: String,
    crypto: Arc<CryptoManager>,
    store: SharedStore<S>,
}

impl<S: LocalStore + 'static> ChatContext<S> {
    pub fn new(user_id: impl Into<String>, store: SharedStore<S>) -> Self {
        Self {
            user_id: user_id.into(),
            crypto: Arc::new(CryptoManager::new()),
            store,
        }
    }

    /// Generate this session's identity key; returns the public key to publish.
    pub fn open(&self) -> Result<String, CryptoError> {
        let public_key = self.crypto.open()?;
        info!(user_id = %self.user_id, "Chat context opened");
        Ok(public_key)
    }

    pub fn close(&self) {
        self.crypto.close();
        info!(user_id = %self.user_id, "Chat context closed");
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn crypto(&self) -> &Arc<CryptoManager> {
        &self.crypto
    }

    pub fn store(&self) -> &SharedStore<S> {
        &self.store
    }

    /// Encrypt `text` for a peer and keep the plaintext in local history.
    pub async fn send_message(
        &self,
        peer_id: &str,
        peer_public_key: &str,
        text: &str,
    ) -> Result<EncryptedMessage, ChatError> {
        let encrypted = self.crypto.encrypt_for(peer_id, peer_public_key, text).await?;

        let stored = StoredMessage::text(&self.user_id, text);
        self.store.read().await.append(peer_id, &stored)?;

        debug!(peer_id = %peer_id, message_id = %stored.id, "Message encrypted");
        Ok(encrypted)
    }

    pub async fn send_to_contact(&self, contact: &Contact, text: &str) -> Result<EncryptedMessage, ChatError> {
        let public_key = contact
            .public_key
            .as_deref()
            .ok_or_else(|| ChatError::MissingPublicKey(contact.id.clone()))?;
        self.send_message(&contact.id, public_key, text).await
    }

    /// Inbox wired to this context's keys and store.
    pub fn inbox(&self, output: mpsc::UnboundedSender<DecryptedMessage>) -> Inbox<S> {
        Inbox::new(Arc::clone(&self.crypto), Arc::clone(&self.store), output)
    }

    /// Backup service over this context's store.
    pub fn backups<B: BlobStorage>(&self, storage: Arc<B>) -> BackupService<S, B> {
        BackupService::new(Arc::clone(&self.store), storage, BackupCodec::new())
    }
}
