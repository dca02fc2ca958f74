//! Inbound message processing.
//!
//! One consumer task per inbox drains the transport channel in arrival
//! order, so messages of a conversation are decrypted and stored in the
//! order they were received.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::crypto::{CryptoManager, EncryptedMessage, UNDECRYPTABLE_PLACEHOLDER};
use crate::error::StoreError;
use crate::models::StoredMessage;
use crate::store::{LocalStore, SharedStore};

/// Encrypted message as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub payload: EncryptedMessage,
    pub created_at: i64,
}

/// Message handed to the UI after decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    /// false when `content` is the placeholder
    pub decrypted: bool,
    pub created_at: i64,
}

pub struct Inbox<S> {
    crypto: Arc<CryptoManager>,
    store: SharedStore<S>,
    output: mpsc::UnboundedSender<DecryptedMessage>,
}

impl<S: LocalStore + 'static> Inbox<S> {
    pub fn new(
        crypto: Arc<CryptoManager>,
        store: SharedStore<S>,
        output: mpsc::UnboundedSender<DecryptedMessage>,
    ) -> Self {
        Self {
            crypto,
            store,
            output,
        }
    }

    /// Decrypt one message and append it to its conversation.
    ///
    /// Undecryptable messages are stored with the placeholder text rather
    /// than dropped.
    pub async fn process(&self, message: InboundMessage) -> Result<DecryptedMessage, StoreError> {
        let (content, decrypted) = match self
            .crypto
            .decrypt_from(&message.sender_id, &message.payload)
            .await
        {
            Ok(plaintext) => (plaintext, true),
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    sender_id = %message.sender_id,
                    error = %e,
                    "Storing undecryptable message"
                );
                (UNDECRYPTABLE_PLACEHOLDER.to_string(), false)
            }
        };

        let stored = StoredMessage {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            content: content.clone(),
            message_type: "text".to_string(),
            status: "delivered".to_string(),
            created_at: message.created_at,
        };
        self.store
            .read()
            .await
            .append(&message.conversation_id, &stored)?;

        Ok(DecryptedMessage {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content,
            decrypted,
            created_at: message.created_at,
        })
    }

    /// Consume `inbound` until the transport closes it.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            let message_id = message.id.clone();
            match self.process(message).await {
                Ok(decrypted) => {
                    if self.output.send(decrypted).is_err() {
                        debug!("Inbox output closed, stopping");
                        break;
                    }
                }
                Err(e) => {
                    error!(message_id = %message_id, error = %e, "Failed to store inbound message");
                }
            }
        }
        debug!("Inbox drained");
    }

    pub fn spawn(self, inbound: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        tokio::spawn(self.run(inbound))
    }
}
