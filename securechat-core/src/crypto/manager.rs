use super::cipher;
use super::identity::IdentityKeyPair;
use super::session::SessionKeyCache;
use super::types::{EncryptedMessage, SessionKey};
use crate::error::CryptoError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Identity key plus the session keys derived from it.
///
/// Keys in `sessions` were all derived from `identity`; the pair is swapped
/// as a unit so a derivation that outlives `open` or `close` lands in the
/// retired session, never in the current one.
struct Session {
   identity: IdentityKeyPair,
   sessions: SessionKeyCache,
}

/// Holds the session's identity key and per-peer session keys.
///
/// One instance per logged-in session. `open` creates the identity key,
/// `close` drops it together with every derived session key.
pub struct CryptoManager {
   current: RwLock<Option<Arc<Session>>>,
}

impl Default for CryptoManager {
   fn default() -> Self {
      Self::new()
   }
}

impl CryptoManager {
   pub fn new() -> Self {
      Self {
         current: RwLock::new(None),
      }
   }

   /// Generate the identity key for this session
   pub fn open(&self) -> Result<String, CryptoError> {
      let identity = IdentityKeyPair::generate()?;
      let public_key = identity.export_public();
      info!(fingerprint = %identity.fingerprint(), "Generated identity key");

      let session = Arc::new(Session {
         identity,
         sessions: SessionKeyCache::new(),
      });
      *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);

      Ok(public_key)
   }

   /// Forget the identity key and all session keys
   pub fn close(&self) {
      let retired = self
         .current
         .write()
         .unwrap_or_else(PoisonError::into_inner)
         .take();
      if let Some(session) = retired {
         session.sessions.clear();
         info!("Closed crypto session");
      }
   }

   pub fn is_open(&self) -> bool {
      self
         .current
         .read()
         .unwrap_or_else(PoisonError::into_inner)
         .is_some()
   }

   fn session(&self) -> Result<Arc<Session>, CryptoError> {
      self
         .current
         .read()
         .unwrap_or_else(PoisonError::into_inner)
         .clone()
         .ok_or(CryptoError::SessionClosed)
   }

   /// Our public key as base64 SPKI
   pub fn public_key(&self) -> Result<String, CryptoError> {
      Ok(self.session()?.identity.export_public())
   }

   pub fn fingerprint(&self) -> Result<String, CryptoError> {
      Ok(self.session()?.identity.fingerprint())
   }

   /// Get the session key for a peer, deriving it on first contact
   pub async fn session_key(
      &self,
      peer_id: &str,
      peer_public_key: &str,
   ) -> Result<SessionKey, CryptoError> {
      let session = self.session()?;
      Self::key_in(&session, peer_id, peer_public_key).await
   }

   async fn key_in(
      session: &Session,
      peer_id: &str,
      peer_public_key: &str,
   ) -> Result<SessionKey, CryptoError> {
      let der = BASE64
         .decode(peer_public_key.trim())
         .map_err(|_| CryptoError::InvalidKeyFormat)?;

      session
         .sessions
         .get_or_derive(&session.identity, peer_id, &der)
         .await
   }

   fn with_current<T>(&self, f: impl FnOnce(&Session) -> T, closed: T) -> T {
      match self.session() {
         Ok(session) => f(&session),
         Err(_) => closed,
      }
   }

   /// Check if a session exists for a peer
   pub fn has_session(&self, peer_id: &str) -> bool {
      self.with_current(|s| s.sessions.contains(peer_id), false)
   }

   pub fn session_count(&self) -> usize {
      self.with_current(|s| s.sessions.len(), 0)
   }

   /// Key derivations performed since the last `open`
   pub fn derivation_count(&self) -> usize {
      self.with_current(|s| s.sessions.derivation_count(), 0)
   }

   /// Encrypt a message for a peer using AES-256-GCM
   pub async fn encrypt_for(
      &self,
      peer_id: &str,
      peer_public_key: &str,
      plaintext: &str,
   ) -> Result<EncryptedMessage, CryptoError> {
      // Key and advertised public key must come from the same identity
      let session = self.session()?;
      let key = Self::key_in(&session, peer_id, peer_public_key).await?;
      let payload = cipher::encrypt(plaintext, &key)?;
      Ok(EncryptedMessage::new(payload, session.identity.export_public()))
   }

   /// Decrypt a message from a peer.
   ///
   /// On first contact the key carried in the message is used to derive
   /// the session key.
   pub async fn decrypt_from(
      &self,
      peer_id: &str,
      message: &EncryptedMessage,
   ) -> Result<String, CryptoError> {
      let key = self.session_key(peer_id, &message.sender_public_key).await?;
      cipher::decrypt(&message.ciphertext, &message.iv, &key)
   }

   /// Decrypt for display; any failure becomes the placeholder text
   pub async fn decrypt_for_display(&self, peer_id: &str, message: &EncryptedMessage) -> String {
      match self.decrypt_from(peer_id, message).await {
         Ok(plaintext) => plaintext,
         Err(e) => {
            warn!(peer_id = %peer_id, error = %e, "Unable to decrypt message");
            cipher::UNDECRYPTABLE_PLACEHOLDER.to_string()
         }
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn opened() -> CryptoManager {
      let manager = CryptoManager::new();
      manager.open().unwrap();
      manager
   }

   #[tokio::test]
   async fn test_two_parties_exchange_messages() {
      let alice = opened();
      let bob = opened();
      let alice_pub = alice.public_key().unwrap();
      let bob_pub = bob.public_key().unwrap();

      let sealed = alice.encrypt_for("bob", &bob_pub, "hi bob").await.unwrap();
      assert_eq!(sealed.sender_public_key, alice_pub);
      assert_eq!(bob.decrypt_from("alice", &sealed).await.unwrap(), "hi bob");

      let reply = bob.encrypt_for("alice", &alice_pub, "hi alice").await.unwrap();
      assert_eq!(alice.decrypt_from("bob", &reply).await.unwrap(), "hi alice");

      assert_eq!(alice.derivation_count(), 1);
      assert_eq!(bob.derivation_count(), 1);
   }

   #[tokio::test]
   async fn test_closed_manager_refuses_work() {
      let manager = CryptoManager::new();
      assert!(!manager.is_open());
      assert_eq!(manager.public_key(), Err(CryptoError::SessionClosed));

      let peer = opened();
      let err = manager
         .encrypt_for("peer", &peer.public_key().unwrap(), "hello")
         .await
         .unwrap_err();
      assert_eq!(err, CryptoError::SessionClosed);
   }

   #[tokio::test]
   async fn test_close_drops_sessions() {
      let alice = opened();
      let bob = opened();
      alice
         .session_key("bob", &bob.public_key().unwrap())
         .await
         .unwrap();
      assert!(alice.has_session("bob"));

      alice.close();
      assert!(!alice.is_open());
      assert!(!alice.has_session("bob"));
      assert_eq!(alice.session_count(), 0);
   }

   #[tokio::test]
   async fn test_reopen_rotates_identity() {
      let manager = opened();
      let first = manager.public_key().unwrap();
      manager.open().unwrap();
      assert_ne!(first, manager.public_key().unwrap());
   }

   #[tokio::test]
   async fn test_derivation_across_reopen_stays_in_old_session() {
      let manager = opened();
      let bob = opened();
      let bob_pub = bob.public_key().unwrap();

      // A derivation that started before the reopen finishes after it
      let retired = manager.session().unwrap();
      manager.open().unwrap();
      let stale = CryptoManager::key_in(&retired, "bob", &bob_pub).await.unwrap();

      assert!(!manager.has_session("bob"));
      assert_eq!(manager.derivation_count(), 0);

      let fresh = manager.session_key("bob", &bob_pub).await.unwrap();
      assert_ne!(stale.as_bytes(), fresh.as_bytes());

      // Bob can only read what the current identity sends
      let sealed = manager.encrypt_for("bob", &bob_pub, "after reopen").await.unwrap();
      assert_eq!(sealed.sender_public_key, manager.public_key().unwrap());
      assert_eq!(bob.decrypt_from("me", &sealed).await.unwrap(), "after reopen");
   }

   #[tokio::test]
   async fn test_close_during_derivation_leaves_nothing_behind() {
      let manager = opened();
      let bob = opened();

      let retired = manager.session().unwrap();
      manager.close();
      CryptoManager::key_in(&retired, "bob", &bob.public_key().unwrap())
         .await
         .unwrap();

      assert!(!manager.is_open());
      assert_eq!(manager.session_count(), 0);
      assert!(!manager.has_session("bob"));
   }

   #[tokio::test]
   async fn test_invalid_peer_key_rejected() {
      let alice = opened();
      let err = alice.encrypt_for("mallory", "AAAA", "hi").await.unwrap_err();
      assert_eq!(err, CryptoError::InvalidKeyFormat);
      assert!(!alice.has_session("mallory"));
   }

   #[tokio::test]
   async fn test_display_placeholder_for_foreign_ciphertext() {
      let alice = opened();
      let bob = opened();
      let eve = opened();

      // Eve encrypts to bob, but presents the message as coming from alice's
      // conversation where bob already has a different session key cached
      bob.session_key("alice", &alice.public_key().unwrap())
         .await
         .unwrap();
      let forged = eve
         .encrypt_for("bob", &bob.public_key().unwrap(), "trust me")
         .await
         .unwrap();

      assert_eq!(
         bob.decrypt_for_display("alice", &forged).await,
         cipher::UNDECRYPTABLE_PLACEHOLDER
      );
   }
}
