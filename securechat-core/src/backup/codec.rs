use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::envelope::{is_supported_version, BackupEnvelope, BACKUP_ALGORITHM, BACKUP_FORMAT_VERSION};
use super::kdf::{iterations_in_range, salt_for, BackupKeyDeriver, PasswordKdf, SaltRule, PBKDF2_ITERATIONS};
use super::snapshot::BackupSnapshot;
use crate::crypto::cipher;
use crate::error::BackupError;

/// Encrypts snapshots into envelopes and back.
pub struct BackupCodec<K = BackupKeyDeriver> {
    kdf: K,
    iterations: u32,
}

impl Default for BackupCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupCodec {
    pub fn new() -> Self {
        Self::with_kdf(BackupKeyDeriver)
    }
}

impl<K: PasswordKdf> BackupCodec<K> {
    pub fn with_kdf(kdf: K) -> Self {
        Self {
            kdf,
            iterations: PBKDF2_ITERATIONS,
        }
    }

    pub fn kdf(&self) -> &K {
        &self.kdf
    }

    /// Serialize, derive the password key and seal under a fresh IV.
    pub fn create_envelope(
        &self,
        snapshot: &BackupSnapshot,
        password: &str,
        user_id: &str,
    ) -> Result<BackupEnvelope, BackupError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(snapshot)?);
        let key = self
            .kdf
            .derive_with_iterations(password, &salt_for(user_id), self.iterations)?;
        let (iv, ciphertext) = cipher::seal(key.as_bytes(), &plaintext)?;

        debug!(
            user_id = %user_id,
            bytes = ciphertext.len(),
            "Sealed backup snapshot"
        );

        Ok(BackupEnvelope {
            version: BACKUP_FORMAT_VERSION,
            algorithm: BACKUP_ALGORITHM.to_string(),
            iterations: self.iterations,
            iv: BASE64.encode(iv),
            ciphertext: BASE64.encode(ciphertext),
            timestamp: Utc::now().timestamp_millis(),
            user_id: user_id.to_string(),
        })
    }

    /// Decrypt an envelope for `user_id`.
    ///
    /// The key is re-derived with the salt rule applied to the account the
    /// envelope was created for; the authenticated snapshot must then name
    /// `user_id` as its owner.
    pub fn open_envelope(
        &self,
        envelope: &BackupEnvelope,
        password: &str,
        user_id: &str,
    ) -> Result<BackupSnapshot, BackupError> {
        if !is_supported_version(envelope.version) {
            return Err(BackupError::UnsupportedBackupVersion(envelope.version));
        }
        if envelope.algorithm != BACKUP_ALGORITHM {
            return Err(BackupError::MalformedEnvelope(format!(
                "unknown algorithm {:?}",
                envelope.algorithm
            )));
        }
        if !iterations_in_range(envelope.iterations) {
            return Err(BackupError::MalformedEnvelope(format!(
                "iteration count {} out of range",
                envelope.iterations
            )));
        }

        let iv = BASE64
            .decode(&envelope.iv)
            .map_err(|_| BackupError::InvalidPassword)?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|_| BackupError::InvalidPassword)?;

        let plaintext = Zeroizing::new(self.decrypt_with_salt_rules(
            envelope,
            password,
            &iv,
            &ciphertext,
        )?);

        let snapshot: BackupSnapshot = serde_json::from_slice(&plaintext)
            .map_err(|e| BackupError::MalformedEnvelope(format!("unreadable contents: {}", e)))?;

        if snapshot.user_id != user_id {
            warn!(user_id = %user_id, "Rejected backup owned by another account");
            return Err(BackupError::OwnershipMismatch);
        }

        Ok(snapshot)
    }

    /// Try each salt rule of the envelope's version; the GCM tag tells which
    /// one the writer used.
    fn decrypt_with_salt_rules(
        &self,
        envelope: &BackupEnvelope,
        password: &str,
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, BackupError> {
        for rule in SaltRule::for_version(envelope.version) {
            let salt = rule.salt(&envelope.user_id);
            let key = self
                .kdf
                .derive_with_iterations(password, &salt, envelope.iterations)?;
            if let Ok(plaintext) = cipher::open(key.as_bytes(), iv, ciphertext) {
                if *rule != SaltRule::Current {
                    debug!(version = envelope.version, salt_rule = ?rule, "Opened legacy backup");
                }
                return Ok(plaintext);
            }
        }
        Err(BackupError::InvalidPassword)
    }
}
