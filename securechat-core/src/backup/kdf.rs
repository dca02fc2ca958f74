//! Password-based key derivation for backups.
//!
//! PBKDF2-HMAC-SHA256 over a salt built from the account id, so the same
//! password yields unrelated keys for different accounts. Deliberately slow;
//! derived keys are never cached.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::KEY_LEN;
use crate::error::CryptoError;

/// Iterations used for new backups (OWASP 2023 guidance for PBKDF2-SHA256).
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Upper bound accepted from an envelope, so a doctored file cannot stall restore.
pub const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;

/// How the PBKDF2 salt is built from the account id.
///
/// Version 1 files were written by two clients with different salt suffixes;
/// version 2 settled on one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltRule {
    /// `{user}-securechat-backup-v1`, used for every new backup
    Current,
    /// `{user}-backup-v1-securechat`
    LegacyV1,
    /// `{user}-backup-securechat-v1`
    LegacyV1Simple,
}

impl SaltRule {
    fn suffix(self) -> &'static str {
        match self {
            SaltRule::Current => "-securechat-backup-v1",
            SaltRule::LegacyV1 => "-backup-v1-securechat",
            SaltRule::LegacyV1Simple => "-backup-securechat-v1",
        }
    }

    pub fn salt(self, user_id: &str) -> Vec<u8> {
        format!("{}{}", user_id, self.suffix()).into_bytes()
    }

    /// Salt rules to try, in order, for an envelope of `version`.
    pub fn for_version(version: u32) -> &'static [SaltRule] {
        match version {
            1 => &[SaltRule::LegacyV1, SaltRule::LegacyV1Simple],
            2 => &[SaltRule::Current],
            _ => &[],
        }
    }
}

/// 256-bit backup encryption key. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BackupKey([u8; KEY_LEN]);

impl BackupKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for BackupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BackupKey(..)")
    }
}

/// Turns a password into a backup key.
pub trait PasswordKdf: Send + Sync {
    fn derive_with_iterations(
        &self,
        password: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<BackupKey, CryptoError>;
}

/// The production deriver.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupKeyDeriver;

impl BackupKeyDeriver {
    /// Derive with the iteration count used for new backups.
    pub fn derive(&self, password: &str, user_id: &str) -> Result<BackupKey, CryptoError> {
        self.derive_with_iterations(password, &salt_for(user_id), PBKDF2_ITERATIONS)
    }
}

impl PasswordKdf for BackupKeyDeriver {
    fn derive_with_iterations(
        &self,
        password: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<BackupKey, CryptoError> {
        if !iterations_in_range(iterations) {
            return Err(CryptoError::KeyDerivation(format!(
                "iteration count {} outside [{}, {}]",
                iterations, PBKDF2_ITERATIONS, MAX_PBKDF2_ITERATIONS
            )));
        }

        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);

        let derived = BackupKey(key);
        key.zeroize();
        Ok(derived)
    }
}

pub fn iterations_in_range(iterations: u32) -> bool {
    (PBKDF2_ITERATIONS..=MAX_PBKDF2_ITERATIONS).contains(&iterations)
}

/// Salt for new backups.
pub fn salt_for(user_id: &str) -> Vec<u8> {
    SaltRule::Current.salt(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_inputs_same_key() {
        let kdf = BackupKeyDeriver;
        let a = kdf.derive("correct-horse-battery-staple123", "user-42").unwrap();
        let b = kdf.derive("correct-horse-battery-staple123", "user-42").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_user_id_separates_keys() {
        let kdf = BackupKeyDeriver;
        let a = kdf.derive("same password", "user-42").unwrap();
        let b = kdf.derive("same password", "user-99").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_rejects_weak_iteration_counts() {
        let kdf = BackupKeyDeriver;
        assert!(matches!(
            kdf.derive_with_iterations("pw", &salt_for("user-42"), 1_000),
            Err(CryptoError::KeyDerivation(_))
        ));
        assert!(matches!(
            kdf.derive_with_iterations("pw", &salt_for("user-42"), MAX_PBKDF2_ITERATIONS + 1),
            Err(CryptoError::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_salt_layout() {
        assert_eq!(salt_for("user-42"), b"user-42-securechat-backup-v1".to_vec());
        assert_eq!(
            SaltRule::LegacyV1.salt("user-42"),
            b"user-42-backup-v1-securechat".to_vec()
        );
        assert_eq!(
            SaltRule::LegacyV1Simple.salt("user-42"),
            b"user-42-backup-securechat-v1".to_vec()
        );
    }

    #[test]
    fn test_salt_rules_per_version() {
        assert_eq!(SaltRule::for_version(2), &[SaltRule::Current]);
        assert_eq!(
            SaltRule::for_version(1),
            &[SaltRule::LegacyV1, SaltRule::LegacyV1Simple]
        );
        assert!(SaltRule::for_version(3).is_empty());
    }
}
