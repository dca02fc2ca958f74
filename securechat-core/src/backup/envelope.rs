//! Versioned wire container for an encrypted backup.
//!
//! JSON shape:
//!   { version, algorithm, iterations, iv, ciphertext, timestamp, userId }
//!
//! `version` is read and checked before any other field is deserialized.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackupError;

/// Version written by this build.
pub const BACKUP_FORMAT_VERSION: u32 = 2;

/// Versions this build can open. v1 and v2 share layout and salt rule.
pub const SUPPORTED_VERSIONS: &[u32] = &[1, 2];

pub const BACKUP_ALGORITHM: &str = "AES-256-GCM-PBKDF2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEnvelope {
    pub version: u32,
    pub algorithm: String,
    pub iterations: u32,
    /// Base64 AES-GCM nonce
    pub iv: String,
    /// Base64 ciphertext with appended tag
    pub ciphertext: String,
    /// Creation time, Unix millis
    pub timestamp: i64,
    pub user_id: String,
}

pub fn is_supported_version(version: u32) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

impl BackupEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BackupError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse bytes received from blob storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BackupError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|_| BackupError::MalformedEnvelope("not a backup file".to_string()))?;

        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| BackupError::MalformedEnvelope("missing version".to_string()))?;
        let version = u32::try_from(version).unwrap_or(u32::MAX);
        if !is_supported_version(version) {
            return Err(BackupError::UnsupportedBackupVersion(version));
        }

        serde_json::from_value(value).map_err(|e| BackupError::MalformedEnvelope(e.to_string()))
    }
}
