use thiserror::Error;

/// Failures of the message-level cryptography.
///
/// Variants deliberately carry no detail about *why* an authenticated
/// decryption failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid public key format")]
    InvalidKeyFormat,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Secure randomness unavailable")]
    RandomnessUnavailable,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("No identity key (session closed)")]
    SessionClosed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("No public key known for contact {0}")]
    MissingPublicKey(String),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Unsupported backup version: {0}")]
    UnsupportedBackupVersion(u32),

    #[error("Malformed backup file: {0}")]
    MalformedEnvelope(String),

    #[error("Invalid password - wrong password or corrupted data")]
    InvalidPassword,

    #[error("This backup belongs to a different user account")]
    OwnershipMismatch,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Backup storage operation failed: {0}")]
    Storage(&'static str),

    #[error("Backup storage operation timed out: {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background worker failed")]
    Worker,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
