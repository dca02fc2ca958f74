//! Password-protected backups of the local message store.

pub mod codec;
pub mod envelope;
pub mod kdf;
mod service;
pub mod snapshot;
pub mod storage;

pub use codec::BackupCodec;
pub use envelope::{BackupEnvelope, BACKUP_FORMAT_VERSION};
pub use kdf::{BackupKeyDeriver, PasswordKdf, PBKDF2_ITERATIONS};
pub use service::{BackupService, BackupStage, DEFAULT_STORAGE_TIMEOUT};
pub use snapshot::{BackupSnapshot, RestoreSummary};
pub use storage::{BackupFile, BlobStorage, FsBlobStorage, StorageError};
