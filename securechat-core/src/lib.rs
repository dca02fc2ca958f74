//! SecureChat cryptographic core.
//!
//! Per-peer key agreement and message encryption (`crypto`), plus
//! password-protected backups of the local history (`backup`). Storage,
//! transport and blob providers are collaborators behind traits.

pub mod backup;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod inbox;
pub mod logging;
pub mod models;
pub mod store;

pub use config::Config;
pub use context::ChatContext;
pub use error::{BackupError, ChatError, ConfigError, CryptoError, StoreError};
