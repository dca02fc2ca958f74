//! End-to-end message cryptography.
//!
//! Key agreement is ECDH over P-384 with HKDF-SHA256; messages are sealed
//! with AES-256-GCM under the per-peer session key.

pub mod cipher;
pub mod identity;
mod manager;
pub mod session;
mod types;

pub use cipher::UNDECRYPTABLE_PLACEHOLDER;
pub use identity::{import_public, IdentityKeyPair};
pub use manager::CryptoManager;
pub use session::SessionKeyCache;
pub use types::{EncryptedMessage, EncryptedPayload, SessionKey, IV_LEN, KEY_LEN};
