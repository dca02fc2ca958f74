use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length in bytes of every symmetric key the core produces.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length (96 bits).
pub const IV_LEN: usize = 12;

/// 256-bit symmetric key shared with one peer. Zeroized on drop.
///
/// Not comparable with `==`.
///
/// ```compile_fail
/// use securechat_core::crypto::SessionKey;
/// fn same(a: &SessionKey, b: &SessionKey) -> bool {
///     a == b
/// }
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Ciphertext and IV produced by a single encryption, both base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub iv: String,
}

/// Encrypted message structure exchanged with the backend.
///
/// The sender's public key travels with the message so the receiver can
/// derive the session key on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub ciphertext: String,
    pub iv: String,
    pub sender_public_key: String,
}

impl EncryptedMessage {
    pub fn new(payload: EncryptedPayload, sender_public_key: String) -> Self {
        Self {
            ciphertext: payload.ciphertext,
            iv: payload.iv,
            sender_public_key,
        }
    }
}
