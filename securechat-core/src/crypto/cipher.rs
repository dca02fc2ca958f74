//! AES-256-GCM message encryption.
//!
//! Every call draws a fresh 96-bit IV from the OS random source; the 128-bit
//! tag is appended to the ciphertext. All decryption failures collapse into
//! [`CryptoError::DecryptionFailed`].

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

use super::types::{EncryptedPayload, SessionKey, IV_LEN, KEY_LEN};
use crate::error::CryptoError;

/// Shown in place of a message that failed authentication.
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "[Decryption failed]";

/// Encrypt a UTF-8 message under a session key.
pub fn encrypt(plaintext: &str, key: &SessionKey) -> Result<EncryptedPayload, CryptoError> {
    encrypt_with_rng(plaintext, key, &mut OsRng)
}

pub fn encrypt_with_rng<R: RngCore + CryptoRng>(
    plaintext: &str,
    key: &SessionKey,
    rng: &mut R,
) -> Result<EncryptedPayload, CryptoError> {
    let (iv, ciphertext) = seal_with_rng(key.as_bytes(), plaintext.as_bytes(), rng)?;
    Ok(EncryptedPayload {
        ciphertext: BASE64.encode(ciphertext),
        iv: BASE64.encode(iv),
    })
}

/// Decrypt a message. Malformed encodings, wrong key, wrong IV and tampered
/// ciphertext are indistinguishable to the caller.
pub fn decrypt(ciphertext: &str, iv: &str, key: &SessionKey) -> Result<String, CryptoError> {
    let ciphertext = BASE64
        .decode(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let iv = BASE64.decode(iv).map_err(|_| CryptoError::DecryptionFailed)?;

    let plaintext = open(key.as_bytes(), &iv, &ciphertext)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}

/// Like [`decrypt`], substituting [`UNDECRYPTABLE_PLACEHOLDER`] on failure.
pub fn decrypt_or_placeholder(ciphertext: &str, iv: &str, key: &SessionKey) -> String {
    decrypt(ciphertext, iv, key).unwrap_or_else(|_| UNDECRYPTABLE_PLACEHOLDER.to_string())
}

/// Seal raw bytes, returning `(iv, ciphertext || tag)`.
pub(crate) fn seal(
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
) -> Result<([u8; IV_LEN], Vec<u8>), CryptoError> {
    seal_with_rng(key, plaintext, &mut OsRng)
}

pub(crate) fn seal_with_rng<R: RngCore + CryptoRng>(
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
    rng: &mut R,
) -> Result<([u8; IV_LEN], Vec<u8>), CryptoError> {
    let mut iv = [0u8; IV_LEN];
    rng.try_fill_bytes(&mut iv)
        .map_err(|_| CryptoError::RandomnessUnavailable)?;

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::KeyDerivation("invalid AES-256 key length".to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::KeyDerivation("AES-GCM encryption failed".to_string()))?;

    Ok((iv, ciphertext))
}

/// Open `ciphertext || tag` sealed under `key` and `iv`.
pub(crate) fn open(key: &[u8; KEY_LEN], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
