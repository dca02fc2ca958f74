//! Device identity key pair (ECDH over NIST P-384).
//!
//! The private half never leaves this struct. Public keys travel as base64
//! encoded DER `SubjectPublicKeyInfo`, the same encoding browsers produce for
//! `exportKey('spki', ..)`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use p384::pkcs8::{DecodePublicKey, EncodePublicKey};
use p384::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::types::SessionKey;
use crate::error::CryptoError;

/// Scalar size of P-384 in bytes.
const SCALAR_LEN: usize = 48;

/// Candidate scalars outside `[1, n)` are astronomically rare; bail out
/// rather than loop forever on a broken generator.
const MAX_KEYGEN_ATTEMPTS: usize = 8;

/// One device's key-agreement key pair for the lifetime of a session.
pub struct IdentityKeyPair {
    secret: SecretKey,
    public: PublicKey,
    spki: Vec<u8>,
}

impl IdentityKeyPair {
    /// Generate a fresh key pair from the OS random source.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with_rng(&mut OsRng)
    }

    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut candidate = Zeroizing::new([0u8; SCALAR_LEN]);

        for _ in 0..MAX_KEYGEN_ATTEMPTS {
            rng.try_fill_bytes(&mut candidate[..])
                .map_err(|_| CryptoError::RandomnessUnavailable)?;

            if let Ok(secret) = SecretKey::from_slice(&candidate[..]) {
                return Self::from_secret(secret);
            }
        }

        Err(CryptoError::KeyDerivation(
            "random generator produced no valid P-384 scalar".to_string(),
        ))
    }

    fn from_secret(secret: SecretKey) -> Result<Self, CryptoError> {
        let public = secret.public_key();
        let spki = encode_spki(&public)?;
        Ok(Self {
            secret,
            public,
            spki,
        })
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// Session key shared with `peer`.
    pub fn agree(&self, peer: &PublicKey) -> Result<SessionKey, CryptoError> {
        super::session::derive(&self.secret, peer)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Raw DER SPKI bytes of the public key.
    pub fn public_key_der(&self) -> &[u8] {
        &self.spki
    }

    /// Public key as transport-safe text (base64 of DER SPKI).
    pub fn export_public(&self) -> String {
        BASE64.encode(&self.spki)
    }

    /// Short, log-safe identifier for this key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.spki)
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Parse a peer's exported public key. Input is untrusted.
pub fn import_public(encoded: &str) -> Result<PublicKey, CryptoError> {
    let der = BASE64
        .decode(encoded.trim())
        .map_err(|_| CryptoError::InvalidKeyFormat)?;
    import_public_der(&der)
}

pub fn import_public_der(der: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_public_key_der(der).map_err(|_| CryptoError::InvalidKeyFormat)
}

/// Hex prefix of the SHA-256 digest of DER SPKI bytes.
pub fn fingerprint(spki: &[u8]) -> String {
    let digest = Sha256::digest(spki);
    hex::encode(&digest[..8])
}

fn encode_spki(public: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    public
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::KeyDerivation(format!("SPKI encoding failed: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// RNG whose fallible path always fails, as a dead entropy source would.
    pub(crate) struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            panic!("infallible path must not be used")
        }

        fn next_u64(&mut self) -> u64 {
            panic!("infallible path must not be used")
        }

        fn fill_bytes(&mut self, _dest: &mut [u8]) {
            panic!("infallible path must not be used")
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy source offline",
            )))
        }
    }

    impl CryptoRng for FailingRng {}

    #[test]
    fn test_generate_produces_distinct_keys() {
        let a = IdentityKeyPair::generate().unwrap();
        let b = IdentityKeyPair::generate().unwrap();
        assert_ne!(a.export_public(), b.export_public());
    }

    #[test]
    fn test_export_import_roundtrip() {
        let pair = IdentityKeyPair::generate().unwrap();
        let imported = import_public(&pair.export_public()).unwrap();
        assert_eq!(&imported, pair.public_key());
    }

    #[test]
    fn test_import_rejects_garbage() {
        assert_eq!(import_public("not base64 !!"), Err(CryptoError::InvalidKeyFormat));
        assert_eq!(
            import_public(&BASE64.encode(b"definitely not DER")),
            Err(CryptoError::InvalidKeyFormat)
        );
    }

    #[test]
    fn test_import_rejects_point_off_curve() {
        let pair = IdentityKeyPair::generate().unwrap();
        let mut der = pair.public_key_der().to_vec();
        // Last byte belongs to the point's y coordinate
        let last = der.len() - 1;
        der[last] ^= 0x01;
        assert_eq!(import_public_der(&der), Err(CryptoError::InvalidKeyFormat));
    }

    #[test]
    fn test_failing_rng_is_reported() {
        let result = IdentityKeyPair::generate_with_rng(&mut FailingRng);
        assert!(matches!(result, Err(CryptoError::RandomnessUnavailable)));
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let pair = IdentityKeyPair::generate().unwrap();
        assert_eq!(pair.fingerprint(), fingerprint(pair.public_key_der()));
        assert_eq!(pair.fingerprint().len(), 16);
    }
}
