//! Per-peer session keys: ECDH on P-384 followed by HKDF-SHA256.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use hkdf::Hkdf;
use p384::elliptic_curve::sec1::ToEncodedPoint;
use p384::{ecdh, PublicKey, SecretKey};
use sha2::Sha256;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use zeroize::Zeroize;

use super::identity::{fingerprint, IdentityKeyPair};
use super::types::{SessionKey, KEY_LEN};
use crate::error::CryptoError;

const HKDF_SALT: &[u8] = b"securechat-e2e-session-v1";
const HKDF_INFO_PREFIX: &[u8] = b"securechat-aes-256-gcm";

/// Derive the key shared between `local` and `peer`.
///
/// `derive(a, B) == derive(b, A)`: both public keys are bound into the HKDF
/// info in a canonical order, so each side computes the same bytes.
pub fn derive(local: &SecretKey, peer: &PublicKey) -> Result<SessionKey, CryptoError> {
    let shared = ecdh::diffie_hellman(local.to_nonzero_scalar(), peer.as_affine());

    let ours = local.public_key().to_encoded_point(true);
    let theirs = peer.to_encoded_point(true);
    let (first, second) = if ours.as_bytes() <= theirs.as_bytes() {
        (ours.as_bytes(), theirs.as_bytes())
    } else {
        (theirs.as_bytes(), ours.as_bytes())
    };

    let mut info = Vec::with_capacity(HKDF_INFO_PREFIX.len() + first.len() + second.len());
    info.extend_from_slice(HKDF_INFO_PREFIX);
    info.extend_from_slice(first);
    info.extend_from_slice(second);

    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.raw_secret_bytes());
    let mut okm = [0u8; KEY_LEN];
    hk.expand(&info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expansion failed".to_string()))?;

    let key = SessionKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

struct CachedSession {
    key: SessionKey,
    peer_spki: Vec<u8>,
}

/// Session keys for the current identity, keyed by peer id.
///
/// Each peer owns a `OnceCell`; concurrent first lookups for the same peer
/// wait on a single derivation instead of racing to insert their own.
#[derive(Default)]
pub struct SessionKeyCache {
    entries: DashMap<String, Arc<OnceCell<CachedSession>>>,
    derivations: AtomicUsize,
}

impl SessionKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached key for `peer_id`, deriving it on a miss.
    ///
    /// `peer_public_key_der` is only consulted on a miss. A cached peer that
    /// later presents a different key keeps its first key for the session.
    pub async fn get_or_derive(
        &self,
        identity: &IdentityKeyPair,
        peer_id: &str,
        peer_public_key_der: &[u8],
    ) -> Result<SessionKey, CryptoError> {
        let cell = self.entries.entry(peer_id.to_string()).or_default().clone();

        let cached = cell
            .get_or_try_init(|| async {
                let peer = super::identity::import_public_der(peer_public_key_der)?;
                let key = derive(identity.secret(), &peer)?;
                self.derivations.fetch_add(1, Ordering::SeqCst);
                debug!(
                    peer_id = %peer_id,
                    peer_key = %fingerprint(peer_public_key_der),
                    "Derived session key"
                );
                Ok::<_, CryptoError>(CachedSession {
                    key,
                    peer_spki: peer_public_key_der.to_vec(),
                })
            })
            .await?;

        if cached.peer_spki != peer_public_key_der {
            warn!(
                peer_id = %peer_id,
                cached_key = %fingerprint(&cached.peer_spki),
                presented_key = %fingerprint(peer_public_key_der),
                "Peer presented a different public key; keeping the first one"
            );
        }

        Ok(cached.key.clone())
    }

    /// Cached key for `peer_id`, if one has been derived.
    pub fn get(&self, peer_id: &str) -> Option<SessionKey> {
        self.entries
            .get(peer_id)
            .and_then(|cell| cell.get().map(|cached| cached.key.clone()))
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.get(peer_id).is_some()
    }

    /// Number of key agreements actually performed.
    pub fn derivation_count(&self) -> usize {
        self.derivations.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
