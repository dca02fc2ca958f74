use std::sync::Arc;

use securechat_core::crypto::{cipher, CryptoManager, IdentityKeyPair};
use securechat_core::store::{shared, MemoryStore};
use securechat_core::{ChatContext, CryptoError};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_contact_derives_once() {
    let alice = Arc::new(CryptoManager::new());
    alice.open().unwrap();
    let bob = CryptoManager::new();
    let bob_pub = bob.open().unwrap();

    let mut tasks = Vec::new();
    for i in 0..32 {
        let alice = Arc::clone(&alice);
        let bob_pub = bob_pub.clone();
        tasks.push(tokio::spawn(async move {
            alice
                .encrypt_for("bob", &bob_pub, &format!("message {}", i))
                .await
                .unwrap()
        }));
    }

    let mut sealed = Vec::new();
    for task in tasks {
        sealed.push(task.await.unwrap());
    }

    assert_eq!(alice.derivation_count(), 1);
    assert_eq!(alice.session_count(), 1);
    for (i, message) in sealed.iter().enumerate() {
        assert_eq!(
            bob.decrypt_from("alice", message).await.unwrap(),
            format!("message {}", i)
        );
    }
}

#[tokio::test]
async fn test_each_peer_gets_its_own_key() {
    let alice = CryptoManager::new();
    alice.open().unwrap();
    let bob = CryptoManager::new();
    let carol = CryptoManager::new();
    let bob_pub = bob.open().unwrap();
    let carol_pub = carol.open().unwrap();

    let to_bob = alice.session_key("bob", &bob_pub).await.unwrap();
    let to_carol = alice.session_key("carol", &carol_pub).await.unwrap();
    assert_ne!(to_bob.as_bytes(), to_carol.as_bytes());

    // Carol cannot read what alice sent bob
    let sealed = alice.encrypt_for("bob", &bob_pub, "for bob only").await.unwrap();
    assert_eq!(
        carol.decrypt_from("alice", &sealed).await,
        Err(CryptoError::DecryptionFailed)
    );
}

#[tokio::test]
async fn test_key_agreement_is_symmetric_across_contexts() {
    let alice = ChatContext::new("alice", shared(MemoryStore::new()));
    let bob = ChatContext::new("bob", shared(MemoryStore::new()));
    let alice_pub = alice.open().unwrap();
    let bob_pub = bob.open().unwrap();

    let a = alice.crypto().session_key("bob", &bob_pub).await.unwrap();
    let b = bob.crypto().session_key("alice", &alice_pub).await.unwrap();
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[test]
fn test_unicode_and_empty_plaintexts_roundtrip() {
    let a = IdentityKeyPair::generate().unwrap();
    let b = IdentityKeyPair::generate().unwrap();
    let key = a.agree(b.public_key()).unwrap();
    assert_eq!(key.as_bytes(), b.agree(a.public_key()).unwrap().as_bytes());

    let long = "x".repeat(64 * 1024);
    for text in ["", "plain ascii", "ünïcödé ✓", "🔐🗝️", long.as_str()] {
        let payload = cipher::encrypt(text, &key).unwrap();
        assert_eq!(cipher::decrypt(&payload.ciphertext, &payload.iv, &key).unwrap(), text);
    }
}
