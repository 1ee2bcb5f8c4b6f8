//! Integration tests for conversations and the conversation registry.

use std::{sync::Arc, thread};

use assert_matches2::assert_matches;
use duplex::{
    ErrorKind,
    account::Account,
    agreement::{AgreementConfig, KeyBundleStore, MemoryKeyBundleStore},
    auth::{AuthenticatorConfig, PeerAuthenticator},
    ratchet::{DecryptionError, EncryptedEnvelope, RatchetConfig},
    rotation::{KeyRotationManager, RotationPolicy},
    session::{RegistryError, Session, SessionRegistry},
};

struct Conversation {
    alice: Account,
    bob: Account,
    store: MemoryKeyBundleStore,
    alice_session: Session,
    bob_session: Session,
}

fn conversation() -> anyhow::Result<Conversation> {
    let alice = Account::new();
    let mut bob = Account::new();
    let store = MemoryKeyBundleStore::new();

    bob.generate_one_time_pre_keys(1);
    store.publish("bob", bob.key_bundle())?;
    bob.mark_keys_as_published();

    let bundle = store.fetch_for_agreement("bob")?;
    let mut alice_session = alice
        .create_outbound_session(&bundle, &AgreementConfig::default(), RatchetConfig::default())?
        .session;

    let envelope = alice_session.encrypt(b"Hello Bob!");
    let envelope = EncryptedEnvelope::from_json(&envelope.to_json()?)?;

    let inbound = bob.create_inbound_session(&envelope, RatchetConfig::default())?;
    assert_eq!(inbound.plaintext, b"Hello Bob!");

    Ok(Conversation { alice, bob, store, alice_session, bob_session: inbound.session })
}

#[test]
fn hello_round_trip() -> anyhow::Result<()> {
    let Conversation { bob, store, mut alice_session, mut bob_session, .. } = conversation()?;

    let reply = bob_session.encrypt(b"Hi Alice!");
    assert_eq!(alice_session.decrypt(&reply)?, b"Hi Alice!");

    assert_eq!(alice_session.ratchet().send_counter(), 1);
    assert_eq!(alice_session.ratchet().receive_counter(), 1);
    assert_eq!(bob_session.ratchet().send_counter(), 1);
    assert_eq!(bob_session.ratchet().receive_counter(), 1);

    assert!(store.fetch("bob")?.one_time_pre_keys.is_empty());
    assert!(bob.key_bundle().one_time_pre_keys.is_empty());
    assert_eq!(bob.stored_one_time_pre_key_count(), 0);

    assert!(alice_session.has_received_message());
    assert!(alice_session.encrypt(b"confirmed").pre_key.is_none());

    Ok(())
}

#[test]
fn out_of_order_delivery() -> anyhow::Result<()> {
    let Conversation { mut alice_session, mut bob_session, .. } = conversation()?;

    let m1 = alice_session.encrypt(b"M1");
    let m2 = alice_session.encrypt(b"M2");
    let m3 = alice_session.encrypt(b"M3");

    assert_eq!(bob_session.decrypt(&m1)?, b"M1");
    assert_eq!(bob_session.decrypt(&m3)?, b"M3");
    assert_eq!(bob_session.ratchet().skipped_message_key_count(), 1);

    assert_eq!(bob_session.decrypt(&m2)?, b"M2");
    assert_eq!(bob_session.ratchet().skipped_message_key_count(), 0);

    Ok(())
}

#[test]
fn replays_are_rejected() -> anyhow::Result<()> {
    let Conversation { mut alice_session, mut bob_session, .. } = conversation()?;

    let message = alice_session.encrypt(b"once");
    bob_session.decrypt(&message)?;

    assert_matches!(
        bob_session.decrypt(&message),
        Err(error @ DecryptionError::MissingMessageKey(_))
    );
    assert_eq!(error.kind(), ErrorKind::MessageKeyNotFound);

    Ok(())
}

#[test]
fn concurrent_consumers_of_the_last_one_time_pre_key() -> anyhow::Result<()> {
    let mut bob = Account::new();
    let store = Arc::new(MemoryKeyBundleStore::new());
    store.publish("bob", bob.key_bundle())?;

    let last = bob.generate_one_time_pre_keys(1);
    store.replenish_one_time_pre_keys("bob", last.clone())?;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || store.consume_one_time_pre_key("bob"))
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.join().map_err(|_| anyhow::anyhow!("consumer panicked"))??);
    }

    let consumed: Vec<_> = results.into_iter().flatten().collect();
    assert_eq!(consumed, last);
    assert_eq!(store.one_time_pre_key_count("bob"), 0);

    Ok(())
}

#[test]
fn sessions_are_bound_to_authenticated_peers() -> anyhow::Result<()> {
    let Conversation { alice, bob, mut alice_session, mut bob_session, .. } = conversation()?;

    let alice_auth = PeerAuthenticator::new(
        "alice",
        alice.signing_keypair().clone(),
        AuthenticatorConfig::default(),
    );
    let bob_auth = PeerAuthenticator::new(
        "bob",
        bob.signing_keypair().clone(),
        AuthenticatorConfig::default(),
    );

    let challenge = alice_auth.generate_challenge("bob");
    let response = bob_auth.sign_challenge(&challenge);
    let identity = alice_auth.verify_response("bob", &response)?;

    assert_eq!(identity.public_key, bob.signing_key());
    assert!(alice_session.is_verified());

    alice_session.authenticate(&alice_auth, "bob")?;
    assert!(alice_session.is_authenticated(&alice_auth));

    let challenge = bob_auth.generate_challenge("alice");
    let response = alice_auth.sign_challenge(&challenge);
    bob_auth.verify_response("alice", &response)?;

    assert!(!bob_session.is_verified());
    bob_session.bind_key_bundle(&alice.key_bundle())?;
    bob_session.authenticate(&bob_auth, "alice")?;
    assert!(bob_session.is_authenticated(&bob_auth));

    assert!(alice_auth.revoke_peer("bob"));
    assert!(!alice_session.is_authenticated(&alice_auth));
    assert!(bob_session.is_authenticated(&bob_auth));

    Ok(())
}

#[test]
fn forged_responses_are_rejected() -> anyhow::Result<()> {
    let alice = Account::new();
    let mallory = Account::new();

    let alice_auth = PeerAuthenticator::new(
        "alice",
        alice.signing_keypair().clone(),
        AuthenticatorConfig::default(),
    );
    let mallory_auth = PeerAuthenticator::new(
        "bob",
        mallory.signing_keypair().clone(),
        AuthenticatorConfig::default(),
    );

    let challenge = alice_auth.generate_challenge("bob");
    let mut response = mallory_auth.sign_challenge(&challenge);
    response.timestamp += 1;

    let error = alice_auth.verify_response("bob", &response).err();
    assert_eq!(error.map(|e| e.kind()), Some(ErrorKind::Authentication));

    let error = alice_auth.verify_response("bob", &response).err();
    assert_eq!(error.map(|e| e.kind()), Some(ErrorKind::StaleChallenge));

    Ok(())
}

#[test]
fn registry_sessions_are_created_once() -> anyhow::Result<()> {
    let alice = Arc::new(Account::new());
    let bob = Account::new();
    let bundle = Arc::new(bob.key_bundle());
    let registry = Arc::new(SessionRegistry::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let alice = alice.clone();
            let bundle = bundle.clone();
            let registry = registry.clone();

            thread::spawn(move || {
                registry
                    .get_or_try_insert_with("bob", || {
                        alice
                            .create_outbound_session(
                                &bundle,
                                &AgreementConfig::default(),
                                RatchetConfig::default(),
                            )
                            .map(|result| result.session)
                    })
                    .map(|session| session.lock().session_id())
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.join().map_err(|_| anyhow::anyhow!("creator panicked"))??);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(registry.len(), 1);

    assert_matches!(registry.encrypt("carol", b"hi"), Err(RegistryError::UnknownConversation(_)));

    Ok(())
}

#[test]
fn conversation_keys_rotate_by_usage() -> anyhow::Result<()> {
    let manager = KeyRotationManager::new(RotationPolicy {
        rotate_after_messages: 3,
        ..Default::default()
    })?;

    let (first, version) = manager.get_key_at("alice-bob", b"shared seed", 0)?;
    assert_eq!(version, 1);

    manager.get_key_at("alice-bob", b"shared seed", 0)?;
    manager.get_key_at("alice-bob", b"shared seed", 0)?;

    let (second, version) = manager.get_key_at("alice-bob", b"shared seed", 0)?;
    assert_eq!(version, 2);
    assert_ne!(first, second);

    assert_eq!(manager.get_key_by_version_at("alice-bob", 1, 0), Some(first));

    let week = 7 * 24 * 60 * 60;
    assert_eq!(manager.get_key_by_version_at("alice-bob", 1, week), None);

    Ok(())
}
