// Copyright 2026 The Duplex Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Sessions: a ratchet bound to the key agreement that started it.
//!
//! A [`Session`] is created by an [`Account`], either from the key bundle of
//! the other side or from the first message the other side sent us. Until
//! the initiator has received a reply, every message it sends carries the
//! key agreement information so that the responder can create its side of
//! the session from whichever message arrives first.
//!
//! [`Account`]: crate::account::Account

mod registry;

pub use registry::{RegistryError, SessionRegistry};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::{
    ErrorKind,
    agreement::KeyBundle,
    auth::{AuthError, PeerAuthenticator},
    ratchet::{
        DecryptionError, EncryptedEnvelope, PreKeyInfo, RatchetSnapshot, RatchetState,
        SnapshotError,
    },
    types::{Curve25519PublicKey, Ed25519PublicKey},
    utilities::base64_encode,
};

/// The keys that were used to establish a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeys {
    /// The key agreement information of the initiator.
    pub pre_key: PreKeyInfo,
    /// The identity key of the responder.
    pub responder_identity_key: Curve25519PublicKey,
}

impl SessionKeys {
    /// The identity key of the initiator.
    pub const fn initiator_identity_key(&self) -> Curve25519PublicKey {
        self.pre_key.identity_key
    }
}

/// Error type for binding a session to the identity of the other side.
#[derive(Debug, Error)]
pub enum BindingError {
    /// The bundle belongs to a different identity key than the session.
    #[error("The key bundle doesn't belong to the identity key of the session")]
    IdentityMismatch,
    /// The bundle has no signing key, or no signed pre-key to check it with.
    #[error("The key bundle doesn't contain a signed pre-key signed by a signing key")]
    Unsigned,
    /// The signed pre-key of the bundle doesn't verify.
    #[error("The signed pre-key of the key bundle doesn't verify")]
    Signature,
    /// The session isn't bound to a signing key yet.
    #[error("The session isn't bound to a signing key")]
    MissingSigningKey,
    /// The peer authenticator rejected the binding.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl BindingError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            BindingError::Unsigned | BindingError::MissingSigningKey => {
                ErrorKind::KeyBundleIncomplete
            }
            BindingError::IdentityMismatch | BindingError::Signature => ErrorKind::Authentication,
            BindingError::Auth(e) => e.kind(),
        }
    }
}

/// An end-to-end encrypted session with one other device.
pub struct Session {
    session_keys: SessionKeys,
    state: RatchetState,
    remote_identity_key: Curve25519PublicKey,
    remote_signing_key: Option<Ed25519PublicKey>,
    authenticated_peer: Option<String>,
}

impl Session {
    pub(crate) fn new(
        session_keys: SessionKeys,
        state: RatchetState,
        remote_identity_key: Curve25519PublicKey,
        remote_signing_key: Option<Ed25519PublicKey>,
    ) -> Self {
        Self {
            session_keys,
            state,
            remote_identity_key,
            remote_signing_key,
            authenticated_peer: None,
        }
    }

    /// The globally unique id of this session, base64 encoded.
    ///
    /// The SHA-256 of the identity keys of both sides, the ephemeral key of
    /// the initiator and the one-time pre-key, if one was used.
    pub fn session_id(&self) -> String {
        let keys = &self.session_keys;

        let mut sha = Sha256::new()
            .chain_update(keys.pre_key.identity_key.as_bytes())
            .chain_update(keys.responder_identity_key.as_bytes())
            .chain_update(keys.pre_key.ephemeral_key.as_bytes());

        if let Some(one_time_pre_key) = &keys.pre_key.one_time_pre_key {
            sha.update(one_time_pre_key.as_bytes());
        }

        base64_encode(sha.finalize())
    }

    /// The keys that established this session.
    pub const fn session_keys(&self) -> &SessionKeys {
        &self.session_keys
    }

    /// The identity key of the other side.
    pub const fn remote_identity_key(&self) -> Curve25519PublicKey {
        self.remote_identity_key
    }

    /// The signing key of the other side that signed the pre-key of this
    /// session, if we know it.
    pub const fn remote_signing_key(&self) -> Option<Ed25519PublicKey> {
        self.remote_signing_key
    }

    /// Was the signed pre-key of this session checked against the signing
    /// key of the other side.
    pub const fn is_verified(&self) -> bool {
        self.remote_signing_key.is_some()
    }

    /// The peer this session was bound to by [`Session::authenticate()`].
    pub fn authenticated_peer(&self) -> Option<&str> {
        self.authenticated_peer.as_deref()
    }

    /// Is this session bound to a peer that the given authenticator still
    /// trusts with the signing key of this session.
    ///
    /// Checked on every call, a peer that was revoked or re-authenticated
    /// with a different signing key no longer authenticates the session.
    pub fn is_authenticated(&self, authenticator: &PeerAuthenticator) -> bool {
        match (&self.authenticated_peer, &self.remote_signing_key) {
            (Some(peer_id), Some(signing_key)) => {
                authenticator.verify_session_binding(peer_id, signing_key).is_ok()
            }
            _ => false,
        }
    }

    /// The current ratchet state.
    pub const fn ratchet(&self) -> &RatchetState {
        &self.state
    }

    /// Have we ever received a message from the other side.
    pub const fn has_received_message(&self) -> bool {
        self.state.has_receiving_chain()
    }

    /// Encrypt a message.
    ///
    /// Until the other side replied, the envelope carries the key agreement
    /// information.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> EncryptedEnvelope {
        let (state, mut envelope) = self.state.encrypt(plaintext);

        if !self.has_received_message() {
            envelope.pre_key = Some(self.session_keys.pre_key);
        }

        self.state = state;

        envelope
    }

    /// Decrypt a message. The session is left untouched if this fails.
    pub fn decrypt(&mut self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, DecryptionError> {
        let (state, plaintext) = self.state.decrypt(envelope)?;
        self.state = state;

        Ok(plaintext)
    }

    /// Drop at most one expired skipped message key, see
    /// [`RatchetState::evict_expired_skipped_key()`].
    pub fn evict_expired_skipped_key(&mut self, now: u64) -> bool {
        self.state.evict_expired_skipped_key(now)
    }

    /// Learn the signing key of the other side from its key bundle.
    ///
    /// Responders don't see the initiator's key bundle during the key
    /// agreement. The bundle must belong to the identity key of this session
    /// and carry a signed pre-key that verifies.
    pub fn bind_key_bundle(&mut self, bundle: &KeyBundle) -> Result<(), BindingError> {
        if bundle.identity_key != self.remote_identity_key {
            warn!(
                session_id = %self.session_id(),
                "A key bundle for a different identity key was bound to a session"
            );
            return Err(BindingError::IdentityMismatch);
        }

        let (Some(signing_key), Some(signed_pre_key)) = (bundle.signing_key, bundle.signed_pre_key)
        else {
            return Err(BindingError::Unsigned);
        };

        signing_key
            .verify(signed_pre_key.public_key.as_bytes(), &signed_pre_key.signature)
            .map_err(|_| BindingError::Signature)?;

        if self.remote_signing_key != Some(signing_key) {
            self.authenticated_peer = None;
        }

        self.remote_signing_key = Some(signing_key);

        Ok(())
    }

    /// Bind this session to a peer, if the signing key of the session is the
    /// one the peer proved possession of.
    ///
    /// See [`Session::is_authenticated()`] for the ongoing check.
    pub fn authenticate(
        &mut self,
        authenticator: &PeerAuthenticator,
        peer_id: &str,
    ) -> Result<(), BindingError> {
        let signing_key = self.remote_signing_key.ok_or(BindingError::MissingSigningKey)?;

        authenticator.verify_session_binding(peer_id, &signing_key)?;
        self.authenticated_peer = Some(peer_id.to_owned());

        Ok(())
    }

    /// Export the session, ratchet state included.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_keys: self.session_keys,
            remote_identity_key: self.remote_identity_key,
            remote_signing_key: self.remote_signing_key,
            authenticated_peer: self.authenticated_peer.clone(),
            ratchet: self.state.snapshot(),
        }
    }

    /// Restore a session from a snapshot.
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Result<Self, SnapshotError> {
        Ok(Self {
            session_keys: snapshot.session_keys,
            state: RatchetState::from_snapshot(&snapshot.ratchet)?,
            remote_identity_key: snapshot.remote_identity_key,
            remote_signing_key: snapshot.remote_signing_key,
            authenticated_peer: snapshot.authenticated_peer.clone(),
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("authenticated_peer", &self.authenticated_peer)
            .finish_non_exhaustive()
    }
}

/// A serializable copy of a [`Session`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    session_keys: SessionKeys,
    remote_identity_key: Curve25519PublicKey,
    #[serde(default)]
    remote_signing_key: Option<Ed25519PublicKey>,
    #[serde(default)]
    authenticated_peer: Option<String>,
    ratchet: RatchetSnapshot,
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{BindingError, Session, SessionSnapshot};
    use crate::{
        ErrorKind,
        account::Account,
        agreement::AgreementConfig,
        auth::{AuthenticatorConfig, PeerAuthenticator},
        ratchet::RatchetConfig,
    };

    fn sessions() -> anyhow::Result<(Account, Account, Session, Session)> {
        let alice = Account::new();
        let mut bob = Account::new();
        bob.generate_one_time_pre_keys(1);

        let mut alice_session = alice
            .create_outbound_session(
                &bob.key_bundle(),
                &AgreementConfig::default(),
                RatchetConfig::default(),
            )?
            .session;

        let envelope = alice_session.encrypt(b"Hello Bob!");
        let result = bob.create_inbound_session(&envelope, RatchetConfig::default())?;

        assert_eq!(result.plaintext, b"Hello Bob!");

        Ok((alice, bob, alice_session, result.session))
    }

    #[test]
    fn both_sides_agree_on_the_session_id() -> anyhow::Result<()> {
        let (alice, _, alice_session, bob_session) = sessions()?;

        assert_eq!(alice_session.session_id(), bob_session.session_id());
        assert_eq!(alice_session.session_keys(), bob_session.session_keys());
        assert_eq!(bob_session.session_keys().initiator_identity_key(), alice.identity_key());

        Ok(())
    }

    #[test]
    fn pre_key_information_is_sent_until_a_reply_arrives() -> anyhow::Result<()> {
        let (_, _, mut alice_session, mut bob_session) = sessions()?;

        assert!(alice_session.encrypt(b"Still there?").pre_key.is_some());

        let reply = bob_session.encrypt(b"Hi Alice!");
        assert!(reply.pre_key.is_none());

        assert_eq!(alice_session.decrypt(&reply)?, b"Hi Alice!");
        assert!(alice_session.encrypt(b"Great").pre_key.is_none());

        Ok(())
    }

    #[test]
    fn snapshots_restore_sessions() -> anyhow::Result<()> {
        let (_, _, mut alice_session, bob_session) = sessions()?;

        let json = serde_json::to_string(&bob_session.snapshot())?;
        let snapshot: SessionSnapshot = serde_json::from_str(&json)?;
        let mut restored = Session::from_snapshot(&snapshot)?;

        assert_eq!(restored.session_id(), bob_session.session_id());
        assert_eq!(restored.is_verified(), bob_session.is_verified());

        let envelope = alice_session.encrypt(b"Are you there?");
        assert_eq!(restored.decrypt(&envelope)?, b"Are you there?");

        Ok(())
    }

    #[test]
    fn sessions_are_bound_to_authenticated_peers() -> anyhow::Result<()> {
        let (alice, bob, mut alice_session, mut bob_session) = sessions()?;

        assert!(alice_session.is_verified());
        assert!(!bob_session.is_verified());

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

        assert_matches!(
            alice_session.authenticate(&alice_auth, "bob"),
            Err(error @ BindingError::Auth(_))
        );
        assert_eq!(error.kind(), ErrorKind::Authentication);

        let challenge = alice_auth.generate_challenge("bob");
        alice_auth.verify_response("bob", &bob_auth.sign_challenge(&challenge))?;
        alice_session.authenticate(&alice_auth, "bob")?;
        assert!(alice_session.is_authenticated(&alice_auth));
        assert_eq!(alice_session.authenticated_peer(), Some("bob"));

        assert_matches!(
            bob_session.authenticate(&bob_auth, "alice"),
            Err(BindingError::MissingSigningKey)
        );
        assert_matches!(
            bob_session.bind_key_bundle(&bob.key_bundle()),
            Err(BindingError::IdentityMismatch)
        );

        bob_session.bind_key_bundle(&alice.key_bundle())?;
        assert!(bob_session.is_verified());

        let challenge = bob_auth.generate_challenge("alice");
        bob_auth.verify_response("alice", &alice_auth.sign_challenge(&challenge))?;
        bob_session.authenticate(&bob_auth, "alice")?;
        assert!(bob_session.is_authenticated(&bob_auth));

        Ok(())
    }

    #[test]
    fn revoking_the_peer_revokes_the_session() -> anyhow::Result<()> {
        let (alice, bob, mut alice_session, _) = sessions()?;

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

        assert!(!alice_session.is_authenticated(&alice_auth));

        let challenge = alice_auth.generate_challenge("bob");
        alice_auth.verify_response("bob", &bob_auth.sign_challenge(&challenge))?;
        alice_session.authenticate(&alice_auth, "bob")?;
        assert!(alice_session.is_authenticated(&alice_auth));

        let restored = Session::from_snapshot(&alice_session.snapshot())?;
        assert!(restored.is_authenticated(&alice_auth));

        assert!(alice_auth.revoke_peer("bob"));
        assert!(!alice_session.is_authenticated(&alice_auth));
        assert!(!restored.is_authenticated(&alice_auth));
        assert_eq!(alice_session.authenticated_peer(), Some("bob"));

        Ok(())
    }
}
