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


//! The device-local owner of all long-term keys.

mod one_time_pre_keys;
mod signed_pre_keys;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use self::{
    one_time_pre_keys::{OneTimePreKeys, OneTimePreKeysPickle},
    signed_pre_keys::{SignedPreKeys, SignedPreKeysPickle},
};
use crate::{
    ErrorKind,
    agreement::{
        self, AgreementConfig, KeyAgreementError, KeyBundle, OneTimePreKey, SignedPreKey,
        X3dhSecret,
    },
    ratchet::{AssociatedData, DecryptionError, EncryptedEnvelope, RatchetConfig, RatchetState},
    session::{Session, SessionKeys},
    types::{
        Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey, Ed25519Keypair,
        Ed25519PublicKey, Ed25519Signature, KeyError, KeyId,
    },
    utilities::{base64_serde, unix_timestamp},
};

const PUBLIC_MAX_ONE_TIME_PRE_KEYS: usize = 50;

/// Error describing failure modes when creating a [`Session`] from an
/// incoming message.
#[derive(Error, Debug)]
pub enum SessionCreationError {
    /// The message doesn't carry key agreement information.
    #[error("The message doesn't contain key agreement information")]
    MissingPreKeyInfo,
    /// The message names a signed pre-key we don't have, it was rotated out
    /// twice since the other side fetched our bundle.
    #[error("The message uses an unknown signed pre-key: {0}")]
    UnknownSignedPreKey(KeyId),
    /// The message names a one-time pre-key we don't have. Either we never
    /// had it, or it was already used up by an earlier message.
    #[error("The message uses an unknown one-time pre-key: {0}")]
    MissingOneTimeKey(Curve25519PublicKey),
    /// One of the Diffie-Hellman exchanges failed.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The message that was used to establish the session couldn't be
    /// decrypted. The message needs to be decryptable, otherwise we will
    /// have created a session that wasn't used to encrypt it.
    #[error("The message that was used to establish the session couldn't be decrypted")]
    Decryption(#[from] DecryptionError),
}

impl SessionCreationError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            SessionCreationError::MissingPreKeyInfo => ErrorKind::Malformed,
            SessionCreationError::UnknownSignedPreKey(_) => ErrorKind::KeyBundleIncomplete,
            SessionCreationError::MissingOneTimeKey(_) => ErrorKind::MessageKeyNotFound,
            SessionCreationError::Key(KeyError::NonContributoryKey) => ErrorKind::Authentication,
            SessionCreationError::Key(_) => ErrorKind::Malformed,
            SessionCreationError::Decryption(e) => e.kind(),
        }
    }
}

/// Return type for the creation of outbound [`Session`] objects.
#[derive(Debug)]
pub struct OutboundCreationResult {
    /// The new session.
    pub session: Session,
    /// The one-time pre-key of the other side that was used up, it needs to
    /// be removed from the key bundle store.
    pub one_time_pre_key_id: Option<KeyId>,
}

/// Return type for the creation of inbound [`Session`] objects.
#[derive(Debug)]
pub struct InboundCreationResult {
    /// The new session.
    pub session: Session,
    /// The plaintext of the message that established the session.
    pub plaintext: Vec<u8>,
    /// Our one-time pre-key that was used up, if any.
    pub one_time_pre_key_id: Option<KeyId>,
}

/// An account holds the identity key, the signing key and the pre-keys of a
/// single device, and creates sessions with other devices.
pub struct Account {
    identity_key: Curve25519Keypair,
    signing_key: Ed25519Keypair,
    signed_pre_keys: SignedPreKeys,
    one_time_pre_keys: OneTimePreKeys,
}

impl Account {
    /// Create a new account with fresh keys and a first signed pre-key.
    pub fn new() -> Self {
        Self {
            identity_key: Curve25519Keypair::new(),
            signing_key: Ed25519Keypair::new(),
            signed_pre_keys: SignedPreKeys::new(unix_timestamp()),
            one_time_pre_keys: OneTimePreKeys::new(),
        }
    }

    /// The public Curve25519 identity key.
    pub const fn identity_key(&self) -> Curve25519PublicKey {
        self.identity_key.public_key()
    }

    /// The public Ed25519 signing key.
    pub const fn signing_key(&self) -> Ed25519PublicKey {
        self.signing_key.public_key()
    }

    /// The signing key pair, for a [`PeerAuthenticator`].
    ///
    /// [`PeerAuthenticator`]: crate::auth::PeerAuthenticator
    pub const fn signing_keypair(&self) -> &Ed25519Keypair {
        &self.signing_key
    }

    /// The human-presentable fingerprint of the identity key.
    pub fn fingerprint(&self) -> String {
        self.identity_key().fingerprint()
    }

    /// Sign a message with the signing key.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.signing_key.sign(message)
    }

    /// The current signed pre-key, with its signature.
    pub fn signed_pre_key(&self) -> SignedPreKey {
        let current = self.signed_pre_keys.current();
        let public_key = current.public_key();

        SignedPreKey {
            key_id: current.key_id(),
            public_key,
            signature: self.signing_key.sign(public_key.as_bytes()),
        }
    }

    /// Replace the signed pre-key. The previous one keeps working until the
    /// next rotation.
    pub fn rotate_signed_pre_key(&mut self) -> SignedPreKey {
        let key_id = self.signed_pre_keys.rotate(unix_timestamp()).key_id();
        info!(%key_id, "Rotated the signed pre-key");

        self.signed_pre_key()
    }

    /// Replace the signed pre-key if it is older than `max_age_secs`.
    pub fn rotate_signed_pre_key_if_older(
        &mut self,
        max_age_secs: u64,
        now: u64,
    ) -> Option<SignedPreKey> {
        let age = now.saturating_sub(self.signed_pre_keys.current().created_at());

        (age >= max_age_secs).then(|| self.rotate_signed_pre_key())
    }

    /// Forget the signed pre-key that the last rotation replaced.
    pub fn forget_previous_signed_pre_key(&mut self) -> bool {
        self.signed_pre_keys.forget_previous()
    }

    /// The maximum number of one-time pre-keys that should be published at
    /// once.
    pub const fn max_number_of_one_time_pre_keys(&self) -> usize {
        PUBLIC_MAX_ONE_TIME_PRE_KEYS
    }

    /// Generate new one-time pre-keys, returns the public halves.
    ///
    /// If the total number of stored keys exceeds the internal limit, the
    /// oldest ones are dropped.
    pub fn generate_one_time_pre_keys(&mut self, count: usize) -> Vec<OneTimePreKey> {
        let created = self.one_time_pre_keys.generate(count);
        debug!(count, stored = self.one_time_pre_keys.len(), "Generated one-time pre-keys");

        created
    }

    /// The number of one-time pre-keys we hold the secret half of.
    pub fn stored_one_time_pre_key_count(&self) -> usize {
        self.one_time_pre_keys.len()
    }

    /// The one-time pre-keys that weren't published yet, for replenishing the
    /// key bundle store.
    pub fn one_time_pre_keys(&self) -> Vec<OneTimePreKey> {
        self.one_time_pre_keys.unpublished()
    }

    /// Mark all one-time pre-keys as published.
    pub fn mark_keys_as_published(&mut self) {
        self.one_time_pre_keys.mark_as_published();
    }

    /// Our complete key bundle, with every one-time pre-key we still hold.
    pub fn key_bundle(&self) -> KeyBundle {
        KeyBundle {
            identity_key: self.identity_key(),
            signing_key: Some(self.signing_key()),
            fingerprint: self.fingerprint(),
            signed_pre_key: Some(self.signed_pre_key()),
            one_time_pre_keys: self.one_time_pre_keys.public_keys(),
        }
    }

    /// Start a session with the owner of the given key bundle.
    ///
    /// The first one-time pre-key in the bundle is used, see
    /// [`agreement::initiate()`].
    pub fn create_outbound_session(
        &self,
        bundle: &KeyBundle,
        agreement_config: &AgreementConfig,
        ratchet_config: RatchetConfig,
    ) -> Result<OutboundCreationResult, KeyAgreementError> {
        let agreement = agreement::initiate(&self.identity_key, bundle, agreement_config)?;

        let session_keys = SessionKeys {
            pre_key: agreement.pre_key_info(),
            responder_identity_key: bundle.identity_key,
        };
        let associated_data = AssociatedData::new(&self.identity_key(), &bundle.identity_key);
        let remote_signing_key = if agreement.is_verified() { bundle.signing_key } else { None };
        let one_time_pre_key_id = agreement.one_time_pre_key_id();

        let state = RatchetState::initiator(agreement.into_seed(), associated_data, ratchet_config);
        let session = Session::new(session_keys, state, bundle.identity_key, remote_signing_key);

        Ok(OutboundCreationResult { session, one_time_pre_key_id })
    }

    fn find_one_time_pre_key(
        &self,
        public_key: Option<&Curve25519PublicKey>,
    ) -> Result<Option<&Curve25519SecretKey>, SessionCreationError> {
        public_key
            .map(|public_key| {
                self.one_time_pre_keys
                    .get_secret_key(public_key)
                    .map(|(_, key)| key)
                    .ok_or(SessionCreationError::MissingOneTimeKey(*public_key))
            })
            .transpose()
    }

    /// Create a session from the first message the other side sent us.
    ///
    /// The one-time pre-key the message used is removed, but only once the
    /// message decrypted. A forged message can't use up our keys.
    pub fn create_inbound_session(
        &mut self,
        envelope: &EncryptedEnvelope,
        ratchet_config: RatchetConfig,
    ) -> Result<InboundCreationResult, SessionCreationError> {
        let pre_key = envelope.pre_key.ok_or(SessionCreationError::MissingPreKeyInfo)?;

        let signed_pre_key = self
            .signed_pre_keys
            .get_secret_key(pre_key.signed_pre_key_id)
            .ok_or(SessionCreationError::UnknownSignedPreKey(pre_key.signed_pre_key_id))?;
        let one_time_pre_key = self.find_one_time_pre_key(pre_key.one_time_pre_key.as_ref())?;

        let seed = X3dhSecret::responder(
            self.identity_key.secret_key(),
            signed_pre_key,
            one_time_pre_key,
            &pre_key.identity_key,
            &pre_key.ephemeral_key,
        )?
        .expand();

        let associated_data = AssociatedData::new(&pre_key.identity_key, &self.identity_key());
        let state = RatchetState::responder(
            seed,
            envelope.header.public_key,
            associated_data,
            ratchet_config,
        );

        let (state, plaintext) = state.decrypt(envelope).inspect_err(|e| {
            warn!(
                identity_key = %pre_key.identity_key,
                error = %e,
                "The message establishing a session couldn't be decrypted"
            );
        })?;

        let one_time_pre_key_id =
            pre_key.one_time_pre_key.and_then(|k| self.one_time_pre_keys.remove_secret_key(&k));

        let session_keys =
            SessionKeys { pre_key, responder_identity_key: self.identity_key() };
        let session = Session::new(session_keys, state, pre_key.identity_key, None);

        debug!(
            session_id = %session.session_id(),
            one_time_pre_key_id = ?one_time_pre_key_id,
            "Created an inbound session"
        );

        Ok(InboundCreationResult { session, plaintext, one_time_pre_key_id })
    }

    /// Convert the account into a serializable struct.
    pub fn pickle(&self) -> AccountPickle {
        AccountPickle {
            identity_key: *self.identity_key.secret_key().to_bytes(),
            signing_key: *self.signing_key.secret_bytes(),
            signed_pre_keys: self.signed_pre_keys.pickle(),
            one_time_pre_keys: self.one_time_pre_keys.pickle(),
        }
    }

    /// Restore an [`Account`] from a previously saved [`AccountPickle`].
    pub fn from_pickle(pickle: &AccountPickle) -> Self {
        let mut identity_key = pickle.identity_key;
        let mut signing_key = pickle.signing_key;

        Self {
            identity_key: Curve25519Keypair::from_secret_key(Curve25519SecretKey::from_slice(
                &mut identity_key,
            )),
            signing_key: Ed25519Keypair::from_secret_bytes(&mut signing_key),
            signed_pre_keys: SignedPreKeys::from_pickle(&pickle.signed_pre_keys),
            one_time_pre_keys: OneTimePreKeys::from_pickle(&pickle.one_time_pre_keys),
        }
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("identity_key", &self.identity_key())
            .field("signing_key", &self.signing_key())
            .finish_non_exhaustive()
    }
}

/// A format suitable for serialization which implements
/// [`serde::Serialize`] and [`serde::Deserialize`]. Obtainable by calling
/// [`Account::pickle`].
///
/// Contains the secret keys in the clear, encrypting it before it is stored
/// is up to the caller.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct AccountPickle {
    #[serde(with = "base64_serde")]
    identity_key: [u8; 32],
    #[serde(with = "base64_serde")]
    signing_key: [u8; 32],
    signed_pre_keys: SignedPreKeysPickle,
    one_time_pre_keys: OneTimePreKeysPickle,
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{Account, AccountPickle, SessionCreationError};
    use crate::{
        ErrorKind,
        agreement::{AgreementConfig, KeyBundle, OneTimePreKey},
        ratchet::RatchetConfig,
        session::Session,
    };

    fn outbound(alice: &Account, bundle: &KeyBundle) -> anyhow::Result<Session> {
        Ok(alice
            .create_outbound_session(bundle, &AgreementConfig::default(), RatchetConfig::default())?
            .session)
    }

    #[test]
    fn inbound_session_creation() -> anyhow::Result<()> {
        let alice = Account::new();
        let mut bob = Account::new();
        let created = bob.generate_one_time_pre_keys(1);

        let result = alice.create_outbound_session(
            &bob.key_bundle(),
            &AgreementConfig::default(),
            RatchetConfig::default(),
        )?;
        assert_eq!(result.one_time_pre_key_id, Some(created[0].id));

        let mut alice_session = result.session;
        let envelope = alice_session.encrypt(b"Hello Bob!");

        let inbound = bob.create_inbound_session(&envelope, RatchetConfig::default())?;

        assert_eq!(inbound.plaintext, b"Hello Bob!");
        assert_eq!(inbound.one_time_pre_key_id, Some(created[0].id));
        assert_eq!(inbound.session.remote_identity_key(), alice.identity_key());
        assert_eq!(bob.stored_one_time_pre_key_count(), 0);

        Ok(())
    }

    #[test]
    fn replayed_first_messages_fail() -> anyhow::Result<()> {
        let alice = Account::new();
        let mut bob = Account::new();
        bob.generate_one_time_pre_keys(1);

        let envelope = outbound(&alice, &bob.key_bundle())?.encrypt(b"Hello Bob!");
        bob.create_inbound_session(&envelope, RatchetConfig::default())?;

        assert_matches!(
            bob.create_inbound_session(&envelope, RatchetConfig::default()),
            Err(error @ SessionCreationError::MissingOneTimeKey(_))
        );
        assert_eq!(error.kind(), ErrorKind::MessageKeyNotFound);

        Ok(())
    }

    #[test]
    fn invalid_session_creation_does_not_remove_one_time_keys() -> anyhow::Result<()> {
        let alice = Account::new();
        let mut bob = Account::new();
        bob.generate_one_time_pre_keys(1);

        let mut envelope = outbound(&alice, &bob.key_bundle())?.encrypt(b"Hello Bob!");
        envelope.ciphertext[0] ^= 1;

        assert_matches!(
            bob.create_inbound_session(&envelope, RatchetConfig::default()),
            Err(error @ SessionCreationError::Decryption(_))
        );
        assert_eq!(error.kind(), ErrorKind::Decryption);
        assert_eq!(bob.stored_one_time_pre_key_count(), 1);

        Ok(())
    }

    #[test]
    fn sessions_without_one_time_keys() -> anyhow::Result<()> {
        let alice = Account::new();
        let mut bob = Account::new();

        let envelope = outbound(&alice, &bob.key_bundle())?.encrypt(b"Hello Bob!");
        assert_eq!(envelope.pre_key.and_then(|p| p.one_time_pre_key), None);

        let inbound = bob.create_inbound_session(&envelope, RatchetConfig::default())?;
        assert_eq!(inbound.plaintext, b"Hello Bob!");
        assert_eq!(inbound.one_time_pre_key_id, None);

        Ok(())
    }

    #[test]
    fn the_previous_signed_pre_key_still_works() -> anyhow::Result<()> {
        let alice = Account::new();
        let mut bob = Account::new();
        let old_bundle = bob.key_bundle();

        bob.rotate_signed_pre_key();
        let envelope = outbound(&alice, &old_bundle)?.encrypt(b"Hello Bob!");
        bob.create_inbound_session(&envelope, RatchetConfig::default())?;

        bob.rotate_signed_pre_key();
        let envelope = outbound(&alice, &old_bundle)?.encrypt(b"Hello Bob!");

        assert_matches!(
            bob.create_inbound_session(&envelope, RatchetConfig::default()),
            Err(SessionCreationError::UnknownSignedPreKey(_))
        );

        Ok(())
    }

    #[test]
    fn signed_pre_keys_rotate_by_age() {
        let mut bob = Account::new();
        let created_at = crate::utilities::unix_timestamp();

        assert!(bob.rotate_signed_pre_key_if_older(u64::MAX, created_at).is_none());
        assert!(bob.rotate_signed_pre_key_if_older(0, created_at).is_some());
        assert!(bob.forget_previous_signed_pre_key());
    }

    #[test]
    fn messages_without_key_agreement_information() -> anyhow::Result<()> {
        let alice = Account::new();
        let mut bob = Account::new();

        let mut envelope = outbound(&alice, &bob.key_bundle())?.encrypt(b"Hello Bob!");
        envelope.pre_key = None;

        assert_matches!(
            bob.create_inbound_session(&envelope, RatchetConfig::default()),
            Err(SessionCreationError::MissingPreKeyInfo)
        );

        Ok(())
    }

    #[test]
    fn published_keys() {
        let mut bob = Account::new();
        assert!(bob.max_number_of_one_time_pre_keys() >= 3);
        let created: Vec<OneTimePreKey> = bob.generate_one_time_pre_keys(3);

        assert_eq!(bob.one_time_pre_keys(), created);
        assert_eq!(bob.key_bundle().one_time_pre_keys, created);

        bob.mark_keys_as_published();

        assert!(bob.one_time_pre_keys().is_empty());
        assert_eq!(bob.key_bundle().one_time_pre_keys, created);
    }

    #[test]
    fn bundles_verify() -> anyhow::Result<()> {
        let bob = Account::new();
        let bundle = bob.key_bundle();

        let signed_pre_key = bundle.signed_pre_key.ok_or(anyhow::anyhow!("no signed pre-key"))?;
        let signing_key = bundle.signing_key.ok_or(anyhow::anyhow!("no signing key"))?;

        signing_key.verify(signed_pre_key.public_key.as_bytes(), &signed_pre_key.signature)?;
        assert_eq!(bundle.fingerprint, bundle.identity_key.fingerprint());

        Ok(())
    }

    #[test]
    fn account_pickling_roundtrip_is_identity() -> anyhow::Result<()> {
        let alice = Account::new();
        let mut bob = Account::new();
        bob.generate_one_time_pre_keys(2);
        bob.mark_keys_as_published();
        bob.generate_one_time_pre_keys(1);
        let bundle = bob.key_bundle();

        let json = serde_json::to_string(&bob.pickle())?;
        let pickle: AccountPickle = serde_json::from_str(&json)?;
        let mut restored = Account::from_pickle(&pickle);

        assert_eq!(restored.key_bundle(), bundle);
        assert_eq!(restored.one_time_pre_keys(), bob.one_time_pre_keys());

        let envelope = outbound(&alice, &bundle)?.encrypt(b"Hello Bob!");
        assert_eq!(
            restored.create_inbound_session(&envelope, RatchetConfig::default())?.plaintext,
            b"Hello Bob!"
        );

        Ok(())
    }
}
