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


//! Challenge-response authentication of peers.
//!
//! A [`PeerAuthenticator`] hands out random challenges and accepts a
//! [`ChallengeResponse`] only if it signs the pending challenge with the
//! signing key it names, in time, and for the user the challenge was issued
//! to. A peer that passes is remembered as a [`PeerIdentity`] until it is
//! revoked, its signing key is then used to check per-message signatures and
//! to bind sessions to the peer.

mod challenge;

use std::collections::HashMap;

pub use challenge::{Challenge, ChallengeResponse};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    ErrorKind,
    types::{Ed25519Keypair, Ed25519PublicKey, Ed25519Signature, SignatureError},
    utilities::unix_timestamp,
};

/// Configuration for a [`PeerAuthenticator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticatorConfig {
    /// How many seconds a challenge stays valid.
    pub challenge_ttl_secs: u64,
}

impl AuthenticatorConfig {
    /// One minute.
    pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 60;
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self { challenge_ttl_secs: Self::DEFAULT_CHALLENGE_TTL_SECS }
    }
}

/// A peer that proved possession of its signing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    /// The id of the peer.
    pub user_id: String,
    /// The verified signing key of the peer.
    pub public_key: Ed25519PublicKey,
    /// When the peer was verified, as a Unix timestamp in seconds.
    pub verified_at: u64,
}

/// Error type describing authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No challenge is pending for this peer, it was never issued or was
    /// already answered.
    #[error("No challenge is pending for {0}")]
    UnknownChallenge(String),
    /// The response doesn't answer the pending challenge.
    #[error("The response of {0} doesn't answer the pending challenge")]
    ChallengeMismatch(String),
    /// The challenge expired before the response arrived, or the response
    /// claims to be from outside of the challenge window.
    #[error("The challenge for {peer_id} expired at {expires_at}")]
    StaleChallenge {
        /// The peer the challenge was issued to.
        peer_id: String,
        /// When the challenge expired.
        expires_at: u64,
    },
    /// The signature didn't verify.
    #[error("The signature of {peer_id} is invalid: {source}")]
    Signature {
        /// The peer whose signature was checked.
        peer_id: String,
        /// The underlying signature error.
        source: SignatureError,
    },
    /// The response was created by a different user than the one the
    /// challenge was issued to.
    #[error("The challenge was issued to {expected}, but answered by {got}")]
    UserIdMismatch {
        /// The peer the challenge was issued to.
        expected: String,
        /// The user id found in the response.
        got: String,
    },
    /// The peer was never authenticated, or was revoked.
    #[error("The peer {0} isn't authenticated")]
    UnknownPeer(String),
    /// The signing key doesn't belong to the authenticated peer.
    #[error("The signing key doesn't match the authenticated key of {0}")]
    KeyMismatch(String),
}

impl AuthError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            AuthError::UnknownChallenge(_) | AuthError::StaleChallenge { .. } => {
                ErrorKind::StaleChallenge
            }
            AuthError::ChallengeMismatch(_)
            | AuthError::Signature { .. }
            | AuthError::UserIdMismatch { .. }
            | AuthError::UnknownPeer(_)
            | AuthError::KeyMismatch(_) => ErrorKind::Authentication,
        }
    }
}

/// Issues challenges to peers, verifies their responses and keeps track of
/// the peers that passed.
pub struct PeerAuthenticator {
    user_id: String,
    signing_key: Ed25519Keypair,
    config: AuthenticatorConfig,
    pending: Mutex<HashMap<String, Challenge>>,
    identities: RwLock<HashMap<String, PeerIdentity>>,
}

impl PeerAuthenticator {
    /// Create a new authenticator for the given local user and signing key.
    pub fn new(
        user_id: impl Into<String>,
        signing_key: Ed25519Keypair,
        config: AuthenticatorConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            signing_key,
            config,
            pending: Mutex::new(HashMap::new()),
            identities: RwLock::new(HashMap::new()),
        }
    }

    /// The id of the local user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The local signing key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.signing_key.public_key()
    }

    /// Issue a new challenge to the given peer, replacing any challenge that
    /// is still pending for it.
    pub fn generate_challenge(&self, peer_id: &str) -> Challenge {
        self.generate_challenge_at(peer_id, unix_timestamp())
    }

    /// [`PeerAuthenticator::generate_challenge()`] at the given Unix
    /// timestamp.
    pub fn generate_challenge_at(&self, peer_id: &str, now: u64) -> Challenge {
        let challenge = Challenge::new(now, self.config.challenge_ttl_secs);
        self.pending.lock().insert(peer_id.to_owned(), challenge);

        debug!(peer_id, expires_at = challenge.expires_at, "Issued a challenge");

        challenge
    }

    /// Answer a challenge we received, signing it with our signing key.
    pub fn sign_challenge(&self, challenge: &Challenge) -> ChallengeResponse {
        self.sign_challenge_at(challenge, unix_timestamp())
    }

    /// [`PeerAuthenticator::sign_challenge()`] at the given Unix timestamp.
    pub fn sign_challenge_at(&self, challenge: &Challenge, now: u64) -> ChallengeResponse {
        let bytes = challenge::signed_bytes(&challenge.nonce, now);

        ChallengeResponse {
            user_id: self.user_id.clone(),
            public_key: self.signing_key.public_key(),
            nonce: challenge.nonce,
            timestamp: now,
            signature: self.signing_key.sign(&bytes),
        }
    }

    /// Verify the response of a peer to the challenge we issued to it.
    ///
    /// The pending challenge is used up by this call, whether the response
    /// passes or not.
    pub fn verify_response(
        &self,
        peer_id: &str,
        response: &ChallengeResponse,
    ) -> Result<PeerIdentity, AuthError> {
        self.verify_response_at(peer_id, response, unix_timestamp())
    }

    /// [`PeerAuthenticator::verify_response()`] at the given Unix timestamp.
    pub fn verify_response_at(
        &self,
        peer_id: &str,
        response: &ChallengeResponse,
        now: u64,
    ) -> Result<PeerIdentity, AuthError> {
        let pending = self
            .pending
            .lock()
            .remove(peer_id)
            .ok_or_else(|| AuthError::UnknownChallenge(peer_id.to_owned()))?;

        let result = Self::check_response(peer_id, &pending, response, now);

        match result {
            Ok(()) => {
                let identity = PeerIdentity {
                    user_id: peer_id.to_owned(),
                    public_key: response.public_key,
                    verified_at: now,
                };

                let mut identities = self.identities.write();

                if identities.get(peer_id).is_some_and(|e| e.public_key != identity.public_key) {
                    warn!(peer_id, "A peer answered a challenge with a new signing key");
                    return Err(AuthError::KeyMismatch(peer_id.to_owned()));
                }

                identities.insert(peer_id.to_owned(), identity.clone());
                info!(peer_id, public_key = %identity.public_key, "Authenticated a peer");

                Ok(identity)
            }
            Err(e) => {
                warn!(peer_id, error = %e, "A challenge response was rejected");
                Err(e)
            }
        }
    }

    fn check_response(
        peer_id: &str,
        pending: &Challenge,
        response: &ChallengeResponse,
        now: u64,
    ) -> Result<(), AuthError> {
        if !pending.matches(&response.nonce) {
            return Err(AuthError::ChallengeMismatch(peer_id.to_owned()));
        }

        if pending.is_expired(now)
            || response.timestamp < pending.issued_at
            || response.timestamp > pending.expires_at
        {
            return Err(AuthError::StaleChallenge {
                peer_id: peer_id.to_owned(),
                expires_at: pending.expires_at,
            });
        }

        let bytes = challenge::signed_bytes(&pending.nonce, response.timestamp);

        response
            .public_key
            .verify(&bytes, &response.signature)
            .map_err(|source| AuthError::Signature { peer_id: peer_id.to_owned(), source })?;

        if response.user_id != peer_id {
            return Err(AuthError::UserIdMismatch {
                expected: peer_id.to_owned(),
                got: response.user_id.clone(),
            });
        }

        Ok(())
    }

    /// Sign a message with the local signing key.
    pub fn sign_message(&self, message: &[u8]) -> Ed25519Signature {
        self.signing_key.sign(message)
    }

    /// Verify the signature of an authenticated peer over a message.
    pub fn verify_message_signature(
        &self,
        peer_id: &str,
        message: &[u8],
        signature: &Ed25519Signature,
    ) -> Result<(), AuthError> {
        let public_key = self
            .identities
            .read()
            .get(peer_id)
            .map(|i| i.public_key)
            .ok_or_else(|| AuthError::UnknownPeer(peer_id.to_owned()))?;

        public_key.verify(message, signature).map_err(|source| {
            warn!(peer_id, "The signature of a message didn't verify");
            AuthError::Signature { peer_id: peer_id.to_owned(), source }
        })
    }

    /// Check that the given signing key is the authenticated key of the
    /// peer.
    ///
    /// Used to tie a session to a peer: the signing key that signed the
    /// pre-key of the session must be the one the peer proved possession of.
    pub fn verify_session_binding(
        &self,
        peer_id: &str,
        signing_key: &Ed25519PublicKey,
    ) -> Result<(), AuthError> {
        match self.identities.read().get(peer_id) {
            Some(identity) if identity.public_key == *signing_key => Ok(()),
            Some(_) => {
                warn!(peer_id, "A session is bound to a different signing key than the peer's");
                Err(AuthError::KeyMismatch(peer_id.to_owned()))
            }
            None => Err(AuthError::UnknownPeer(peer_id.to_owned())),
        }
    }

    /// The identity of an authenticated peer.
    pub fn peer_identity(&self, peer_id: &str) -> Option<PeerIdentity> {
        self.identities.read().get(peer_id).cloned()
    }

    /// Forget everything about a peer, its identity and any pending
    /// challenge. Returns whether the peer was authenticated.
    pub fn revoke_peer(&self, peer_id: &str) -> bool {
        self.pending.lock().remove(peer_id);
        let revoked = self.identities.write().remove(peer_id).is_some();

        info!(peer_id, revoked, "Revoked a peer");

        revoked
    }

    /// The number of challenges waiting for a response.
    pub fn pending_challenge_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop all pending challenges that expired, returns how many were
    /// dropped.
    pub fn purge_stale_challenges(&self, now: u64) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, challenge| !challenge.is_expired(now));

        before - pending.len()
    }
}

impl std::fmt::Debug for PeerAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerAuthenticator")
            .field("user_id", &self.user_id)
            .field("public_key", &self.signing_key.public_key())
            .finish_non_exhaustive()
    }
}
