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


//! X3DH key agreement.
//!
//! The initiator fetches the other side's [`KeyBundle`], checks the signature
//! of its signed pre-key and derives a [`RatchetSeed`] from four
//! Diffie-Hellman exchanges, three if no one-time pre-key was left. The
//! responder repeats the exchanges once the first message arrives, using the
//! [`PreKeyInfo`] the initiator attaches to its messages.

mod bundle;
mod shared_secret;
mod store;

pub use bundle::{KeyBundle, OneTimePreKey, SignedPreKey};
use rand::thread_rng;
use serde::{Deserialize, Serialize};
pub(crate) use shared_secret::X3dhSecret;
pub use store::{KeyBundleStore, MemoryKeyBundleStore, StoreError};
use thiserror::Error;
use tracing::{debug, warn};
use x25519_dalek::ReusableSecret;

use crate::{
    ErrorKind,
    ratchet::{PreKeyInfo, RatchetSeed},
    types::{Curve25519Keypair, Curve25519PublicKey, KeyError, KeyId, SignatureError},
};

/// What to do with a key bundle that has no signing key.
///
/// Such bundles were published before signing keys existed, their signed
/// pre-key can't be checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsignedBundlePolicy {
    /// Refuse to start a session.
    #[default]
    Reject,
    /// Start the session but mark it as unverified.
    AllowUntrusted,
}

/// Configuration for the initiating side of a key agreement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgreementConfig {
    /// How bundles without a signing key are treated.
    pub unsigned_bundle_policy: UnsignedBundlePolicy,
}

/// Error type describing failures of the initiating side of a key agreement.
#[derive(Debug, Error)]
pub enum KeyAgreementError {
    /// The bundle doesn't contain a signed pre-key.
    #[error("The key bundle doesn't contain a signed pre-key")]
    MissingSignedPreKey,
    /// The bundle doesn't contain a signing key and unsigned bundles are
    /// rejected.
    #[error("The key bundle doesn't contain a signing key")]
    MissingSigningKey,
    /// The signature of the signed pre-key didn't verify.
    #[error("The signature of the signed pre-key is invalid: {0}")]
    Signature(#[source] SignatureError),
    /// The fingerprint in the bundle doesn't belong to its identity key.
    #[error("The fingerprint of the key bundle doesn't match its identity key")]
    FingerprintMismatch,
    /// One of the Diffie-Hellman exchanges failed.
    #[error(transparent)]
    Key(#[from] KeyError),
}

impl KeyAgreementError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            KeyAgreementError::MissingSignedPreKey | KeyAgreementError::MissingSigningKey => {
                ErrorKind::KeyBundleIncomplete
            }
            KeyAgreementError::Signature(_)
            | KeyAgreementError::FingerprintMismatch
            | KeyAgreementError::Key(KeyError::NonContributoryKey) => ErrorKind::Authentication,
            KeyAgreementError::Key(_) => ErrorKind::Malformed,
        }
    }
}

/// The result of the initiating side of a key agreement.
pub struct OutboundAgreement {
    seed: RatchetSeed,
    pre_key: PreKeyInfo,
    one_time_pre_key_id: Option<KeyId>,
    remote_identity_key: Curve25519PublicKey,
    verified: bool,
}

impl OutboundAgreement {
    /// The information the responder needs to derive the same seed.
    pub const fn pre_key_info(&self) -> PreKeyInfo {
        self.pre_key
    }

    /// Was a one-time pre-key part of the agreement.
    pub const fn used_one_time_key(&self) -> bool {
        self.one_time_pre_key_id.is_some()
    }

    /// The id of the one-time pre-key that was used, it needs to be removed
    /// from the key bundle store.
    pub const fn one_time_pre_key_id(&self) -> Option<KeyId> {
        self.one_time_pre_key_id
    }

    /// The identity key of the other side.
    pub const fn remote_identity_key(&self) -> Curve25519PublicKey {
        self.remote_identity_key
    }

    /// Was the signed pre-key checked against a signing key.
    pub const fn is_verified(&self) -> bool {
        self.verified
    }

    pub(crate) fn into_seed(self) -> RatchetSeed {
        self.seed
    }
}

impl std::fmt::Debug for OutboundAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundAgreement")
            .field("pre_key", &self.pre_key)
            .field("one_time_pre_key_id", &self.one_time_pre_key_id)
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

fn check_signed_pre_key(
    bundle: &KeyBundle,
    signed_pre_key: &SignedPreKey,
    config: &AgreementConfig,
) -> Result<bool, KeyAgreementError> {
    match &bundle.signing_key {
        Some(signing_key) => {
            signing_key
                .verify(signed_pre_key.public_key.as_bytes(), &signed_pre_key.signature)
                .map_err(|e| {
                    warn!(
                        identity_key = %bundle.identity_key,
                        key_id = %signed_pre_key.key_id,
                        "The signature of a signed pre-key didn't verify"
                    );
                    KeyAgreementError::Signature(e)
                })?;

            Ok(true)
        }
        None => match config.unsigned_bundle_policy {
            UnsignedBundlePolicy::Reject => Err(KeyAgreementError::MissingSigningKey),
            UnsignedBundlePolicy::AllowUntrusted => {
                warn!(
                    identity_key = %bundle.identity_key,
                    "Starting an unverified session from a key bundle without a signing key"
                );

                Ok(false)
            }
        },
    }
}

/// Run the initiating side of a key agreement against the given bundle.
///
/// The first one-time pre-key of the bundle is used. Bundles fetched from a
/// [`KeyBundleStore`] should be restricted to the single key the store handed
/// out, see [`KeyBundleStore::fetch_for_agreement()`].
pub fn initiate(
    identity_key: &Curve25519Keypair,
    bundle: &KeyBundle,
    config: &AgreementConfig,
) -> Result<OutboundAgreement, KeyAgreementError> {
    let signed_pre_key = bundle.signed_pre_key.ok_or(KeyAgreementError::MissingSignedPreKey)?;

    if !bundle.fingerprint.trim().is_empty()
        && !bundle.identity_key.matches_fingerprint(&bundle.fingerprint)
    {
        warn!(identity_key = %bundle.identity_key, "The fingerprint of a key bundle didn't match");
        return Err(KeyAgreementError::FingerprintMismatch);
    }

    let verified = check_signed_pre_key(bundle, &signed_pre_key, config)?;

    let one_time_pre_key = bundle.one_time_pre_keys.first().copied();

    if one_time_pre_key.is_none() {
        warn!(
            identity_key = %bundle.identity_key,
            "No one-time pre-key left, continuing the key agreement without one"
        );
    }

    let ephemeral_key = ReusableSecret::random_from_rng(thread_rng());

    let secret = X3dhSecret::initiator(
        identity_key.secret_key(),
        &ephemeral_key,
        &bundle.identity_key,
        &signed_pre_key.public_key,
        one_time_pre_key.as_ref().map(|k| &k.public_key),
    )?;

    let pre_key = PreKeyInfo {
        identity_key: identity_key.public_key(),
        ephemeral_key: Curve25519PublicKey::from(&ephemeral_key),
        signed_pre_key_id: signed_pre_key.key_id,
        one_time_pre_key: one_time_pre_key.map(|k| k.public_key),
    };

    debug!(
        identity_key = %bundle.identity_key,
        signed_pre_key_id = %signed_pre_key.key_id,
        one_time_pre_key_id = ?one_time_pre_key.map(|k| k.id),
        verified,
        "Completed the initiating side of a key agreement"
    );

    Ok(OutboundAgreement {
        seed: secret.expand(),
        pre_key,
        one_time_pre_key_id: one_time_pre_key.map(|k| k.id),
        remote_identity_key: bundle.identity_key,
        verified,
    })
}
