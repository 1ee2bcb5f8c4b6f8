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


//! The X3DH shared secret.
//!
//! With our identity key `IK_a`, our ephemeral key `EK_a`, and the other
//! side's identity key `IK_b`, signed pre-key `SPK_b` and optional one-time
//! pre-key `OPK_b`:
//!
//! ```text
//! DH1 = DH(IK_a, SPK_b)
//! DH2 = DH(EK_a, IK_b)
//! DH3 = DH(EK_a, SPK_b)
//! DH4 = DH(EK_a, OPK_b)
//! SK  = HKDF(0xFF * 32 || DH1 || DH2 || DH3 [|| DH4])
//! ```
//!
//! The 64 bytes of HKDF output are split into the root key and the chain key
//! of the initiator's first sending chain.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{ReusableSecret, SharedSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    ratchet::RatchetSeed,
    types::{Curve25519PublicKey, Curve25519SecretKey, KeyError},
};

const HKDF_INFO: &[u8] = b"DOUBLE_RATCHET_X3DH";
const PADDING: [u8; 32] = [0xFF; 32];

#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct X3dhSecret(Vec<u8>);

impl std::fmt::Debug for X3dhSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X3dhSecret").field("length", &self.0.len()).finish_non_exhaustive()
    }
}

impl X3dhSecret {
    fn merge_secrets(secrets: &[SharedSecret]) -> Result<Self, KeyError> {
        if !secrets.iter().all(SharedSecret::was_contributory) {
            return Err(KeyError::NonContributoryKey);
        }

        let mut secret = Vec::with_capacity(PADDING.len() + 32 * secrets.len());
        secret.extend_from_slice(&PADDING);

        for shared_secret in secrets {
            secret.extend_from_slice(shared_secret.as_bytes());
        }

        Ok(Self(secret))
    }

    /// The initiator's side of the key agreement.
    pub fn initiator(
        identity_key: &Curve25519SecretKey,
        ephemeral_key: &ReusableSecret,
        remote_identity_key: &Curve25519PublicKey,
        remote_signed_pre_key: &Curve25519PublicKey,
        remote_one_time_pre_key: Option<&Curve25519PublicKey>,
    ) -> Result<Self, KeyError> {
        let mut secrets = vec![
            identity_key.diffie_hellman(remote_signed_pre_key),
            ephemeral_key.diffie_hellman(&remote_identity_key.inner),
            ephemeral_key.diffie_hellman(&remote_signed_pre_key.inner),
        ];

        if let Some(one_time_pre_key) = remote_one_time_pre_key {
            secrets.push(ephemeral_key.diffie_hellman(&one_time_pre_key.inner));
        }

        Self::merge_secrets(&secrets)
    }

    /// The responder's side of the key agreement, the same DH terms with the
    /// roles swapped.
    pub fn responder(
        identity_key: &Curve25519SecretKey,
        signed_pre_key: &Curve25519SecretKey,
        one_time_pre_key: Option<&Curve25519SecretKey>,
        remote_identity_key: &Curve25519PublicKey,
        remote_ephemeral_key: &Curve25519PublicKey,
    ) -> Result<Self, KeyError> {
        let mut secrets = vec![
            signed_pre_key.diffie_hellman(remote_identity_key),
            identity_key.diffie_hellman(remote_ephemeral_key),
            signed_pre_key.diffie_hellman(remote_ephemeral_key),
        ];

        if let Some(one_time_pre_key) = one_time_pre_key {
            secrets.push(one_time_pre_key.diffie_hellman(remote_ephemeral_key));
        }

        Self::merge_secrets(&secrets)
    }

    pub fn expand(self) -> RatchetSeed {
        let hkdf: Hkdf<Sha256> = Hkdf::new(Some(&[0u8; 32]), &self.0);
        let mut root_key = Box::new([0u8; 32]);
        let mut chain_key = Box::new([0u8; 32]);

        let mut expanded_keys = [0u8; 64];

        #[allow(clippy::expect_used)]
        hkdf.expand(HKDF_INFO, &mut expanded_keys)
            .expect("We should be able to expand the shared X3DH secret into 64 bytes");

        root_key.copy_from_slice(&expanded_keys[0..32]);
        chain_key.copy_from_slice(&expanded_keys[32..64]);

        expanded_keys.zeroize();

        RatchetSeed::new(root_key, chain_key)
    }
}
