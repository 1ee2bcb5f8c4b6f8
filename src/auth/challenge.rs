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


use rand::{RngCore, thread_rng};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{
    types::{Ed25519PublicKey, Ed25519Signature},
    utilities::base64_serde,
};

/// A random challenge, sent to a peer that should prove possession of its
/// signing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// The random bytes the peer needs to sign.
    #[serde(with = "base64_serde")]
    pub nonce: [u8; Challenge::NONCE_LENGTH],
    /// When the challenge was issued, as a Unix timestamp in seconds.
    pub issued_at: u64,
    /// After this Unix timestamp the challenge is no longer accepted.
    pub expires_at: u64,
}

impl Challenge {
    /// The number of random bytes in a challenge.
    pub const NONCE_LENGTH: usize = 32;

    pub(super) fn new(issued_at: u64, ttl_secs: u64) -> Self {
        let mut nonce = [0u8; Self::NONCE_LENGTH];
        thread_rng().fill_bytes(&mut nonce);

        Self { nonce, issued_at, expires_at: issued_at.saturating_add(ttl_secs) }
    }

    pub(super) const fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    pub(super) fn matches(&self, nonce: &[u8; Self::NONCE_LENGTH]) -> bool {
        self.nonce.ct_eq(nonce).into()
    }
}

/// A peer's answer to a [`Challenge`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    /// The user the responder claims to be.
    pub user_id: String,
    /// The signing key the responder proves possession of.
    pub public_key: Ed25519PublicKey,
    /// The nonce of the challenge that is answered.
    #[serde(with = "base64_serde")]
    pub nonce: [u8; Challenge::NONCE_LENGTH],
    /// When the response was created, as a Unix timestamp in seconds.
    pub timestamp: u64,
    /// The signature over the challenge nonce and the timestamp.
    pub signature: Ed25519Signature,
}

/// The bytes a challenge response signs, the nonce followed by the big-endian
/// timestamp.
pub(super) fn signed_bytes(nonce: &[u8; Challenge::NONCE_LENGTH], timestamp: u64) -> [u8; 40] {
    let mut bytes = [0u8; 40];
    bytes[..32].copy_from_slice(nonce);
    bytes[32..].copy_from_slice(&timestamp.to_be_bytes());

    bytes
}

#[cfg(test)]
mod test {
    use super::{Challenge, signed_bytes};

    #[test]
    fn challenges_are_random() {
        let first = Challenge::new(100, 60);
        let second = Challenge::new(100, 60);

        assert_ne!(first.nonce, second.nonce);
        assert!(!first.matches(&second.nonce));
        assert!(first.matches(&first.nonce));
    }

    #[test]
    fn expiry() {
        let challenge = Challenge::new(100, 60);

        assert_eq!(challenge.expires_at, 160);
        assert!(!challenge.is_expired(160));
        assert!(challenge.is_expired(161));
    }

    #[test]
    fn the_timestamp_is_part_of_the_signed_bytes() {
        let nonce = [1u8; 32];

        assert_ne!(signed_bytes(&nonce, 1), signed_bytes(&nonce, 2));
        assert_eq!(signed_bytes(&nonce, 1)[32..], 1u64.to_be_bytes());
    }

    #[test]
    fn challenges_serialize_as_base64() -> anyhow::Result<()> {
        let challenge = Challenge::new(100, 60);
        let json = serde_json::to_value(challenge)?;

        assert!(json["nonce"].is_string());
        assert_eq!(json["issuedAt"], 100);
        assert_eq!(serde_json::from_value::<Challenge>(json)?, challenge);

        Ok(())
    }
}
