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

//! Curve25519 and Ed25519 key types, and the ids pre-keys are published
//! under.

mod curve25519;
mod ed25519;

pub use curve25519::{Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey};
pub use ed25519::{Ed25519Keypair, Ed25519PublicKey, Ed25519Signature, SignatureError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
pub use x25519_dalek::SharedSecret;

/// A unique identifier for a pre-key.
///
/// Keys generated by an [`Account`] use an internal counter, so ids reflect
/// the order in which the keys were created.
///
/// [`Account`]: crate::account::Account
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(pub(crate) u64);

impl KeyId {
    /// Get the numeric value of this id.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Derive a stable id from the key material of a one-time pre-key.
    ///
    /// Legacy bundles publish one-time pre-keys as bare strings without an
    /// id; they are assigned the first eight bytes of the SHA-256 of the key,
    /// read as a big-endian integer.
    pub fn from_public_key(key: &Curve25519PublicKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);

        Self(u64::from_be_bytes(id))
    }
}

impl From<u64> for KeyId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for keys that can't be decoded or safely used.
#[derive(Error, Debug)]
pub enum KeyError {
    /// The base64 encoding of the key is invalid.
    #[error("The key isn't valid base64: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// The decoded key has the wrong number of bytes.
    #[error("A {key_type} key needs {expected_length} bytes, got {length}")]
    InvalidKeyLength {
        /// Which kind of key was decoded.
        key_type: &'static str,
        /// How many bytes this kind of key has.
        expected_length: usize,
        /// How many bytes we got.
        length: usize,
    },

    /// The bytes don't represent a valid Ed25519 public key or signature.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// A Diffie-Hellman exchange produced a non-contributory shared secret,
    /// the remote key is a low-order point.
    ///
    /// See [`x25519_dalek::SharedSecret::was_contributory()`].
    #[error("A Diffie-Hellman exchange with the remote key produced a non-contributory secret")]
    NonContributoryKey,
}
