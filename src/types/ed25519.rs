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

pub use ed25519_dalek::SignatureError;
use ed25519_dalek::{
    PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, Signature, Signer, SigningKey, Verifier, VerifyingKey,
};
use rand::thread_rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
use zeroize::Zeroize;

use super::KeyError;
use crate::utilities::{base64_decode, base64_encode};

/// An Ed25519 key pair used exclusively for signatures.
///
/// Kept apart from the Curve25519 identity key, a device has one of each.
#[derive(Clone)]
pub struct Ed25519Keypair {
    secret_key: Box<SigningKey>,
    public_key: Ed25519PublicKey,
}

impl Ed25519Keypair {
    /// Generate a fresh signing key pair.
    pub fn new() -> Self {
        let mut rng = thread_rng();
        let secret_key = SigningKey::generate(&mut rng);
        let public_key = Ed25519PublicKey(secret_key.verifying_key());

        Self { secret_key: Box::new(secret_key), public_key }
    }

    /// Restore a key pair from its 32 secret bytes. The input is zeroized.
    pub fn from_secret_bytes(bytes: &mut [u8; 32]) -> Self {
        let secret_key = SigningKey::from_bytes(bytes);
        bytes.zeroize();

        let public_key = Ed25519PublicKey(secret_key.verifying_key());

        Self { secret_key: Box::new(secret_key), public_key }
    }

    /// Get the 32 secret bytes of this key pair.
    pub fn secret_bytes(&self) -> Box<[u8; 32]> {
        Box::new(self.secret_key.to_bytes())
    }

    /// The key others verify our signatures with.
    pub const fn public_key(&self) -> Ed25519PublicKey {
        self.public_key
    }

    /// Sign the given message with our secret key.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.secret_key.sign(message))
    }
}

impl Default for Ed25519Keypair {
    fn default() -> Self {
        Self::new()
    }
}

/// A verifying key, serialized as base64.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ed25519PublicKey(VerifyingKey);

impl Ed25519PublicKey {
    /// The number of bytes an Ed25519 public key has.
    pub const LENGTH: usize = PUBLIC_KEY_LENGTH;

    /// Decode a verifying key from exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let key: &[u8; PUBLIC_KEY_LENGTH] =
            bytes.try_into().map_err(|_| KeyError::InvalidKeyLength {
                key_type: "Ed25519",
                expected_length: Self::LENGTH,
                length: bytes.len(),
            })?;

        Ok(Self(VerifyingKey::from_bytes(key)?))
    }

    /// View this public key as a byte array.
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        self.0.as_bytes()
    }

    /// Decode a verifying key from base64.
    pub fn from_base64(input: &str) -> Result<Self, KeyError> {
        Self::from_slice(&base64_decode(input)?)
    }

    /// Encode this key as base64.
    pub fn to_base64(&self) -> String {
        base64_encode(self.as_bytes())
    }

    /// Check that `signature` was made over `message` by the matching
    /// signing key.
    ///
    /// With the `strict-signatures` feature enabled this uses
    /// [`ed25519_dalek::VerifyingKey::verify_strict()`], which also rejects
    /// malleable and small-order signatures.
    pub fn verify(
        &self,
        message: &[u8],
        signature: &Ed25519Signature,
    ) -> Result<(), SignatureError> {
        if cfg!(feature = "strict-signatures") {
            self.0.verify_strict(message, &signature.0)
        } else {
            self.0.verify(message, &signature.0)
        }
    }
}

impl std::fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ed25519:{}", self.to_base64())
    }
}

impl std::fmt::Display for Ed25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl Serialize for Ed25519PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Ed25519PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(D::Error::custom)
    }
}

/// A signature made with an [`Ed25519Keypair`], serialized as base64.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519Signature(pub(crate) Signature);

impl Ed25519Signature {
    /// The number of bytes a Ed25519 signature has.
    pub const LENGTH: usize = SIGNATURE_LENGTH;

    /// Decode a signature from exactly 64 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        Ok(Self(Signature::from_slice(bytes)?))
    }

    /// Decode a signature from base64.
    pub fn from_base64(signature: &str) -> Result<Self, KeyError> {
        Ok(Self::from_slice(&base64_decode(signature)?)?)
    }

    /// Encode this signature as base64.
    pub fn to_base64(&self) -> String {
        base64_encode(self.to_bytes())
    }

    /// The 64 signature bytes.
    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        self.0.to_bytes()
    }
}

impl Serialize for Ed25519Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Ed25519Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(D::Error::custom)
    }
}
