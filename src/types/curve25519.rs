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

use rand::thread_rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, ReusableSecret, SharedSecret, StaticSecret};
use zeroize::Zeroize;

use super::KeyError;
use crate::utilities::{base64_decode, base64_encode};

/// A long-lived Curve25519 secret, used for identity and pre-keys.
#[derive(Clone)]
pub struct Curve25519SecretKey(Box<StaticSecret>);

impl Curve25519SecretKey {
    /// Generate a fresh random secret.
    pub fn new() -> Self {
        Self(Box::new(StaticSecret::random_from_rng(thread_rng())))
    }

    /// Restore a secret from its 32 bytes. The input is zeroized.
    pub fn from_slice(bytes: &mut [u8; 32]) -> Self {
        let secret = StaticSecret::from(*bytes);
        bytes.zeroize();

        Self(Box::new(secret))
    }

    /// Agree on a shared secret with the owner of `their_public_key`.
    pub fn diffie_hellman(&self, their_public_key: &Curve25519PublicKey) -> SharedSecret {
        self.0.diffie_hellman(&their_public_key.inner)
    }

    /// The 32 secret bytes, boxed so they aren't copied around the stack.
    pub fn to_bytes(&self) -> Box<[u8; 32]> {
        let mut bytes = self.0.to_bytes();
        let boxed = Box::new(bytes);
        bytes.zeroize();

        boxed
    }
}

impl Default for Curve25519SecretKey {
    fn default() -> Self {
        Self::new()
    }
}

/// A Curve25519 key pair, the secret half never leaves the device.
#[derive(Clone)]
pub struct Curve25519Keypair {
    pub(crate) secret_key: Curve25519SecretKey,
    pub(crate) public_key: Curve25519PublicKey,
}

impl Curve25519Keypair {
    /// Generate a new random key pair.
    pub fn new() -> Self {
        let secret_key = Curve25519SecretKey::new();
        let public_key = Curve25519PublicKey::from(&secret_key);

        Self { secret_key, public_key }
    }

    /// Restore a key pair from its secret half.
    pub fn from_secret_key(secret_key: Curve25519SecretKey) -> Self {
        let public_key = Curve25519PublicKey::from(&secret_key);

        Self { secret_key, public_key }
    }

    /// The secret half of the key pair.
    pub fn secret_key(&self) -> &Curve25519SecretKey {
        &self.secret_key
    }

    /// The public half of the key pair.
    pub const fn public_key(&self) -> Curve25519PublicKey {
        self.public_key
    }
}

impl Default for Curve25519Keypair {
    fn default() -> Self {
        Self::new()
    }
}

/// The public half of a Curve25519 key, serialized as base64.
#[derive(PartialEq, Eq, Hash, Copy, Clone)]
pub struct Curve25519PublicKey {
    pub(crate) inner: PublicKey,
}

impl Curve25519PublicKey {
    /// The number of bytes a Curve25519 public key has.
    pub const LENGTH: usize = 32;

    /// A copy of the 32 public bytes.
    #[inline]
    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        self.inner.to_bytes()
    }

    /// Borrow the 32 public bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        self.inner.as_bytes()
    }

    /// Decode a public key from base64.
    pub fn from_base64(input: &str) -> Result<Curve25519PublicKey, KeyError> {
        Self::from_slice(&base64_decode(input)?)
    }

    /// Decode a public key from exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Curve25519PublicKey, KeyError> {
        let bytes: [u8; Self::LENGTH] =
            slice.try_into().map_err(|_| KeyError::InvalidKeyLength {
                key_type: "Curve25519",
                expected_length: Self::LENGTH,
                length: slice.len(),
            })?;

        Ok(Self::from(bytes))
    }

    /// Encode this public key as base64.
    pub fn to_base64(&self) -> String {
        base64_encode(self.inner.as_bytes())
    }

    /// The human-presentable fingerprint of this key.
    ///
    /// The SHA-256 of the key, as upper-case hex split into groups of four
    /// characters, e.g. `3F2A 91C0 ...`.
    pub fn fingerprint(&self) -> String {
        Sha256::digest(self.as_bytes())
            .chunks(2)
            .map(hex::encode_upper)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Does the given fingerprint belong to this key.
    ///
    /// Whitespace is ignored and the hex digits may be in either case, so
    /// `3f2a91c0...` matches `3F2A 91C0 ...`.
    pub fn matches_fingerprint(&self, fingerprint: &str) -> bool {
        let digits: String = fingerprint.chars().filter(|c| !c.is_whitespace()).collect();

        hex::decode(digits)
            .is_ok_and(|digest| digest.as_slice() == Sha256::digest(self.as_bytes()).as_slice())
    }
}

impl std::fmt::Debug for Curve25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "curve25519:{}", self.to_base64())
    }
}

impl std::fmt::Display for Curve25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl From<[u8; Self::LENGTH]> for Curve25519PublicKey {
    fn from(bytes: [u8; Self::LENGTH]) -> Curve25519PublicKey {
        Curve25519PublicKey { inner: PublicKey::from(bytes) }
    }
}

impl<'a> From<&'a Curve25519SecretKey> for Curve25519PublicKey {
    fn from(secret: &'a Curve25519SecretKey) -> Curve25519PublicKey {
        Curve25519PublicKey { inner: PublicKey::from(&*secret.0) }
    }
}

impl<'a> From<&'a ReusableSecret> for Curve25519PublicKey {
    fn from(secret: &'a ReusableSecret) -> Curve25519PublicKey {
        Curve25519PublicKey { inner: PublicKey::from(secret) }
    }
}

impl Serialize for Curve25519PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Curve25519PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;

    use super::{Curve25519PublicKey, Curve25519SecretKey};
    use crate::types::KeyError;

    #[test]
    fn garbage_base64_is_rejected() {
        assert_matches!(Curve25519PublicKey::from_base64("a"), Err(KeyError::Base64Error(_)));
        assert_matches!(Curve25519PublicKey::from_base64("a "), Err(KeyError::Base64Error(_)));
    }

    #[test]
    fn short_keys_are_rejected() {
        assert_matches!(
            Curve25519PublicKey::from_base64("aaaa"),
            Err(KeyError::InvalidKeyLength { length: 3, .. })
        );
    }

    #[test]
    fn thirty_two_bytes_decode() {
        let encoded = crate::base64_encode([9u8; 32]);
        assert_matches!(Curve25519PublicKey::from_base64(&encoded), Ok(key));
        assert_eq!(key.to_bytes(), [9u8; 32]);
    }

    #[test]
    fn fingerprint_is_grouped_hex() {
        let key = Curve25519PublicKey::from(&Curve25519SecretKey::new());
        let fingerprint = key.fingerprint();

        assert_eq!(fingerprint.split(' ').count(), 16);
        assert!(fingerprint.split(' ').all(|group| group.len() == 4));
        assert_eq!(fingerprint, key.fingerprint());
    }

    #[test]
    fn fingerprints_match_regardless_of_formatting() {
        let key = Curve25519PublicKey::from(&Curve25519SecretKey::new());
        let other = Curve25519PublicKey::from(&Curve25519SecretKey::new());
        let fingerprint = key.fingerprint();

        assert!(key.matches_fingerprint(&fingerprint));
        assert!(key.matches_fingerprint(&fingerprint.to_lowercase()));
        assert!(key.matches_fingerprint(&fingerprint.replace(' ', "")));
        assert!(key.matches_fingerprint(&fingerprint.replace(' ', "\n")));

        assert!(!other.matches_fingerprint(&fingerprint));
        assert!(!key.matches_fingerprint(&fingerprint[..fingerprint.len() - 5]));
        assert!(!key.matches_fingerprint("not a fingerprint"));
    }

    #[test]
    fn serde_uses_base64() -> anyhow::Result<()> {
        let key = Curve25519PublicKey::from([1u8; 32]);
        let json = serde_json::to_string(&key)?;

        assert_eq!(json, format!("\"{}\"", key.to_base64()));
        assert_eq!(serde_json::from_str::<Curve25519PublicKey>(&json)?, key);

        Ok(())
    }
}
