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

//! Authenticated encryption of single messages.
//!
//! Every ratchet message key is expanded with HKDF-SHA-256 into a
//! ChaCha20-Poly1305 key. Nonces are random and travel with the message, the
//! 16-byte Poly1305 tag is kept detached so that the wire format can carry it
//! either separately or appended to the ciphertext.

mod key;

use chacha20poly1305::{
    ChaCha20Poly1305, KeyInit, Nonce, Tag,
    aead::{AeadInPlace, Error as AeadError},
};
use key::CipherKey;
use rand::{RngCore, thread_rng};
use thiserror::Error;

/// Error type describing failures of the AEAD layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The authentication tag didn't match, the ciphertext, the associated
    /// data or the key is wrong.
    #[error("The authentication tag of the ciphertext didn't pass validation")]
    Tag(#[from] AeadError),
    /// The nonce has the wrong number of bytes.
    #[error("Invalid nonce length, expected {expected}, got {got}")]
    InvalidNonceLength {
        /// The expected nonce length.
        expected: usize,
        /// The nonce length we got.
        got: usize,
    },
    /// The tag has the wrong number of bytes.
    #[error("Invalid tag length, expected {expected}, got {got}")]
    InvalidTagLength {
        /// The expected tag length.
        expected: usize,
        /// The tag length we got.
        got: usize,
    },
}

/// The output of a single [`Cipher::encrypt()`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SealedMessage {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; Cipher::NONCE_LENGTH],
    pub tag: [u8; Cipher::TAG_LENGTH],
}

pub(crate) struct Cipher {
    key: CipherKey,
}

impl Cipher {
    pub const NONCE_LENGTH: usize = 12;
    pub const TAG_LENGTH: usize = 16;

    /// Create a new [`Cipher`] from a 32-byte message key.
    pub fn new(message_key: &[u8; 32]) -> Self {
        Self { key: CipherKey::new(message_key) }
    }

    fn aead(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(self.key.aead_key())
    }

    /// Encrypt the plaintext under a fresh random nonce, authenticating the
    /// given associated data alongside it.
    pub fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> SealedMessage {
        let mut nonce = [0u8; Self::NONCE_LENGTH];
        thread_rng().fill_bytes(&mut nonce);

        let mut ciphertext = plaintext.to_vec();

        // Only fails for plaintexts larger than 256 GiB.
        #[allow(clippy::expect_used)]
        let tag = self
            .aead()
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), associated_data, &mut ciphertext)
            .expect("ChaCha20-Poly1305 should be able to encrypt a message of this size");

        let mut tag_bytes = [0u8; Self::TAG_LENGTH];
        tag_bytes.copy_from_slice(tag.as_slice());

        SealedMessage { ciphertext, nonce, tag: tag_bytes }
    }

    /// Verify the tag and decrypt the ciphertext.
    ///
    /// Nothing is returned unless the tag matches, a failed check never yields
    /// partial plaintext.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        if nonce.len() != Self::NONCE_LENGTH {
            return Err(CipherError::InvalidNonceLength {
                expected: Self::NONCE_LENGTH,
                got: nonce.len(),
            });
        }

        if tag.len() != Self::TAG_LENGTH {
            return Err(CipherError::InvalidTagLength {
                expected: Self::TAG_LENGTH,
                got: tag.len(),
            });
        }

        let mut plaintext = ciphertext.to_vec();

        self.aead().decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            associated_data,
            &mut plaintext,
            Tag::from_slice(tag),
        )?;

        Ok(plaintext)
    }
}
