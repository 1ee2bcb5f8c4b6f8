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

use chacha20poly1305::Key;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The AEAD key derived from a single ratchet message key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(super) struct CipherKey(Box<[u8; 32]>);

impl CipherKey {
    const HKDF_INFO: &'static [u8] = b"DOUBLE_RATCHET_MESSAGE_KEYS";

    pub fn new(message_key: &[u8; 32]) -> Self {
        let mut key = Box::new([0u8; 32]);
        let hkdf: Hkdf<Sha256> = Hkdf::new(Some(&[0]), message_key);

        #[allow(clippy::expect_used)]
        hkdf.expand(Self::HKDF_INFO, key.as_mut_slice())
            .expect("We should be able to expand a 32-byte message key into 32 bytes");

        Self(key)
    }

    pub fn aead_key(&self) -> &Key {
        Key::from_slice(self.0.as_slice())
    }
}
