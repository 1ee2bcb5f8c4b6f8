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


use std::fmt::Debug;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::{Cipher, CipherError, SealedMessage};

/// A single-use key protecting exactly one message.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(super) struct MessageKey {
    key: Box<[u8; 32]>,
    index: u64,
}

impl Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self { key: _, index } = self;

        f.debug_struct("MessageKey").field("index", index).finish()
    }
}

impl MessageKey {
    pub const fn new(key: Box<[u8; 32]>, index: u64) -> Self {
        Self { key, index }
    }

    pub const fn index(&self) -> u64 {
        self.index
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn encrypt(self, plaintext: &[u8], associated_data: &[u8]) -> SealedMessage {
        Cipher::new(&self.key).encrypt(plaintext, associated_data)
    }

    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        Cipher::new(&self.key).decrypt(ciphertext, nonce, tag, associated_data)
    }
}
