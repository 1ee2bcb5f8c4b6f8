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


use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::message_key::MessageKey;

/// The HMAC input deriving a message key from a chain key.
const MESSAGE_KEY_LABEL: u8 = 0x01;
/// The HMAC input deriving the next chain key.
const NEXT_CHAIN_KEY_LABEL: u8 = 0x02;

/// `HMAC-SHA-256(key, [label])`, written into `output`.
fn chain_hmac(key: &[u8; 32], label: u8, output: &mut [u8; 32]) {
    #[allow(clippy::expect_used)]
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .expect("HMAC-SHA-256 should accept a 32-byte key");
    mac.update(&[label]);

    let mut digest = mac.finalize().into_bytes();
    output.copy_from_slice(&digest);
    digest.zeroize();
}

/// A symmetric-key ratchet, sending or receiving.
///
/// Every message key is `HMAC(chain_key, 0x01)`, after which the chain key is
/// replaced by `HMAC(chain_key, 0x02)`. The old chain key is overwritten in
/// place, so message keys of earlier indices can't be derived again.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(super) struct ChainKey {
    key: Box<[u8; 32]>,
    index: u64,
}

impl ChainKey {
    pub const fn new(key: Box<[u8; 32]>) -> Self {
        Self::from_bytes_and_index(key, 0)
    }

    /// Resume a chain that was already advanced `index` times.
    pub const fn from_bytes_and_index(key: Box<[u8; 32]>, index: u64) -> Self {
        Self { key, index }
    }

    #[allow(clippy::borrowed_box)]
    pub fn as_bytes(&self) -> &Box<[u8; 32]> {
        &self.key
    }

    /// How many times this chain has been advanced.
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// Move to the next chain key without deriving a message key.
    pub fn advance(&mut self) {
        let mut next = [0u8; 32];
        chain_hmac(&self.key, NEXT_CHAIN_KEY_LABEL, &mut next);

        *self.key = next;
        next.zeroize();

        self.index += 1;
    }

    /// Derive the message key of the current index, then advance.
    pub fn create_message_key(&mut self) -> MessageKey {
        let mut key = Box::new([0u8; 32]);
        chain_hmac(&self.key, MESSAGE_KEY_LABEL, &mut key);

        let message_key = MessageKey::new(key, self.index);
        self.advance();

        message_key
    }
}
