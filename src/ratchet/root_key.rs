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


use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{chain_key::ChainKey, ratchet_key::RatchetKey};
use crate::types::Curve25519PublicKey;

const ROOT_KDF_INFO: &[u8] = b"DOUBLE_RATCHET_ROOT";

/// The root of the ratchet, replaced on every DH ratchet step.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(super) struct RootKey {
    key: Box<[u8; 32]>,
}

impl RootKey {
    pub const fn new(key: Box<[u8; 32]>) -> Self {
        Self { key }
    }

    #[allow(clippy::borrowed_box)]
    pub fn as_bytes(&self) -> &Box<[u8; 32]> {
        &self.key
    }

    /// Mix a fresh DH output into the root key.
    ///
    /// Returns the next root key and the chain key of the chain started by
    /// this DH ratchet step. Both sides compute the same pair, one of them
    /// with the roles of `ratchet_key` and `remote_ratchet_key` swapped.
    pub fn advance(
        &self,
        ratchet_key: &RatchetKey,
        remote_ratchet_key: &Curve25519PublicKey,
    ) -> (RootKey, ChainKey) {
        let dh_output = ratchet_key.agree(remote_ratchet_key);
        let hkdf = Hkdf::<Sha256>::new(Some(self.key.as_slice()), dh_output.as_bytes());

        let mut root_key = Box::new([0u8; 32]);
        let mut chain_key = Box::new([0u8; 32]);
        let mut okm = [0u8; 64];

        #[allow(clippy::expect_used)]
        hkdf.expand(ROOT_KDF_INFO, &mut okm)
            .expect("HKDF-SHA-256 should be able to produce 64 bytes");

        let (root, chain) = okm.split_at(32);
        root_key.copy_from_slice(root);
        chain_key.copy_from_slice(chain);
        okm.zeroize();

        (RootKey::new(root_key), ChainKey::new(chain_key))
    }
}
