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


use x25519_dalek::SharedSecret;

use crate::types::{Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey};

/// Our half of a DH ratchet step. The public key goes into the header of
/// every message of the sending chain it starts.
#[derive(Clone)]
pub(super) struct RatchetKey(Curve25519Keypair);

impl RatchetKey {
    pub fn new() -> Self {
        Self(Curve25519Keypair::new())
    }

    /// Restore a ratchet key from a snapshot, zeroizing the input.
    pub fn from_bytes(bytes: &mut [u8; 32]) -> Self {
        Self(Curve25519Keypair::from_secret_key(Curve25519SecretKey::from_slice(bytes)))
    }

    pub fn to_bytes(&self) -> Box<[u8; 32]> {
        self.0.secret_key().to_bytes()
    }

    pub const fn public_key(&self) -> Curve25519PublicKey {
        self.0.public_key()
    }

    /// The DH output that is mixed into the root key.
    pub fn agree(&self, remote_ratchet_key: &Curve25519PublicKey) -> SharedSecret {
        self.0.secret_key().diffie_hellman(remote_ratchet_key)
    }
}

#[cfg(test)]
mod test {
    use super::RatchetKey;

    #[test]
    fn restored_keys_agree_like_the_original() {
        let original = RatchetKey::new();
        let remote = RatchetKey::new();

        let mut bytes = *original.to_bytes();
        let restored = RatchetKey::from_bytes(&mut bytes);

        assert_eq!(bytes, [0u8; 32]);
        assert_eq!(restored.public_key(), original.public_key());
        assert_eq!(
            restored.agree(&remote.public_key()).as_bytes(),
            remote.agree(&original.public_key()).as_bytes()
        );
    }
}
