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


use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    types::{Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey, KeyId},
    utilities::base64_serde,
};

pub(super) struct StoredSignedPreKey {
    key_id: KeyId,
    key: Curve25519Keypair,
    created_at: u64,
}

impl StoredSignedPreKey {
    fn new(key_id: KeyId, created_at: u64) -> Self {
        Self { key_id, key: Curve25519Keypair::new(), created_at }
    }

    pub const fn key_id(&self) -> KeyId {
        self.key_id
    }

    pub const fn public_key(&self) -> Curve25519PublicKey {
        self.key.public_key()
    }

    pub const fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// The current signed pre-key and the one it replaced.
///
/// The previous key is kept so that key agreements started against a bundle
/// fetched before the rotation still work.
pub(super) struct SignedPreKeys {
    next_key_id: u64,
    current: StoredSignedPreKey,
    previous: Option<StoredSignedPreKey>,
}

impl SignedPreKeys {
    pub fn new(now: u64) -> Self {
        Self { next_key_id: 1, current: StoredSignedPreKey::new(KeyId(0), now), previous: None }
    }

    pub const fn current(&self) -> &StoredSignedPreKey {
        &self.current
    }

    pub fn rotate(&mut self, now: u64) -> &StoredSignedPreKey {
        let key_id = KeyId(self.next_key_id);
        self.next_key_id = self.next_key_id.wrapping_add(1);

        let previous = std::mem::replace(&mut self.current, StoredSignedPreKey::new(key_id, now));
        self.previous = Some(previous);

        &self.current
    }

    pub fn get_secret_key(&self, key_id: KeyId) -> Option<&Curve25519SecretKey> {
        std::iter::once(&self.current)
            .chain(self.previous.as_ref())
            .find(|k| k.key_id == key_id)
            .map(|k| k.key.secret_key())
    }

    pub fn forget_previous(&mut self) -> bool {
        self.previous.take().is_some()
    }

    pub fn pickle(&self) -> SignedPreKeysPickle {
        let pickle = |key: &StoredSignedPreKey| SignedPreKeyPickle {
            key_id: key.key_id,
            secret_key: *key.key.secret_key().to_bytes(),
            created_at: key.created_at,
        };

        SignedPreKeysPickle {
            next_key_id: self.next_key_id,
            current: pickle(&self.current),
            previous: self.previous.as_ref().map(pickle),
        }
    }

    pub fn from_pickle(pickle: &SignedPreKeysPickle) -> Self {
        let unpickle = |key: &SignedPreKeyPickle| {
            let mut secret_key = key.secret_key;

            StoredSignedPreKey {
                key_id: key.key_id,
                key: Curve25519Keypair::from_secret_key(Curve25519SecretKey::from_slice(
                    &mut secret_key,
                )),
                created_at: key.created_at,
            }
        };

        Self {
            next_key_id: pickle.next_key_id,
            current: unpickle(&pickle.current),
            previous: pickle.previous.as_ref().map(unpickle),
        }
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(super) struct SignedPreKeyPickle {
    #[zeroize(skip)]
    key_id: KeyId,
    #[serde(with = "base64_serde")]
    secret_key: [u8; 32],
    created_at: u64,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(super) struct SignedPreKeysPickle {
    next_key_id: u64,
    current: SignedPreKeyPickle,
    previous: Option<SignedPreKeyPickle>,
}
