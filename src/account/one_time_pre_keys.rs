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


use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    agreement::OneTimePreKey,
    types::{Curve25519PublicKey, Curve25519SecretKey, KeyId},
    utilities::base64_serde,
};

/// The secret halves of our one-time pre-keys.
pub(super) struct OneTimePreKeys {
    next_key_id: u64,
    unpublished_public_keys: BTreeMap<KeyId, Curve25519PublicKey>,
    secret_keys: BTreeMap<KeyId, Curve25519SecretKey>,
    key_ids_by_key: HashMap<Curve25519PublicKey, KeyId>,
}

impl OneTimePreKeys {
    pub const MAX_ONE_TIME_PRE_KEYS: usize = 100 * super::PUBLIC_MAX_ONE_TIME_PRE_KEYS;

    pub fn new() -> Self {
        Self {
            next_key_id: 0,
            unpublished_public_keys: BTreeMap::new(),
            secret_keys: BTreeMap::new(),
            key_ids_by_key: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.secret_keys.len()
    }

    /// All keys we still hold the secret half of, oldest first.
    pub fn public_keys(&self) -> Vec<OneTimePreKey> {
        self.secret_keys
            .iter()
            .map(|(&id, key)| OneTimePreKey { id, public_key: Curve25519PublicKey::from(key) })
            .collect()
    }

    pub fn unpublished(&self) -> Vec<OneTimePreKey> {
        self.unpublished_public_keys
            .iter()
            .map(|(&id, &public_key)| OneTimePreKey { id, public_key })
            .collect()
    }

    pub fn mark_as_published(&mut self) {
        self.unpublished_public_keys.clear();
    }

    pub fn get_secret_key(
        &self,
        public_key: &Curve25519PublicKey,
    ) -> Option<(KeyId, &Curve25519SecretKey)> {
        let key_id = self.key_ids_by_key.get(public_key)?;
        self.secret_keys.get(key_id).map(|key| (*key_id, key))
    }

    pub fn remove_secret_key(&mut self, public_key: &Curve25519PublicKey) -> Option<KeyId> {
        let key_id = self.key_ids_by_key.remove(public_key)?;

        self.unpublished_public_keys.remove(&key_id);
        self.secret_keys.remove(&key_id);

        Some(key_id)
    }

    fn insert_secret_key(&mut self, key_id: KeyId, key: Curve25519SecretKey, published: bool) {
        if self.secret_keys.len() >= Self::MAX_ONE_TIME_PRE_KEYS {
            if let Some((oldest, secret_key)) = self.secret_keys.pop_first() {
                self.key_ids_by_key.remove(&Curve25519PublicKey::from(&secret_key));
                self.unpublished_public_keys.remove(&oldest);
            }
        }

        let public_key = Curve25519PublicKey::from(&key);

        self.secret_keys.insert(key_id, key);
        self.key_ids_by_key.insert(public_key, key_id);

        if !published {
            self.unpublished_public_keys.insert(key_id, public_key);
        }
    }

    pub fn generate(&mut self, count: usize) -> Vec<OneTimePreKey> {
        let mut created = Vec::with_capacity(count);

        for _ in 0..count {
            let key_id = KeyId(self.next_key_id);
            let key = Curve25519SecretKey::new();
            created.push(OneTimePreKey { id: key_id, public_key: Curve25519PublicKey::from(&key) });

            self.insert_secret_key(key_id, key, false);
            self.next_key_id = self.next_key_id.wrapping_add(1);
        }

        created
    }

    pub fn pickle(&self) -> OneTimePreKeysPickle {
        OneTimePreKeysPickle {
            next_key_id: self.next_key_id,
            keys: self
                .secret_keys
                .iter()
                .map(|(&key_id, key)| OneTimePreKeyPickle {
                    key_id,
                    secret_key: *key.to_bytes(),
                    published: !self.unpublished_public_keys.contains_key(&key_id),
                })
                .collect(),
        }
    }

    pub fn from_pickle(pickle: &OneTimePreKeysPickle) -> Self {
        let mut keys = Self::new();

        for key in &pickle.keys {
            let mut secret_key = key.secret_key;
            keys.insert_secret_key(
                key.key_id,
                Curve25519SecretKey::from_slice(&mut secret_key),
                key.published,
            );
        }

        keys.next_key_id = pickle.next_key_id;

        keys
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(super) struct OneTimePreKeyPickle {
    #[zeroize(skip)]
    key_id: KeyId,
    #[serde(with = "base64_serde")]
    secret_key: [u8; 32],
    published: bool,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(super) struct OneTimePreKeysPickle {
    next_key_id: u64,
    keys: Vec<OneTimePreKeyPickle>,
}
