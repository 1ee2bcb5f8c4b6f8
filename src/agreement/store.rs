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


//! The boundary to wherever key bundles are kept.
//!
//! Storage backends and the HTTP surface in front of them live outside of
//! this crate, they implement [`KeyBundleStore`]. The one guarantee every
//! implementation must give is that a one-time pre-key is handed out at most
//! once, even to concurrent callers.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::{KeyBundle, OneTimePreKey};
use crate::{ErrorKind, types::KeyId};

/// Error type for key bundle store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No bundle was ever published for this user.
    #[error("No key bundle was published for {0}")]
    UnknownUser(String),
    /// The storage backend failed.
    #[error("The key bundle store failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            StoreError::UnknownUser(_) => ErrorKind::KeyBundleIncomplete,
            StoreError::Backend(_) => ErrorKind::Storage,
        }
    }
}

/// Persistence of published key bundles, keyed by user.
pub trait KeyBundleStore: Send + Sync {
    /// Store the bundle of a user, replacing the previous one.
    ///
    /// One-time pre-keys that were already handed out are dropped from the
    /// new bundle.
    fn publish(&self, user_id: &str, bundle: KeyBundle) -> Result<(), StoreError>;

    /// Fetch the bundle of a user, with all of its remaining one-time
    /// pre-keys.
    fn fetch(&self, user_id: &str) -> Result<KeyBundle, StoreError>;

    /// Atomically remove and return the oldest one-time pre-key of a user,
    /// `None` once they are all gone.
    fn consume_one_time_pre_key(
        &self,
        user_id: &str,
    ) -> Result<Option<OneTimePreKey>, StoreError>;

    /// Remove the one-time pre-key with the given id.
    ///
    /// Removing a key that is already gone is not an error, returns whether
    /// the key was still there.
    fn remove_one_time_pre_key(&self, user_id: &str, id: KeyId) -> Result<bool, StoreError>;

    /// Add new one-time pre-keys to a user's bundle.
    ///
    /// Keys whose id is already in the bundle, or was handed out before, are
    /// skipped. Returns how many keys were added.
    fn replenish_one_time_pre_keys(
        &self,
        user_id: &str,
        keys: Vec<OneTimePreKey>,
    ) -> Result<usize, StoreError>;

    /// Fetch a bundle for a key agreement: the bundle of the user, restricted
    /// to a single freshly consumed one-time pre-key.
    fn fetch_for_agreement(&self, user_id: &str) -> Result<KeyBundle, StoreError> {
        let bundle = self.fetch(user_id)?;
        let one_time_pre_key = self.consume_one_time_pre_key(user_id)?;

        Ok(bundle.with_one_time_pre_key(one_time_pre_key))
    }
}

struct StoredBundle {
    bundle: KeyBundle,
    consumed: HashSet<KeyId>,
}

impl StoredBundle {
    fn retain_unconsumed(&mut self) {
        let consumed = &self.consumed;
        self.bundle.one_time_pre_keys.retain(|k| !consumed.contains(&k.id));
    }
}

/// A [`KeyBundleStore`] keeping everything in memory.
#[derive(Default)]
pub struct MemoryKeyBundleStore {
    bundles: Mutex<HashMap<String, StoredBundle>>,
}

impl MemoryKeyBundleStore {
    /// Create a new, empty, store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of one-time pre-keys a user has left.
    pub fn one_time_pre_key_count(&self, user_id: &str) -> usize {
        self.bundles.lock().get(user_id).map(|s| s.bundle.one_time_pre_keys.len()).unwrap_or(0)
    }
}

impl KeyBundleStore for MemoryKeyBundleStore {
    fn publish(&self, user_id: &str, bundle: KeyBundle) -> Result<(), StoreError> {
        let mut bundles = self.bundles.lock();

        let consumed = bundles.remove(user_id).map(|s| s.consumed).unwrap_or_default();
        let mut stored = StoredBundle { bundle, consumed };
        stored.retain_unconsumed();

        debug!(
            user_id,
            one_time_pre_keys = stored.bundle.one_time_pre_keys.len(),
            "Published a key bundle"
        );

        bundles.insert(user_id.to_owned(), stored);

        Ok(())
    }

    fn fetch(&self, user_id: &str) -> Result<KeyBundle, StoreError> {
        self.bundles
            .lock()
            .get(user_id)
            .map(|s| s.bundle.clone())
            .ok_or_else(|| StoreError::UnknownUser(user_id.to_owned()))
    }

    fn consume_one_time_pre_key(
        &self,
        user_id: &str,
    ) -> Result<Option<OneTimePreKey>, StoreError> {
        let mut bundles = self.bundles.lock();
        let stored =
            bundles.get_mut(user_id).ok_or_else(|| StoreError::UnknownUser(user_id.to_owned()))?;

        if stored.bundle.one_time_pre_keys.is_empty() {
            debug!(user_id, "No one-time pre-keys left to hand out");
            return Ok(None);
        }

        let key = stored.bundle.one_time_pre_keys.remove(0);
        stored.consumed.insert(key.id);

        debug!(user_id, key_id = %key.id, "Handed out a one-time pre-key");

        Ok(Some(key))
    }

    fn remove_one_time_pre_key(&self, user_id: &str, id: KeyId) -> Result<bool, StoreError> {
        let mut bundles = self.bundles.lock();
        let stored =
            bundles.get_mut(user_id).ok_or_else(|| StoreError::UnknownUser(user_id.to_owned()))?;

        let before = stored.bundle.one_time_pre_keys.len();
        stored.consumed.insert(id);
        stored.retain_unconsumed();

        Ok(stored.bundle.one_time_pre_keys.len() != before)
    }

    fn replenish_one_time_pre_keys(
        &self,
        user_id: &str,
        keys: Vec<OneTimePreKey>,
    ) -> Result<usize, StoreError> {
        let mut bundles = self.bundles.lock();
        let stored =
            bundles.get_mut(user_id).ok_or_else(|| StoreError::UnknownUser(user_id.to_owned()))?;

        let mut known: HashSet<KeyId> =
            stored.bundle.one_time_pre_keys.iter().map(|k| k.id).collect();
        let mut added = 0;

        for key in keys {
            if stored.consumed.contains(&key.id) || !known.insert(key.id) {
                continue;
            }

            stored.bundle.one_time_pre_keys.push(key);
            added += 1;
        }

        debug!(user_id, added, "Replenished one-time pre-keys");

        Ok(added)
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use assert_matches2::assert_matches;

    use super::{KeyBundleStore, MemoryKeyBundleStore, StoreError};
    use crate::{
        agreement::{KeyBundle, OneTimePreKey},
        types::{Curve25519PublicKey, KeyId},
    };

    fn one_time_pre_key(id: u64) -> OneTimePreKey {
        OneTimePreKey { id: KeyId(id), public_key: Curve25519PublicKey::from([id as u8; 32]) }
    }

    fn bundle(one_time_pre_keys: Vec<OneTimePreKey>) -> KeyBundle {
        KeyBundle {
            identity_key: Curve25519PublicKey::from([9u8; 32]),
            signing_key: None,
            fingerprint: String::new(),
            signed_pre_key: None,
            one_time_pre_keys,
        }
    }

    #[test]
    fn keys_are_handed_out_oldest_first() -> anyhow::Result<()> {
        let store = MemoryKeyBundleStore::new();
        store.publish("bob", bundle(vec![one_time_pre_key(1), one_time_pre_key(2)]))?;

        assert_eq!(store.consume_one_time_pre_key("bob")?, Some(one_time_pre_key(1)));
        assert_eq!(store.consume_one_time_pre_key("bob")?, Some(one_time_pre_key(2)));
        assert_eq!(store.consume_one_time_pre_key("bob")?, None);
        assert!(store.fetch("bob")?.one_time_pre_keys.is_empty());

        Ok(())
    }

    #[test]
    fn unknown_users() {
        let store = MemoryKeyBundleStore::new();

        assert_matches!(store.fetch("carol"), Err(StoreError::UnknownUser(user)));
        assert_eq!(user, "carol");
        assert_matches!(store.consume_one_time_pre_key("carol"), Err(StoreError::UnknownUser(_)));
    }

    #[test]
    fn removal_is_idempotent() -> anyhow::Result<()> {
        let store = MemoryKeyBundleStore::new();
        store.publish("bob", bundle(vec![one_time_pre_key(1), one_time_pre_key(2)]))?;

        assert!(store.remove_one_time_pre_key("bob", KeyId(2))?);
        assert!(!store.remove_one_time_pre_key("bob", KeyId(2))?);
        assert_eq!(store.fetch("bob")?.one_time_pre_keys, vec![one_time_pre_key(1)]);

        Ok(())
    }

    #[test]
    fn consumed_keys_are_never_added_back() -> anyhow::Result<()> {
        let store = MemoryKeyBundleStore::new();
        store.publish("bob", bundle(vec![one_time_pre_key(1)]))?;
        store.consume_one_time_pre_key("bob")?;

        let added = store.replenish_one_time_pre_keys(
            "bob",
            vec![one_time_pre_key(1), one_time_pre_key(2), one_time_pre_key(2)],
        )?;

        assert_eq!(added, 1);
        assert_eq!(store.fetch("bob")?.one_time_pre_keys, vec![one_time_pre_key(2)]);

        store.publish("bob", bundle(vec![one_time_pre_key(1), one_time_pre_key(3)]))?;
        assert_eq!(store.one_time_pre_key_count("bob"), 1);

        Ok(())
    }

    #[test]
    fn fetching_for_an_agreement_consumes_one_key() -> anyhow::Result<()> {
        let store = MemoryKeyBundleStore::new();
        store.publish("bob", bundle(vec![one_time_pre_key(1), one_time_pre_key(2)]))?;

        let fetched = store.fetch_for_agreement("bob")?;

        assert_eq!(fetched.one_time_pre_keys, vec![one_time_pre_key(1)]);
        assert_eq!(store.fetch("bob")?.one_time_pre_keys, vec![one_time_pre_key(2)]);

        Ok(())
    }

    #[test]
    fn the_last_key_is_handed_out_once() -> anyhow::Result<()> {
        for _ in 0..50 {
            let store = Arc::new(MemoryKeyBundleStore::new());
            store.publish("bob", bundle(vec![one_time_pre_key(1)]))?;

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let store = store.clone();
                    thread::spawn(move || store.consume_one_time_pre_key("bob"))
                })
                .collect();

            let mut results = Vec::new();

            for handle in handles {
                results.push(handle.join().map_err(|_| anyhow::anyhow!("thread panicked"))??);
            }

            assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
            assert!(results.contains(&Some(one_time_pre_key(1))));
            assert!(results.contains(&None));
        }

        Ok(())
    }
}
