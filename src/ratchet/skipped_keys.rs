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


use std::collections::VecDeque;

use tracing::debug;

use super::message_key::MessageKey;
use crate::types::Curve25519PublicKey;

#[derive(Clone, Debug)]
pub(super) struct SkippedMessageKey {
    pub ratchet_key: Curve25519PublicKey,
    pub key: MessageKey,
    /// Unix timestamp, in seconds, of the moment the key was skipped over.
    pub stored_at: u64,
}

impl SkippedMessageKey {
    fn matches(&self, ratchet_key: &Curve25519PublicKey, index: u64) -> bool {
        &self.ratchet_key == ratchet_key && self.key.index() == index
    }

    fn is_expired(&self, now: u64, max_age_secs: u64) -> bool {
        now.saturating_sub(self.stored_at) > max_age_secs
    }
}

/// Message keys of messages that haven't arrived yet, keyed by the ratchet
/// key of their chain and their index in it.
///
/// Entries are kept in insertion order, eviction always starts at the front.
#[derive(Clone, Debug, Default)]
pub(super) struct SkippedMessageKeys {
    inner: VecDeque<SkippedMessageKey>,
}

impl SkippedMessageKeys {
    pub fn new() -> Self {
        Self { inner: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkippedMessageKey> {
        self.inner.iter()
    }

    pub fn push(
        &mut self,
        ratchet_key: Curve25519PublicKey,
        key: MessageKey,
        stored_at: u64,
        capacity: usize,
    ) {
        if capacity == 0 {
            return;
        }

        while self.inner.len() >= capacity {
            if let Some(evicted) = self.inner.pop_front() {
                debug!(
                    ratchet_key = %evicted.ratchet_key,
                    index = evicted.key.index(),
                    "Evicting the oldest skipped message key, the cache is full"
                );
            }
        }

        self.inner.push_back(SkippedMessageKey { ratchet_key, key, stored_at });
    }

    /// Remove and return the key for the given message, if we have it.
    pub fn take(&mut self, ratchet_key: &Curve25519PublicKey, index: u64) -> Option<MessageKey> {
        let position = self.inner.iter().position(|k| k.matches(ratchet_key, index))?;

        self.inner.remove(position).map(|k| k.key)
    }

    #[cfg(test)]
    pub fn contains(&self, ratchet_key: &Curve25519PublicKey, index: u64) -> bool {
        self.inner.iter().any(|k| k.matches(ratchet_key, index))
    }

    /// Drop every key older than `max_age_secs`, returns how many were
    /// dropped.
    pub fn prune_expired(&mut self, now: u64, max_age_secs: u64) -> usize {
        let before = self.inner.len();
        self.inner.retain(|k| !k.is_expired(now, max_age_secs));

        before - self.inner.len()
    }

    /// Drop a single expired key, returns false if there was none.
    pub fn evict_one_expired(&mut self, now: u64, max_age_secs: u64) -> bool {
        match self.inner.iter().position(|k| k.is_expired(now, max_age_secs)) {
            Some(position) => self.inner.remove(position).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{super::message_key::MessageKey, SkippedMessageKeys};
    use crate::types::Curve25519PublicKey;

    fn key(index: u64) -> MessageKey {
        MessageKey::new(Box::new([index as u8; 32]), index)
    }

    #[test]
    fn push_and_take() {
        let ratchet_key = Curve25519PublicKey::from([1u8; 32]);
        let mut store = SkippedMessageKeys::new();

        store.push(ratchet_key, key(1), 0, 10);
        assert!(store.contains(&ratchet_key, 1));
        assert!(!store.contains(&Curve25519PublicKey::from([2u8; 32]), 1));

        assert_matches!(store.take(&ratchet_key, 1), Some(taken));
        assert_eq!(taken.index(), 1);
        assert_matches!(store.take(&ratchet_key, 1), None);
    }

    #[test]
    fn oldest_keys_are_evicted_first() {
        let ratchet_key = Curve25519PublicKey::from([1u8; 32]);
        let mut store = SkippedMessageKeys::new();

        for index in 0..5 {
            store.push(ratchet_key, key(index), index, 3);
        }

        assert_eq!(store.len(), 3);
        assert!(!store.contains(&ratchet_key, 0));
        assert!(!store.contains(&ratchet_key, 1));
        assert!(store.contains(&ratchet_key, 4));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut store = SkippedMessageKeys::new();
        store.push(Curve25519PublicKey::from([1u8; 32]), key(0), 0, 0);

        assert_eq!(store.len(), 0);
    }

    #[test]
    fn expired_keys_are_pruned() {
        let ratchet_key = Curve25519PublicKey::from([1u8; 32]);
        let mut store = SkippedMessageKeys::new();

        store.push(ratchet_key, key(0), 100, 10);
        store.push(ratchet_key, key(1), 200, 10);
        store.push(ratchet_key, key(2), 300, 10);

        assert!(store.evict_one_expired(311, 100));
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&ratchet_key, 0));

        assert_eq!(store.prune_expired(500, 100), 2);
        assert!(!store.evict_one_expired(500, 100));
    }
}
