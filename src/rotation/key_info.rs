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

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{RotationError, RotationPolicy};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const HKDF_INFO_PREFIX: &[u8] = b"CONVERSATION_KEY_ROTATION";

/// A versioned symmetric key of a conversation.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ConversationKey(Box<[u8; 32]>);

impl ConversationKey {
    /// Derive the key of the given version.
    pub(super) fn derive(conversation_id: &str, seed: &[u8], version: u64) -> Self {
        let hkdf: Hkdf<Sha256> = Hkdf::new(Some(conversation_id.as_bytes()), seed);

        let mut info = Vec::with_capacity(HKDF_INFO_PREFIX.len() + 8);
        info.extend_from_slice(HKDF_INFO_PREFIX);
        info.extend_from_slice(&version.to_be_bytes());

        let mut key = Box::new([0u8; 32]);

        #[allow(clippy::expect_used)]
        hkdf.expand(&info, key.as_mut_slice())
            .expect("We should be able to expand the rotation seed into 32 bytes");

        Self(key)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConversationKey(..)")
    }
}

#[derive(Clone, Debug)]
pub(super) struct RetiredKey {
    pub key: ConversationKey,
    pub version: u64,
    pub expires_at: u64,
}

/// The keys of a single conversation: the current one and the recently
/// retired ones.
#[derive(Clone, Debug)]
pub struct ConversationKeyInfo {
    current_key: ConversationKey,
    key_version: u64,
    created_at: u64,
    message_count: u64,
    old_keys: VecDeque<RetiredKey>,
}

impl ConversationKeyInfo {
    pub(super) fn new(conversation_id: &str, seed: &[u8], now: u64) -> Self {
        Self {
            current_key: ConversationKey::derive(conversation_id, seed, 1),
            key_version: 1,
            created_at: now,
            message_count: 0,
            old_keys: VecDeque::new(),
        }
    }

    /// The version of the current key.
    pub const fn key_version(&self) -> u64 {
        self.key_version
    }

    /// When the current key was created, as a Unix timestamp in seconds.
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// How many messages used the current key.
    pub const fn message_count(&self) -> u64 {
        self.message_count
    }

    /// The versions of the retired keys that are still around, oldest first.
    pub fn retired_versions(&self) -> Vec<u64> {
        self.old_keys.iter().map(|k| k.version).collect()
    }

    pub(super) fn current_key(&self) -> &ConversationKey {
        &self.current_key
    }

    pub(super) fn needs_rotation(&self, policy: &RotationPolicy, now: u64) -> bool {
        let age = now.saturating_sub(self.created_at);

        self.message_count >= policy.rotate_after_messages
            || age >= policy.rotate_after_days.saturating_mul(SECONDS_PER_DAY)
    }

    pub(super) fn count_message(&mut self) -> Result<(), RotationError> {
        self.message_count = self
            .message_count
            .checked_add(1)
            .ok_or(RotationError::PolicyViolation("the message counter overflowed"))?;

        Ok(())
    }

    /// Retire the current key and derive the next one. Returns the new
    /// version.
    pub(super) fn rotate(
        &mut self,
        conversation_id: &str,
        seed: &[u8],
        policy: &RotationPolicy,
        now: u64,
    ) -> Result<u64, RotationError> {
        let version = self
            .key_version
            .checked_add(1)
            .ok_or(RotationError::PolicyViolation("the key version overflowed"))?;

        let next_key = ConversationKey::derive(conversation_id, seed, version);
        let retired = std::mem::replace(&mut self.current_key, next_key);

        if policy.max_retired_keys > 0 {
            while self.old_keys.len() >= policy.max_retired_keys {
                self.old_keys.pop_front();
            }

            self.old_keys.push_back(RetiredKey {
                key: retired,
                version: self.key_version,
                expires_at: now
                    .saturating_add(policy.keep_old_keys_for_days.saturating_mul(SECONDS_PER_DAY)),
            });
        }

        self.key_version = version;
        self.created_at = now;
        self.message_count = 0;

        Ok(version)
    }

    pub(super) fn key_by_version(&self, version: u64, now: u64) -> Option<&ConversationKey> {
        if version == self.key_version {
            Some(&self.current_key)
        } else {
            self.old_keys
                .iter()
                .find(|k| k.version == version && now < k.expires_at)
                .map(|k| &k.key)
        }
    }

    pub(super) fn purge_expired(&mut self, now: u64) -> usize {
        let before = self.old_keys.len();
        self.old_keys.retain(|k| now < k.expires_at);

        before - self.old_keys.len()
    }

    pub(super) fn check_invariants(&self) -> Result<(), RotationError> {
        let mut previous = 0;

        for key in &self.old_keys {
            if key.version <= previous || key.version >= self.key_version {
                return Err(RotationError::PolicyViolation("the retired key versions regressed"));
            }

            previous = key.version;
        }

        Ok(())
    }
}
