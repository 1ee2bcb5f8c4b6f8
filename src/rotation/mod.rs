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


//! Versioned conversation keys, rotated on a policy.
//!
//! Unlike the message keys of the ratchet, a conversation key stays the same
//! for many messages. It is replaced once it was used for
//! [`RotationPolicy::rotate_after_messages`] messages or once it is
//! [`RotationPolicy::rotate_after_days`] old. Replaced keys stay around for
//! [`RotationPolicy::keep_old_keys_for_days`] so that late messages can still
//! be read.

mod key_info;

use std::{collections::HashMap, sync::Arc};

pub use key_info::{ConversationKey, ConversationKeyInfo};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{ErrorKind, utilities::unix_timestamp};

/// When conversation keys are rotated and for how long old ones are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationPolicy {
    /// Rotate after a key was used for this many messages.
    pub rotate_after_messages: u64,
    /// Rotate once a key is this many days old.
    pub rotate_after_days: u64,
    /// How long a replaced key can still be looked up by its version.
    pub keep_old_keys_for_days: u64,
    /// How many replaced keys are kept at most, per conversation.
    pub max_retired_keys: usize,
}

impl RotationPolicy {
    /// Check that the policy can be followed.
    pub fn validate(&self) -> Result<(), RotationError> {
        if self.rotate_after_messages == 0 {
            Err(RotationError::PolicyViolation("keys need to be usable for at least one message"))
        } else {
            Ok(())
        }
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            rotate_after_messages: 1000,
            rotate_after_days: 7,
            keep_old_keys_for_days: 7,
            max_retired_keys: 10,
        }
    }
}

/// Error type for the key rotation manager.
#[derive(Debug, Error)]
pub enum RotationError {
    /// An internal invariant of the key state doesn't hold.
    #[error("Key rotation policy violation: {0}")]
    PolicyViolation(&'static str),
}

impl RotationError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            RotationError::PolicyViolation(_) => ErrorKind::RotationPolicyViolation,
        }
    }
}

/// Sent to every [`RotationListener`] after a conversation key was rotated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationEvent {
    /// The conversation whose key was rotated.
    pub conversation_id: String,
    /// The version of the key that was retired.
    pub previous_version: u64,
    /// The version of the new key.
    pub new_version: u64,
    /// When the rotation happened, as a Unix timestamp in seconds.
    pub rotated_at: u64,
}

/// Gets told about key rotations, e.g. to inform the peers of a
/// conversation.
pub trait RotationListener: Send + Sync {
    /// Called after a conversation key was rotated.
    ///
    /// Errors are logged and otherwise ignored, the rotation itself already
    /// happened.
    fn key_rotated(
        &self,
        event: &RotationEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Keeps the versioned keys of all conversations.
pub struct KeyRotationManager {
    policy: RotationPolicy,
    conversations: RwLock<HashMap<String, Arc<Mutex<ConversationKeyInfo>>>>,
    listeners: RwLock<Vec<Arc<dyn RotationListener>>>,
}

impl KeyRotationManager {
    /// Create a new manager following the given policy.
    pub fn new(policy: RotationPolicy) -> Result<Self, RotationError> {
        policy.validate()?;

        Ok(Self {
            policy,
            conversations: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// The policy of this manager.
    pub const fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Register a listener for rotation events.
    pub fn add_listener(&self, listener: Arc<dyn RotationListener>) {
        self.listeners.write().push(listener);
    }

    fn conversation(&self, conversation_id: &str) -> Option<Arc<Mutex<ConversationKeyInfo>>> {
        self.conversations.read().get(conversation_id).cloned()
    }

    /// Get the current key of a conversation for a new message, rotating it
    /// first if the policy says so.
    pub fn get_key(
        &self,
        conversation_id: &str,
        seed: &[u8],
    ) -> Result<(ConversationKey, u64), RotationError> {
        self.get_key_at(conversation_id, seed, unix_timestamp())
    }

    /// [`KeyRotationManager::get_key()`] at the given Unix timestamp.
    pub fn get_key_at(
        &self,
        conversation_id: &str,
        seed: &[u8],
        now: u64,
    ) -> Result<(ConversationKey, u64), RotationError> {
        let conversation = match self.conversation(conversation_id) {
            Some(conversation) => conversation,
            None => self
                .conversations
                .write()
                .entry(conversation_id.to_owned())
                .or_insert_with(|| {
                    debug!(conversation_id, "Created the first conversation key");
                    Arc::new(Mutex::new(ConversationKeyInfo::new(conversation_id, seed, now)))
                })
                .clone(),
        };

        let (key, version, event) = {
            let mut state = conversation.lock();

            state.check_invariants().inspect_err(|e| {
                error!(conversation_id, error = %e, "The conversation key state is corrupted");
            })?;

            let event = if state.needs_rotation(&self.policy, now) {
                let previous_version = state.key_version();
                let new_version = state.rotate(conversation_id, seed, &self.policy, now)?;

                info!(conversation_id, previous_version, new_version, "Rotated a conversation key");

                Some(RotationEvent {
                    conversation_id: conversation_id.to_owned(),
                    previous_version,
                    new_version,
                    rotated_at: now,
                })
            } else {
                None
            };

            state.count_message()?;

            (state.current_key().clone(), state.key_version(), event)
        };

        if let Some(event) = event {
            self.notify(&event);
        }

        Ok((key, version))
    }

    fn notify(&self, event: &RotationEvent) {
        let listeners = self.listeners.read().clone();

        for listener in listeners {
            if let Err(e) = listener.key_rotated(event) {
                warn!(
                    conversation_id = %event.conversation_id,
                    new_version = event.new_version,
                    error = %e,
                    "A rotation listener failed"
                );
            }
        }
    }

    /// Look up a key by its version, the current key or a retired one that
    /// didn't expire yet.
    pub fn get_key_by_version(
        &self,
        conversation_id: &str,
        version: u64,
    ) -> Option<ConversationKey> {
        self.get_key_by_version_at(conversation_id, version, unix_timestamp())
    }

    /// [`KeyRotationManager::get_key_by_version()`] at the given Unix
    /// timestamp.
    pub fn get_key_by_version_at(
        &self,
        conversation_id: &str,
        version: u64,
        now: u64,
    ) -> Option<ConversationKey> {
        let conversation = self.conversation(conversation_id)?;
        let state = conversation.lock();

        state.key_by_version(version, now).cloned()
    }

    /// A copy of the key state of a conversation.
    pub fn conversation_info(&self, conversation_id: &str) -> Option<ConversationKeyInfo> {
        self.conversation(conversation_id).map(|c| c.lock().clone())
    }

    /// Forget all keys of a conversation.
    pub fn remove_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.write().remove(conversation_id).is_some()
    }

    /// Delete the retired keys that expired, returns how many were deleted.
    ///
    /// Each conversation is locked on its own, one after the other.
    pub fn purge_expired(&self, now: u64) -> usize {
        let conversations: Vec<_> = self.conversations.read().values().cloned().collect();

        let purged = conversations.iter().map(|c| c.lock().purge_expired(now)).sum();

        if purged > 0 {
            debug!(purged, "Purged expired conversation keys");
        }

        purged
    }
}

impl std::fmt::Debug for KeyRotationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRotationManager")
            .field("policy", &self.policy)
            .field("conversations", &self.conversations.read().len())
            .finish_non_exhaustive()
    }
}
