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

/// Bounds for the out-of-order delivery machinery of a [`RatchetState`].
///
/// [`RatchetState`]: super::RatchetState
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatchetConfig {
    /// How many skipped message keys are kept at most. Once full, the oldest
    /// entry is evicted first.
    pub max_skipped_message_keys: usize,
    /// Skipped message keys older than this many seconds are purged, even if
    /// the message they belong to never arrived.
    pub max_skipped_key_age_secs: u64,
    /// The largest number of message keys a single incoming message may make
    /// us skip over. Anything beyond this is rejected and the conversation
    /// needs a new handshake.
    pub max_message_gap: u64,
    /// How many of the other side's previous ratchet keys are remembered.
    /// A late message of one of these chains whose key is gone fails with
    /// a missing message key instead of being mistaken for a new ratchet
    /// key.
    pub max_previous_ratchet_keys: usize,
}

impl RatchetConfig {
    /// The default number of skipped message keys that are kept around.
    pub const DEFAULT_MAX_SKIPPED_MESSAGE_KEYS: usize = 1000;
    /// One week.
    pub const DEFAULT_MAX_SKIPPED_KEY_AGE_SECS: u64 = 7 * 24 * 60 * 60;
    /// The default bound on the gap a single message may skip.
    pub const DEFAULT_MAX_MESSAGE_GAP: u64 = 2000;
    /// The default number of remembered previous ratchet keys.
    pub const DEFAULT_MAX_PREVIOUS_RATCHET_KEYS: usize = 64;
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            max_skipped_message_keys: Self::DEFAULT_MAX_SKIPPED_MESSAGE_KEYS,
            max_skipped_key_age_secs: Self::DEFAULT_MAX_SKIPPED_KEY_AGE_SECS,
            max_message_gap: Self::DEFAULT_MAX_MESSAGE_GAP,
            max_previous_ratchet_keys: Self::DEFAULT_MAX_PREVIOUS_RATCHET_KEYS,
        }
    }
}
