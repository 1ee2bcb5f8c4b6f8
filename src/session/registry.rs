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


//! Per-conversation locking of sessions.
//!
//! Encrypting and decrypting in one conversation must be serialized, a
//! decryption that starts a new receiving chain has to be finished before
//! the next encryption looks at the sending chain. Every conversation
//! therefore gets its own lock, while different conversations run in
//! parallel.

use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

use super::Session;
use crate::{
    ErrorKind,
    ratchet::{DecryptionError, EncryptedEnvelope},
};

/// Error type for operations on a [`SessionRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// There is no session for the conversation.
    #[error("No session exists for the conversation {0}")]
    UnknownConversation(String),
    /// The message couldn't be decrypted.
    #[error(transparent)]
    Decryption(#[from] DecryptionError),
}

impl RegistryError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::UnknownConversation(_) => ErrorKind::KeyBundleIncomplete,
            RegistryError::Decryption(e) => e.kind(),
        }
    }
}

/// The sessions of all conversations, each behind its own lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    initializing: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    /// Create a new, empty, registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The session of a conversation.
    pub fn get(&self, conversation_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().get(conversation_id).cloned()
    }

    /// Store the session of a conversation, replacing any previous one.
    pub fn insert(&self, conversation_id: &str, session: Session) -> Arc<Mutex<Session>> {
        let session = Arc::new(Mutex::new(session));
        self.sessions.write().insert(conversation_id.to_owned(), session.clone());

        session
    }

    /// Get the session of a conversation, creating it if there is none.
    ///
    /// `create` runs at most once per conversation, concurrent callers for
    /// the same conversation wait for it and get the session it created.
    /// Callers for other conversations aren't blocked. If `create` fails,
    /// nothing is stored and the next caller tries again.
    pub fn get_or_try_insert_with<E>(
        &self,
        conversation_id: &str,
        create: impl FnOnce() -> Result<Session, E>,
    ) -> Result<Arc<Mutex<Session>>, E> {
        if let Some(session) = self.get(conversation_id) {
            return Ok(session);
        }

        let init_lock = self
            .initializing
            .lock()
            .entry(conversation_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = init_lock.lock();

        if let Some(session) = self.get(conversation_id) {
            return Ok(session);
        }

        match create() {
            Ok(session) => {
                debug!(conversation_id, session_id = %session.session_id(), "Created a session");

                let session = self.insert(conversation_id, session);
                self.initializing.lock().remove(conversation_id);

                Ok(session)
            }
            Err(e) => {
                self.release_failed_init_lock(conversation_id, &init_lock);
                Err(e)
            }
        }
    }

    /// Forget the init lock of a conversation whose session couldn't be
    /// created, unless other callers are waiting on it to try themselves.
    fn release_failed_init_lock(&self, conversation_id: &str, init_lock: &Arc<Mutex<()>>) {
        let mut initializing = self.initializing.lock();

        // One reference is held by the map, one by the caller.
        if Arc::strong_count(init_lock) <= 2 {
            initializing.remove(conversation_id);
        }
    }

    /// Remove the session of a conversation.
    pub fn remove(&self, conversation_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.write().remove(conversation_id)
    }

    /// The ids of all conversations that have a session.
    pub fn conversation_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// The number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Are there no sessions at all.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Encrypt a message in the given conversation.
    pub fn encrypt(
        &self,
        conversation_id: &str,
        plaintext: &[u8],
    ) -> Result<EncryptedEnvelope, RegistryError> {
        let session = self
            .get(conversation_id)
            .ok_or_else(|| RegistryError::UnknownConversation(conversation_id.to_owned()))?;

        Ok(session.lock().encrypt(plaintext))
    }

    /// Decrypt a message of the given conversation.
    pub fn decrypt(
        &self,
        conversation_id: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, RegistryError> {
        let session = self
            .get(conversation_id)
            .ok_or_else(|| RegistryError::UnknownConversation(conversation_id.to_owned()))?;

        Ok(session.lock().decrypt(envelope)?)
    }

    /// Drop the expired skipped message keys of every session, returns how
    /// many were dropped.
    ///
    /// A conversation lock is only ever held for a single eviction, so the
    /// sweep never holds up a conversation for long.
    pub fn evict_expired_skipped_keys(&self, now: u64) -> usize {
        let sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        let mut evicted = 0;

        for session in sessions {
            while session.lock().evict_expired_skipped_key(now) {
                evicted += 1;
            }
        }

        evicted
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").field("sessions", &self.len()).finish_non_exhaustive()
    }
}
