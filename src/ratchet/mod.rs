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


//! The Double Ratchet.
//!
//! A [`RatchetState`] is a value: [`RatchetState::encrypt()`] and
//! [`RatchetState::decrypt()`] never touch the state they are called on, they
//! return the state that follows it. Callers persist the returned state, or
//! drop it if they want to forget the operation ever happened. A failed
//! decryption therefore leaves no trace.
//!
//! The sending half of a DH ratchet step is done lazily. Receiving a new
//! ratchet key from the other side immediately starts a new receiving chain,
//! but our own new ratchet key is only generated once we actually send
//! something.

mod chain_key;
mod config;
mod envelope;
mod message_key;
mod ratchet_key;
mod root_key;
mod skipped_keys;
mod snapshot;

use std::collections::VecDeque;

use chain_key::ChainKey;
pub use config::RatchetConfig;
pub use envelope::{ENVELOPE_VERSION, EncryptedEnvelope, EnvelopeError, MessageHeader, PreKeyInfo};
use message_key::MessageKey;
use ratchet_key::RatchetKey;
use root_key::RootKey;
use skipped_keys::SkippedMessageKeys;
pub use snapshot::{RatchetSnapshot, SnapshotError};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{ErrorKind, cipher::CipherError, types::Curve25519PublicKey, utilities::unix_timestamp};

/// Error type describing failures to decrypt a single message.
///
/// None of these errors change the ratchet state, the session can continue.
#[derive(Debug, Error)]
pub enum DecryptionError {
    /// The authentication tag didn't match, the message was tampered with or
    /// doesn't belong to this session.
    #[error("Failed decrypting the message: {0}")]
    Cipher(#[from] CipherError),
    /// The message is a duplicate, or too old, and its key is gone.
    #[error("The message key for the given message is not available, message index: {0}")]
    MissingMessageKey(u64),
    /// Decrypting the message would require skipping too many message keys.
    #[error("The message gap was too big, got {0}, max allowed {1}")]
    TooBigMessageGap(u64, u64),
}

impl DecryptionError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            DecryptionError::Cipher(_) => ErrorKind::Decryption,
            DecryptionError::MissingMessageKey(_) | DecryptionError::TooBigMessageGap(..) => {
                ErrorKind::MessageKeyNotFound
            }
        }
    }
}

/// The root key and the first chain key a ratchet is started from, the
/// output of the key agreement.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RatchetSeed {
    root_key: Box<[u8; 32]>,
    chain_key: Box<[u8; 32]>,
}

impl RatchetSeed {
    pub(crate) const fn new(root_key: Box<[u8; 32]>, chain_key: Box<[u8; 32]>) -> Self {
        Self { root_key, chain_key }
    }

    fn split(&self) -> (RootKey, ChainKey) {
        (RootKey::new(self.root_key.clone()), ChainKey::new(self.chain_key.clone()))
    }
}

/// Data every message of a session authenticates: the identity keys of the
/// initiator and of the responder, in that order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssociatedData([u8; 64]);

impl AssociatedData {
    /// Bind a session to the identity keys of both parties.
    pub fn new(
        initiator_identity: &Curve25519PublicKey,
        responder_identity: &Curve25519PublicKey,
    ) -> Self {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(initiator_identity.as_bytes());
        bytes[32..].copy_from_slice(responder_identity.as_bytes());

        Self(bytes)
    }

    /// The raw 64 bytes.
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    fn with_header(&self, header: &MessageHeader) -> Vec<u8> {
        let header = header.to_bytes();
        let mut bytes = Vec::with_capacity(self.0.len() + header.len());
        bytes.extend_from_slice(&self.0);
        bytes.extend_from_slice(&header);

        bytes
    }
}

#[derive(Clone)]
enum SendingRatchet {
    Active(ActiveRatchet),
    Inactive(InactiveRatchet),
}

/// We have a sending chain and can encrypt right away.
#[derive(Clone)]
struct ActiveRatchet {
    root_key: RootKey,
    ratchet_key: RatchetKey,
    ratchet_public_key: Curve25519PublicKey,
    chain_key: ChainKey,
}

/// The other side presented a new ratchet key, we'll answer with a new one
/// of our own the next time we send.
#[derive(Clone)]
struct InactiveRatchet {
    root_key: RootKey,
    remote_ratchet_key: Curve25519PublicKey,
}

impl ActiveRatchet {
    fn new(root_key: RootKey, ratchet_key: RatchetKey, chain_key: ChainKey) -> Self {
        let ratchet_public_key = ratchet_key.public_key();

        Self { root_key, ratchet_key, ratchet_public_key, chain_key }
    }

    /// The receiving half of a DH ratchet step, our sending chain is dropped.
    fn advance(&self, remote_ratchet_key: Curve25519PublicKey) -> (InactiveRatchet, ChainKey) {
        let (root_key, chain_key) = self.root_key.advance(&self.ratchet_key, &remote_ratchet_key);

        (InactiveRatchet { root_key, remote_ratchet_key }, chain_key)
    }

    fn next_message_key(&mut self) -> MessageKey {
        self.chain_key.create_message_key()
    }
}

impl InactiveRatchet {
    /// The sending half of a DH ratchet step.
    fn activate(&self) -> ActiveRatchet {
        let ratchet_key = RatchetKey::new();
        let (root_key, chain_key) = self.root_key.advance(&ratchet_key, &self.remote_ratchet_key);

        ActiveRatchet::new(root_key, ratchet_key, chain_key)
    }
}

#[derive(Clone)]
struct ReceivingChain {
    ratchet_key: Curve25519PublicKey,
    chain_key: ChainKey,
}

/// Advance `chain` up to, but not including, `until`, storing the skipped
/// message keys.
fn skip_message_keys(
    chain: &mut ReceivingChain,
    skipped: &mut SkippedMessageKeys,
    until: u64,
    now: u64,
    config: &RatchetConfig,
) -> Result<(), DecryptionError> {
    let message_gap = until.saturating_sub(chain.chain_key.index());

    if message_gap > config.max_message_gap {
        return Err(DecryptionError::TooBigMessageGap(message_gap, config.max_message_gap));
    }

    let capacity = config.max_skipped_message_keys as u64;

    while chain.chain_key.index() < until {
        // Keys that would be evicted right away aren't worth deriving.
        if until - chain.chain_key.index() > capacity {
            chain.chain_key.advance();
        } else {
            let key = chain.chain_key.create_message_key();
            skipped.push(chain.ratchet_key, key, now, config.max_skipped_message_keys);
        }
    }

    Ok(())
}

/// The complete state of one side of a Double Ratchet session.
#[derive(Clone)]
pub struct RatchetState {
    sending: SendingRatchet,
    receiving: Option<ReceivingChain>,
    previous_receiving_keys: VecDeque<Curve25519PublicKey>,
    send_counter: u64,
    previous_sending_chain_length: u64,
    skipped_message_keys: SkippedMessageKeys,
    associated_data: AssociatedData,
    config: RatchetConfig,
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("sending_ratchet_key", &self.sending_ratchet_key())
            .field("receiving_ratchet_key", &self.receiving_ratchet_key())
            .field("send_counter", &self.send_counter)
            .field("receive_counter", &self.receive_counter())
            .field("previous_sending_chain_length", &self.previous_sending_chain_length)
            .field("skipped_message_keys", &self.skipped_message_keys.len())
            .finish_non_exhaustive()
    }
}

impl RatchetState {
    /// Start the ratchet of the side that ran the key agreement.
    ///
    /// The seed's chain key becomes our first sending chain, paired with a
    /// fresh ratchet key.
    pub fn initiator(
        seed: RatchetSeed,
        associated_data: AssociatedData,
        config: RatchetConfig,
    ) -> Self {
        let (root_key, chain_key) = seed.split();
        let active = ActiveRatchet::new(root_key, RatchetKey::new(), chain_key);

        Self {
            sending: SendingRatchet::Active(active),
            receiving: None,
            previous_receiving_keys: VecDeque::new(),
            send_counter: 0,
            previous_sending_chain_length: 0,
            skipped_message_keys: SkippedMessageKeys::new(),
            associated_data,
            config,
        }
    }

    /// Start the ratchet of the side that answered the key agreement.
    ///
    /// `remote_ratchet_key` is the ratchet key found in the header of the
    /// initiator's first message, the seed's chain key is its chain.
    pub fn responder(
        seed: RatchetSeed,
        remote_ratchet_key: Curve25519PublicKey,
        associated_data: AssociatedData,
        config: RatchetConfig,
    ) -> Self {
        let (root_key, chain_key) = seed.split();

        Self {
            sending: SendingRatchet::Inactive(InactiveRatchet { root_key, remote_ratchet_key }),
            receiving: Some(ReceivingChain { ratchet_key: remote_ratchet_key, chain_key }),
            previous_receiving_keys: VecDeque::new(),
            send_counter: 0,
            previous_sending_chain_length: 0,
            skipped_message_keys: SkippedMessageKeys::new(),
            associated_data,
            config,
        }
    }

    /// Encrypt a message, returning the next state and the envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> (Self, EncryptedEnvelope) {
        let mut next = self.clone();
        let envelope = next.encrypt_in_place(plaintext);

        (next, envelope)
    }

    /// Decrypt a message, returning the next state and the plaintext.
    pub fn decrypt(
        &self,
        envelope: &EncryptedEnvelope,
    ) -> Result<(Self, Vec<u8>), DecryptionError> {
        self.decrypt_at(envelope, unix_timestamp())
    }

    /// [`RatchetState::decrypt()`] with an explicit Unix timestamp, in
    /// seconds, used to age the skipped message keys.
    pub fn decrypt_at(
        &self,
        envelope: &EncryptedEnvelope,
        now: u64,
    ) -> Result<(Self, Vec<u8>), DecryptionError> {
        let mut next = self.clone();
        let plaintext = next.decrypt_in_place(envelope, now)?;

        Ok((next, plaintext))
    }

    /// The number of messages sent on the current sending chain.
    pub const fn send_counter(&self) -> u64 {
        self.send_counter
    }

    /// The number of messages received on the current receiving chain.
    pub fn receive_counter(&self) -> u64 {
        self.receiving.as_ref().map(|c| c.chain_key.index()).unwrap_or_default()
    }

    /// The length of our previous sending chain, sent in every header.
    pub const fn previous_sending_chain_length(&self) -> u64 {
        self.previous_sending_chain_length
    }

    /// Our current ratchet public key, `None` if we'll generate a new one
    /// the next time we encrypt.
    pub fn sending_ratchet_key(&self) -> Option<Curve25519PublicKey> {
        match &self.sending {
            SendingRatchet::Active(active) => Some(active.ratchet_public_key),
            SendingRatchet::Inactive(_) => None,
        }
    }

    /// The other side's ratchet key of our current receiving chain.
    pub fn receiving_ratchet_key(&self) -> Option<Curve25519PublicKey> {
        self.receiving.as_ref().map(|c| c.ratchet_key)
    }

    /// Do we have a receiving chain, i.e. has the other side ever sent us a
    /// ratchet key.
    pub const fn has_receiving_chain(&self) -> bool {
        self.receiving.is_some()
    }

    /// The number of message keys currently held for messages that are yet
    /// to arrive.
    pub fn skipped_message_key_count(&self) -> usize {
        self.skipped_message_keys.len()
    }

    /// The data authenticated alongside every message.
    pub const fn associated_data(&self) -> &AssociatedData {
        &self.associated_data
    }

    /// The bounds this ratchet runs under.
    pub const fn config(&self) -> &RatchetConfig {
        &self.config
    }

    /// Drop at most one skipped message key older than
    /// [`RatchetConfig::max_skipped_key_age_secs`], returns whether one was
    /// dropped.
    ///
    /// Meant for background sweeps that shouldn't hold a conversation lock
    /// for longer than a single eviction.
    pub fn evict_expired_skipped_key(&mut self, now: u64) -> bool {
        self.skipped_message_keys.evict_one_expired(now, self.config.max_skipped_key_age_secs)
    }

    fn encrypt_in_place(&mut self, plaintext: &[u8]) -> EncryptedEnvelope {
        let (public_key, message_key) = match &mut self.sending {
            SendingRatchet::Active(active) => {
                (active.ratchet_public_key, active.next_message_key())
            }
            SendingRatchet::Inactive(inactive) => {
                let mut active = inactive.activate();
                let message_key = active.next_message_key();
                let public_key = active.ratchet_public_key;

                self.previous_sending_chain_length = self.send_counter;
                self.sending = SendingRatchet::Active(active);

                (public_key, message_key)
            }
        };

        let header = MessageHeader {
            public_key,
            counter: message_key.index(),
            previous_chain_length: self.previous_sending_chain_length,
        };

        self.send_counter = message_key.index() + 1;

        let sealed = message_key.encrypt(plaintext, &self.associated_data.with_header(&header));

        EncryptedEnvelope {
            header,
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            tag: sealed.tag,
            pre_key: None,
        }
    }

    fn decrypt_in_place(
        &mut self,
        envelope: &EncryptedEnvelope,
        now: u64,
    ) -> Result<Vec<u8>, DecryptionError> {
        let header = envelope.header;

        let purged =
            self.skipped_message_keys.prune_expired(now, self.config.max_skipped_key_age_secs);

        if purged > 0 {
            debug!(purged, "Purged expired skipped message keys");
        }

        if let Some(message_key) =
            self.skipped_message_keys.take(&header.public_key, header.counter)
        {
            debug!(
                ratchet_key = %header.public_key,
                counter = header.counter,
                "Decrypting an out-of-order message using a skipped message key"
            );

            return self.decrypt_with(&message_key, envelope);
        }

        if self.previous_receiving_keys.contains(&header.public_key) {
            debug!(
                ratchet_key = %header.public_key,
                counter = header.counter,
                "Received a message of an old chain whose message key is gone"
            );

            return Err(DecryptionError::MissingMessageKey(header.counter));
        }

        if self.receiving_ratchet_key() != Some(header.public_key) {
            self.ratchet_step(&header, now)?;
        }

        let message_key = self.receiving_message_key(header.counter, now)?;

        self.decrypt_with(&message_key, envelope)
    }

    /// Cache what is left of the current receiving chain and start a new one
    /// for the given ratchet key.
    fn ratchet_step(&mut self, header: &MessageHeader, now: u64) -> Result<(), DecryptionError> {
        if let Some(mut chain) = self.receiving.take() {
            skip_message_keys(
                &mut chain,
                &mut self.skipped_message_keys,
                header.previous_chain_length,
                now,
                &self.config,
            )?;

            self.previous_receiving_keys.push_back(chain.ratchet_key);

            while self.previous_receiving_keys.len() > self.config.max_previous_ratchet_keys {
                self.previous_receiving_keys.pop_front();
            }
        }

        let (inactive, chain_key) = match &self.sending {
            SendingRatchet::Active(active) => active.advance(header.public_key),
            // The other side can't have seen a new ratchet key of ours yet, this
            // message won't decrypt, but stay consistent and don't leak state.
            SendingRatchet::Inactive(inactive) => inactive.activate().advance(header.public_key),
        };

        self.sending = SendingRatchet::Inactive(inactive);
        self.receiving = Some(ReceivingChain { ratchet_key: header.public_key, chain_key });

        Ok(())
    }

    fn receiving_message_key(
        &mut self,
        counter: u64,
        now: u64,
    ) -> Result<MessageKey, DecryptionError> {
        let Some(chain) = self.receiving.as_mut() else {
            return Err(DecryptionError::MissingMessageKey(counter));
        };

        if counter < chain.chain_key.index() {
            debug!(
                ratchet_key = %chain.ratchet_key,
                counter,
                "Received a duplicate or already consumed message"
            );

            return Err(DecryptionError::MissingMessageKey(counter));
        }

        skip_message_keys(chain, &mut self.skipped_message_keys, counter, now, &self.config)?;

        Ok(chain.chain_key.create_message_key())
    }

    fn decrypt_with(
        &self,
        message_key: &MessageKey,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, DecryptionError> {
        let associated_data = self.associated_data.with_header(&envelope.header);

        message_key
            .decrypt(&envelope.ciphertext, &envelope.nonce, &envelope.tag, &associated_data)
            .map_err(|error| {
                warn!(
                    ratchet_key = %envelope.header.public_key,
                    counter = envelope.header.counter,
                    "Failed to decrypt a message: {error}"
                );

                error.into()
            })
    }
}
