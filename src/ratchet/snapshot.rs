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
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    ActiveRatchet, AssociatedData, ChainKey, InactiveRatchet, RatchetConfig, RatchetKey,
    RatchetState, ReceivingChain, RootKey, SendingRatchet, SkippedMessageKeys,
    envelope::ENVELOPE_VERSION, message_key::MessageKey,
};
use crate::{ErrorKind, types::Curve25519PublicKey, utilities::base64_serde};

/// Error type for snapshots that can't be turned back into a
/// [`RatchetState`].
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot was produced by an unknown version.
    #[error("Unsupported ratchet snapshot version, expected {expected}, got {got}")]
    UnsupportedVersion {
        /// The version we support.
        expected: &'static str,
        /// The version the snapshot claims.
        got: String,
    },
    /// The fields of the snapshot contradict each other.
    #[error("The ratchet snapshot is inconsistent: {0}")]
    Inconsistent(&'static str),
}

impl SnapshotError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Malformed
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(tag = "state", rename_all = "camelCase")]
enum SendingChainSnapshot {
    #[serde(rename_all = "camelCase")]
    Active {
        #[serde(with = "base64_serde")]
        ratchet_key: [u8; 32],
        #[serde(with = "base64_serde")]
        chain_key: [u8; 32],
    },
    #[serde(rename_all = "camelCase")]
    Inactive {
        #[zeroize(skip)]
        remote_ratchet_key: Curve25519PublicKey,
    },
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct ReceivingChainSnapshot {
    #[zeroize(skip)]
    ratchet_key: Curve25519PublicKey,
    #[serde(with = "base64_serde")]
    chain_key: [u8; 32],
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct SkippedKeySnapshot {
    #[zeroize(skip)]
    ratchet_key: Curve25519PublicKey,
    counter: u64,
    #[serde(with = "base64_serde")]
    message_key: [u8; 32],
    stored_at: u64,
}

/// A serializable copy of every field of a [`RatchetState`], binary fields
/// encoded as base64.
///
/// Contains secret keys in the clear, the external store persisting it is
/// responsible for protecting it.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct RatchetSnapshot {
    version: String,
    #[serde(with = "base64_serde")]
    root_key: [u8; 32],
    sending_chain: SendingChainSnapshot,
    receiving_chain: Option<ReceivingChainSnapshot>,
    #[zeroize(skip)]
    previous_receiving_keys: Vec<Curve25519PublicKey>,
    send_counter: u64,
    receive_counter: u64,
    previous_sending_chain_length: u64,
    skipped_message_keys: Vec<SkippedKeySnapshot>,
    #[serde(with = "base64_serde")]
    associated_data: [u8; 64],
    #[zeroize(skip)]
    config: RatchetConfig,
}

impl RatchetState {
    /// Export the complete state, including the skipped message keys.
    pub fn snapshot(&self) -> RatchetSnapshot {
        let (root_key, sending_chain) = match &self.sending {
            SendingRatchet::Active(active) => (
                **active.root_key.as_bytes(),
                SendingChainSnapshot::Active {
                    ratchet_key: *active.ratchet_key.to_bytes(),
                    chain_key: **active.chain_key.as_bytes(),
                },
            ),
            SendingRatchet::Inactive(inactive) => (
                **inactive.root_key.as_bytes(),
                SendingChainSnapshot::Inactive {
                    remote_ratchet_key: inactive.remote_ratchet_key,
                },
            ),
        };

        let receiving_chain = self.receiving.as_ref().map(|chain| ReceivingChainSnapshot {
            ratchet_key: chain.ratchet_key,
            chain_key: **chain.chain_key.as_bytes(),
        });

        let skipped_message_keys = self
            .skipped_message_keys
            .iter()
            .map(|skipped| SkippedKeySnapshot {
                ratchet_key: skipped.ratchet_key,
                counter: skipped.key.index(),
                message_key: *skipped.key.as_bytes(),
                stored_at: skipped.stored_at,
            })
            .collect();

        RatchetSnapshot {
            version: ENVELOPE_VERSION.to_owned(),
            root_key,
            sending_chain,
            receiving_chain,
            previous_receiving_keys: self.previous_receiving_keys.iter().copied().collect(),
            send_counter: self.send_counter,
            receive_counter: self.receive_counter(),
            previous_sending_chain_length: self.previous_sending_chain_length,
            skipped_message_keys,
            associated_data: *self.associated_data.as_bytes(),
            config: self.config,
        }
    }

    /// Restore a state from a [`RatchetSnapshot`].
    ///
    /// The snapshot is checked for consistency, a restored state decrypts and
    /// encrypts exactly like the state it was taken from.
    pub fn from_snapshot(snapshot: &RatchetSnapshot) -> Result<Self, SnapshotError> {
        if snapshot.version != ENVELOPE_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                expected: ENVELOPE_VERSION,
                got: snapshot.version.clone(),
            });
        }

        let root_key = RootKey::new(Box::new(snapshot.root_key));

        let sending = match &snapshot.sending_chain {
            SendingChainSnapshot::Active { ratchet_key, chain_key } => {
                let mut ratchet_key = *ratchet_key;

                SendingRatchet::Active(ActiveRatchet::new(
                    root_key,
                    RatchetKey::from_bytes(&mut ratchet_key),
                    ChainKey::from_bytes_and_index(Box::new(*chain_key), snapshot.send_counter),
                ))
            }
            SendingChainSnapshot::Inactive { remote_ratchet_key } => {
                let receiving_key = snapshot.receiving_chain.as_ref().map(|c| c.ratchet_key);

                if receiving_key != Some(*remote_ratchet_key) {
                    return Err(SnapshotError::Inconsistent(
                        "an inactive sending chain must answer the current receiving chain",
                    ));
                }

                SendingRatchet::Inactive(InactiveRatchet {
                    root_key,
                    remote_ratchet_key: *remote_ratchet_key,
                })
            }
        };

        let receiving = match &snapshot.receiving_chain {
            Some(chain) => Some(ReceivingChain {
                ratchet_key: chain.ratchet_key,
                chain_key: ChainKey::from_bytes_and_index(
                    Box::new(chain.chain_key),
                    snapshot.receive_counter,
                ),
            }),
            None if snapshot.receive_counter != 0 => {
                return Err(SnapshotError::Inconsistent(
                    "a receive counter without a receiving chain",
                ));
            }
            None => None,
        };

        if snapshot.previous_receiving_keys.len() > snapshot.config.max_previous_ratchet_keys {
            return Err(SnapshotError::Inconsistent(
                "more previous ratchet keys than the configuration allows",
            ));
        }

        if snapshot.skipped_message_keys.len() > snapshot.config.max_skipped_message_keys {
            return Err(SnapshotError::Inconsistent(
                "more skipped message keys than the configuration allows",
            ));
        }

        let mut skipped_message_keys = SkippedMessageKeys::new();

        for skipped in &snapshot.skipped_message_keys {
            skipped_message_keys.push(
                skipped.ratchet_key,
                MessageKey::new(Box::new(skipped.message_key), skipped.counter),
                skipped.stored_at,
                snapshot.config.max_skipped_message_keys,
            );
        }

        Ok(Self {
            sending,
            receiving,
            previous_receiving_keys: snapshot.previous_receiving_keys.iter().copied().collect(),
            send_counter: snapshot.send_counter,
            previous_sending_chain_length: snapshot.previous_sending_chain_length,
            skipped_message_keys,
            associated_data: AssociatedData(snapshot.associated_data),
            config: snapshot.config,
        })
    }
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{RatchetSnapshot, SnapshotError};
    use crate::{
        ratchet::{AssociatedData, RatchetConfig, RatchetSeed, RatchetState},
        types::Curve25519PublicKey,
    };

    fn alice_and_bob() -> (RatchetState, RatchetState) {
        let associated_data = AssociatedData::new(
            &Curve25519PublicKey::from([3u8; 32]),
            &Curve25519PublicKey::from([4u8; 32]),
        );
        let seed = || RatchetSeed::new(Box::new([1u8; 32]), Box::new([2u8; 32]));

        let alice = RatchetState::initiator(seed(), associated_data, RatchetConfig::default());
        let alice_key =
            alice.sending_ratchet_key().expect("A new initiator should have a sending ratchet key");
        let bob =
            RatchetState::responder(seed(), alice_key, associated_data, RatchetConfig::default());

        (alice, bob)
    }

    #[test]
    fn restored_state_keeps_the_skipped_keys() -> anyhow::Result<()> {
        let (alice, bob) = alice_and_bob();

        let (alice, m1) = alice.encrypt(b"M1");
        let (alice, m2) = alice.encrypt(b"M2");
        let (_, m3) = alice.encrypt(b"M3");

        let (bob, _) = bob.decrypt(&m3)?;
        assert_eq!(bob.skipped_message_key_count(), 2);

        let json = serde_json::to_string(&bob.snapshot())?;
        let snapshot: RatchetSnapshot = serde_json::from_str(&json)?;
        let restored = RatchetState::from_snapshot(&snapshot)?;

        assert_eq!(restored.receive_counter(), 3);
        assert_eq!(restored.skipped_message_key_count(), 2);

        let (restored, plaintext) = restored.decrypt(&m1)?;
        assert_eq!(plaintext, b"M1");
        let (restored, plaintext) = restored.decrypt(&m2)?;
        assert_eq!(plaintext, b"M2");

        let (_, reply) = restored.encrypt(b"reply");
        assert_eq!(reply.header.counter, 0);

        let (_, plaintext) = bob.decrypt(&m1)?;
        assert_eq!(plaintext, b"M1");

        Ok(())
    }

    #[test]
    fn active_state_roundtrips() -> anyhow::Result<()> {
        let (alice, bob) = alice_and_bob();
        let (alice, first) = alice.encrypt(b"first");

        let restored = RatchetState::from_snapshot(&alice.snapshot())?;
        assert_eq!(restored.sending_ratchet_key(), alice.sending_ratchet_key());
        assert_eq!(restored.send_counter(), 1);

        let (_, second) = restored.encrypt(b"second");
        assert_eq!(second.header.counter, 1);

        let (bob, _) = bob.decrypt(&first)?;
        let (_, plaintext) = bob.decrypt(&second)?;
        assert_eq!(plaintext, b"second");

        Ok(())
    }

    #[test]
    fn inconsistent_snapshots_are_rejected() -> anyhow::Result<()> {
        let (alice, _) = alice_and_bob();

        let mut value = serde_json::to_value(alice.snapshot())?;
        value["receiveCounter"] = 4.into();
        let snapshot: RatchetSnapshot = serde_json::from_value(value)?;
        assert_matches!(
            RatchetState::from_snapshot(&snapshot),
            Err(SnapshotError::Inconsistent(_))
        );

        let mut value = serde_json::to_value(alice.snapshot())?;
        value["previousReceivingKeys"] =
            serde_json::json!([Curve25519PublicKey::from([5u8; 32]).to_base64()]);
        value["config"]["max_previous_ratchet_keys"] = 0.into();
        let snapshot: RatchetSnapshot = serde_json::from_value(value)?;
        assert_matches!(
            RatchetState::from_snapshot(&snapshot),
            Err(SnapshotError::Inconsistent(_))
        );

        let mut value = serde_json::to_value(alice.snapshot())?;
        value["version"] = "double-ratchet-v0".into();
        let snapshot: RatchetSnapshot = serde_json::from_value(value)?;
        assert_matches!(
            RatchetState::from_snapshot(&snapshot),
            Err(SnapshotError::UnsupportedVersion { .. })
        );

        Ok(())
    }
}
