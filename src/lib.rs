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


//! An end-to-end encryption session engine.
//!
//! duplex establishes and maintains pairwise encrypted conversations. A
//! session starts with an [X3DH] key agreement against the published key
//! bundle of the other side and then runs the [Double Ratchet], so that every
//! message is encrypted with a key of its own. Around those two cores the
//! crate offers:
//!
//! - challenge-response authentication of peers, binding a user id to an
//!   Ed25519 signing key, see [`auth`],
//! - versioned, time- and usage-bounded conversation keys, see [`rotation`],
//! - a thread-safe registry of sessions and a periodic sweep of expired key
//!   material, see [`session`] and [`maintenance`].
//!
//! [X3DH]: https://signal.org/docs/specifications/x3dh/
//! [Double Ratchet]: https://signal.org/docs/specifications/doubleratchet/
//!
//! # Establishing a session
//!
//! ```rust
//! use anyhow::Result;
//! use duplex::{
//!     account::Account,
//!     agreement::{AgreementConfig, KeyBundleStore, MemoryKeyBundleStore},
//!     ratchet::RatchetConfig,
//! };
//!
//! fn main() -> Result<()> {
//!     let alice = Account::new();
//!     let mut bob = Account::new();
//!
//!     let store = MemoryKeyBundleStore::new();
//!     bob.generate_one_time_pre_keys(1);
//!     store.publish("bob", bob.key_bundle())?;
//!     bob.mark_keys_as_published();
//!
//!     let bundle = store.fetch_for_agreement("bob")?;
//!     let config = AgreementConfig::default();
//!     let mut alice_session =
//!         alice.create_outbound_session(&bundle, &config, RatchetConfig::default())?.session;
//!
//!     let envelope = alice_session.encrypt(b"Hello Bob");
//!     let json = envelope.to_json()?;
//!
//!     let envelope = duplex::ratchet::EncryptedEnvelope::from_json(&json)?;
//!     let inbound = bob.create_inbound_session(&envelope, RatchetConfig::default())?;
//!     let mut bob_session = inbound.session;
//!
//!     assert_eq!(inbound.plaintext, b"Hello Bob");
//!     assert_eq!(alice_session.session_id(), bob_session.session_id());
//!
//!     let reply = bob_session.encrypt(b"Hello Alice");
//!     assert_eq!(alice_session.decrypt(&reply)?, b"Hello Alice");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Errors
//!
//! Every error type of the crate can be mapped to an [`ErrorKind`], which is
//! what callers are expected to branch on.
//!
//! # Persistence
//!
//! [`account::Account`], [`session::Session`] and [`ratchet::RatchetState`]
//! can be turned into serializable snapshots. Snapshots contain secret keys
//! in the clear; encrypting them at rest is up to the caller.
//!
//! # Feature flags
//!
//! - `tokio` (default: off): [`maintenance::Maintenance::spawn`] runs the
//!   periodic sweep on a tokio runtime.
//! - `strict-signatures` (default: off): verify Ed25519 signatures with
//!   `verify_strict`.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod cipher;
mod utilities;

pub mod account;
pub mod agreement;
pub mod auth;
pub mod config;
pub mod maintenance;
pub mod ratchet;
pub mod rotation;
pub mod session;
pub mod types;

pub use base64::DecodeError as Base64DecodeError;
pub use cipher::CipherError;
pub use types::{
    Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey, Ed25519Keypair,
    Ed25519PublicKey, Ed25519Signature, KeyError, KeyId, SignatureError,
};
pub use utilities::{base64_decode, base64_encode};

/// The category of a failure, shared by every error type of the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A signature, fingerprint, challenge response or identity binding
    /// didn't check out.
    Authentication,
    /// A message failed AEAD verification.
    Decryption,
    /// The key for a message is gone: it is a duplicate, too old, or too far
    /// ahead.
    MessageKeyNotFound,
    /// A challenge expired, was already used, or was never issued.
    StaleChallenge,
    /// A key bundle lacks a part that the operation needs.
    KeyBundleIncomplete,
    /// A key rotation policy was violated.
    RotationPolicyViolation,
    /// Input couldn't be decoded.
    Malformed,
    /// The backend of a key bundle store failed.
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Decryption => "decryption",
            ErrorKind::MessageKeyNotFound => "message key not found",
            ErrorKind::StaleChallenge => "stale challenge",
            ErrorKind::KeyBundleIncomplete => "key bundle incomplete",
            ErrorKind::RotationPolicyViolation => "rotation policy violation",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Storage => "storage",
        };

        f.write_str(name)
    }
}

/// The version of duplex that is being used.
pub static VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
fn corpus_data_path(fuzz_target: &str) -> std::path::PathBuf {
    let manifest_dir =
        std::env::var("CARGO_MANIFEST_DIR").expect("Cargo always sets the manifest dir");

    let mut afl_dir = std::path::PathBuf::from(manifest_dir);
    afl_dir.push("afl");
    afl_dir.push(fuzz_target);
    afl_dir.push("in");

    afl_dir
}

#[cfg(test)]
fn run_corpus<F>(fuzz_target: &str, method: F)
where
    F: FnOnce(&[u8]) + Copy,
{
    let dir = corpus_data_path(fuzz_target);
    let corpus = std::fs::read_dir(dir).expect("Couldn't read the corpus directory");

    for input in corpus {
        let input = input.expect("Couldn't read the input file");
        let data = std::fs::read(input.path()).expect("Couldn't read the input file");
        method(&data)
    }
}
