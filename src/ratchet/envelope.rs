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


//! The JSON wire format of ratchet messages.
//!
//! ```json
//! {
//!   "version": "double-ratchet-v1",
//!   "header": { "publicKey": "...", "counter": 0, "previousChainLength": 0 },
//!   "ciphertext": "...",
//!   "nonce": "...",
//!   "tag": "...",
//!   "preKey": { "identityKey": "...", "ephemeralKey": "...", "signedPreKeyId": 1 }
//! }
//! ```
//!
//! `nonce` may also be called `iv`. When `tag` is missing, the last 16 bytes
//! of `ciphertext` are the tag. `preKey` is only present while the sender
//! hasn't yet received a reply.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ErrorKind,
    cipher::Cipher,
    types::{Curve25519PublicKey, KeyId},
    utilities::base64_serde,
};

/// The version tag every envelope carries.
pub const ENVELOPE_VERSION: &str = "double-ratchet-v1";

/// Error type for envelopes that can't be decoded.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The input wasn't a JSON envelope.
    #[error("The envelope couldn't be parsed: {0}")]
    Json(#[from] serde_json::Error),
    /// The envelope was produced by an unknown protocol version.
    #[error("Unsupported envelope version, expected {expected}, got {got}")]
    UnsupportedVersion {
        /// The version we support.
        expected: &'static str,
        /// The version the envelope claims.
        got: String,
    },
    /// A binary field has the wrong size.
    #[error("Invalid {field} length, expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The name of the offending field.
        field: &'static str,
        /// The expected number of bytes.
        expected: usize,
        /// The number of bytes we got.
        got: usize,
    },
}

impl EnvelopeError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Malformed
    }
}

/// The cleartext, authenticated header of a ratchet message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// The sender's current ratchet public key.
    pub public_key: Curve25519PublicKey,
    /// The index of the message in the sender's current sending chain.
    pub counter: u64,
    /// The length of the sender's previous sending chain.
    pub previous_chain_length: u64,
}

impl MessageHeader {
    const ENCODED_LENGTH: usize = Curve25519PublicKey::LENGTH + 16;

    /// The canonical byte encoding that is authenticated by the AEAD.
    pub(crate) fn to_bytes(self) -> [u8; Self::ENCODED_LENGTH] {
        let mut bytes = [0u8; Self::ENCODED_LENGTH];

        bytes[..32].copy_from_slice(self.public_key.as_bytes());
        bytes[32..40].copy_from_slice(&self.counter.to_be_bytes());
        bytes[40..].copy_from_slice(&self.previous_chain_length.to_be_bytes());

        bytes
    }
}

/// The keys a responder needs to run its half of the key agreement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyInfo {
    /// The initiator's Curve25519 identity key.
    pub identity_key: Curve25519PublicKey,
    /// The initiator's ephemeral key of this handshake.
    pub ephemeral_key: Curve25519PublicKey,
    /// The id of the responder's signed pre-key that was used.
    pub signed_pre_key_id: KeyId,
    /// The responder's one-time pre-key that was used, if any was left.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key: Option<Curve25519PublicKey>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeWire {
    version: String,
    header: MessageHeader,
    #[serde(with = "base64_serde")]
    ciphertext: Vec<u8>,
    #[serde(alias = "iv", with = "base64_serde")]
    nonce: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "optional_base64")]
    tag: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_key: Option<PreKeyInfo>,
}

#[derive(Deserialize)]
struct VersionTag {
    version: String,
}

fn check_version(version: &str) -> Result<(), EnvelopeError> {
    if version == ENVELOPE_VERSION {
        Ok(())
    } else {
        Err(EnvelopeError::UnsupportedVersion {
            expected: ENVELOPE_VERSION,
            got: version.to_owned(),
        })
    }
}

/// An encrypted ratchet message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "EnvelopeWire", try_from = "EnvelopeWire")]
pub struct EncryptedEnvelope {
    /// The message header, sent in the clear.
    pub header: MessageHeader,
    /// The encrypted payload, without the tag.
    pub ciphertext: Vec<u8>,
    /// The random ChaCha20-Poly1305 nonce.
    pub nonce: [u8; Cipher::NONCE_LENGTH],
    /// The Poly1305 authentication tag.
    pub tag: [u8; Cipher::TAG_LENGTH],
    /// Key agreement information, present until the session is confirmed.
    pub pre_key: Option<PreKeyInfo>,
}

impl EncryptedEnvelope {
    /// Parse an envelope from its JSON form.
    ///
    /// The version tag is checked before anything else in the envelope is
    /// looked at.
    pub fn from_json(json: &str) -> Result<Self, EnvelopeError> {
        let tag: VersionTag = serde_json::from_str(json)?;
        check_version(&tag.version)?;

        let wire: EnvelopeWire = serde_json::from_str(json)?;

        Self::try_from(wire)
    }

    /// Encode the envelope as JSON, always with a detached tag.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Is this an envelope that can establish a new session.
    pub const fn is_pre_key(&self) -> bool {
        self.pre_key.is_some()
    }
}

impl From<EncryptedEnvelope> for EnvelopeWire {
    fn from(envelope: EncryptedEnvelope) -> Self {
        Self {
            version: ENVELOPE_VERSION.to_owned(),
            header: envelope.header,
            ciphertext: envelope.ciphertext,
            nonce: envelope.nonce.to_vec(),
            tag: Some(envelope.tag.to_vec()),
            pre_key: envelope.pre_key,
        }
    }
}

impl TryFrom<EnvelopeWire> for EncryptedEnvelope {
    type Error = EnvelopeError;

    fn try_from(wire: EnvelopeWire) -> Result<Self, Self::Error> {
        check_version(&wire.version)?;

        let EnvelopeWire { header, mut ciphertext, nonce: nonce_bytes, tag, pre_key, .. } = wire;

        let nonce: [u8; Cipher::NONCE_LENGTH] =
            nonce_bytes.as_slice().try_into().map_err(|_| EnvelopeError::InvalidLength {
                field: "nonce",
                expected: Cipher::NONCE_LENGTH,
                got: nonce_bytes.len(),
            })?;

        let tag_bytes = match tag {
            Some(tag) => tag,
            None => {
                let Some(split_at) = ciphertext.len().checked_sub(Cipher::TAG_LENGTH) else {
                    return Err(EnvelopeError::InvalidLength {
                        field: "ciphertext",
                        expected: Cipher::TAG_LENGTH,
                        got: ciphertext.len(),
                    });
                };

                ciphertext.split_off(split_at)
            }
        };

        let tag: [u8; Cipher::TAG_LENGTH] =
            tag_bytes.as_slice().try_into().map_err(|_| EnvelopeError::InvalidLength {
                field: "tag",
                expected: Cipher::TAG_LENGTH,
                got: tag_bytes.len(),
            })?;

        Ok(Self { header, ciphertext, nonce, tag, pre_key })
    }
}

mod optional_base64 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::utilities::{base64_decode, base64_encode};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&base64_encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| base64_decode(encoded).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;
    use serde_json::json;

    use super::{EncryptedEnvelope, EnvelopeError, MessageHeader};
    use crate::{ErrorKind, types::Curve25519PublicKey, utilities::base64_encode};

    fn header_json() -> serde_json::Value {
        json!({
            "publicKey": Curve25519PublicKey::from([1u8; 32]).to_base64(),
            "counter": 3,
            "previousChainLength": 2,
        })
    }

    #[test]
    fn detached_and_embedded_tags_decode_the_same() -> anyhow::Result<()> {
        let detached = json!({
            "version": "double-ratchet-v1",
            "header": header_json(),
            "ciphertext": base64_encode(b"ciphertext"),
            "nonce": base64_encode([2u8; 12]),
            "tag": base64_encode([3u8; 16]),
        });

        let mut embedded_ciphertext = b"ciphertext".to_vec();
        embedded_ciphertext.extend_from_slice(&[3u8; 16]);

        let embedded = json!({
            "version": "double-ratchet-v1",
            "header": header_json(),
            "ciphertext": base64_encode(embedded_ciphertext),
            "iv": base64_encode([2u8; 12]),
        });

        let first = EncryptedEnvelope::from_json(&detached.to_string())?;
        let second = EncryptedEnvelope::from_json(&embedded.to_string())?;

        assert_eq!(first, second);
        assert_eq!(first.ciphertext, b"ciphertext");
        assert_eq!(first.header.counter, 3);
        assert_eq!(first.header.previous_chain_length, 2);
        assert!(!first.is_pre_key());

        Ok(())
    }

    #[test]
    fn unknown_versions_are_rejected_first() {
        let envelope = json!({
            "version": "double-ratchet-v2",
            "header": "not even a header",
        });

        let result = EncryptedEnvelope::from_json(&envelope.to_string());

        assert_matches!(result, Err(EnvelopeError::UnsupportedVersion { got, .. }));
        assert_eq!(got, "double-ratchet-v2");
    }

    #[test]
    fn short_fields_are_rejected() {
        let envelope = json!({
            "version": "double-ratchet-v1",
            "header": header_json(),
            "ciphertext": base64_encode([0u8; 4]),
            "nonce": base64_encode([2u8; 12]),
        });

        let result = EncryptedEnvelope::from_json(&envelope.to_string());
        assert_matches!(result, Err(EnvelopeError::InvalidLength { field: "ciphertext", .. }));

        let envelope = json!({
            "version": "double-ratchet-v1",
            "header": header_json(),
            "ciphertext": base64_encode([0u8; 4]),
            "nonce": base64_encode([2u8; 8]),
            "tag": base64_encode([3u8; 16]),
        });

        let result = EncryptedEnvelope::from_json(&envelope.to_string());
        assert_matches!(result, Err(error));
        assert_eq!(error.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn encoding_uses_the_documented_field_names() -> anyhow::Result<()> {
        let envelope = EncryptedEnvelope {
            header: MessageHeader {
                public_key: Curve25519PublicKey::from([1u8; 32]),
                counter: 0,
                previous_chain_length: 0,
            },
            ciphertext: vec![1, 2, 3],
            nonce: [0u8; 12],
            tag: [0u8; 16],
            pre_key: None,
        };

        let value: serde_json::Value = serde_json::from_str(&envelope.to_json()?)?;

        assert_eq!(value["version"], "double-ratchet-v1");
        assert!(value["header"]["publicKey"].is_string());
        assert!(value["header"]["previousChainLength"].is_number());
        assert!(value["nonce"].is_string());
        assert!(value["tag"].is_string());
        assert!(value.get("preKey").is_none());

        Ok(())
    }

    #[test]
    fn fuzz_corpus_decoding() {
        crate::run_corpus("envelope-decoding", |data| {
            if let Ok(json) = std::str::from_utf8(data) {
                let _ = EncryptedEnvelope::from_json(json);
            }
        });
    }
}
