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


//! Published key bundles.
//!
//! The JSON form uses camel-case field names and base64 keys. Bundles
//! published before signing keys existed have a `null` signing key, bundles
//! published before one-time pre-keys had ids list them as bare strings.
//! Both are accepted and normalized on the way in.

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{Curve25519PublicKey, Ed25519PublicKey, Ed25519Signature, KeyId};

/// A medium-term pre-key, signed by the owner's Ed25519 signing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
    /// The id of this signed pre-key.
    pub key_id: KeyId,
    /// The Curve25519 public key.
    pub public_key: Curve25519PublicKey,
    /// The Ed25519 signature over the bytes of `public_key`.
    pub signature: Ed25519Signature,
}

/// A single-use pre-key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKey {
    /// The id of this one-time pre-key.
    pub id: KeyId,
    /// The Curve25519 public key.
    pub public_key: Curve25519PublicKey,
}

impl From<Curve25519PublicKey> for OneTimePreKey {
    fn from(public_key: Curve25519PublicKey) -> Self {
        Self { id: KeyId::from_public_key(&public_key), public_key }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneTimePreKeys {
    Tagged(Vec<OneTimePreKey>),
    Legacy(Vec<Curve25519PublicKey>),
}

impl From<OneTimePreKeys> for Vec<OneTimePreKey> {
    fn from(keys: OneTimePreKeys) -> Self {
        match keys {
            OneTimePreKeys::Tagged(keys) => keys,
            OneTimePreKeys::Legacy(keys) => keys.into_iter().map(OneTimePreKey::from).collect(),
        }
    }
}

fn one_time_pre_keys<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<OneTimePreKey>, D::Error> {
    Ok(OneTimePreKeys::deserialize(deserializer)?.into())
}

/// The public keys a user publishes so that others can start a conversation
/// with them while they are offline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBundle {
    /// The Curve25519 identity key.
    pub identity_key: Curve25519PublicKey,
    /// The Ed25519 signing key, `None` for bundles published before signing
    /// keys existed.
    #[serde(default)]
    pub signing_key: Option<Ed25519PublicKey>,
    /// The fingerprint of the identity key, empty if the publisher didn't
    /// include one.
    #[serde(default)]
    pub fingerprint: String,
    /// The currently active signed pre-key.
    #[serde(default)]
    pub signed_pre_key: Option<SignedPreKey>,
    /// The one-time pre-keys that haven't been handed out yet.
    #[serde(default, deserialize_with = "one_time_pre_keys")]
    pub one_time_pre_keys: Vec<OneTimePreKey>,
}

impl KeyBundle {
    /// Parse a key bundle from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Encode the key bundle as JSON, one-time pre-keys always carry an id.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The same bundle with exactly the given one-time pre-key, or none.
    ///
    /// Used after a one-time pre-key has been popped from a key bundle store,
    /// so that the key agreement uses that key and no other.
    pub fn with_one_time_pre_key(&self, one_time_pre_key: Option<OneTimePreKey>) -> Self {
        Self { one_time_pre_keys: one_time_pre_key.into_iter().collect(), ..self.clone() }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::{KeyBundle, OneTimePreKey};
    use crate::types::{Curve25519PublicKey, Ed25519Keypair, KeyId};

    fn bundle_json(one_time_pre_keys: serde_json::Value) -> serde_json::Value {
        let signing_key = Ed25519Keypair::new();
        let signed_pre_key = Curve25519PublicKey::from([2u8; 32]);

        json!({
            "identityKey": Curve25519PublicKey::from([1u8; 32]).to_base64(),
            "signingKey": signing_key.public_key().to_base64(),
            "fingerprint": Curve25519PublicKey::from([1u8; 32]).fingerprint(),
            "signedPreKey": {
                "keyId": 7,
                "publicKey": signed_pre_key.to_base64(),
                "signature": signing_key.sign(signed_pre_key.as_bytes()).to_base64(),
            },
            "oneTimePreKeys": one_time_pre_keys,
        })
    }

    #[test]
    fn tagged_one_time_pre_keys_are_parsed() -> anyhow::Result<()> {
        let key = Curve25519PublicKey::from([3u8; 32]);
        let json = bundle_json(json!([{ "id": 42, "publicKey": key.to_base64() }]));

        let bundle = KeyBundle::from_json(&json.to_string())?;

        assert_eq!(
            bundle.one_time_pre_keys,
            vec![OneTimePreKey { id: KeyId(42), public_key: key }]
        );
        assert_eq!(bundle.signed_pre_key.map(|k| k.key_id), Some(KeyId(7)));

        Ok(())
    }

    #[test]
    fn legacy_one_time_pre_keys_are_normalized() -> anyhow::Result<()> {
        let key = Curve25519PublicKey::from([3u8; 32]);
        let json = bundle_json(json!([key.to_base64()]));

        let bundle = KeyBundle::from_json(&json.to_string())?;

        assert_eq!(bundle.one_time_pre_keys, vec![OneTimePreKey::from(key)]);
        assert_eq!(bundle.one_time_pre_keys[0].id, KeyId::from_public_key(&key));

        let reencoded: serde_json::Value = serde_json::from_str(&bundle.to_json()?)?;
        assert!(reencoded["oneTimePreKeys"][0]["id"].is_number());

        Ok(())
    }

    #[test]
    fn old_bundles_without_signing_keys_parse() -> anyhow::Result<()> {
        let mut json = bundle_json(json!([]));
        json["signingKey"] = serde_json::Value::Null;

        let bundle = KeyBundle::from_json(&json.to_string())?;

        assert!(bundle.signing_key.is_none());
        assert!(bundle.one_time_pre_keys.is_empty());

        Ok(())
    }

    #[test]
    fn restricting_one_time_pre_keys() -> anyhow::Result<()> {
        let json = bundle_json(json!([
            Curve25519PublicKey::from([3u8; 32]).to_base64(),
            Curve25519PublicKey::from([4u8; 32]).to_base64(),
        ]));
        let bundle = KeyBundle::from_json(&json.to_string())?;

        assert!(bundle.with_one_time_pre_key(None).one_time_pre_keys.is_empty());

        let first = bundle.one_time_pre_keys[0];
        assert_eq!(bundle.with_one_time_pre_key(Some(first)).one_time_pre_keys, vec![first]);

        Ok(())
    }
}
