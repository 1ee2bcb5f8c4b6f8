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

use std::time::{SystemTime, UNIX_EPOCH};

pub use base64::DecodeError;
use base64::{
    Engine, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::STANDARD},
};

/// Accepts both padded and unpadded input, older clients emitted the latter.
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the input as standard base64, padding is optional.
pub fn base64_decode(input: impl AsRef<[u8]>) -> Result<Vec<u8>, DecodeError> {
    LENIENT_STANDARD.decode(input)
}

/// Encode the input as padded standard base64.
pub fn base64_encode(input: impl AsRef<[u8]>) -> String {
    STANDARD.encode(input)
}

/// Seconds since the Unix epoch, saturating to zero for clocks set before it.
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

/// Serde helpers storing byte containers as base64 strings.
///
/// Works for `Vec<u8>` and `[u8; N]`, anything that can be viewed as a byte
/// slice and built from a `Vec<u8>`.
pub(crate) mod base64_serde {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use zeroize::Zeroize;

    use super::{base64_decode, base64_encode};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        let mut encoded = base64_encode(value);
        let result = serializer.serialize_str(&encoded);
        encoded.zeroize();

        result
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: TryFrom<Vec<u8>>,
        D: Deserializer<'de>,
    {
        let mut encoded = String::deserialize(deserializer)?;
        let decoded = base64_decode(&encoded).map_err(D::Error::custom);
        encoded.zeroize();

        let decoded = decoded?;
        let length = decoded.len();

        T::try_from(decoded).map_err(|_| {
            D::Error::invalid_length(length, &"a byte array of the expected length")
        })
    }
}
