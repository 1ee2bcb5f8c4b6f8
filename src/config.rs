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


//! Configuration of the whole engine in one place.
//!
//! Every section is optional, missing sections and fields take their default
//! values:
//!
//! ```rust
//! use duplex::config::EngineConfig;
//!
//! # fn main() -> Result<(), duplex::config::ConfigError> {
//! let config = EngineConfig::from_json(r#"{ "rotation": { "rotate_after_messages": 500 } }"#)?;
//!
//! assert_eq!(config.rotation.rotate_after_messages, 500);
//! assert_eq!(config.rotation.rotate_after_days, 7);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ErrorKind,
    agreement::AgreementConfig,
    auth::AuthenticatorConfig,
    maintenance::MaintenanceConfig,
    ratchet::RatchetConfig,
    rotation::{RotationError, RotationPolicy},
};

/// Error type describing an unusable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration isn't valid JSON, or a field has the wrong type.
    #[error("The configuration couldn't be parsed: {0}")]
    Json(#[from] serde_json::Error),
    /// The rotation policy can't be followed.
    #[error(transparent)]
    Rotation(#[from] RotationError),
    /// The maintenance sweep would run continuously.
    #[error("The maintenance sweep interval must be at least one second")]
    ZeroSweepInterval,
}

impl ConfigError {
    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Json(_) | ConfigError::ZeroSweepInterval => ErrorKind::Malformed,
            ConfigError::Rotation(_) => ErrorKind::RotationPolicyViolation,
        }
    }
}

/// The configuration of every component of the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounds for out-of-order delivery.
    pub ratchet: RatchetConfig,
    /// How key bundles are checked before a key agreement.
    pub agreement: AgreementConfig,
    /// When conversation keys are rotated.
    pub rotation: RotationPolicy,
    /// How long challenges stay valid.
    pub authenticator: AuthenticatorConfig,
    /// How often expired key material is swept.
    pub maintenance: MaintenanceConfig,
}

impl EngineConfig {
    /// Parse and validate a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;

        Ok(config)
    }

    /// Check that the configuration can be followed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rotation.validate()?;

        if self.maintenance.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }

        Ok(())
    }
}
