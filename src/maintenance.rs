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


//! Periodic cleanup of expired key material.
//!
//! Skipped message keys, retired conversation keys and pending challenges all
//! expire. [`Maintenance`] drops them in one sweep, either when called
//! directly or, with the `tokio` feature, every
//! [`MaintenanceConfig::sweep_interval_secs`].

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    auth::PeerAuthenticator, rotation::KeyRotationManager, session::SessionRegistry,
    utilities::unix_timestamp,
};

/// How often the background sweep runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between two sweeps, must not be zero.
    pub sweep_interval_secs: u64,
}

impl MaintenanceConfig {
    /// One minute.
    pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

    /// The time between two sweeps, at least one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { sweep_interval_secs: Self::DEFAULT_SWEEP_INTERVAL_SECS }
    }
}

/// What a single sweep removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Skipped message keys that outlived their maximum age.
    pub evicted_skipped_keys: usize,
    /// Retired conversation keys past their retention period.
    pub purged_conversation_keys: usize,
    /// Challenges that expired without an answer.
    pub purged_challenges: usize,
}

impl SweepReport {
    /// Did the sweep remove anything.
    pub const fn is_empty(&self) -> bool {
        self.evicted_skipped_keys == 0
            && self.purged_conversation_keys == 0
            && self.purged_challenges == 0
    }
}

/// Sweeps the expired key material of a [`SessionRegistry`] and, optionally,
/// of a [`KeyRotationManager`] and a [`PeerAuthenticator`].
#[derive(Debug)]
pub struct Maintenance {
    config: MaintenanceConfig,
    registry: Arc<SessionRegistry>,
    rotation: Option<Arc<KeyRotationManager>>,
    authenticator: Option<Arc<PeerAuthenticator>>,
}

impl Maintenance {
    /// Sweep the sessions of the given registry, with the default
    /// [`MaintenanceConfig`].
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { config: MaintenanceConfig::default(), registry, rotation: None, authenticator: None }
    }

    /// Use the given configuration, usually [`EngineConfig::maintenance`].
    ///
    /// [`EngineConfig::maintenance`]: crate::config::EngineConfig::maintenance
    pub fn with_config(mut self, config: MaintenanceConfig) -> Self {
        self.config = config;
        self
    }

    /// The configuration the background sweep runs with.
    pub const fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Also purge the retired keys of the given rotation manager.
    pub fn with_rotation(mut self, rotation: Arc<KeyRotationManager>) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Also purge the stale challenges of the given authenticator.
    pub fn with_authenticator(mut self, authenticator: Arc<PeerAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Run a single sweep, using `now` as the current Unix timestamp in
    /// seconds.
    pub fn run_once(&self, now: u64) -> SweepReport {
        let report = SweepReport {
            evicted_skipped_keys: self.registry.evict_expired_skipped_keys(now),
            purged_conversation_keys: self
                .rotation
                .as_ref()
                .map_or(0, |rotation| rotation.purge_expired(now)),
            purged_challenges: self
                .authenticator
                .as_ref()
                .map_or(0, |authenticator| authenticator.purge_stale_challenges(now)),
        };

        if !report.is_empty() {
            debug!(
                evicted_skipped_keys = report.evicted_skipped_keys,
                purged_conversation_keys = report.purged_conversation_keys,
                purged_challenges = report.purged_challenges,
                "Swept expired key material"
            );
        }

        report
    }

    /// Run a single sweep now.
    pub fn run(&self) -> SweepReport {
        self.run_once(unix_timestamp())
    }

    /// Sweep right away, then every [`MaintenanceConfig::sweep_interval()`],
    /// on the current tokio runtime.
    ///
    /// The sweep runs until the returned handle is aborted. Must be called
    /// from within a tokio runtime.
    #[cfg(feature = "tokio")]
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = self.config.sweep_interval();
        tracing::info!(period_secs = period.as_secs(), "Starting the maintenance sweep");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                self.run();
            }
        })
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use super::{Maintenance, MaintenanceConfig, SweepReport};
    use crate::{
        account::Account,
        agreement::AgreementConfig,
        auth::{AuthenticatorConfig, PeerAuthenticator},
        ratchet::RatchetConfig,
        rotation::{KeyRotationManager, RotationPolicy},
        session::SessionRegistry,
        types::Ed25519Keypair,
    };

    fn registry_with_skipped_keys() -> anyhow::Result<Arc<SessionRegistry>> {
        let alice = Account::new();
        let mut bob = Account::new();

        let mut alice_session = alice
            .create_outbound_session(
                &bob.key_bundle(),
                &AgreementConfig::default(),
                RatchetConfig::default(),
            )?
            .session;

        let first = alice_session.encrypt(b"first");
        let _second = alice_session.encrypt(b"second");
        let third = alice_session.encrypt(b"third");

        let mut bob_session = bob.create_inbound_session(&first, RatchetConfig::default())?.session;
        bob_session.decrypt(&third)?;
        assert_eq!(bob_session.ratchet().skipped_message_key_count(), 1);

        let registry = Arc::new(SessionRegistry::new());
        registry.insert("alice", bob_session);

        Ok(registry)
    }

    #[test]
    fn the_sweep_interval_comes_from_the_config() -> anyhow::Result<()> {
        let registry = registry_with_skipped_keys()?;

        let maintenance = Maintenance::new(registry.clone());
        assert_eq!(maintenance.config().sweep_interval(), Duration::from_secs(60));

        let config = MaintenanceConfig { sweep_interval_secs: 5 };
        let maintenance = Maintenance::new(registry).with_config(config);
        assert_eq!(maintenance.config().sweep_interval(), Duration::from_secs(5));

        let zero = MaintenanceConfig { sweep_interval_secs: 0 };
        assert_eq!(zero.sweep_interval(), Duration::from_secs(1));

        Ok(())
    }

    #[test]
    fn nothing_expires_early() -> anyhow::Result<()> {
        let maintenance = Maintenance::new(registry_with_skipped_keys()?);

        assert!(maintenance.run().is_empty());

        Ok(())
    }

    #[test]
    fn everything_expired_is_swept() -> anyhow::Result<()> {
        let registry = registry_with_skipped_keys()?;
        let rotation = Arc::new(KeyRotationManager::new(RotationPolicy {
            rotate_after_messages: 1,
            ..Default::default()
        })?);
        let authenticator = Arc::new(PeerAuthenticator::new(
            "alice",
            Ed25519Keypair::new(),
            AuthenticatorConfig::default(),
        ));

        rotation.get_key_at("conversation", b"seed", 0)?;
        rotation.get_key_at("conversation", b"seed", 0)?;
        authenticator.generate_challenge_at("bob", 0);

        let maintenance = Maintenance::new(registry)
            .with_rotation(rotation.clone())
            .with_authenticator(authenticator.clone());

        assert_eq!(
            maintenance.run_once(u64::MAX),
            SweepReport {
                evicted_skipped_keys: 1,
                purged_conversation_keys: 1,
                purged_challenges: 1,
            }
        );
        assert!(maintenance.run_once(u64::MAX).is_empty());
        assert_eq!(authenticator.pending_challenge_count(), 0);

        Ok(())
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn background_sweeps() -> anyhow::Result<()> {
        let registry = registry_with_skipped_keys()?;
        let authenticator = Arc::new(PeerAuthenticator::new(
            "alice",
            Ed25519Keypair::new(),
            AuthenticatorConfig { challenge_ttl_secs: 0 },
        ));
        authenticator.generate_challenge_at("bob", 0);

        let maintenance = Arc::new(
            Maintenance::new(registry)
                .with_config(MaintenanceConfig { sweep_interval_secs: 1 })
                .with_authenticator(authenticator.clone()),
        );
        let handle = maintenance.spawn();

        // The first sweep runs immediately.
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(authenticator.pending_challenge_count(), 0);

        Ok(())
    }
}
