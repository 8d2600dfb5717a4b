// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The reference `PersistentStore` implementation backing the CLI binary:
//! a single YAML document on disk, following the exact
//! `cfg::config::Config::load_from_file` pattern (§6, §9a). Every mutating
//! method persists the whole document back to disk immediately — there is
//! no write-behind buffering, matching the original's synchronous
//! name-value-database semantics.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::discovery::{
    collaborators::PersistentStore,
    config::DiscoveryConfig,
    types::{ConfiguredSession, DiscoveryMethod, ParamOverride, StaticTargetEntry},
};

pub struct YamlStore {
    path: PathBuf,
    config: Mutex<DiscoveryConfig>,
}

impl YamlStore {
    /// Loads `path` if it exists, otherwise starts from an empty
    /// [`DiscoveryConfig`] (matching §4.5's "bootstrap, empty store"
    /// scenario, §8).
    pub fn open(path: PathBuf) -> anyhow::Result<Arc<Self>> {
        let config = if path.exists() {
            DiscoveryConfig::load_from_file(&path)?
        } else {
            DiscoveryConfig::default()
        };
        Ok(Arc::new(YamlStore {
            path,
            config: Mutex::new(config),
        }))
    }

    async fn persist(&self, config: &DiscoveryConfig) {
        if let Err(err) = config.save_to_file(&self.path) {
            tracing::error!(
                target: "iscsi::discovery",
                path = %self.path.display(),
                %err,
                "failed to persist discovery config"
            );
        }
    }
}

#[async_trait]
impl PersistentStore for YamlStore {
    async fn disc_meth_get(&self) -> DiscoveryMethod {
        let config = self.config.lock().await;
        config
            .discovery_methods
            .iter()
            .fold(DiscoveryMethod::empty(), |mask, name| {
                mask | discovery_method_bit(*name)
            })
    }

    async fn initiator_name_get(&self) -> Option<String> {
        self.config.lock().await.initiator_name.clone()
    }

    async fn initiator_name_set(&self, name: &str) {
        let mut config = self.config.lock().await;
        config.initiator_name = Some(name.to_owned());
        self.persist(&config).await;
    }

    async fn alias_name_get(&self) -> Option<String> {
        self.config.lock().await.initiator_alias.clone()
    }

    async fn alias_name_set(&self, alias: &str) {
        let mut config = self.config.lock().await;
        config.initiator_alias = Some(alias.to_owned());
        self.persist(&config).await;
    }

    async fn chap_get(&self, name: &str) -> Option<(String, Option<String>)> {
        self.config
            .lock()
            .await
            .chap
            .get(name)
            .map(|c| (c.username.clone(), c.secret.clone()))
    }

    async fn chap_set(&self, name: &str, user: &str, secret: Option<&str>) {
        let mut config = self.config.lock().await;
        config.chap.insert(
            name.to_owned(),
            crate::discovery::config::ChapRecordConfig {
                username: user.to_owned(),
                secret: secret.map(str::to_owned),
            },
        );
        self.persist(&config).await;
    }

    async fn param_overrides(&self) -> Vec<(String, ParamOverride)> {
        self.config
            .lock()
            .await
            .param_overrides
            .iter()
            .map(|(name, cfg)| (name.clone(), cfg.clone().into()))
            .collect()
    }

    async fn static_targets(&self) -> Vec<StaticTargetEntry> {
        self.config
            .lock()
            .await
            .static_targets
            .iter()
            .cloned()
            .map(Into::into)
            .collect()
    }

    async fn disc_addrs(&self) -> Vec<SocketAddr> {
        self.config.lock().await.send_targets_addresses.clone()
    }

    async fn isns_servers(&self) -> Vec<SocketAddr> {
        self.config.lock().await.isns_servers.clone()
    }

    async fn configured_session(&self, name: &str) -> Option<ConfiguredSession> {
        self.config
            .lock()
            .await
            .configured_sessions
            .get(name)
            .map(|c| ConfiguredSession {
                count: c.count,
                bound: c.bound,
            })
    }
}

fn discovery_method_bit(name: crate::discovery::config::DiscoveryMethodName) -> DiscoveryMethod {
    use crate::discovery::config::DiscoveryMethodName as M;
    match name {
        M::Static => DiscoveryMethod::STATIC,
        M::SendTargets => DiscoveryMethod::SEND_TARGETS,
        M::Isns => DiscoveryMethod::ISNS,
        M::Slp => DiscoveryMethod::SLP,
    }
}
