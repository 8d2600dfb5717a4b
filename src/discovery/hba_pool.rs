// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Production `HbaOps` bridge onto this crate's pre-existing session/
//! connection plumbing (`client::pool_sessions::Pool` /
//! `client::client::ClientConnection`, §6 / §9a). The discovery core's
//! `sess_oid` is a value the bridge assigns itself (a small counter),
//! since `Pool`'s own identity (TSIH) is only known after a successful
//! login and the discovery core needs an identifier to hand back from
//! `sess_create` before that login necessarily has to happen again on a
//! retry.
//!
//! Login-parameter overrides (`set_login_param`, `targetparam_get_oid`,
//! `targetparam_remove_target`) have no counterpart in `Pool`, whose
//! per-connection operational parameters are fixed at `Config` build time
//! rather than mutable post-login; these methods log and no-op rather
//! than silently pretending to apply the change (§7 error kind 6).

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU16, AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    cfg::config::Config,
    client::{client::ClientConnection, pool_sessions::Pool},
    discovery::{
        collaborators::HbaOps,
        types::{DiscoveryMethodKind, ParamSetValue},
    },
};

struct SessEntry {
    tsih: u16,
    next_cid: AtomicU16,
}

/// Bridges `HbaOps` onto an existing `Arc<Pool>`. `template_cfg` supplies
/// every login/operational parameter except target identity, which is
/// overwritten per call from the discovery core's own arguments.
pub struct PoolHbaOps {
    pool: Arc<Pool>,
    template_cfg: Config,
    sessions: Mutex<HashMap<u32, SessEntry>>,
    oid_by_key: Mutex<HashMap<(String, u16, u32), u32>>,
    next_oid: AtomicU32,
}

impl PoolHbaOps {
    pub fn new(pool: Arc<Pool>, template_cfg: Config) -> Arc<Self> {
        Arc::new(PoolHbaOps {
            pool,
            template_cfg,
            sessions: Mutex::new(HashMap::new()),
            oid_by_key: Mutex::new(HashMap::new()),
            next_oid: AtomicU32::new(1),
        })
    }

    fn build_cfg(&self, target_name: &str, target_addr: SocketAddr, tpgt: u16) -> Config {
        let mut cfg = self.template_cfg.clone();
        cfg.login.identity.target_name = target_name.to_owned();
        cfg.login.identity.session_type = crate::cfg::enums::SessionType::Normal;
        cfg.login.transport.target_address = target_addr.to_string();
        cfg.login.transport.portal_group_tag = tpgt;
        cfg
    }
}

#[async_trait]
impl HbaOps for PoolHbaOps {
    async fn sess_create(
        &self,
        _method: DiscoveryMethodKind,
        _disc_addr: SocketAddr,
        target_name: &str,
        tpgt: u16,
        isid_slot: u32,
    ) -> Result<u32, String> {
        let key = (target_name.to_owned(), tpgt, isid_slot);
        if let Some(oid) = self.oid_by_key.lock().await.get(&key).copied() {
            return Ok(oid);
        }

        let unspecified = SocketAddr::new(
            std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            0,
        );
        let cfg = self.build_cfg(target_name, unspecified, tpgt);
        let conn = ClientConnection::connect(cfg, CancellationToken::new())
            .await
            .map_err(|e| e.to_string())?;
        let (isid, _) = crate::utils::generate_isid();
        let tsih = self
            .pool
            .login_and_insert(Arc::from(target_name), isid, 0u16, conn)
            .await
            .map_err(|e| e.to_string())?;

        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().await.insert(
            oid,
            SessEntry {
                tsih,
                next_cid: AtomicU16::new(1),
            },
        );
        self.oid_by_key.lock().await.insert(key, oid);
        Ok(oid)
    }

    async fn conn_create(&self, oid: u32, target_addr: SocketAddr) -> Result<(), String> {
        let (tsih, cid) = {
            let sessions = self.sessions.lock().await;
            let entry = sessions.get(&oid).ok_or_else(|| format!("unknown oid={oid}"))?;
            let cid = entry.next_cid.fetch_add(1, Ordering::SeqCst);
            (entry.tsih, cid)
        };

        let cfg = self.build_cfg("", target_addr, 0);
        let conn = ClientConnection::connect(cfg, CancellationToken::new())
            .await
            .map_err(|e| e.to_string())?;
        self.pool
            .add_connection_to_session(tsih, cid, conn)
            .await
            .map_err(|e| e.to_string())
    }

    async fn sess_destroy(&self, oid: u32) -> Result<(), String> {
        let tsih = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(&oid)
                .ok_or_else(|| format!("unknown oid={oid}"))?
                .tsih
        };
        self.oid_by_key.lock().await.retain(|_, v| *v != oid);
        self.pool
            .logout_session(tsih)
            .await
            .map_err(|e| e.to_string())
    }

    async fn sess_online(&self, oid: u32) {
        // Pool's session is already logged in by the time sess_create
        // returns; there is no separate "bring online" step to drive.
        tracing::debug!(
            target: "iscsi::discovery",
            oid,
            "sess_online: session already established at create time, no-op"
        );
    }

    async fn set_login_param(&self, oid: u32, value: ParamSetValue, param_id: u32) {
        tracing::warn!(
            target: "iscsi::discovery",
            oid,
            param_id,
            ?value,
            "set_login_param: not supported by the Pool-backed HBA, parameter not applied"
        );
    }

    async fn targetparam_get_oid(&self, target_name: &str) -> u32 {
        self.oid_by_key
            .lock()
            .await
            .iter()
            .find(|((name, _, _), _)| name == target_name)
            .map(|(_, oid)| *oid)
            .unwrap_or(0)
    }

    async fn targetparam_remove_target(&self, oid: u32) {
        tracing::debug!(
            target: "iscsi::discovery",
            oid,
            "targetparam_remove_target: no per-target param store to clear on this backend"
        );
    }
}
