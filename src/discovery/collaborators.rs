// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Collaborator contracts (§6). The discovery core treats the persistent
//! configuration store, the downstream login/session engine, the
//! SendTargets ioctl, the iSNS client, and the system-event bus as opaque
//! operations behind these traits. Production implementations live in
//! [`crate::discovery::hba_pool`] (bridging to the crate's existing
//! `client::pool_sessions::Pool`) and [`crate::discovery::store_yaml`]
//! (a YAML-file-backed `PersistentStore`); reference/mock implementations
//! for tests live in [`crate::discovery::testutil`].

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::discovery::types::{
    ConfiguredSession, DiscoveryMethod, DiscoveryMethodKind, EventPhase, InitiatorIdentity,
    ParamOverride, ParamSetValue, PortalGroupList, SendTargetsList, StaticTargetEntry,
};

/// The persistent configuration store. Holds only *configuration*, never
/// *discovered* state (the discovery core never persists what it finds).
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn disc_meth_get(&self) -> DiscoveryMethod;

    async fn initiator_name_get(&self) -> Option<String>;
    async fn initiator_name_set(&self, name: &str);

    async fn alias_name_get(&self) -> Option<String>;
    async fn alias_name_set(&self, alias: &str);

    async fn chap_get(&self, name: &str) -> Option<(String, Option<String>)>;
    async fn chap_set(&self, name: &str, user: &str, secret: Option<&str>);

    /// All per-name login-parameter overrides, keyed by target (or
    /// initiator) name. The original probed for a size before fetching;
    /// that two-phase allocate pattern is this trait's documented
    /// contract even though the signature here just returns the finished
    /// `Vec` (see SPEC_FULL.md §9b).
    async fn param_overrides(&self) -> Vec<(String, ParamOverride)>;

    async fn static_targets(&self) -> Vec<StaticTargetEntry>;

    async fn disc_addrs(&self) -> Vec<SocketAddr>;

    async fn isns_servers(&self) -> Vec<SocketAddr>;

    /// Two-phase in the original (probe then fetch); here a direct lookup.
    /// Returns `None` when no record exists for `name` at all (distinct
    /// from "record exists with defaults").
    async fn configured_session(&self, name: &str) -> Option<ConfiguredSession>;
}

/// Downstream session/connection engine. The iSCSI login and PDU state
/// machine are consumed as opaque operations; a production impl bridges
/// to `client::pool_sessions::Pool`.
#[async_trait]
pub trait HbaOps: Send + Sync {
    /// Create-or-find a session matching the given identity; returns its
    /// `sess_oid`. Must be idempotent: calling twice with the same
    /// `(target_name, method, disc_addr, tpgt, isid_slot)` returns the
    /// same oid without creating a second session.
    async fn sess_create(
        &self,
        method: DiscoveryMethodKind,
        disc_addr: SocketAddr,
        target_name: &str,
        tpgt: u16,
        isid_slot: u32,
    ) -> Result<u32, String>;

    /// Create-or-find a connection to `target_addr` on the session
    /// identified by `oid`.
    async fn conn_create(&self, oid: u32, target_addr: SocketAddr) -> Result<(), String>;

    /// Destroy a session (and its connections). Typical failure reason:
    /// the downstream resource is busy.
    async fn sess_destroy(&self, oid: u32) -> Result<(), String>;

    /// Request login (online) of an existing session. Fire-and-forget in
    /// the original (`iscsi_sess_online` has no return value consulted by
    /// the caller beyond "was it attempted").
    async fn sess_online(&self, oid: u32);

    async fn set_login_param(&self, oid: u32, value: ParamSetValue, param_id: u32);

    async fn targetparam_get_oid(&self, target_name: &str) -> u32;

    async fn targetparam_remove_target(&self, oid: u32);
}

/// The SendTargets ioctl collaborator (§4.2.1).
#[async_trait]
pub trait SendTargetsIoctl: Send + Sync {
    /// Issue the SendTargets request to `addr`, asking for up to
    /// `capacity_hint` entries. The returned list's `out_cnt` may exceed
    /// `capacity_hint`; the caller (reconciler/worker) is responsible for
    /// the retry-with-larger-buffer dance.
    async fn get(&self, addr: SocketAddr, capacity_hint: usize) -> Result<SendTargetsList, String>;
}

/// The iSNS client collaborator (§4.2.2, §4.4).
#[async_trait]
pub trait IsnsClient: Send + Sync {
    async fn register(&self, identity: &InitiatorIdentity);
    async fn deregister(&self, identity: &InitiatorIdentity);

    /// Query every registered iSNS server.
    async fn query_all(&self, identity: &InitiatorIdentity) -> Result<PortalGroupList, String>;

    async fn query_one_server(
        &self,
        server: SocketAddr,
        identity: &InitiatorIdentity,
    ) -> Result<PortalGroupList, String>;

    async fn query_one_node(
        &self,
        node_key: &str,
        identity: &InitiatorIdentity,
    ) -> Result<PortalGroupList, String>;
}

/// The system-event bus (§6). A default `tracing`-based implementation is
/// provided as [`TracingEventSink`].
pub trait EventSink: Send + Sync {
    fn emit(&self, method: DiscoveryMethodKind, phase: EventPhase);
}

/// Default [`EventSink`] that emits structured `tracing` events, matching
/// this crate's existing logging conventions (`cfg::logger`).
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, method: DiscoveryMethodKind, phase: EventPhase) {
        match phase {
            EventPhase::Start => {
                tracing::info!(target: "iscsi::discovery", method = %method, "discovery start");
            },
            EventPhase::End => {
                tracing::info!(target: "iscsi::discovery", method = %method, "discovery end");
            },
        }
    }
}

/// A [`SendTargetsIoctl`] that always reports zero targets. The wire-level
/// SendTargets codec is out of scope for this crate (§1); this stands in
/// for it wherever no concrete implementation is wired, so the worker
/// still runs its cycle and emits its events rather than the caller having
/// to special-case "no SendTargets backend available".
#[derive(Debug, Default)]
pub struct NullSendTargetsIoctl;

#[async_trait]
impl SendTargetsIoctl for NullSendTargetsIoctl {
    async fn get(&self, _addr: SocketAddr, capacity_hint: usize) -> Result<SendTargetsList, String> {
        Ok(SendTargetsList {
            in_cnt: capacity_hint,
            out_cnt: 0,
            entries: Vec::new(),
        })
    }
}

/// An [`IsnsClient`] that performs no wire I/O. The iSNS codec is out of
/// scope for this crate (§1); this stands in wherever no concrete client
/// is wired.
#[derive(Debug, Default)]
pub struct NullIsnsClient;

#[async_trait]
impl IsnsClient for NullIsnsClient {
    async fn register(&self, _identity: &InitiatorIdentity) {}
    async fn deregister(&self, _identity: &InitiatorIdentity) {}

    async fn query_all(&self, _identity: &InitiatorIdentity) -> Result<PortalGroupList, String> {
        Ok(PortalGroupList::default())
    }

    async fn query_one_server(
        &self,
        _server: SocketAddr,
        _identity: &InitiatorIdentity,
    ) -> Result<PortalGroupList, String> {
        Ok(PortalGroupList::default())
    }

    async fn query_one_node(
        &self,
        _node_key: &str,
        _identity: &InitiatorIdentity,
    ) -> Result<PortalGroupList, String> {
        Ok(PortalGroupList::default())
    }
}
