// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-memory reference/mock collaborator implementations backing the
//! property tests of §8. Not `#[cfg(test)]`-gated because integration
//! tests under `tests/` (a separate crate target) need access too (§9a) —
//! the crate does not otherwise use feature flags for this kind of thing.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::discovery::{
    collaborators::{EventSink, HbaOps, IsnsClient, PersistentStore, SendTargetsIoctl},
    types::{
        ConfiguredSession, DiscoveryMethod, DiscoveryMethodKind, EventPhase, InitiatorIdentity,
        ParamOverride, ParamSetValue, PortalGroupList, SendTargetsList, StaticTargetEntry,
    },
};

/// An in-memory `PersistentStore`, seeded directly by tests rather than
/// loaded from YAML.
#[derive(Default)]
pub struct FakeStore {
    inner: Mutex<FakeStoreInner>,
}

#[derive(Default)]
struct FakeStoreInner {
    disc_meth: DiscoveryMethod,
    initiator_name: Option<String>,
    alias: Option<String>,
    chap: HashMap<String, (String, Option<String>)>,
    param_overrides: Vec<(String, ParamOverride)>,
    static_targets: Vec<StaticTargetEntry>,
    disc_addrs: Vec<SocketAddr>,
    isns_servers: Vec<SocketAddr>,
    configured_sessions: HashMap<String, ConfiguredSession>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeStore::default())
    }

    pub fn set_disc_meth(&self, mask: DiscoveryMethod) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).disc_meth = mask;
    }

    pub fn set_static_targets(&self, targets: Vec<StaticTargetEntry>) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .static_targets = targets;
    }

    pub fn set_disc_addrs(&self, addrs: Vec<SocketAddr>) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).disc_addrs = addrs;
    }

    pub fn set_configured_session(&self, name: &str, session: ConfiguredSession) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .configured_sessions
            .insert(name.to_owned(), session);
    }

    pub fn set_param_override(&self, name: &str, over: ParamOverride) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .param_overrides
            .push((name.to_owned(), over));
    }
}

#[async_trait]
impl PersistentStore for FakeStore {
    async fn disc_meth_get(&self) -> DiscoveryMethod {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).disc_meth
    }

    async fn initiator_name_get(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .initiator_name
            .clone()
    }

    async fn initiator_name_set(&self, name: &str) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).initiator_name =
            Some(name.to_owned());
    }

    async fn alias_name_get(&self) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).alias.clone()
    }

    async fn alias_name_set(&self, alias: &str) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).alias = Some(alias.to_owned());
    }

    async fn chap_get(&self, name: &str) -> Option<(String, Option<String>)> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .chap
            .get(name)
            .cloned()
    }

    async fn chap_set(&self, name: &str, user: &str, secret: Option<&str>) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .chap
            .insert(name.to_owned(), (user.to_owned(), secret.map(str::to_owned)));
    }

    async fn param_overrides(&self) -> Vec<(String, ParamOverride)> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .param_overrides
            .clone()
    }

    async fn static_targets(&self) -> Vec<StaticTargetEntry> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .static_targets
            .clone()
    }

    async fn disc_addrs(&self) -> Vec<SocketAddr> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).disc_addrs.clone()
    }

    async fn isns_servers(&self) -> Vec<SocketAddr> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .isns_servers
            .clone()
    }

    async fn configured_session(&self, name: &str) -> Option<ConfiguredSession> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .configured_sessions
            .get(name)
            .copied()
    }
}

/// An in-memory `HbaOps` double. Every `sess_create`/`conn_create` call
/// succeeds unless pre-armed to fail via `fail_next_destroy`/
/// `fail_all_creates`, letting tests exercise §8 scenario 6 ("disable with
/// busy resource").
#[derive(Default)]
pub struct FakeHba {
    inner: Mutex<FakeHbaInner>,
}

#[derive(Default)]
struct FakeHbaInner {
    next_oid: u32,
    sessions: HashMap<u32, (String, SocketAddr)>,
    /// Identity → oid, so repeated `sess_create` calls for the same
    /// `(target_name, disc_addr, tpgt, isid_slot)` are idempotent, matching
    /// the `HbaOps::sess_create` contract (§4.3, §8 idempotence property).
    oid_by_identity: HashMap<(String, SocketAddr, u16, u32), u32>,
    connections: HashMap<u32, Vec<SocketAddr>>,
    online_calls: Vec<u32>,
    param_pushes: Vec<(u32, ParamSetValue, u32)>,
    fail_all_creates: bool,
    fail_destroy_oids: std::collections::HashSet<u32>,
}

impl FakeHba {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeHba::default())
    }

    pub fn fail_all_creates(&self, fail: bool) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).fail_all_creates = fail;
    }

    pub fn fail_destroy(&self, oid: u32) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fail_destroy_oids
            .insert(oid);
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).sessions.len()
    }

    pub fn online_call_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).online_calls.len()
    }

    pub fn param_pushes(&self) -> Vec<(u32, ParamSetValue, u32)> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).param_pushes.clone()
    }
}

#[async_trait]
impl HbaOps for FakeHba {
    async fn sess_create(
        &self,
        _method: DiscoveryMethodKind,
        disc_addr: SocketAddr,
        target_name: &str,
        tpgt: u16,
        isid_slot: u32,
    ) -> Result<u32, String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let key = (target_name.to_owned(), disc_addr, tpgt, isid_slot);
        if let Some(oid) = inner.oid_by_identity.get(&key).copied() {
            return Ok(oid);
        }
        if inner.fail_all_creates {
            return Err("sess_create: armed to fail".to_owned());
        }
        inner.next_oid += 1;
        let oid = inner.next_oid;
        inner.sessions.insert(oid, (target_name.to_owned(), disc_addr));
        inner.oid_by_identity.insert(key, oid);
        Ok(oid)
    }

    async fn conn_create(&self, oid: u32, target_addr: SocketAddr) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.fail_all_creates {
            return Err("conn_create: armed to fail".to_owned());
        }
        let conns = inner.connections.entry(oid).or_default();
        if !conns.contains(&target_addr) {
            conns.push(target_addr);
        }
        Ok(())
    }

    async fn sess_destroy(&self, oid: u32) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.fail_destroy_oids.contains(&oid) {
            return Err(format!("sess_destroy: oid={oid} armed to fail (busy)"));
        }
        inner.sessions.remove(&oid);
        inner.connections.remove(&oid);
        inner.oid_by_identity.retain(|_, v| *v != oid);
        Ok(())
    }

    async fn sess_online(&self, oid: u32) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .online_calls
            .push(oid);
    }

    async fn set_login_param(&self, oid: u32, value: ParamSetValue, param_id: u32) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .param_pushes
            .push((oid, value, param_id));
    }

    async fn targetparam_get_oid(&self, target_name: &str) -> u32 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sessions
            .iter()
            .find(|(_, (name, _))| name == target_name)
            .map(|(oid, _)| *oid)
            .unwrap_or(0)
    }

    async fn targetparam_remove_target(&self, _oid: u32) {}
}

/// An in-memory `SendTargetsIoctl` double, supporting a pre-armed
/// overflow-then-success sequence for §8 scenario 3.
pub struct FakeSendTargets {
    inner: Mutex<FakeSendTargetsInner>,
}

struct FakeSendTargetsInner {
    responses: HashMap<SocketAddr, SendTargetsList>,
}

impl FakeSendTargets {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeSendTargets {
            inner: Mutex::new(FakeSendTargetsInner {
                responses: HashMap::new(),
            }),
        })
    }

    pub fn set_response(&self, addr: SocketAddr, list: SendTargetsList) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .responses
            .insert(addr, list);
    }
}

#[async_trait]
impl SendTargetsIoctl for FakeSendTargets {
    async fn get(&self, addr: SocketAddr, capacity_hint: usize) -> Result<SendTargetsList, String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(list) = inner.responses.get(&addr) else {
            return Ok(SendTargetsList {
                in_cnt: capacity_hint,
                out_cnt: 0,
                entries: Vec::new(),
            });
        };
        if list.out_cnt > capacity_hint {
            Ok(SendTargetsList {
                in_cnt: capacity_hint,
                out_cnt: list.out_cnt,
                entries: Vec::new(),
            })
        } else {
            Ok(SendTargetsList {
                in_cnt: capacity_hint,
                out_cnt: list.out_cnt,
                entries: list.entries.clone(),
            })
        }
    }
}

/// An in-memory `IsnsClient` double.
#[derive(Default)]
pub struct FakeIsns {
    inner: Mutex<FakeIsnsInner>,
}

#[derive(Default)]
struct FakeIsnsInner {
    registered: bool,
    query_all_result: Option<PortalGroupList>,
}

impl FakeIsns {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeIsns::default())
    }

    pub fn set_query_all_result(&self, list: PortalGroupList) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .query_all_result = Some(list);
    }

    pub fn is_registered(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).registered
    }
}

#[async_trait]
impl IsnsClient for FakeIsns {
    async fn register(&self, _identity: &InitiatorIdentity) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).registered = true;
    }

    async fn deregister(&self, _identity: &InitiatorIdentity) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).registered = false;
    }

    async fn query_all(&self, _identity: &InitiatorIdentity) -> Result<PortalGroupList, String> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .query_all_result
            .clone()
            .unwrap_or_default())
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
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .query_all_result
            .clone()
            .unwrap_or_default())
    }
}

/// An in-memory `EventSink` double recording every emitted (method, phase)
/// pair in order, for asserting START/END ordering invariants (§5).
#[derive(Default)]
pub struct FakeEventSink {
    events: Mutex<Vec<(DiscoveryMethodKind, EventPhase)>>,
}

impl FakeEventSink {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeEventSink::default())
    }

    pub fn events(&self) -> Vec<(DiscoveryMethodKind, EventPhase)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for FakeEventSink {
    fn emit(&self, method: DiscoveryMethodKind, phase: EventPhase) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((method, phase));
    }
}
