// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The session/connection registry (§3, §5). Mirrors the discipline of
//! this crate's existing `client::pool_sessions::Pool` — an owned
//! collection of `Arc`-shared session records — but protected by a single
//! `tokio::sync::RwLock` rather than a `DashMap`, because the discovery
//! reconciler's scan-then-mutate operations (§4.3) need the whole list
//! held consistent across a multi-step traversal, not just per-key
//! atomicity.

use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::discovery::types::DiscoveryMethodKind;

/// One TCP connection within a session, to a single target portal.
#[derive(Debug, Clone, Copy)]
pub struct Connection {
    pub base_addr: std::net::SocketAddr,
}

/// One discovery-core session record, uniquely identified by
/// `(target_name, discovered_by, discovered_addr, isid_slot)` (Invariant 1,
/// §3). `sess_discovered_by` is typed as [`DiscoveryMethodKind`] rather
/// than the `DiscoveryMethod` bitflags set, so "zero or multiple methods"
/// is unrepresentable (Invariant 2, §3).
#[derive(Debug)]
pub struct Session {
    pub oid: u32,
    pub target_name: String,
    pub discovered_by: DiscoveryMethodKind,
    pub discovered_addr: std::net::SocketAddr,
    pub isid_slot: u32,
    pub tpgt: u16,
    /// Interior mutability only for the connection list itself; every
    /// caller reaching this field already holds the registry's write
    /// guard, so this is bookkeeping rather than a second layer of
    /// mutual exclusion.
    connections: Mutex<Vec<Connection>>,
}

impl Session {
    fn new(
        oid: u32,
        target_name: String,
        discovered_by: DiscoveryMethodKind,
        discovered_addr: std::net::SocketAddr,
        isid_slot: u32,
        tpgt: u16,
    ) -> Self {
        Session {
            oid,
            target_name,
            discovered_by,
            discovered_addr,
            isid_slot,
            tpgt,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Base address of this session's first ("active") connection, if any.
    /// Used by the reconciler's `del` predicate for `Static`-method matches
    /// (§4.3, §9c — an inherited quirk, not a deliberate design choice).
    pub fn active_connection_addr(&self) -> Option<std::net::SocketAddr> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .first()
            .map(|c| c.base_addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn has_connection(&self, addr: std::net::SocketAddr) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|c| c.base_addr == addr)
    }

    fn push_connection(&self, addr: std::net::SocketAddr) {
        let mut conns = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        if !conns.iter().any(|c| c.base_addr == addr) {
            conns.push(Connection { base_addr: addr });
        }
    }
}

/// The session registry: an async RW-locked `Vec` of `Arc<Session>`
/// (§5 "Shared-resource discipline"). All traversal requires at least the
/// read lock; all create/destroy/field-write requires the write lock —
/// there is no API on this type that mutates without a write guard.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<Vec<Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: RwLock::new(Vec::new()),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Session>>> {
        self.sessions.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Session>>> {
        self.sessions.write().await
    }

    /// Find an existing session matching the invariant tuple, or create and
    /// insert a new one carrying `oid` — the identifier `HbaOps::sess_create`
    /// already assigned downstream, not one the registry mints itself. Must
    /// be called with the write guard already held by the caller (the
    /// reconciler), so it takes the guard's `&mut Vec` directly rather than
    /// re-acquiring the lock.
    ///
    /// `oid` is passed in, not generated here: the registry's own identity
    /// tuple `(target_name, discovered_by, discovered_addr, isid_slot)` is a
    /// superset of `HbaOps`'s dedup key, so two distinct registry sessions
    /// can legitimately share the same downstream oid (e.g. the same target
    /// discovered by two different SendTargets addresses). Minting oids
    /// independently here would desynchronize them from the oid
    /// `sess_destroy`/`sess_online` must be called with.
    pub fn create_or_find_session<'a>(
        sessions: &'a mut Vec<Arc<Session>>,
        oid: u32,
        target_name: &str,
        discovered_by: DiscoveryMethodKind,
        discovered_addr: std::net::SocketAddr,
        isid_slot: u32,
        tpgt: u16,
    ) -> Arc<Session> {
        if let Some(existing) = sessions.iter().find(|s| {
            s.target_name == target_name
                && s.discovered_by == discovered_by
                && s.discovered_addr == discovered_addr
                && s.isid_slot == isid_slot
        }) {
            return existing.clone();
        }
        let sess = Arc::new(Session::new(
            oid,
            target_name.to_owned(),
            discovered_by,
            discovered_addr,
            isid_slot,
            tpgt,
        ));
        sessions.push(sess.clone());
        sess
    }

    /// Find or record a connection to `target_addr` on `session`. Creation
    /// of the downstream connection itself is the caller's (reconciler's)
    /// responsibility via `HbaOps::conn_create`; this only updates the
    /// registry's bookkeeping once that succeeds.
    pub fn record_connection(session: &Arc<Session>, target_addr: std::net::SocketAddr) {
        session.push_connection(target_addr);
    }

    /// Remove a session by oid. Returns `true` if a session was removed.
    pub fn remove(sessions: &mut Vec<Arc<Session>>, oid: u32) -> bool {
        let before = sessions.len();
        sessions.retain(|s| s.oid != oid);
        sessions.len() != before
    }
}
