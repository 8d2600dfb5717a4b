// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The reconciler (§4.3): idempotent insert/remove of sessions into the
//! registry, and the `login_tgt` decision policy.

use std::net::SocketAddr;

use crate::discovery::{
    collaborators::{HbaOps, PersistentStore},
    registry::SessionRegistry,
    types::{ConfiguredSession, DiscoveryMethod, DiscoveryMethodKind},
};

/// Insert sessions (and their connections) for one discovered target.
///
/// Idempotent: calling this twice with identical arguments leaves the
/// registry in the same state as calling it once (§4.3, §8).
pub async fn add(
    registry: &SessionRegistry,
    store: &dyn PersistentStore,
    hba: &dyn HbaOps,
    method: DiscoveryMethodKind,
    disc_addr: SocketAddr,
    target_name: &str,
    tpgt: u16,
    target_addr: SocketAddr,
) -> Result<bool, String> {
    let configured = lookup_configured_session(store, target_name).await;

    let mut sessions = registry.write().await;
    for isid_slot in 0..configured.count {
        // §7 error kind 4: a sess_create/conn_create failure aborts this
        // add with Ok(false), not an Err — the worker logs and continues
        // with the next discovered target, it does not treat this as fatal.
        //
        // The downstream oid is minted by `hba.sess_create`, not by the
        // registry: `del`/`login_tgt` call `sess_destroy`/`sess_online`
        // with `Session.oid`, so it must be the same identifier the HBA
        // bridge actually knows the session by, not an independent counter
        // that only coincides with it by accident.
        let oid = match hba
            .sess_create(method, disc_addr, target_name, tpgt, isid_slot)
            .await
        {
            Ok(oid) => oid,
            Err(reason) => {
                tracing::warn!(
                    target: "iscsi::discovery",
                    target_name,
                    %reason,
                    "reconcile_add: sess_create failed"
                );
                return Ok(false);
            },
        };

        if let Err(reason) = hba.conn_create(oid, target_addr).await {
            tracing::warn!(
                target: "iscsi::discovery",
                target_name,
                %reason,
                "reconcile_add: conn_create failed"
            );
            return Ok(false);
        }

        let sess = SessionRegistry::create_or_find_session(
            &mut sessions,
            oid,
            target_name,
            method,
            disc_addr,
            isid_slot,
            tpgt,
        );
        SessionRegistry::record_connection(&sess, target_addr);
    }

    Ok(true)
}

/// Look up the configured-session record: by `target_name`, else by the
/// initiator name (the store's own fallback key), else the `{1, true}`
/// default (§4.3 step 1, §7 error kind 3 — "never an error").
async fn lookup_configured_session(
    store: &dyn PersistentStore,
    target_name: &str,
) -> ConfiguredSession {
    if let Some(c) = store.configured_session(target_name).await {
        return c;
    }
    if let Some(initiator_name) = store.initiator_name_get().await {
        if let Some(c) = store.configured_session(&initiator_name).await {
            return c;
        }
    }
    ConfiguredSession::default()
}

/// Remove sessions matching the given filter. Restarts the scan from the
/// head after every successful destroy (the original's
/// destroy-reshapes-the-list behavior, preserved verbatim per §9b/§9c even
/// though a `Vec::retain` pass would suffice); on a destroy failure,
/// continues with the *next* session rather than restarting.
pub async fn del(
    registry: &SessionRegistry,
    hba: &dyn HbaOps,
    target_name: Option<&str>,
    method: DiscoveryMethodKind,
    disc_addr: Option<SocketAddr>,
) -> bool {
    let mut overall_ok = true;
    let mut sessions = registry.write().await;

    let mut idx = 0usize;
    'scan: loop {
        while idx < sessions.len() {
            let candidate = sessions[idx].clone();
            if !matches_del_predicate(&candidate, target_name, method, disc_addr) {
                idx += 1;
                continue;
            }

            match hba.sess_destroy(candidate.oid).await {
                Ok(()) => {
                    SessionRegistry::remove(&mut sessions, candidate.oid);
                    idx = 0;
                    continue 'scan;
                },
                Err(reason) => {
                    tracing::warn!(
                        target: "iscsi::discovery",
                        oid = candidate.oid,
                        %reason,
                        "reconcile_del: sess_destroy failed, continuing with next session"
                    );
                    overall_ok = false;
                    idx += 1;
                },
            }
        }
        break;
    }

    overall_ok
}

fn matches_del_predicate(
    session: &crate::discovery::registry::Session,
    target_name: Option<&str>,
    method: DiscoveryMethodKind,
    disc_addr: Option<SocketAddr>,
) -> bool {
    if let Some(name) = target_name {
        if session.target_name != name {
            return false;
        }
    }
    if session.discovered_by != method {
        return false;
    }
    match method {
        DiscoveryMethodKind::Isns | DiscoveryMethodKind::SendTargets => match disc_addr {
            None => true,
            Some(addr) => session.discovered_addr == addr,
        },
        // Inherited quirk (§9c, open question, preserved as-is): Static
        // matches against the session's active connection address, not
        // sess_discovered_addr.
        DiscoveryMethodKind::Static => match disc_addr {
            None => true,
            Some(addr) => session.active_connection_addr() == Some(addr),
        },
        DiscoveryMethodKind::Slp => true,
    }
}

/// Decide, per session, whether to request login (`HbaOps::sess_online`).
/// Returns `true` if at least one session was attempted.
///
/// Decision table (spec.md §4.3, reproduced verbatim): a session is a
/// candidate when `target_name` is `None` or matches, AND `method` is
/// `None` (the old `Unknown`-as-"all" sentinel) or the session's
/// `discovered_by` bit is set in it, AND `disc_addr` is `None` or matches
/// `sess_discovered_addr`.
pub async fn login_tgt(
    registry: &SessionRegistry,
    hba: &dyn HbaOps,
    target_name: Option<&str>,
    method: Option<DiscoveryMethod>,
    disc_addr: Option<SocketAddr>,
) -> bool {
    let sessions = registry.write().await;
    let mut attempted = false;

    for sess in sessions.iter() {
        if try_online(sess, target_name, method, disc_addr) {
            hba.sess_online(sess.oid).await;
            attempted = true;
        }
    }

    attempted
}

/// The `try_online` decision table of spec.md §4.3, reproduced verbatim.
/// When `target_name` is given, method and address are irrelevant — only
/// name equality decides. Only when `target_name` is `None` do method and
/// (for iSNS/SendTargets only) address come into play.
fn try_online(
    sess: &crate::discovery::registry::Session,
    target_name: Option<&str>,
    method: Option<DiscoveryMethod>,
    disc_addr: Option<SocketAddr>,
) -> bool {
    if let Some(name) = target_name {
        return sess.target_name == name;
    }
    let Some(mask) = method else {
        return true;
    };
    if !mask.contains(sess.discovered_by.bit()) {
        return false;
    }
    match sess.discovered_by {
        DiscoveryMethodKind::Isns | DiscoveryMethodKind::SendTargets => match disc_addr {
            None => true,
            Some(addr) => addr == sess.discovered_addr,
        },
        _ => true,
    }
}
