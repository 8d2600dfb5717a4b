// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! One-shot initiator bootstrap (§4.5): load or synthesize the initiator
//! identity, then push persisted per-name login-parameter overrides to the
//! downstream login engine.

use crate::discovery::{
    collaborators::{HbaOps, PersistentStore},
    error::DiscoveryInitError,
    params::param_copy,
    types::InitiatorIdentity,
};

/// Runs bootstrap and returns the resolved initiator identity. Any failure
/// is a **fatal bootstrap failure** (§7 kind 7); the caller
/// (`DiscoveryService::init`) is responsible for still emitting synthetic
/// START+END events before propagating the error.
pub async fn run(
    store: &dyn PersistentStore,
    hba: &dyn HbaOps,
) -> Result<InitiatorIdentity, DiscoveryInitError> {
    let identity = load_or_synthesize_identity(store).await;

    // Step 3: the per-initiator override record.
    for (name, overrides) in store.param_overrides().await {
        if name == identity.name {
            push_overrides(hba, &name, &overrides).await;
        }
    }
    // Step 4: every per-target override whose name is not the initiator.
    for (name, overrides) in store.param_overrides().await {
        if name != identity.name {
            push_overrides(hba, &name, &overrides).await;
        }
    }

    Ok(identity)
}

async fn load_or_synthesize_identity(store: &dyn PersistentStore) -> InitiatorIdentity {
    let name = match store.initiator_name_get().await {
        Some(name) => name,
        None => {
            let name = synthesize_default_iqn();
            store.initiator_name_set(&name).await;
            name
        },
    };

    let alias = match store.alias_name_get().await {
        Some(alias) => Some(alias),
        None => {
            let alias = hostname_alias();
            store.alias_name_set(&alias).await;
            Some(alias)
        },
    };

    let (chap_user, chap_secret) = match store.chap_get(&name).await {
        Some((user, secret)) => (user, secret),
        None => {
            store.chap_set(&name, &name, None).await;
            (name.clone(), None)
        },
    };

    InitiatorIdentity {
        name,
        alias,
        isid: crate::utils::generate_isid().0,
        chap_user,
        chap_secret,
    }
}

/// Push every override bit set in `overrides`' bitmap to
/// `HbaOps::set_login_param`, resolved against the targetparam oid for
/// `name` (the initiator name, for the initiator-scoped record, or a
/// target name otherwise — both resolve through the same
/// `targetparam_get_oid` collaborator call).
async fn push_overrides(
    hba: &dyn HbaOps,
    name: &str,
    overrides: &crate::discovery::types::ParamOverride,
) {
    let oid = hba.targetparam_get_oid(name).await;
    for param_id in 0..32u32 {
        if overrides.bitmap & (1 << param_id) == 0 {
            continue;
        }
        match param_copy(param_id, &overrides.params) {
            Ok(value) => hba.set_login_param(oid, value, param_id).await,
            Err(reason) => {
                tracing::warn!(
                    target: "iscsi::discovery",
                    name,
                    param_id,
                    %reason,
                    "bootstrap: parameter override ignored"
                );
            },
        }
    }
}

/// Synthesize a default IQN of the form
/// `iqn.1986-03.com.sun:01:<MAC-hex>.<timestamp-hex>` when no initiator
/// name has been persisted yet (§4.5 step 1). MAC sourcing is resolved in
/// §9c: the first non-loopback `/sys/class/net` interface, falling back to
/// a randomly-generated locally-administered MAC on platforms/sandboxes
/// without one.
fn synthesize_default_iqn() -> String {
    let mac = first_interface_mac().unwrap_or_else(random_locally_administered_mac);
    let mac_hex = mac.iter().map(|b| format!("{b:02x}")).collect::<String>();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("iqn.1986-03.com.sun:01:{mac_hex}.{timestamp:x}")
}

fn first_interface_mac() -> Option<[u8; 6]> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name == "lo" {
            continue;
        }
        let addr_path = entry.path().join("address");
        if let Ok(contents) = std::fs::read_to_string(&addr_path) {
            if let Some(mac) = parse_mac(contents.trim()) {
                return Some(mac);
            }
        }
    }
    None
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = text.split(':');
    for slot in &mut out {
        *slot = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

fn random_locally_administered_mac() -> [u8; 6] {
    use rand::Rng;
    let mut mac = [0u8; 6];
    rand::rng().fill(&mut mac);
    // Set the locally-administered bit, clear the multicast bit.
    mac[0] = (mac[0] | 0x02) & 0xfe;
    mac
}

fn hostname_alias() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}
