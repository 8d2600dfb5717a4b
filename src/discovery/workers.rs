// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Discovery workers (§4.2): one long-lived task per method, sharing a
//! common wake/emit/gate envelope and differing only in `run_once`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::discovery::{
    collaborators::{EventSink, HbaOps, IsnsClient, PersistentStore, SendTargetsIoctl},
    reconciler,
    types::{DiscoveryMethodKind, InitiatorIdentity},
};

/// Number of target descriptors the initial SendTargets buffer can hold
/// before a retry is needed (§4.2.1).
const N_INITIAL: usize = 10;

/// Shared context handed to every worker body on each wake.
pub struct WorkerCtx {
    pub registry: Arc<crate::discovery::registry::SessionRegistry>,
    pub store: Arc<dyn PersistentStore>,
    pub hba: Arc<dyn HbaOps>,
    pub isns: Arc<dyn IsnsClient>,
    pub sendtargets: Arc<dyn SendTargetsIoctl>,
    pub events: Arc<dyn EventSink>,
    pub identity: InitiatorIdentity,
    /// Serializes the SendTargets ioctl per HBA (§4.2.1, §5).
    pub hba_sendtgts_semaphore: Semaphore,
}

/// The body of one discovery cycle for a single method. The wake/stop
/// envelope, START/END emission, and the enabled-mask gate are implemented
/// once in [`crate::discovery::coordination`] and are generic over this
/// trait (replacing the original's function-pointer worker table — §9b).
#[async_trait]
pub trait DiscoveryWorkerBody: Send + Sync {
    fn kind(&self) -> DiscoveryMethodKind;

    async fn run_once(&self, ctx: &WorkerCtx);
}

/// Enumerates the static-target list and inserts one session per entry.
/// Discovery-address and target-address are identical for static entries.
pub struct StaticWorker;

#[async_trait]
impl DiscoveryWorkerBody for StaticWorker {
    fn kind(&self) -> DiscoveryMethodKind {
        DiscoveryMethodKind::Static
    }

    async fn run_once(&self, ctx: &WorkerCtx) {
        let entries = ctx.store.static_targets().await;
        for entry in entries {
            if let Err(reason) = reconciler::add(
                &ctx.registry,
                ctx.store.as_ref(),
                ctx.hba.as_ref(),
                DiscoveryMethodKind::Static,
                entry.addr,
                &entry.target_name,
                entry.tpgt,
                entry.addr,
            )
            .await
            {
                tracing::warn!(
                    target: "iscsi::discovery",
                    target_name = %entry.target_name,
                    %reason,
                    "static worker: reconcile_add failed"
                );
            }
        }
    }
}

/// Enumerates configured SendTargets discovery addresses and issues the
/// SendTargets ioctl at each (§4.2.1).
pub struct SendTargetsWorker;

#[async_trait]
impl DiscoveryWorkerBody for SendTargetsWorker {
    fn kind(&self) -> DiscoveryMethodKind {
        DiscoveryMethodKind::SendTargets
    }

    async fn run_once(&self, ctx: &WorkerCtx) {
        let addrs = ctx.store.disc_addrs().await;
        for addr in addrs {
            do_sendtgts(ctx, addr).await;
        }
    }
}

async fn do_sendtgts(ctx: &WorkerCtx, addr: std::net::SocketAddr) {
    let _permit = match ctx.hba_sendtgts_semaphore.acquire().await {
        Ok(p) => p,
        Err(_) => return,
    };

    let mut capacity = N_INITIAL;
    let list = match ctx.sendtargets.get(addr, capacity).await {
        Ok(list) => list,
        Err(reason) => {
            tracing::warn!(target: "iscsi::discovery", %addr, %reason, "SendTargets ioctl failed");
            return;
        },
    };

    let list = if list.out_cnt > list.in_cnt {
        capacity = list.out_cnt;
        match ctx.sendtargets.get(addr, capacity).await {
            Ok(retried) if retried.out_cnt <= capacity => retried,
            Ok(_) => {
                tracing::warn!(
                    target: "iscsi::discovery",
                    %addr,
                    "SendTargets overflow persisted after retry, aborting this address"
                );
                return;
            },
            Err(reason) => {
                tracing::warn!(
                    target: "iscsi::discovery",
                    %addr,
                    %reason,
                    "SendTargets retry failed"
                );
                return;
            },
        }
    } else {
        list
    };

    for entry in list.entries {
        if let Err(reason) = reconciler::add(
            &ctx.registry,
            ctx.store.as_ref(),
            ctx.hba.as_ref(),
            DiscoveryMethodKind::SendTargets,
            addr,
            &entry.target_name,
            entry.tpgt,
            entry.target_addr,
        )
        .await
        {
            tracing::warn!(
                target: "iscsi::discovery",
                target_name = %entry.target_name,
                %reason,
                "SendTargets worker: reconcile_add failed"
            );
        }
    }
}

/// Registers with the iSNS client at the start of each cycle (installing
/// the SCN callback sink) and runs the full-server query (§4.2.2).
/// Deregisters when the worker is stopped.
pub struct IsnsWorker;

#[async_trait]
impl DiscoveryWorkerBody for IsnsWorker {
    fn kind(&self) -> DiscoveryMethodKind {
        DiscoveryMethodKind::Isns
    }

    async fn run_once(&self, ctx: &WorkerCtx) {
        ctx.isns.register(&ctx.identity).await;

        match ctx.isns.query_all(&ctx.identity).await {
            Ok(list) => apply_portal_groups(ctx, list).await,
            Err(reason) => {
                tracing::warn!(target: "iscsi::discovery", %reason, "iSNS query_all failed");
            },
        }
    }
}

async fn apply_portal_groups(ctx: &WorkerCtx, list: crate::discovery::types::PortalGroupList) {
    if list.partially_failed {
        tracing::debug!(
            target: "iscsi::discovery",
            "iSNS query partially failed; applying the portion returned"
        );
    }
    for group in list.groups {
        if let Err(reason) = reconciler::add(
            &ctx.registry,
            ctx.store.as_ref(),
            ctx.hba.as_ref(),
            DiscoveryMethodKind::Isns,
            group.isns_server_addr,
            &group.target_name,
            group.tag,
            group.target_addr,
        )
        .await
        {
            tracing::warn!(
                target: "iscsi::discovery",
                target_name = %group.target_name,
                %reason,
                "iSNS worker: reconcile_add failed"
            );
        }
    }
}

/// Stub worker (§4.2, Non-goal): satisfies the completion barrier without
/// performing any discovery.
pub struct SlpWorker;

#[async_trait]
impl DiscoveryWorkerBody for SlpWorker {
    fn kind(&self) -> DiscoveryMethodKind {
        DiscoveryMethodKind::Slp
    }

    async fn run_once(&self, _ctx: &WorkerCtx) {}
}
