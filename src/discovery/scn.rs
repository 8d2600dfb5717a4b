// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! iSNS state-change-notification handling (§4.4). `ScnEvent` arrives as
//! an owned value — the original's heap-allocated, manually-freed
//! callback argument is naturally expressed here as a moved value with no
//! ownership bookkeeping (§9b).

use crate::discovery::{
    coordination::DiscoveryService,
    reconciler,
    types::{DiscoveryMethod, DiscoveryMethodKind, ScnEvent, ScnType},
};

pub async fn handle(service: &DiscoveryService, event: ScnEvent) {
    match event.scn_type {
        ScnType::ObjAdded => {
            let result = service
                .isns()
                .query_one_node(&event.source_key_attr, service.identity())
                .await;
            match result {
                Ok(list) => {
                    for group in &list.groups {
                        if let Err(reason) = reconciler::add(
                            service.registry(),
                            service.store(),
                            service.hba(),
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
                                "SCN ObjAdded: reconcile_add failed"
                            );
                        }
                        reconciler::login_tgt(
                            service.registry(),
                            service.hba(),
                            Some(&group.target_name),
                            Some(DiscoveryMethod::ISNS),
                            None,
                        )
                        .await;
                    }
                },
                Err(reason) => {
                    tracing::warn!(
                        target: "iscsi::discovery",
                        source_key_attr = %event.source_key_attr,
                        %reason,
                        "SCN ObjAdded: iSNS one-node query failed"
                    );
                },
            }
        },
        ScnType::ObjRemoved => {
            let ok = reconciler::del(
                service.registry(),
                service.hba(),
                Some(event.source_key_attr.as_str()),
                DiscoveryMethodKind::Isns,
                None,
            )
            .await;
            if !ok {
                tracing::warn!(
                    target: "iscsi::discovery",
                    source_key_attr = %event.source_key_attr,
                    "SCN ObjRemoved: reconcile_del reported at least one failure"
                );
            }
        },
        ScnType::ObjUpdated => {
            tracing::info!(
                target: "iscsi::discovery",
                source_key_attr = %event.source_key_attr,
                "SCN ObjUpdated (no action taken)"
            );
        },
        ScnType::ObjUnknown => {
            tracing::debug!(
                target: "iscsi::discovery",
                source_key_attr = %event.source_key_attr,
                "SCN event of unmapped/unknown type ignored"
            );
        },
    }
}
