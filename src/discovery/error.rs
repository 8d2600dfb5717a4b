// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Typed errors for the discovery core. `thiserror` is used here the same
//! way the rest of this crate uses it for protocol-level status types
//! (e.g. `login::status`) — callers that care can match on the variant;
//! everything else just propagates via `anyhow`.

use thiserror::Error;

/// Failure of [`crate::discovery::params::param_copy`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParamCopyError {
    #[error("param_id {0} is not a settable login parameter")]
    Invalid(u32),
}

/// Fatal bootstrap / `DiscoveryService::init` failure (error taxonomy
/// kind 7). `init` still emits synthetic START+END events for every
/// method before propagating this. Every `PersistentStore` accessor used
/// by bootstrap currently reports "no record" as `None` rather than as a
/// fallible operation, so none of these variants are reachable through
/// the bundled `YamlStore`/`FakeStore`; the type stays in the return
/// position so a `PersistentStore` backed by a fallible medium (a remote
/// config service, say) has somewhere to put its error without changing
/// `DiscoveryService::init`'s signature.
#[derive(Debug, Error)]
pub enum DiscoveryInitError {
    #[error("persistent store initialization failed: {0}")]
    StoreInit(String),

    #[error("initiator configuration bootstrap failed: {0}")]
    ConfigBootstrap(String),

    #[error("target bootstrap failed: {0}")]
    TargetBootstrap(String),
}
