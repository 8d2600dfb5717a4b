// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The iSCSI initiator discovery subsystem: four concurrent discovery
//! workers (Static, SendTargets, iSNS, an SLP stub), a session/connection
//! registry, an iSNS SCN notification path, and the reconciliation policy
//! that turns discovered targets into logged-in sessions.

/// One-shot initiator identity bootstrap and parameter-override push.
pub mod bootstrap;
/// External collaborator traits (`PersistentStore`, `HbaOps`,
/// `SendTargetsIoctl`, `IsnsClient`, `EventSink`).
pub mod collaborators;
/// Standalone discovery-core configuration document.
pub mod config;
/// The coordination layer: `DiscoveryService`.
pub mod coordination;
/// Typed errors for the discovery core.
pub mod error;
/// Production `HbaOps` bridge onto `client::pool_sessions::Pool`.
pub mod hba_pool;
/// Pure login-parameter-id mapping.
pub mod params;
/// Reconciler: `add`/`del`/`login_tgt`.
pub mod reconciler;
/// The session/connection registry.
pub mod registry;
/// iSNS state-change-notification handling.
pub mod scn;
/// The YAML-backed reference `PersistentStore`.
pub mod store_yaml;
/// In-memory test doubles for the collaborator traits.
pub mod testutil;
/// Data model: discovery methods, sessions, parameter records.
pub mod types;
/// Discovery worker bodies (Static, SendTargets, iSNS, SLP-stub).
pub mod workers;

pub use collaborators::{EventSink, HbaOps, IsnsClient, PersistentStore, SendTargetsIoctl};
pub use coordination::DiscoveryService;
pub use error::{DiscoveryInitError, ParamCopyError};
pub use types::{DiscoveryMethod, DiscoveryMethodKind};
