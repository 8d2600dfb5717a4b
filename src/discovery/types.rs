// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Data model for the discovery core: initiator identity, discovery
//! methods, and the shapes produced by each discovery mechanism.

use std::{fmt, net::SocketAddr};

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// The set of discovery methods that may be simultaneously enabled.
    ///
    /// The original C enum also carried an `Unknown` sentinel used both as
    /// "all methods" and as an array terminator. Neither meaning is
    /// representable here: "all methods" is `DiscoveryMethod::all()` and
    /// call sites that meant "no particular method" take `Option<DiscoveryMethod>`
    /// (`None` standing in for the old sentinel) instead of folding it into
    /// the flag type.
    #[derive(Default, PartialEq, Eq, Clone, Copy, Hash)]
    pub struct DiscoveryMethod: u8 {
        const STATIC       = 0b0001;
        const SEND_TARGETS = 0b0010;
        const ISNS         = 0b0100;
        const SLP          = 0b1000;
    }
}

impl fmt::Debug for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(DiscoveryMethod::STATIC) {
            parts.push("Static");
        }
        if self.contains(DiscoveryMethod::SEND_TARGETS) {
            parts.push("SendTargets");
        }
        if self.contains(DiscoveryMethod::ISNS) {
            parts.push("iSNS");
        }
        if self.contains(DiscoveryMethod::SLP) {
            parts.push("SLP");
        }
        if parts.is_empty() {
            write!(f, "<none>")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

/// A single discovery method, as opposed to [`DiscoveryMethod`] which is a
/// set of them. Every session's `sess_discovered_by` is exactly one of
/// these — the type itself rules out the "zero or multiple bits" states
/// that were only a documented invariant in the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryMethodKind {
    Static,
    SendTargets,
    Isns,
    Slp,
}

impl DiscoveryMethodKind {
    /// The four worker kinds, in the fixed order the original used for its
    /// `for_failure` synthetic-event table: Static, SLP, iSNS, SendTargets.
    pub const FAILURE_ORDER: [DiscoveryMethodKind; 4] = [
        DiscoveryMethodKind::Static,
        DiscoveryMethodKind::Slp,
        DiscoveryMethodKind::Isns,
        DiscoveryMethodKind::SendTargets,
    ];

    /// All four kinds in a stable, arbitrary order (used for iteration
    /// where ordering is not externally observable).
    pub const ALL: [DiscoveryMethodKind; 4] = [
        DiscoveryMethodKind::Static,
        DiscoveryMethodKind::SendTargets,
        DiscoveryMethodKind::Isns,
        DiscoveryMethodKind::Slp,
    ];

    pub fn bit(self) -> DiscoveryMethod {
        match self {
            DiscoveryMethodKind::Static => DiscoveryMethod::STATIC,
            DiscoveryMethodKind::SendTargets => DiscoveryMethod::SEND_TARGETS,
            DiscoveryMethodKind::Isns => DiscoveryMethod::ISNS,
            DiscoveryMethodKind::Slp => DiscoveryMethod::SLP,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DiscoveryMethodKind::Static => "Static",
            DiscoveryMethodKind::SendTargets => "SendTargets",
            DiscoveryMethodKind::Isns => "iSNS",
            DiscoveryMethodKind::Slp => "SLP",
        }
    }
}

impl fmt::Display for DiscoveryMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Phase of a discovery cycle, mirroring the original sysevent bus's
/// `STATIC_START`/`STATIC_END`-style subclasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Start,
    End,
}

/// Process-wide initiator identity: name, alias, ISID, and CHAP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatorIdentity {
    pub name: String,
    pub alias: Option<String>,
    pub isid: [u8; 6],
    pub chap_user: String,
    pub chap_secret: Option<String>,
}

/// A statically configured target entry from the persistent store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticTargetEntry {
    pub target_name: String,
    pub addr: SocketAddr,
    pub tpgt: u16,
}

/// A portal group entry yielded by an iSNS query.
#[derive(Debug, Clone)]
pub struct PortalGroupEntry {
    pub isns_server_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub target_name: String,
    pub tag: u16,
}

/// Result of an iSNS query: zero or more portal groups, plus whether the
/// query only partially succeeded (still treated as success for the
/// portion returned).
#[derive(Debug, Clone, Default)]
pub struct PortalGroupList {
    pub groups: Vec<PortalGroupEntry>,
    pub partially_failed: bool,
}

/// A single SendTargets response entry (one discovered target).
#[derive(Debug, Clone)]
pub struct SendTargetsEntry {
    pub target_name: String,
    pub target_addr: SocketAddr,
    pub tpgt: u16,
}

/// The SendTargets ioctl's response shape: how many entries the caller
/// asked for (`in_cnt`), how many the target actually reported
/// (`out_cnt`), and the entries that fit.
#[derive(Debug, Clone, Default)]
pub struct SendTargetsList {
    pub in_cnt: usize,
    pub out_cnt: usize,
    pub entries: Vec<SendTargetsEntry>,
}

/// Per-target (or per-initiator, as a fallback) configured session count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredSession {
    pub count: u32,
    pub bound: bool,
}

impl Default for ConfiguredSession {
    fn default() -> Self {
        ConfiguredSession {
            count: 1,
            bound: true,
        }
    }
}

/// A parameter override record: a bitmap of set parameters plus their
/// values, applied to sessions of one target (or the initiator itself).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamOverride {
    pub bitmap: u32,
    pub params: LoginParamValues,
}

/// The login-parameter values a [`ParamOverride`] may carry, indexed by
/// [`crate::discovery::params::ParamId`] bit position in `bitmap`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginParamValues {
    pub immediate_data: bool,
    pub initial_r2t: bool,
    pub data_pdu_in_order: bool,
    pub header_digest: u32,
    pub data_digest: u32,
    pub default_time_to_retain: u32,
    pub default_time_to_wait: u32,
    pub max_recv_data_seg_len: u32,
    pub first_burst_length: u32,
    pub max_burst_length: u32,
}

/// The value half of a successful [`crate::discovery::params::param_copy`]
/// call, echoing the `param_id` back to the caller as the original did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSetValue {
    Bool(bool),
    Integer(u32),
}

/// The kind of iSNS state-change-notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScnType {
    ObjAdded,
    ObjRemoved,
    ObjUpdated,
    ObjUnknown,
}

/// An owned SCN event handed to the callback. In the original this was a
/// heap-allocated argument whose ownership transferred to the callback and
/// had to be freed on every exit path; here it is simply consumed by value.
#[derive(Debug, Clone)]
pub struct ScnEvent {
    pub scn_type: ScnType,
    pub source_key_attr: String,
}
