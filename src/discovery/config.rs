// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Discovery-core configuration (§9a). A standalone, `serde_yaml`-backed
//! document following the exact `#[serde(rename = "...")]`,
//! PascalCase-wire-key convention of `cfg::config::Config` — but kept as
//! its own top-level document rather than nested as a new field group
//! inside `Config`, since `Config` here is this crate's single-session
//! login/operational document and the discovery core's configuration
//! (method list, static targets, per-name overrides, ...) is a distinct
//! concern with its own lifecycle (see `DESIGN.md`).

use std::{collections::HashMap, fs, net::SocketAddr, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::discovery::types::{LoginParamValues, ParamOverride, StaticTargetEntry};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(rename = "InitiatorName", skip_serializing_if = "Option::is_none", default)]
    pub initiator_name: Option<String>,

    #[serde(rename = "InitiatorAlias", skip_serializing_if = "Option::is_none", default)]
    pub initiator_alias: Option<String>,

    #[serde(rename = "DiscoveryMethods", default)]
    pub discovery_methods: Vec<DiscoveryMethodName>,

    #[serde(rename = "StaticTargets", default)]
    pub static_targets: Vec<StaticTargetConfig>,

    #[serde(rename = "SendTargetsAddresses", default)]
    pub send_targets_addresses: Vec<SocketAddr>,

    #[serde(rename = "IsnsServers", default)]
    pub isns_servers: Vec<SocketAddr>,

    #[serde(rename = "ConfiguredSessions", default)]
    pub configured_sessions: HashMap<String, ConfiguredSessionConfig>,

    #[serde(rename = "ParamOverrides", default)]
    pub param_overrides: HashMap<String, ParamOverrideConfig>,

    #[serde(rename = "Chap", default)]
    pub chap: HashMap<String, ChapRecordConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum DiscoveryMethodName {
    Static,
    SendTargets,
    Isns,
    Slp,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticTargetConfig {
    #[serde(rename = "TargetName")]
    pub target_name: String,
    #[serde(rename = "Address")]
    pub address: SocketAddr,
    #[serde(rename = "TargetPortalGroupTag", default)]
    pub tpgt: u16,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ConfiguredSessionConfig {
    #[serde(rename = "Count")]
    pub count: u32,
    #[serde(rename = "Bound", default = "default_bound")]
    pub bound: bool,
}

fn default_bound() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ParamOverrideConfig {
    #[serde(rename = "Bitmap", default)]
    pub bitmap: u32,
    #[serde(rename = "Values", default)]
    pub values: LoginParamValuesConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoginParamValuesConfig {
    #[serde(rename = "DataSequenceInOrder", default)]
    pub data_sequence_in_order: bool,
    #[serde(rename = "ImmediateData", default)]
    pub immediate_data: bool,
    #[serde(rename = "InitialR2T", default)]
    pub initial_r2t: bool,
    #[serde(rename = "DataPduInOrder", default)]
    pub data_pdu_in_order: bool,
    #[serde(rename = "HeaderDigest", default)]
    pub header_digest: u32,
    #[serde(rename = "DataDigest", default)]
    pub data_digest: u32,
    #[serde(rename = "DefaultTime2Retain", default)]
    pub default_time_to_retain: u32,
    #[serde(rename = "DefaultTime2Wait", default)]
    pub default_time_to_wait: u32,
    #[serde(rename = "MaxRecvDataSegmentLength", default)]
    pub max_recv_data_seg_len: u32,
    #[serde(rename = "FirstBurstLength", default)]
    pub first_burst_length: u32,
    #[serde(rename = "MaxBurstLength", default)]
    pub max_burst_length: u32,
}

impl From<LoginParamValuesConfig> for LoginParamValues {
    fn from(v: LoginParamValuesConfig) -> Self {
        LoginParamValues {
            immediate_data: v.immediate_data,
            initial_r2t: v.initial_r2t,
            // `DataSequenceInOrder` and `DataPduInOrder` collapse onto the
            // same underlying field (§4.6 quirk, preserved verbatim):
            // either wire key being set is enough.
            data_pdu_in_order: v.data_pdu_in_order || v.data_sequence_in_order,
            header_digest: v.header_digest,
            data_digest: v.data_digest,
            default_time_to_retain: v.default_time_to_retain,
            default_time_to_wait: v.default_time_to_wait,
            max_recv_data_seg_len: v.max_recv_data_seg_len,
            first_burst_length: v.first_burst_length,
            max_burst_length: v.max_burst_length,
        }
    }
}

impl From<ParamOverrideConfig> for ParamOverride {
    fn from(v: ParamOverrideConfig) -> Self {
        ParamOverride {
            bitmap: v.bitmap,
            params: v.values.into(),
        }
    }
}

impl From<StaticTargetConfig> for StaticTargetEntry {
    fn from(v: StaticTargetConfig) -> Self {
        StaticTargetEntry {
            target_name: v.target_name,
            addr: v.address,
            tpgt: v.tpgt,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChapRecordConfig {
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Secret", skip_serializing_if = "Option::is_none", default)]
    pub secret: Option<String>,
}

impl DiscoveryConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: DiscoveryConfig =
            serde_yaml::from_str(&s).context("failed to parse discovery config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = serde_yaml::to_string(self).context("failed to serialize discovery config")?;
        fs::write(path, s).context("failed to write discovery config")?;
        Ok(())
    }

    pub fn validate_and_normalize(&mut self) -> Result<()> {
        for (name, session) in &self.configured_sessions {
            ensure!(
                session.count >= 1,
                "ConfiguredSessions[{name}].Count must be >= 1"
            );
        }
        Ok(())
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            initiator_name: None,
            initiator_alias: None,
            discovery_methods: Vec::new(),
            static_targets: Vec::new(),
            send_targets_addresses: Vec::new(),
            isns_servers: Vec::new(),
            configured_sessions: HashMap::new(),
            param_overrides: HashMap::new(),
            chap: HashMap::new(),
        }
    }
}
