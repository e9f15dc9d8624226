// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::constants::defaults;

/// Gatekeeper's own Config resource. Only `match` and `sync.syncOnly` are
/// managed here; every other field round-trips through `extra`.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "config.gatekeeper.sh",
    version = "v1alpha1",
    kind = "Config",
    root = "ConfigResource",
    namespaced,
    schema = "disabled"
)]
pub struct ConfigSpec {
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<MatchEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSpec>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_only: Vec<SyncOnlyEntry>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A resource type Gatekeeper should mirror into its cache
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncOnlyEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

impl SyncOnlyEntry {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<String>,
}

impl MatchEntry {
    /// Namespaces every Gatekeeper process leaves alone unless told otherwise
    pub fn default_exemptions() -> Self {
        Self {
            excluded_namespaces: defaults::EXCLUDED_NAMESPACES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            processes: defaults::PROCESSES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ConfigResource {
    pub fn sync_only(&self) -> &[SyncOnlyEntry] {
        self.spec
            .sync
            .as_ref()
            .map(|s| s.sync_only.as_slice())
            .unwrap_or_default()
    }

    pub fn set_sync_only(&mut self, entries: Vec<SyncOnlyEntry>) {
        self.spec.sync.get_or_insert_with(SyncSpec::default).sync_only = entries;
    }
}
