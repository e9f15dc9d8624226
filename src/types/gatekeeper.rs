// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::config::MatchEntry;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "operator.gatekeeper.sh", version = "v1alpha1", kind = "Gatekeeper")]
#[serde(rename_all = "camelCase")]
pub struct GatekeeperSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validating_webhook: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutating_webhook: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_annotations: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigOverrides>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    /// Deprecated, the image comes from the operator's environment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum Mode {
    Enabled,
    Disabled,
}

impl Mode {
    pub fn to_bool(self) -> bool {
        self == Mode::Enabled
    }

    pub fn to_bool_string(self) -> &'static str {
        if self.to_bool() {
            "true"
        } else {
            "false"
        }
    }
}

/// How the audit process sources the objects it evaluates
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum AuditFromCacheMode {
    Enabled,
    Disabled,
    /// Audit from cache, with the operator maintaining the sync list
    Automatic,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum FailurePolicy {
    Ignore,
    Fail,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::Ignore => "Ignore",
            FailurePolicy::Fail => "Fail",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum Operation {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "CONNECT")]
    Connect,
    #[serde(rename = "*")]
    All,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Connect => "CONNECT",
            Operation::All => "*",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
pub struct ContainerArgument {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Seconds between audit runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint_violation_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_from_cache: Option<AuditFromCacheMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_chunk_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emit_audit_events: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_events_involved_namespace: Option<Mode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_arguments: Vec<ContainerArgument>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emit_admission_events: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_events_involved_namespace: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<Operation>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_builtins: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_mutations: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation_annotations: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_denies: Option<Mode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_arguments: Vec<ContainerArgument>,
}

/// Overrides for the generated Config resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<MatchEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_default_matches: Option<bool>,
}

impl Gatekeeper {
    pub fn validating_webhook_enabled(&self) -> bool {
        self.spec.validating_webhook.map_or(true, Mode::to_bool)
    }

    pub fn mutating_webhook_enabled(&self) -> bool {
        self.spec.mutating_webhook.map_or(true, Mode::to_bool)
    }

    pub fn audit_from_cache(&self) -> Option<AuditFromCacheMode> {
        self.spec.audit.as_ref().and_then(|a| a.audit_from_cache)
    }

    /// Whether the operator should maintain the Config sync list itself
    pub fn audit_from_cache_automatic(&self) -> bool {
        self.audit_from_cache() == Some(AuditFromCacheMode::Automatic)
    }

    /// Match entries the Config resource should carry: the default
    /// exemptions first, unless disabled, followed by the user's entries.
    pub fn desired_matches(&self) -> Vec<MatchEntry> {
        let overrides = self.spec.config.as_ref();
        let disable_defaults = overrides
            .and_then(|c| c.disable_default_matches)
            .unwrap_or(false);

        let mut matches = Vec::new();
        if !disable_defaults {
            matches.push(MatchEntry::default_exemptions());
        }
        if let Some(config) = overrides {
            matches.extend(config.matches.iter().cloned());
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn make_gatekeeper(spec: GatekeeperSpec) -> Gatekeeper {
        Gatekeeper {
            metadata: ObjectMeta {
                name: Some("gatekeeper".to_string()),
                uid: Some("gk-uid".to_string()),
                ..Default::default()
            },
            spec,
        }
    }

    fn user_match() -> MatchEntry {
        MatchEntry {
            excluded_namespaces: vec!["team-a".to_string()],
            processes: vec!["audit".to_string()],
        }
    }

    #[test]
    fn test_webhooks_enabled_by_default() {
        let gk = make_gatekeeper(GatekeeperSpec::default());
        assert!(gk.validating_webhook_enabled());
        assert!(gk.mutating_webhook_enabled());
    }

    #[test]
    fn test_webhooks_disabled() {
        let gk = make_gatekeeper(GatekeeperSpec {
            validating_webhook: Some(Mode::Disabled),
            mutating_webhook: Some(Mode::Disabled),
            ..Default::default()
        });
        assert!(!gk.validating_webhook_enabled());
        assert!(!gk.mutating_webhook_enabled());
    }

    #[test]
    fn test_audit_from_cache_automatic() {
        let mut gk = make_gatekeeper(GatekeeperSpec::default());
        assert!(!gk.audit_from_cache_automatic());

        gk.spec.audit = Some(AuditConfig {
            audit_from_cache: Some(AuditFromCacheMode::Enabled),
            ..Default::default()
        });
        assert!(!gk.audit_from_cache_automatic());

        gk.spec.audit = Some(AuditConfig {
            audit_from_cache: Some(AuditFromCacheMode::Automatic),
            ..Default::default()
        });
        assert!(gk.audit_from_cache_automatic());
    }

    #[test]
    fn test_desired_matches_defaults_first() {
        let gk = make_gatekeeper(GatekeeperSpec {
            config: Some(ConfigOverrides {
                matches: vec![user_match()],
                disable_default_matches: None,
            }),
            ..Default::default()
        });

        let matches = gk.desired_matches();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0], MatchEntry::default_exemptions());
        assert_eq!(matches[1], user_match());
    }

    #[test]
    fn test_desired_matches_defaults_disabled() {
        let gk = make_gatekeeper(GatekeeperSpec {
            config: Some(ConfigOverrides {
                matches: vec![user_match()],
                disable_default_matches: Some(true),
            }),
            ..Default::default()
        });

        assert_eq!(gk.desired_matches(), vec![user_match()]);
    }

    #[test]
    fn test_desired_matches_without_overrides() {
        let gk = make_gatekeeper(GatekeeperSpec::default());
        assert_eq!(gk.desired_matches(), vec![MatchEntry::default_exemptions()]);
    }

    #[test]
    fn test_spec_deserializes_from_camel_case() {
        let spec: GatekeeperSpec = serde_json::from_value(serde_json::json!({
            "audit": {"auditFromCache": "Automatic", "logLevel": "DEBUG", "replicas": 2},
            "mutatingWebhook": "Disabled",
            "webhook": {"failurePolicy": "Fail", "operations": ["CREATE", "*"]}
        }))
        .unwrap();

        let audit = spec.audit.unwrap();
        assert_eq!(audit.audit_from_cache, Some(AuditFromCacheMode::Automatic));
        assert_eq!(audit.log_level, Some(LogLevel::Debug));
        assert_eq!(spec.mutating_webhook, Some(Mode::Disabled));
        let webhook = spec.webhook.unwrap();
        assert_eq!(webhook.failure_policy, Some(FailurePolicy::Fail));
        assert_eq!(webhook.operations, Some(vec![Operation::Create, Operation::All]));
    }
}
