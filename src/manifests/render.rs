// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Overlay of a Gatekeeper's settings onto the static assets.

use crate::constants::DEFAULT_NAMESPACE;
use crate::error::{OperatorError, Result};
use crate::kubernetes::unstructured::{get_nested_str, get_nested_string_slice, set_nested_field};
use crate::manifests::args::{set_arg, unset_arg};
use crate::manifests::{assets, names};
use crate::types::gatekeeper::{
    AuditConfig, AuditFromCacheMode, ContainerArgument, LogLevel, Mode, Operation, WebhookConfig,
};
use crate::types::Gatekeeper;
use kube::api::DynamicObject;
use serde_json::{json, Value};
use tracing::info;

/// User container arguments that would break the deployment and are never applied
const ARG_DENY_LIST: &[&str] = &[
    "port",
    "prometheus-port",
    "health-addr",
    "validating-webhook-configuration-name",
    "mutating-webhook-configuration-name",
    "disable-cert-rotation",
    "client-cert-name",
    "tls-min-version",
];

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions<'a> {
    pub namespace: &'a str,
    pub image: Option<&'a str>,
    /// The controller manager is not fully ready, so webhooks must not block
    pub deployment_pending: bool,
}

/// Apply every override that concerns `asset` to its template object.
pub fn render(
    asset: &str,
    mut obj: DynamicObject,
    gatekeeper: &Gatekeeper,
    opts: &RenderOptions<'_>,
) -> Result<DynamicObject> {
    if asset == assets::NAMESPACE {
        obj.metadata.name = Some(opts.namespace.to_string());
        return Ok(obj);
    }

    if obj.metadata.namespace.as_deref().is_some_and(|ns| !ns.is_empty()) {
        obj.metadata.namespace = Some(opts.namespace.to_string());
    }

    let spec = &gatekeeper.spec;
    match asset {
        assets::AUDIT_DEPLOYMENT => {
            deployment_overrides(&mut obj, gatekeeper, opts)?;
            if let Some(audit) = &spec.audit {
                audit_overrides(&mut obj.data, audit)?;
            }
        }
        assets::WEBHOOK_DEPLOYMENT => {
            set_container_arg(&mut obj.data, "--exempt-namespace", opts.namespace)?;
            deployment_overrides(&mut obj, gatekeeper, opts)?;
            if let Some(webhook) = &spec.webhook {
                webhook_overrides(&mut obj.data, webhook)?;
            }
        }
        assets::VALIDATING_WEBHOOK_CONFIGURATION => {
            set_client_config_namespace(&mut obj.data, opts.namespace)?;
            let webhook = spec.webhook.as_ref();
            webhook_configuration_overrides(&mut obj.data, webhook, opts, names::VALIDATION_WEBHOOK, true)?;
            webhook_configuration_overrides(
                &mut obj.data,
                webhook,
                opts,
                names::CHECK_IGNORE_LABEL_WEBHOOK,
                false,
            )?;
        }
        assets::MUTATING_WEBHOOK_CONFIGURATION => {
            set_client_config_namespace(&mut obj.data, opts.namespace)?;
            webhook_configuration_overrides(
                &mut obj.data,
                spec.webhook.as_ref(),
                opts,
                names::MUTATION_WEBHOOK,
                true,
            )?;
        }
        assets::CLUSTER_ROLE_BINDING | assets::ROLE_BINDING => {
            set_subject_namespace(&mut obj.data, opts.namespace)?;
        }
        _ => {}
    }

    Ok(obj)
}

fn deployment_overrides(
    obj: &mut DynamicObject,
    gatekeeper: &Gatekeeper,
    opts: &RenderOptions<'_>,
) -> Result<()> {
    let spec = &gatekeeper.spec;
    let data = &mut obj.data;

    if let Some(affinity) = &spec.affinity {
        set_nested_field(data, &["spec", "template", "spec", "affinity"], affinity.clone())?;
    }
    if let Some(node_selector) = &spec.node_selector {
        set_nested_field(data, &["spec", "template", "spec", "nodeSelector"], json!(node_selector))?;
    }
    if let Some(annotations) = &spec.pod_annotations {
        set_nested_field(data, &["spec", "template", "metadata", "annotations"], json!(annotations))?;
    }
    if let Some(tolerations) = &spec.tolerations {
        set_nested_field(data, &["spec", "template", "spec", "tolerations"], json!(tolerations))?;
    }

    let pull_policy = spec.image.as_ref().and_then(|i| i.image_pull_policy.as_deref());
    with_manager_container(data, |container| {
        if let Some(image) = opts.image {
            set_nested_field(container, &["image"], json!(image))?;
        }
        if let Some(policy) = pull_policy {
            set_nested_field(container, &["imagePullPolicy"], json!(policy))?;
        }
        Ok(())
    })?;

    let operation = match obj.metadata.name.as_deref() {
        Some(names::AUDIT_DEPLOYMENT) => "mutation-status",
        Some(names::WEBHOOK_DEPLOYMENT) => "mutation-webhook",
        _ => return Ok(()),
    };
    if gatekeeper.mutating_webhook_enabled() {
        set_container_arg(data, "--operation", operation)
    } else {
        unset_container_arg(data, "--operation", operation)
    }
}

/// Settings shared by the audit and webhook sections.
struct CommonConfig<'a> {
    replicas: Option<i32>,
    resources: Option<&'a Value>,
    log_level: Option<LogLevel>,
    container_arguments: &'a [ContainerArgument],
}

fn common_config_overrides(data: &mut Value, config: CommonConfig<'_>) -> Result<()> {
    if let Some(replicas) = config.replicas {
        set_nested_field(data, &["spec", "replicas"], json!(replicas))?;
    }
    if let Some(resources) = config.resources {
        with_manager_container(data, |container| {
            set_nested_field(container, &["resources"], resources.clone())
        })?;
    }
    if let Some(level) = config.log_level {
        set_container_arg(data, "--log-level", level.as_str())?;
    }

    // May be given more than once for additional backends
    set_container_arg(data, "--metrics-backend", "prometheus")?;

    for arg in config.container_arguments {
        if ARG_DENY_LIST.contains(&arg.name.as_str()) {
            info!("Argument --{} is deny listed and won't be applied", arg.name);
            continue;
        }
        set_container_arg(data, &format!("--{}", arg.name), &arg.value)?;
    }
    Ok(())
}

fn audit_overrides(data: &mut Value, audit: &AuditConfig) -> Result<()> {
    if let Some(interval) = audit.audit_interval {
        set_container_arg(data, "--audit-interval", &interval.to_string())?;
    }
    if let Some(limit) = audit.constraint_violation_limit {
        set_container_arg(data, "--constraint-violations-limit", &limit.to_string())?;
    }
    if let Some(mode) = audit.audit_from_cache {
        let from_cache = matches!(mode, AuditFromCacheMode::Enabled | AuditFromCacheMode::Automatic);
        set_container_arg(data, "--audit-from-cache", if from_cache { "true" } else { "false" })?;
    }
    if let Some(size) = audit.audit_chunk_size {
        set_container_arg(data, "--audit-chunk-size", &size.to_string())?;
    }
    if let Some(emit) = audit.emit_audit_events {
        set_container_arg(data, "--emit-audit-events", emit.to_bool_string())?;
    }
    if let Some(involved) = audit.audit_events_involved_namespace {
        set_container_arg(data, "--audit-events-involved-namespace", involved.to_bool_string())?;
    }

    common_config_overrides(
        data,
        CommonConfig {
            replicas: audit.replicas,
            resources: audit.resources.as_ref(),
            log_level: audit.log_level,
            container_arguments: &audit.container_arguments,
        },
    )
}

fn webhook_overrides(data: &mut Value, webhook: &WebhookConfig) -> Result<()> {
    if let Some(emit) = webhook.emit_admission_events {
        set_container_arg(data, "--emit-admission-events", emit.to_bool_string())?;
    }
    if let Some(involved) = webhook.admission_events_involved_namespace {
        set_container_arg(data, "--admission-events-involved-namespace", involved.to_bool_string())?;
    }
    for builtin in &webhook.disabled_builtins {
        set_container_arg(data, "--disable-opa-builtin", builtin)?;
    }

    // These default to off and are only ever switched on
    for (flag, mode) in [
        ("--log-mutations", webhook.log_mutations),
        ("--mutation-annotations", webhook.mutation_annotations),
        ("--log-denies", webhook.log_denies),
    ] {
        if let Some(Mode::Enabled) = mode {
            set_container_arg(data, flag, Mode::Enabled.to_bool_string())?;
        }
    }

    common_config_overrides(
        data,
        CommonConfig {
            replicas: webhook.replicas,
            resources: webhook.resources.as_ref(),
            log_level: webhook.log_level,
            container_arguments: &webhook.container_arguments,
        },
    )
}

fn webhook_configuration_overrides(
    data: &mut Value,
    webhook: Option<&WebhookConfig>,
    opts: &RenderOptions<'_>,
    webhook_name: &str,
    update_failure_policy: bool,
) -> Result<()> {
    if opts.deployment_pending {
        with_webhook(data, webhook_name, |hook| {
            set_nested_field(hook, &["failurePolicy"], json!("Ignore"))
        })?;
    }

    let Some(webhook) = webhook else {
        return set_namespace_selector(data, None, opts.namespace, webhook_name);
    };

    if update_failure_policy && !opts.deployment_pending {
        if let Some(policy) = webhook.failure_policy {
            with_webhook(data, webhook_name, |hook| {
                set_nested_field(hook, &["failurePolicy"], json!(policy.as_str()))
            })?;
        }
    }
    if let Some(operations) = &webhook.operations {
        set_operations(data, operations, webhook_name)?;
    }
    set_namespace_selector(data, webhook.namespace_selector.as_ref(), opts.namespace, webhook_name)
}

/// Use `selector` for the webhook if given, otherwise point the template's
/// selector at `namespace` instead of the default one.
fn set_namespace_selector(
    data: &mut Value,
    selector: Option<&Value>,
    namespace: &str,
    webhook_name: &str,
) -> Result<()> {
    with_webhook(data, webhook_name, |hook| {
        if let Some(selector) = selector {
            return set_nested_field(hook, &["namespaceSelector"], selector.clone());
        }

        let Some(Value::Array(expressions)) = hook.pointer_mut("/namespaceSelector/matchExpressions")
        else {
            return Ok(());
        };
        for expression in expressions {
            if let Some(Value::Array(values)) = expression.get_mut("values") {
                for value in values.iter_mut() {
                    if value.as_str() == Some(DEFAULT_NAMESPACE) {
                        *value = json!(namespace);
                    }
                }
            }
        }
        Ok(())
    })
}

fn set_operations(data: &mut Value, operations: &[Operation], webhook_name: &str) -> Result<()> {
    let operations: Vec<&str> = operations.iter().map(|op| op.as_str()).collect();
    with_webhook(data, webhook_name, |hook| {
        if let Some(Value::Array(rules)) = hook.get_mut("rules") {
            for rule in rules.iter_mut() {
                set_nested_field(rule, &["operations"], json!(operations))?;
            }
        }
        Ok(())
    })
}

fn set_client_config_namespace(data: &mut Value, namespace: &str) -> Result<()> {
    for hook in webhooks_mut(data)? {
        set_nested_field(hook, &["clientConfig", "service", "namespace"], json!(namespace))?;
    }
    Ok(())
}

fn set_subject_namespace(data: &mut Value, namespace: &str) -> Result<()> {
    let Some(Value::Array(subjects)) = data.get_mut("subjects") else {
        return Err(OperatorError::Manifest("role binding has no subjects".to_string()));
    };
    for subject in subjects.iter_mut() {
        set_nested_field(subject, &["namespace"], json!(namespace))?;
    }
    Ok(())
}

fn webhooks_mut(data: &mut Value) -> Result<&mut Vec<Value>> {
    match data.get_mut("webhooks") {
        Some(Value::Array(webhooks)) => Ok(webhooks),
        _ => Err(OperatorError::Manifest(
            "webhook configuration has no webhooks".to_string(),
        )),
    }
}

fn with_webhook<F>(data: &mut Value, name: &str, mut f: F) -> Result<()>
where
    F: FnMut(&mut Value) -> Result<()>,
{
    for hook in webhooks_mut(data)? {
        if get_nested_str(hook, &["name"])? == Some(name) {
            f(hook)?;
        }
    }
    Ok(())
}

fn with_manager_container<F>(data: &mut Value, mut f: F) -> Result<()>
where
    F: FnMut(&mut Value) -> Result<()>,
{
    let Some(Value::Array(containers)) = data.pointer_mut("/spec/template/spec/containers") else {
        return Err(OperatorError::Manifest("deployment has no containers".to_string()));
    };
    for container in containers.iter_mut() {
        if get_nested_str(container, &["name"])? == Some(names::MANAGER_CONTAINER) {
            f(container)?;
        }
    }
    Ok(())
}

fn update_container_args<F>(data: &mut Value, mut f: F) -> Result<()>
where
    F: FnMut(&mut Vec<String>),
{
    with_manager_container(data, |container| {
        let mut args = get_nested_string_slice(container, &["args"])?.unwrap_or_default();
        f(&mut args);
        set_nested_field(container, &["args"], json!(args))
    })
}

fn set_container_arg(data: &mut Value, name: &str, value: &str) -> Result<()> {
    update_container_args(data, |args| set_arg(args, name, value))
}

fn unset_container_arg(data: &mut Value, name: &str, value: &str) -> Result<()> {
    update_container_args(data, |args| unset_arg(args, name, value))
}
