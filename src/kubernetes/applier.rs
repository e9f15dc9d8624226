// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Create-or-replace of rendered manifests.

use crate::error::{OperatorError, Result};
use crate::kubernetes::ownership::add_owner_reference;
use crate::kubernetes::unstructured::{get_nested_field, get_nested_str, set_nested_field};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DeleteParams, DynamicObject, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, Scope};
use kube::{Api, Client, ResourceExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

/// Applies and deletes untyped objects, resolving each kind through
/// discovery once.
pub struct ManifestApplier {
    client: Client,
    resolved: Mutex<HashMap<GroupVersionKind, (ApiResource, Scope)>>,
}

impl ManifestApplier {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Create `desired` if it does not exist, otherwise replace it while
    /// keeping the fields the cluster fills in. Everything except a
    /// Namespace gets `owner` as controller reference.
    #[instrument(skip(self, desired, owner), fields(object = %desired.name_any()))]
    pub async fn apply(&self, mut desired: DynamicObject, owner: &OwnerReference) -> Result<()> {
        let gvk = gvk_of(&desired)?;
        let api = self.api_for(&gvk, &desired).await?;
        let name = desired.name_any();

        if gvk.kind != "Namespace" {
            add_owner_reference(&mut desired.metadata, owner.clone());
        }

        match api.get_opt(&name).await? {
            None => {
                api.create(&PostParams::default(), &desired).await?;
                info!("Created {} {}", gvk.kind, name);
            }
            Some(current) => {
                retain_cluster_fields(&gvk.kind, &current, &mut desired)?;
                api.replace(&name, &PostParams::default(), &desired).await?;
                debug!("Updated {} {}", gvk.kind, name);
            }
        }
        Ok(())
    }

    /// Delete `obj`, treating an already absent object as success.
    #[instrument(skip(self, obj), fields(object = %obj.name_any()))]
    pub async fn delete(&self, obj: &DynamicObject) -> Result<()> {
        let gvk = gvk_of(obj)?;
        let api = self.api_for(&gvk, obj).await?;

        match api.delete(&obj.name_any(), &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted {} {}", gvk.kind, obj.name_any());
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn api_for(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<Api<DynamicObject>> {
        let (resource, scope) = self.resolve(gvk).await?;
        match scope {
            Scope::Cluster => Ok(Api::all_with(self.client.clone(), &resource)),
            Scope::Namespaced => {
                let namespace = obj.namespace().ok_or_else(|| {
                    OperatorError::Manifest(format!(
                        "namespaced {} {} has no namespace",
                        gvk.kind,
                        obj.name_any()
                    ))
                })?;
                Ok(Api::namespaced_with(self.client.clone(), &namespace, &resource))
            }
        }
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, Scope)> {
        if let Some(found) = self.lock().get(gvk) {
            return Ok(found.clone());
        }

        let (resource, capabilities) = discovery::pinned_kind(&self.client, gvk).await?;
        let found = (resource, capabilities.scope);
        self.lock().insert(gvk.clone(), found.clone());
        Ok(found)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<GroupVersionKind, (ApiResource, Scope)>> {
        // The map stays consistent even if a holder panicked
        self.resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let types = obj.types.as_ref().ok_or_else(|| {
        OperatorError::Manifest(format!("{} has no apiVersion or kind", obj.name_any()))
    })?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Copy the fields the cluster owns from `current` into `desired`, so a
/// replace does not wipe them.
pub fn retain_cluster_fields(kind: &str, current: &DynamicObject, desired: &mut DynamicObject) -> Result<()> {
    desired.metadata.resource_version = current.metadata.resource_version.clone();

    match kind {
        "Service" => {
            for field in ["clusterIP", "clusterIPs"] {
                if let Some(value) = get_nested_field(&current.data, &["spec", field])? {
                    set_nested_field(&mut desired.data, &["spec", field], value.clone())?;
                }
            }
        }
        "Secret" => {
            if let Some(data) = current.data.get("data") {
                set_nested_field(&mut desired.data, &["data"], data.clone())?;
            }
        }
        "ValidatingWebhookConfiguration" | "MutatingWebhookConfiguration" => {
            retain_ca_bundles(current, desired)?;
        }
        _ => {}
    }
    Ok(())
}

fn retain_ca_bundles(current: &DynamicObject, desired: &mut DynamicObject) -> Result<()> {
    let mut bundles = HashMap::new();
    if let Some(Value::Array(webhooks)) = current.data.get("webhooks") {
        for webhook in webhooks {
            let name = get_nested_str(webhook, &["name"])?;
            let bundle = get_nested_field(webhook, &["clientConfig", "caBundle"])?;
            if let (Some(name), Some(bundle)) = (name, bundle) {
                bundles.insert(name.to_string(), bundle.clone());
            }
        }
    }

    if let Some(Value::Array(webhooks)) = desired.data.get_mut("webhooks") {
        for webhook in webhooks.iter_mut() {
            let bundle = get_nested_str(webhook, &["name"])?.and_then(|name| bundles.get(name).cloned());
            if let Some(bundle) = bundle {
                set_nested_field(webhook, &["clientConfig", "caBundle"], bundle)?;
            }
        }
    }
    Ok(())
}
