// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The static Gatekeeper manifests and the plan of what to apply and delete.

pub mod args;
pub mod render;

use crate::error::{OperatorError, Result};
use crate::types::Gatekeeper;
use kube::api::DynamicObject;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, instrument};

pub use render::{render, RenderOptions};

/// File names of the static assets, one object per file.
pub mod assets {
    pub const NAMESPACE: &str = "v1_namespace_gatekeeper-system.yaml";
    pub const ASSIGN_CRD: &str =
        "apiextensions.k8s.io_v1_customresourcedefinition_assign.mutations.gatekeeper.sh.yaml";
    pub const ASSIGN_METADATA_CRD: &str =
        "apiextensions.k8s.io_v1_customresourcedefinition_assignmetadata.mutations.gatekeeper.sh.yaml";
    pub const MUTATOR_POD_STATUS_CRD: &str =
        "apiextensions.k8s.io_v1_customresourcedefinition_mutatorpodstatuses.status.gatekeeper.sh.yaml";
    pub const MODIFY_SET_CRD: &str =
        "apiextensions.k8s.io_v1_customresourcedefinition_modifyset.mutations.gatekeeper.sh.yaml";
    pub const PROVIDER_CRD: &str =
        "apiextensions.k8s.io_v1_customresourcedefinition_providers.externaldata.gatekeeper.sh.yaml";
    pub const AUDIT_DEPLOYMENT: &str = "apps_v1_deployment_gatekeeper-audit.yaml";
    pub const WEBHOOK_DEPLOYMENT: &str = "apps_v1_deployment_gatekeeper-controller-manager.yaml";
    pub const CLUSTER_ROLE: &str = "rbac.authorization.k8s.io_v1_clusterrole_gatekeeper-manager-role.yaml";
    pub const CLUSTER_ROLE_BINDING: &str =
        "rbac.authorization.k8s.io_v1_clusterrolebinding_gatekeeper-manager-rolebinding.yaml";
    pub const ROLE: &str = "rbac.authorization.k8s.io_v1_role_gatekeeper-manager-role.yaml";
    pub const ROLE_BINDING: &str =
        "rbac.authorization.k8s.io_v1_rolebinding_gatekeeper-manager-rolebinding.yaml";
    pub const SERVER_CERT: &str = "v1_secret_gatekeeper-webhook-server-cert.yaml";
    pub const SERVICE: &str = "v1_service_gatekeeper-webhook-service.yaml";
    pub const VALIDATING_WEBHOOK_CONFIGURATION: &str = "admissionregistration.k8s.io_v1_validatingwebhookconfiguration_gatekeeper-validating-webhook-configuration.yaml";
    pub const MUTATING_WEBHOOK_CONFIGURATION: &str = "admissionregistration.k8s.io_v1_mutatingwebhookconfiguration_gatekeeper-mutating-webhook-configuration.yaml";

    /// Applied first, in this order
    pub const ORDERED: &[&str] = &[
        NAMESPACE,
        "v1_resourcequota_gatekeeper-critical-pods.yaml",
        "apiextensions.k8s.io_v1_customresourcedefinition_configs.config.gatekeeper.sh.yaml",
        "apiextensions.k8s.io_v1_customresourcedefinition_constrainttemplates.templates.gatekeeper.sh.yaml",
        "apiextensions.k8s.io_v1_customresourcedefinition_constrainttemplatepodstatuses.status.gatekeeper.sh.yaml",
        "apiextensions.k8s.io_v1_customresourcedefinition_constraintpodstatuses.status.gatekeeper.sh.yaml",
        "apiextensions.k8s.io_v1_customresourcedefinition_expansiontemplate.expansion.gatekeeper.sh.yaml",
        "apiextensions.k8s.io_v1_customresourcedefinition_expansiontemplatepodstatuses.status.gatekeeper.sh.yaml",
        "apiextensions.k8s.io_v1_customresourcedefinition_assignimage.mutations.gatekeeper.sh.yaml",
        "apiextensions.k8s.io_v1_customresourcedefinition_syncsets.syncset.gatekeeper.sh.yaml",
        MODIFY_SET_CRD,
        PROVIDER_CRD,
        ASSIGN_CRD,
        ASSIGN_METADATA_CRD,
        MUTATOR_POD_STATUS_CRD,
        "v1_serviceaccount_gatekeeper-admin.yaml",
        "policy_v1_poddisruptionbudget_gatekeeper-controller-manager.yaml",
        CLUSTER_ROLE,
        CLUSTER_ROLE_BINDING,
        ROLE,
        ROLE_BINDING,
        AUDIT_DEPLOYMENT,
        WEBHOOK_DEPLOYMENT,
        SERVICE,
    ];

    /// Applied after the ordered assets, once the deployment state is known
    pub const WEBHOOK_CONFIGURATIONS: &[&str] =
        &[VALIDATING_WEBHOOK_CONFIGURATION, MUTATING_WEBHOOK_CONFIGURATION];

    pub const MUTATING_CRDS: &[&str] = &[ASSIGN_CRD, ASSIGN_METADATA_CRD, MUTATOR_POD_STATUS_CRD];

    /// Every asset that must be present in the manifest directory
    pub fn all() -> impl Iterator<Item = &'static str> {
        ORDERED
            .iter()
            .chain(WEBHOOK_CONFIGURATIONS)
            .chain(std::iter::once(&SERVER_CERT))
            .copied()
    }

    #[cfg(test)]
    pub(crate) fn is_crd(asset: &str) -> bool {
        asset.starts_with("apiextensions.k8s.io_v1_customresourcedefinition_")
    }
}

/// Names of objects and webhooks inside the assets
pub mod names {
    pub const AUDIT_DEPLOYMENT: &str = "gatekeeper-audit";
    pub const WEBHOOK_DEPLOYMENT: &str = "gatekeeper-controller-manager";
    pub const MANAGER_CONTAINER: &str = "manager";

    pub const VALIDATION_WEBHOOK: &str = "validation.gatekeeper.sh";
    pub const CHECK_IGNORE_LABEL_WEBHOOK: &str = "check-ignore-label.gatekeeper.sh";
    pub const MUTATION_WEBHOOK: &str = "mutation.gatekeeper.sh";
}

/// The parsed static assets, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct Manifests {
    objects: HashMap<String, DynamicObject>,
}

impl Manifests {
    /// Read every asset from `dir`. A missing or unparsable file is an error.
    #[instrument]
    pub fn load(dir: &Path) -> Result<Self> {
        let mut documents = Vec::new();
        for asset in assets::all() {
            let path = dir.join(asset);
            let yaml = std::fs::read_to_string(&path).map_err(|e| {
                OperatorError::Manifest(format!("failed to read {}: {}", path.display(), e))
            })?;
            documents.push((asset.to_string(), yaml));
        }
        let manifests = Self::from_documents(documents)?;
        debug!("Loaded {} manifests", manifests.objects.len());
        Ok(manifests)
    }

    pub fn from_documents<I, N, Y>(documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, Y)>,
        N: Into<String>,
        Y: AsRef<str>,
    {
        let mut objects = HashMap::new();
        for (asset, yaml) in documents {
            let asset = asset.into();
            let object: DynamicObject = serde_yaml::from_str(yaml.as_ref())
                .map_err(|e| OperatorError::Manifest(format!("failed to parse {}: {}", asset, e)))?;
            objects.insert(asset, object);
        }
        Ok(Self { objects })
    }

    /// A fresh copy of the asset's object, ready to be rendered.
    pub fn get(&self, asset: &str) -> Result<DynamicObject> {
        self.objects
            .get(asset)
            .cloned()
            .ok_or_else(|| OperatorError::Manifest(format!("unknown asset {}", asset)))
    }
}

/// Which assets to apply and delete for a given Gatekeeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPlan {
    pub delete_webhooks: Vec<&'static str>,
    pub apply_ordered: Vec<&'static str>,
    pub apply_webhooks: Vec<&'static str>,
    pub delete_crds: Vec<&'static str>,
}

impl AssetPlan {
    pub fn for_spec(gatekeeper: &Gatekeeper) -> Self {
        let mut plan = AssetPlan {
            delete_webhooks: Vec::new(),
            apply_ordered: assets::ORDERED.to_vec(),
            apply_webhooks: assets::WEBHOOK_CONFIGURATIONS.to_vec(),
            delete_crds: Vec::new(),
        };

        if !gatekeeper.validating_webhook_enabled() {
            plan.delete_webhooks
                .push(assets::VALIDATING_WEBHOOK_CONFIGURATION);
            plan.apply_webhooks
                .retain(|a| *a != assets::VALIDATING_WEBHOOK_CONFIGURATION);
        }

        if !gatekeeper.mutating_webhook_enabled() {
            plan.delete_webhooks
                .push(assets::MUTATING_WEBHOOK_CONFIGURATION);
            plan.apply_ordered
                .retain(|a| !assets::MUTATING_CRDS.contains(a));
            plan.apply_webhooks
                .retain(|a| *a != assets::MUTATING_WEBHOOK_CONFIGURATION);
            plan.delete_crds.extend_from_slice(assets::MUTATING_CRDS);
        }

        plan.apply_ordered.push(assets::SERVER_CERT);
        plan
    }
}
