// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::constants::DEFAULT_NAMESPACE;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the Gatekeeper deployment is installed into
    pub namespace: String,
    /// Directory holding the static Gatekeeper manifests
    pub manifest_dir: PathBuf,
    /// Overrides the image of the manager containers when set
    pub image: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let namespace = env::var("GATEKEEPER_TARGET_NAMESPACE")
            .or_else(|_| env::var("POD_NAMESPACE"))
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());

        let manifest_dir = env::var("MANIFEST_DIR").unwrap_or_else(|_| "/manifests".to_string());
        let manifest_dir = PathBuf::from(manifest_dir);
        if !manifest_dir.is_dir() {
            return Err(anyhow::anyhow!("{} is not a directory", manifest_dir.display()))
                .context("MANIFEST_DIR must point at the Gatekeeper manifests");
        }

        // Unset in dev setups, where the manifests' own image is used
        let image = env::var("RELATED_IMAGE_GATEKEEPER")
            .ok()
            .filter(|i| !i.is_empty());

        Ok(Config {
            namespace,
            manifest_dir,
            image,
        })
    }
}
