// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use kube::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper_operator::config::Config;
use gatekeeper_operator::constants::crd;
use gatekeeper_operator::kubernetes::wait_for_crd;
use gatekeeper_operator::manifests::Manifests;
use gatekeeper_operator::reconcilers::GatekeeperReconciler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Gatekeeper operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: namespace={}, manifest_dir={}",
        config.namespace,
        config.manifest_dir.display()
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Wait for the Gatekeeper CRD before starting the reconciler
    info!("Waiting for Gatekeeper CRD to become available...");
    wait_for_crd(&client, crd::GATEKEEPER).await?;

    // Static assets are read once, a broken bundle is fatal
    let manifests = Manifests::load(&config.manifest_dir)
        .with_context(|| format!("loading manifests from {}", config.manifest_dir.display()))?;

    let reconciler = GatekeeperReconciler::new(client, config, manifests);

    info!("Starting reconciler...");
    reconciler.run().await?;

    // This should never be reached as the reconciler runs forever
    warn!("Gatekeeper reconciler stopped unexpectedly");
    Ok(())
}
