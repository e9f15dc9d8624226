// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::Result;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Wait for a CRD to be accepted by the API server.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_crd(client: &Client, name: &str) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match crd_names_accepted(client, name).await {
            Ok(true) => {
                info!("CRD {} is available", name);
                return Ok(());
            }
            Ok(false) => {
                info!(
                    "CRD {} not yet available, waiting {} seconds...",
                    name, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for CRD {}: {}, retrying in {} seconds...",
                    name, e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// Check whether the named CRD exists and reports `NamesAccepted=True`.
#[instrument(skip(client))]
pub async fn crd_names_accepted(client: &Client, name: &str) -> Result<bool> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());

    match crds.get(name).await {
        Ok(crd) => Ok(names_accepted(&crd)),
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!("CRD {} does not exist", name);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn names_accepted(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "NamesAccepted" && c.status == "True")
        })
}
