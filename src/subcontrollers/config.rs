// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Config sub-controller - keeps the namespace exemptions of Gatekeeper's
//! Config resource in line with the Gatekeeper resource.

use crate::constants::timing::ERROR_REQUEUE;
use crate::constants::{CONFIG_NAME, GATEKEEPER_NAME};
use crate::error::{OperatorError, Result};
use crate::kubernetes::ownership::{add_owner_reference, Ownership};
use crate::subcontrollers::supervisor::Launcher;
use crate::types::{ConfigResource, ConfigSpec, Gatekeeper, MatchEntry};
use futures::{FutureExt, StreamExt, TryStreamExt};
use kube::api::PostParams;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, instrument, warn};

/// What has to happen to the `match` list of an existing Config.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchUpdate {
    /// The Config belongs to someone else and already has matches
    Skip,
    UpToDate,
    Update {
        matches: Vec<MatchEntry>,
        adopt: bool,
    },
}

pub fn plan_match_update(config: &ConfigResource, gatekeeper: &Gatekeeper) -> MatchUpdate {
    let uid = gatekeeper.uid().unwrap_or_default();
    let ownership = Ownership::of(&config.metadata, &uid);

    if !ownership.is_ours() && !config.spec.matches.is_empty() {
        return MatchUpdate::Skip;
    }

    let desired = gatekeeper.desired_matches();
    if ownership.is_ours() && config.spec.matches == desired {
        return MatchUpdate::UpToDate;
    }

    MatchUpdate::Update {
        matches: desired,
        adopt: !ownership.is_ours(),
    }
}

/// The Config the operator creates when none exists, owned by `gatekeeper`.
pub fn default_config(namespace: &str, gatekeeper: &Gatekeeper) -> Result<ConfigResource> {
    let owner = gatekeeper.owner_ref(&()).ok_or_else(|| {
        OperatorError::MalformedObject("Gatekeeper resource has no uid".to_string())
    })?;

    let mut config = ConfigResource::new(
        CONFIG_NAME,
        ConfigSpec {
            matches: gatekeeper.desired_matches(),
            ..Default::default()
        },
    );
    config.metadata.namespace = Some(namespace.to_string());
    config.metadata.owner_references = Some(vec![owner]);
    Ok(config)
}

/// Rewrite the `match` list of `config` when it is ours, or unclaimed and empty.
#[instrument(skip(api, config, gatekeeper), fields(config = %config.name_any()))]
pub async fn set_exempt_namespaces(
    api: &Api<ConfigResource>,
    config: &ConfigResource,
    gatekeeper: &Gatekeeper,
) -> Result<()> {
    let (matches, adopt) = match plan_match_update(config, gatekeeper) {
        MatchUpdate::Skip => {
            debug!("Config matches are managed by someone else, leaving them alone");
            return Ok(());
        }
        MatchUpdate::UpToDate => {
            debug!("Config matches are up to date");
            return Ok(());
        }
        MatchUpdate::Update { matches, adopt } => (matches, adopt),
    };

    let mut updated = config.clone();
    updated.spec.matches = matches;
    if adopt {
        if let Some(owner) = gatekeeper.owner_ref(&()) {
            add_owner_reference(&mut updated.metadata, owner);
        }
    }

    api.replace(CONFIG_NAME, &PostParams::default(), &updated)
        .await?;
    info!("Updated Config with excluded namespaces");
    Ok(())
}

/// Create the Config when it is missing, otherwise fix up its exemptions.
pub async fn ensure_config(client: &Client, namespace: &str, gatekeeper: &Gatekeeper) -> Result<()> {
    let api: Api<ConfigResource> = Api::namespaced(client.clone(), namespace);

    match api.get_opt(CONFIG_NAME).await? {
        Some(config) => set_exempt_namespaces(&api, &config, gatekeeper).await,
        None => {
            let config = default_config(namespace, gatekeeper)?;
            api.create(&PostParams::default(), &config).await?;
            info!("Created Config {}/{}", namespace, CONFIG_NAME);
            Ok(())
        }
    }
}

/// Watches the singleton Config and recreates or repairs it on every change.
#[derive(Clone)]
pub struct ConfigController {
    client: Client,
    namespace: String,
}

impl ConfigController {
    pub fn new(client: Client, namespace: String) -> Self {
        Self { client, namespace }
    }

    pub fn launcher(self) -> Launcher {
        Arc::new(move |token| self.clone().run(token).boxed())
    }

    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        let api: Api<ConfigResource> = Api::namespaced(self.client.clone(), &self.namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", CONFIG_NAME));
        let mut events = watcher::watcher(api, config).default_backoff().boxed();
        let mut retries: DelayQueue<()> = DelayQueue::new();

        info!("Config controller watching {}/{}", self.namespace, CONFIG_NAME);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Config controller shutting down");
                    return Ok(());
                }
                Some(_) = retries.next() => {
                    self.reconcile_or_retry(&mut retries).await;
                }
                event = events.try_next() => match event {
                    Ok(Some(Event::Apply(_) | Event::InitApply(_) | Event::Delete(_))) => {
                        self.reconcile_or_retry(&mut retries).await;
                    }
                    Ok(Some(Event::Init | Event::InitDone)) => {}
                    Ok(None) => return Err(anyhow::anyhow!("Config watch stream ended")),
                    Err(e) => warn!("Config watch error: {}", e),
                }
            }
        }
    }

    async fn reconcile_or_retry(&self, retries: &mut DelayQueue<()>) {
        retries.clear();
        if let Err(e) = self.reconcile().await {
            warn!(
                "Failed to reconcile Config, retrying in {}s: {}",
                ERROR_REQUEUE.as_secs(),
                e
            );
            retries.insert((), ERROR_REQUEUE);
        }
    }

    async fn reconcile(&self) -> Result<()> {
        let gatekeepers: Api<Gatekeeper> = Api::all(self.client.clone());
        let Some(gatekeeper) = gatekeepers.get_opt(GATEKEEPER_NAME).await? else {
            debug!("Gatekeeper {} does not exist", GATEKEEPER_NAME);
            return Ok(());
        };

        ensure_config(&self.client, &self.namespace, &gatekeeper).await
    }
}
