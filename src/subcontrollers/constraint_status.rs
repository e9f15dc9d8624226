// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ConstraintPodStatus sub-controller - derives the Config sync list from
//! the constraints that audit is evaluating.
//!
//! Every audit status record points at one constraint. The constraint's
//! match kinds are resolved to sync entries through discovery and kept per
//! record; the deduplicated union of all records is written to the Config
//! whenever it differs from what is stored there.

use crate::constants::constraints::{
    AUDIT_OPERATION, GROUP, KIND_LABEL, NAME_LABEL, POD_STATUS_KIND, POD_STATUS_PLURAL,
    STATUS_GROUP, STATUS_VERSION, VERSION,
};
use crate::constants::timing::{DISCOVERY_MISS_RETRY, ERROR_REQUEUE};
use crate::constants::CONFIG_NAME;
use crate::error::Result;
use crate::kubernetes::unstructured::{get_nested_i64, get_nested_slice, get_nested_string_slice};
use crate::subcontrollers::supervisor::Launcher;
use crate::sync::{resolve_sync_only_entries, DiscoveryCache, DiscoverySource, SyncSet};
use crate::types::{ConfigResource, ConfigSpec};
use futures::{FutureExt, StreamExt, TryStreamExt};
use kube::api::{ApiResource, DynamicObject, PostParams};
use kube::core::GroupVersionKind;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, instrument, warn};

fn status_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(STATUS_GROUP, STATUS_VERSION, POD_STATUS_KIND),
        POD_STATUS_PLURAL,
    )
}

fn constraint_resource(kind: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(GROUP, VERSION, kind),
        &kind.to_lowercase(),
    )
}

/// Result of handling one status record.
#[derive(Debug, Default, PartialEq)]
pub struct RecordOutcome {
    /// The sync set changed and the Config may need a write
    pub changed: bool,
    /// Handle the record again after this delay
    pub retry_after: Option<Duration>,
}

impl RecordOutcome {
    fn changed(changed: bool) -> Self {
        Self {
            changed,
            retry_after: None,
        }
    }
}

/// The per-record sync entries and the discovery cache used to compute them.
/// Owned by a single task, so neither needs a lock.
pub struct ConstraintStatusSync<S> {
    client: Client,
    namespace: String,
    discovery: DiscoveryCache<S>,
    sync_set: SyncSet,
    observed_generations: HashMap<String, i64>,
}

impl<S: DiscoverySource> ConstraintStatusSync<S> {
    pub fn new(client: Client, namespace: String, discovery: DiscoveryCache<S>) -> Self {
        Self {
            client,
            namespace,
            discovery,
            sync_set: SyncSet::new(),
            observed_generations: HashMap::new(),
        }
    }

    /// Fold one status record into the sync set. Unless `force` is set, a
    /// record whose observed generation was already handled is skipped.
    #[instrument(skip(self, record), fields(record = %record.name_any()))]
    pub async fn apply_record(&mut self, record: &DynamicObject, force: bool) -> RecordOutcome {
        let name = record.name_any();

        let operations = match get_nested_string_slice(&record.data, &["status", "operations"]) {
            Ok(ops) => ops.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring status record with malformed operations: {}", e);
                return RecordOutcome::default();
            }
        };

        if !operations.iter().any(|op| op == AUDIT_OPERATION) {
            return RecordOutcome::changed(self.remove_record(&name));
        }

        let generation = get_nested_i64(&record.data, &["status", "observedGeneration"])
            .ok()
            .flatten()
            .unwrap_or_default();
        if !force
            && self.sync_set.contains_source(&name)
            && self.observed_generations.get(&name) == Some(&generation)
        {
            debug!("Generation {} already handled", generation);
            return RecordOutcome::default();
        }

        let labels = record.labels();
        let (Some(kind), Some(constraint_name)) = (labels.get(KIND_LABEL), labels.get(NAME_LABEL))
        else {
            warn!("Status record has no constraint labels, skipping");
            return RecordOutcome::default();
        };

        let constraints: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &constraint_resource(kind));
        let constraint = match constraints.get_opt(constraint_name).await {
            Ok(Some(constraint)) => constraint,
            Ok(None) => {
                info!("Constraint {} {} not found", kind, constraint_name);
                return RecordOutcome::changed(self.remove_record(&name));
            }
            Err(e) => {
                warn!("Failed to get constraint {} {}: {}", kind, constraint_name, e);
                return RecordOutcome {
                    changed: false,
                    retry_after: Some(ERROR_REQUEUE),
                };
            }
        };

        let match_kinds = match get_nested_slice(&constraint.data, &["spec", "match", "kinds"]) {
            Ok(kinds) => kinds.cloned().unwrap_or_default(),
            Err(e) => {
                warn!("Constraint {} {} has malformed match kinds: {}", kind, constraint_name, e);
                return RecordOutcome::default();
            }
        };

        let resolution = resolve_sync_only_entries(&mut self.discovery, &match_kinds).await;
        let changed = self.sync_set.update_source(&name, resolution.entries);

        let retry_after = match resolution.error {
            None => {
                self.observed_generations.insert(name, generation);
                None
            }
            Some(e) if e.is_not_found_discovery() => {
                info!(
                    "Some kinds of {} {} are not served yet, retrying in {}s: {}",
                    kind,
                    constraint_name,
                    DISCOVERY_MISS_RETRY.as_secs(),
                    e
                );
                Some(DISCOVERY_MISS_RETRY)
            }
            Some(e) => {
                warn!("Failed to resolve sync entries for {} {}: {}", kind, constraint_name, e);
                Some(ERROR_REQUEUE)
            }
        };

        RecordOutcome {
            changed,
            retry_after,
        }
    }

    /// Forget a status record. Returns whether the sync set changed.
    pub fn remove_record(&mut self, name: &str) -> bool {
        self.observed_generations.remove(name);
        self.sync_set.remove_source(name)
    }

    /// Forget every record not in `live`. Returns whether the sync set changed.
    pub fn prune(&mut self, live: &HashSet<String>) -> bool {
        self.observed_generations.retain(|name, _| live.contains(name));
        let pruned = self.sync_set.retain_sources(live);
        if pruned > 0 {
            info!("Pruned {} status records that no longer exist", pruned);
        }
        pruned > 0
    }

    /// Store the union of all records in the Config, creating it if needed.
    /// Returns whether a write happened.
    pub async fn write_sync_only(&self) -> Result<bool> {
        let api: Api<ConfigResource> = Api::namespaced(self.client.clone(), &self.namespace);
        let union = self.sync_set.union();

        match api.get_opt(CONFIG_NAME).await? {
            Some(mut config) => {
                if config.sync_only() == union.as_slice() {
                    debug!("Config sync list is up to date");
                    return Ok(false);
                }
                config.set_sync_only(union);
                api.replace(CONFIG_NAME, &PostParams::default(), &config)
                    .await?;
            }
            None => {
                let mut config = ConfigResource::new(CONFIG_NAME, ConfigSpec::default());
                config.metadata.namespace = Some(self.namespace.clone());
                config.set_sync_only(union);
                api.create(&PostParams::default(), &config).await?;
            }
        }

        info!("Updated Config sync list");
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Retry {
    Record(String),
    Write,
}

/// Delayed work, at most one pending entry per item.
#[derive(Default)]
struct RetryQueue {
    queue: DelayQueue<Retry>,
    keys: HashMap<Retry, delay_queue::Key>,
}

impl RetryQueue {
    fn schedule(&mut self, item: Retry, delay: Duration) {
        match self.keys.get(&item) {
            Some(key) => self.queue.reset(key, delay),
            None => {
                let key = self.queue.insert(item.clone(), delay);
                self.keys.insert(item, key);
            }
        }
    }

    fn cancel(&mut self, item: &Retry) {
        if let Some(key) = self.keys.remove(item) {
            self.queue.remove(&key);
        }
    }

    async fn next(&mut self) -> Option<Retry> {
        let expired = self.queue.next().await?;
        let item = expired.into_inner();
        self.keys.remove(&item);
        Some(item)
    }
}

/// Runs a [`ConstraintStatusSync`] against a watch of the status records.
#[derive(Clone)]
pub struct ConstraintStatusController {
    client: Client,
    namespace: String,
}

impl ConstraintStatusController {
    pub fn new(client: Client, namespace: String) -> Self {
        Self { client, namespace }
    }

    pub fn launcher(self) -> Launcher {
        Arc::new(move |token| self.clone().run(token).boxed())
    }

    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        let records: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &status_resource());
        let mut events = watcher::watcher(records.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        let mut sync = ConstraintStatusSync::new(
            self.client.clone(),
            self.namespace.clone(),
            DiscoveryCache::new(self.client.clone()),
        );
        let mut retries = RetryQueue::default();
        let mut listing: Option<HashSet<String>> = None;
        let mut dirty = false;

        info!("ConstraintPodStatus controller watching namespace {}", self.namespace);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("ConstraintPodStatus controller shutting down");
                    return Ok(());
                }
                Some(retry) = retries.next() => match retry {
                    Retry::Write => dirty = true,
                    Retry::Record(name) => match records.get_opt(&name).await {
                        Ok(Some(record)) => {
                            let outcome = sync.apply_record(&record, true).await;
                            dirty |= outcome.changed;
                            if let Some(delay) = outcome.retry_after {
                                retries.schedule(Retry::Record(name), delay);
                            }
                        }
                        Ok(None) => dirty |= sync.remove_record(&name),
                        Err(e) => {
                            warn!("Failed to get status record {}: {}", name, e);
                            retries.schedule(Retry::Record(name), ERROR_REQUEUE);
                        }
                    },
                },
                event = events.try_next() => match event {
                    Ok(Some(Event::Init)) => listing = Some(HashSet::new()),
                    Ok(Some(Event::InitApply(record))) => {
                        if let Some(seen) = listing.as_mut() {
                            seen.insert(record.name_any());
                        }
                        dirty |= handle_record(&mut sync, &mut retries, &record).await;
                    }
                    Ok(Some(Event::InitDone)) => {
                        if let Some(seen) = listing.take() {
                            sync.prune(&seen);
                        }
                        // Always compare after a listing, the stored list may be stale
                        dirty = true;
                    }
                    Ok(Some(Event::Apply(record))) => {
                        dirty |= handle_record(&mut sync, &mut retries, &record).await;
                    }
                    Ok(Some(Event::Delete(record))) => {
                        let name = record.name_any();
                        retries.cancel(&Retry::Record(name.clone()));
                        dirty |= sync.remove_record(&name);
                    }
                    Ok(None) => {
                        return Err(anyhow::anyhow!("ConstraintPodStatus watch stream ended"))
                    }
                    Err(e) => warn!("ConstraintPodStatus watch error: {}", e),
                }
            }

            // Writes wait for a listing to finish so it lands as one update
            if dirty && listing.is_none() {
                match sync.write_sync_only().await {
                    Ok(_) => {
                        dirty = false;
                        retries.cancel(&Retry::Write);
                    }
                    Err(e) => {
                        warn!("Failed to update the Config sync list: {}", e);
                        retries.schedule(Retry::Write, ERROR_REQUEUE);
                    }
                }
            }
        }
    }
}

async fn handle_record<S: DiscoverySource>(
    sync: &mut ConstraintStatusSync<S>,
    retries: &mut RetryQueue,
    record: &DynamicObject,
) -> bool {
    let outcome = sync.apply_record(record, false).await;
    let item = Retry::Record(record.name_any());
    match outcome.retry_after {
        Some(delay) => retries.schedule(item, delay),
        None => retries.cancel(&item),
    }
    outcome.changed
}
