// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Time-bounded cache of the cluster's preferred API resources.
//!
//! Constraints name a group and a kind but never a version, so every sync
//! entry needs a discovery lookup. The cache answers from memory while it is
//! younger than its TTL and refreshes at most once more per lookup when a
//! kind is missing, which covers CRDs installed after the last refresh.

use crate::constants::timing::DISCOVERY_TTL;
use crate::error::{OperatorError, Result};
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Something that can list the preferred version of every served resource.
pub trait DiscoverySource: Send + Sync {
    fn preferred_resources(&self) -> impl Future<Output = Result<Vec<ApiResource>>> + Send;
}

impl DiscoverySource for Client {
    async fn preferred_resources(&self) -> Result<Vec<ApiResource>> {
        let discovery = Discovery::new(self.clone()).run().await?;

        Ok(discovery
            .groups()
            .flat_map(|group| {
                group
                    .recommended_resources()
                    .into_iter()
                    .map(|(resource, _)| resource)
            })
            .collect())
    }
}

pub struct DiscoveryCache<S> {
    source: S,
    resources: Vec<ApiResource>,
    refreshed_at: Option<Instant>,
    ttl: Duration,
}

impl<S: DiscoverySource> DiscoveryCache<S> {
    pub fn new(source: S) -> Self {
        Self::with_ttl(source, DISCOVERY_TTL)
    }

    pub fn with_ttl(source: S, ttl: Duration) -> Self {
        Self {
            source,
            resources: Vec::new(),
            refreshed_at: None,
            ttl,
        }
    }

    /// Resolve the preferred version of `kind` in `group` ("" is the core
    /// group). Fails with `NotFoundDiscovery` when even a fresh listing does
    /// not contain the pair; transport errors are returned as they are.
    #[instrument(skip(self))]
    pub async fn resolve_version(&mut self, kind: &str, group: &str) -> Result<String> {
        let mut refreshed = false;
        if self.is_stale() {
            self.refresh().await?;
            refreshed = true;
        }

        if let Some(version) = self.lookup(kind, group) {
            return Ok(version);
        }

        // A listing fetched during this call is as fresh as it gets
        if !refreshed {
            debug!("{} in group {:?} not cached, refreshing discovery", kind, group);
            self.refresh().await?;
            if let Some(version) = self.lookup(kind, group) {
                return Ok(version);
            }
        }

        Err(OperatorError::NotFoundDiscovery {
            group: group.to_string(),
            kind: kind.to_string(),
        })
    }

    fn is_stale(&self) -> bool {
        self.resources.is_empty()
            || self
                .refreshed_at
                .map_or(true, |at| at.elapsed() > self.ttl)
    }

    async fn refresh(&mut self) -> Result<()> {
        let resources = self.source.preferred_resources().await?;
        debug!("Discovery refreshed with {} resources", resources.len());
        self.resources = resources;
        self.refreshed_at = Some(Instant::now());
        Ok(())
    }

    /// Look `kind` up in what is already cached, without asking the cluster.
    pub fn lookup(&self, kind: &str, group: &str) -> Option<String> {
        self.resources
            .iter()
            .find(|r| r.kind == kind && r.group == group)
            .map(|r| r.version.clone())
    }

    #[cfg(test)]
    pub(crate) fn seeded(source: S, resources: Vec<ApiResource>) -> Self {
        Self {
            source,
            resources,
            refreshed_at: Some(Instant::now()),
            ttl: DISCOVERY_TTL,
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use kube::core::GroupVersionKind;
    use kube::error::ErrorResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Discovery source serving a fixed list and counting how often it is asked.
    #[derive(Clone, Default)]
    pub struct FakeDiscovery {
        resources: Arc<Mutex<Vec<ApiResource>>>,
        calls: Arc<AtomicUsize>,
        failing: bool,
    }

    impl FakeDiscovery {
        pub fn new(resources: Vec<ApiResource>) -> Self {
            Self {
                resources: Arc::new(Mutex::new(resources)),
                ..Default::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn serve(&self, resources: Vec<ApiResource>) {
            *self.resources.lock().unwrap() = resources;
        }
    }

    impl DiscoverySource for FakeDiscovery {
        async fn preferred_resources(&self) -> Result<Vec<ApiResource>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(OperatorError::KubeError(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: "service unavailable".to_string(),
                    reason: "ServiceUnavailable".to_string(),
                    code: 503,
                })));
            }
            Ok(self.resources.lock().unwrap().clone())
        }
    }

    pub fn resource(group: &str, version: &str, kind: &str) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
    }
}
