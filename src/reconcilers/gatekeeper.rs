// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Gatekeeper reconciler - deploys Gatekeeper and keeps the sub-controllers
//! in line with the Gatekeeper resource.

use crate::config::Config;
use crate::constants::timing::{CRD_NOT_READY_REQUEUE, DEPLOYMENT_PENDING_REQUEUE, ERROR_REQUEUE};
use crate::constants::{GATEKEEPER_NAME, TRIGGER_CHANNEL_CAPACITY};
use crate::error::{OperatorError, Result};
use crate::kubernetes::ManifestApplier;
use crate::manifests::{names, render, AssetPlan, Manifests, RenderOptions};
use crate::subcontrollers::config::ensure_config;
use crate::subcontrollers::{
    ConfigController, ConstraintStatusController, ReconcileTrigger, RunState, SubControllerKind,
    Supervisor,
};
use crate::types::Gatekeeper;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    runtime::{
        controller::{self, Action},
        watcher::{self, Event},
        Controller, WatchStreamExt,
    },
    Api, Client, Resource, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// State shared by every reconcile and the deletion watch.
pub struct Context {
    client: Client,
    config: Config,
    manifests: Manifests,
    applier: ManifestApplier,
    supervisor: Mutex<Supervisor>,
}

pub struct GatekeeperReconciler {
    context: Arc<Context>,
    triggers: mpsc::Receiver<ReconcileTrigger>,
}

impl GatekeeperReconciler {
    pub fn new(client: Client, config: Config, manifests: Manifests) -> Self {
        let (trigger_tx, triggers) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let supervisor = Supervisor::new(
            client.clone(),
            trigger_tx,
            ConfigController::new(client.clone(), config.namespace.clone()).launcher(),
            ConstraintStatusController::new(client.clone(), config.namespace.clone()).launcher(),
        );

        let context = Context {
            applier: ManifestApplier::new(client.clone()),
            client,
            config,
            manifests,
            supervisor: Mutex::new(supervisor),
        };

        Self {
            context: Arc::new(context),
            triggers,
        }
    }

    /// Run the controller and the deletion watch until either of them ends.
    pub async fn run(self) -> anyhow::Result<()> {
        let gatekeepers: Api<Gatekeeper> = Api::all(self.context.client.clone());

        let mut triggers = self.triggers;
        let retriggers = futures::stream::poll_fn(move |cx| {
            triggers.poll_recv(cx).map(|trigger| {
                trigger.map(|t| debug!("Reconcile requested after the {} controller exited", t.source))
            })
        });

        let controller = Controller::new(gatekeepers, WatcherConfig::default())
            .with_config(controller::Config::default().concurrency(1))
            .reconcile_all_on(retriggers)
            .run(reconcile, error_policy, self.context.clone())
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled gatekeeper: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            });

        let result = tokio::select! {
            _ = controller => {
                warn!("Gatekeeper controller stopped");
                Ok(())
            }
            result = watch_deletion(self.context.clone()) => result,
        };

        self.context.supervisor.lock().await.stop_all().await;
        result
    }
}

#[instrument(skip(gatekeeper, ctx), fields(gatekeeper = %gatekeeper.name_any()))]
async fn reconcile(gatekeeper: Arc<Gatekeeper>, ctx: Arc<Context>) -> Result<Action> {
    let name = gatekeeper.name_any();
    if name != GATEKEEPER_NAME {
        warn!("Ignoring Gatekeeper {}, only '{}' is managed", name, GATEKEEPER_NAME);
        return Ok(Action::await_change());
    }

    if gatekeeper.meta().deletion_timestamp.is_some() {
        info!("Gatekeeper is being deleted, stopping sub-controllers");
        ctx.supervisor.lock().await.stop_all().await;
        return Ok(Action::await_change());
    }

    info!("Reconciling Gatekeeper");

    if let Some(image) = gatekeeper.spec.image.as_ref().and_then(|i| i.image.as_ref()) {
        warn!(
            "spec.image.image ({}) is no longer supported and will be removed in a future release",
            image
        );
    }

    let pending = deploy_resources(&ctx, &gatekeeper).await?;

    let (sub_controllers, config_running) = {
        let mut supervisor = ctx.supervisor.lock().await;
        let result = supervisor.ensure_sub_controllers(&gatekeeper).await;
        (result, supervisor.state(SubControllerKind::Config) != RunState::Stopped)
    };

    // A running Config controller means the Config CRD is served
    if config_running {
        ensure_config(&ctx.client, &ctx.config.namespace, &gatekeeper).await?;
    }

    requeue_action(pending, sub_controllers)
}

fn error_policy(_gatekeeper: Arc<Gatekeeper>, error: &OperatorError, _ctx: Arc<Context>) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}

/// Turn the outcome of a reconcile into its requeue. Missing CRDs and a
/// pending deployment each ask for a short fixed delay; the shortest wins.
/// Any other sub-controller error is returned as is.
fn requeue_action(deployment_pending: bool, sub_controllers: Result<()>) -> Result<Action> {
    let mut delays: Vec<Duration> = Vec::new();

    match sub_controllers {
        Ok(()) => {}
        Err(e) if e.is_crd_not_ready() => {
            info!("{}, requeueing in {}s", e, CRD_NOT_READY_REQUEUE.as_secs());
            delays.push(CRD_NOT_READY_REQUEUE);
        }
        Err(e) => return Err(e),
    }

    if deployment_pending {
        delays.push(DEPLOYMENT_PENDING_REQUEUE);
    }

    Ok(delays
        .into_iter()
        .min()
        .map_or_else(Action::await_change, Action::requeue))
}

/// Apply and delete the static assets. Returns whether the controller
/// manager deployment is still pending.
async fn deploy_resources(ctx: &Context, gatekeeper: &Gatekeeper) -> Result<bool> {
    let plan = AssetPlan::for_spec(gatekeeper);
    let owner = gatekeeper.controller_owner_ref(&()).ok_or_else(|| {
        OperatorError::MalformedObject("Gatekeeper has no uid yet".to_string())
    })?;

    for asset in &plan.delete_webhooks {
        ctx.applier.delete(&ctx.manifests.get(asset)?).await?;
    }

    // Check the deployment before touching anything else, so webhooks are
    // not made blocking while it cannot serve them
    let pending = deployment_pending(&ctx.client, &ctx.config.namespace).await?;

    let image = ctx.config.image.as_deref();
    let mut opts = RenderOptions {
        namespace: &ctx.config.namespace,
        image,
        deployment_pending: false,
    };

    for asset in &plan.apply_ordered {
        let desired = render(asset, ctx.manifests.get(asset)?, gatekeeper, &opts)?;
        ctx.applier.apply(desired, &owner).await?;
    }

    opts.deployment_pending = pending;
    for asset in &plan.apply_webhooks {
        let desired = render(asset, ctx.manifests.get(asset)?, gatekeeper, &opts)?;
        ctx.applier.apply(desired, &owner).await?;
    }

    for asset in &plan.delete_crds {
        ctx.applier.delete(&ctx.manifests.get(asset)?).await?;
    }

    Ok(pending)
}

#[instrument(skip(client))]
async fn deployment_pending(client: &Client, namespace: &str) -> Result<bool> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = deployments.get_opt(names::WEBHOOK_DEPLOYMENT).await?;
    let pending = is_deployment_pending(deployment.as_ref());
    if pending {
        info!(
            "Deployment {} is not ready, webhooks will ignore failures",
            names::WEBHOOK_DEPLOYMENT
        );
    }
    Ok(pending)
}

/// Pending until every replica reports ready.
fn is_deployment_pending(deployment: Option<&Deployment>) -> bool {
    let Some(status) = deployment.and_then(|d| d.status.as_ref()) else {
        return true;
    };
    match status.ready_replicas {
        Some(ready) => status.replicas.unwrap_or_default() != ready,
        None => true,
    }
}

/// Stop the sub-controllers when the Gatekeeper goes away, either through a
/// delete event or a relist that no longer contains it.
async fn watch_deletion(ctx: Arc<Context>) -> anyhow::Result<()> {
    let gatekeepers: Api<Gatekeeper> = Api::all(ctx.client.clone());
    let config = WatcherConfig::default().fields(&format!("metadata.name={}", GATEKEEPER_NAME));
    let mut events = watcher::watcher(gatekeepers, config)
        .default_backoff()
        .boxed();

    let mut listed = false;
    loop {
        match events.try_next().await {
            Ok(Some(event)) => handle_deletion_event(&ctx.supervisor, event, &mut listed).await,
            Ok(None) => return Err(anyhow::anyhow!("Gatekeeper watch stream ended")),
            Err(e) => warn!("Gatekeeper watch error: {}", e),
        }
    }
}

/// `listed` tracks whether the current relist has seen the Gatekeeper.
async fn handle_deletion_event(
    supervisor: &Mutex<Supervisor>,
    event: Event<Gatekeeper>,
    listed: &mut bool,
) {
    match event {
        Event::Delete(gatekeeper) => {
            info!("Gatekeeper {} deleted, stopping sub-controllers", gatekeeper.name_any());
            supervisor.lock().await.stop_all().await;
        }
        Event::Init => *listed = false,
        Event::InitApply(_) => *listed = true,
        Event::InitDone => {
            if !*listed {
                debug!("No Gatekeeper present, making sure sub-controllers are stopped");
                supervisor.lock().await.stop_all().await;
            }
        }
        Event::Apply(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::crd;
    use crate::subcontrollers::Launcher;
    use crate::test_utils::{crd_json, status_json, MockService};
    use crate::types::gatekeeper::{AuditConfig, AuditFromCacheMode};
    use crate::types::GatekeeperSpec;
    use futures::FutureExt;
    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use std::path::PathBuf;
    use tokio_util::sync::CancellationToken;

    const DEPLOYMENT_PATH: &str =
        "/apis/apps/v1/namespaces/gatekeeper-system/deployments/gatekeeper-controller-manager";

    fn make_deployment(replicas: Option<i32>, ready: Option<i32>) -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                replicas,
                ready_replicas: ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn make_context(mock: &MockService) -> Arc<Context> {
        let config = Config {
            namespace: "gatekeeper-system".to_string(),
            manifest_dir: PathBuf::from("/manifests"),
            image: None,
        };
        let reconciler = GatekeeperReconciler::new(mock.clone().into_client(), config, Manifests::default());
        reconciler.context
    }

    #[test]
    fn test_missing_deployment_is_pending() {
        assert!(is_deployment_pending(None));
        assert!(is_deployment_pending(Some(&Deployment::default())));
    }

    #[test]
    fn test_deployment_without_ready_replicas_is_pending() {
        assert!(is_deployment_pending(Some(&make_deployment(Some(3), None))));
    }

    #[test]
    fn test_deployment_readiness_compares_replicas() {
        assert!(is_deployment_pending(Some(&make_deployment(Some(3), Some(2)))));
        assert!(!is_deployment_pending(Some(&make_deployment(Some(3), Some(3)))));
    }

    #[test]
    fn test_requeue_when_nothing_pending() {
        assert_eq!(requeue_action(false, Ok(())).unwrap(), Action::await_change());
    }

    #[test]
    fn test_requeue_for_pending_deployment() {
        assert_eq!(
            requeue_action(true, Ok(())).unwrap(),
            Action::requeue(DEPLOYMENT_PENDING_REQUEUE)
        );
    }

    #[test]
    fn test_requeue_for_missing_crds() {
        let not_ready = OperatorError::Aggregate(vec![
            OperatorError::CrdNotReady("configs.config.gatekeeper.sh".to_string()),
            OperatorError::CrdNotReady("constraintpodstatuses.status.gatekeeper.sh".to_string()),
        ]);
        assert_eq!(
            requeue_action(false, Err(not_ready)).unwrap(),
            Action::requeue(CRD_NOT_READY_REQUEUE)
        );

        let not_ready = OperatorError::CrdNotReady("configs.config.gatekeeper.sh".to_string());
        assert_eq!(
            requeue_action(true, Err(not_ready)).unwrap(),
            Action::requeue(CRD_NOT_READY_REQUEUE)
        );
    }

    #[test]
    fn test_other_errors_are_returned() {
        let mixed = OperatorError::Aggregate(vec![
            OperatorError::CrdNotReady("configs.config.gatekeeper.sh".to_string()),
            OperatorError::SubController("boom".to_string()),
        ]);
        assert!(requeue_action(false, Err(mixed)).is_err());
    }

    #[tokio::test]
    async fn test_deployment_pending_when_not_found() {
        let mock = MockService::new();
        assert!(deployment_pending(&mock.into_client(), "gatekeeper-system").await.unwrap());
    }

    #[tokio::test]
    async fn test_deployment_ready() {
        let deployment = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "gatekeeper-controller-manager", "namespace": "gatekeeper-system"},
            "status": {"replicas": 3, "readyReplicas": 3}
        });
        let mock = MockService::new().on_get(DEPLOYMENT_PATH, 200, &deployment.to_string());

        assert!(!deployment_pending(&mock.into_client(), "gatekeeper-system").await.unwrap());
    }

    #[tokio::test]
    async fn test_deployment_lookup_errors_propagate() {
        let mock = MockService::new().on_get(DEPLOYMENT_PATH, 500, &status_json(500, "InternalError"));

        assert!(deployment_pending(&mock.into_client(), "gatekeeper-system").await.is_err());
    }

    #[tokio::test]
    async fn test_other_gatekeeper_names_are_ignored() {
        let mock = MockService::new();
        let ctx = make_context(&mock);
        let other = Arc::new(Gatekeeper::new("not-gatekeeper", GatekeeperSpec::default()));

        let action = reconcile(other, ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_gatekeeper_only_stops_sub_controllers() {
        let mock = MockService::new();
        let ctx = make_context(&mock);
        let mut gatekeeper = Gatekeeper::new(GATEKEEPER_NAME, GatekeeperSpec::default());
        gatekeeper.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(k8s_openapi::chrono::Utc::now()),
        );

        let action = reconcile(Arc::new(gatekeeper), ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(mock.writes().is_empty());
        let supervisor = ctx.supervisor.lock().await;
        assert_eq!(supervisor.state(SubControllerKind::Config), RunState::Stopped);
        assert_eq!(
            supervisor.state(SubControllerKind::ConstraintStatus),
            RunState::Stopped
        );
    }

    #[tokio::test]
    async fn test_deploy_requires_uid() {
        let mock = MockService::new();
        let ctx = make_context(&mock);
        let gatekeeper = Gatekeeper::new(GATEKEEPER_NAME, GatekeeperSpec::default());

        let err = reconcile(Arc::new(gatekeeper), ctx).await.unwrap_err();

        assert!(matches!(err, OperatorError::MalformedObject(_)));
    }

    fn waiting_launcher() -> Launcher {
        Arc::new(|token: CancellationToken| {
            async move {
                token.cancelled().await;
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        })
    }

    /// Supervisor with the ConstraintPodStatus controller running.
    async fn running_supervisor() -> (Mutex<Supervisor>, mpsc::Receiver<ReconcileTrigger>) {
        let path = format!(
            "/apis/apiextensions.k8s.io/v1/customresourcedefinitions/{}",
            crd::CONSTRAINT_POD_STATUS
        );
        let client = MockService::new()
            .on_get(&path, 200, &crd_json(crd::CONSTRAINT_POD_STATUS, "True"))
            .into_client();
        let (tx, rx) = mpsc::channel(16);
        let mut supervisor = Supervisor::new(client, tx, waiting_launcher(), waiting_launcher());

        let gatekeeper = Gatekeeper::new(
            GATEKEEPER_NAME,
            GatekeeperSpec {
                audit: Some(AuditConfig {
                    audit_from_cache: Some(AuditFromCacheMode::Automatic),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        supervisor
            .ensure_constraint_status_controller(&gatekeeper)
            .await
            .unwrap();
        assert_ne!(
            supervisor.state(SubControllerKind::ConstraintStatus),
            RunState::Stopped
        );

        (Mutex::new(supervisor), rx)
    }

    #[tokio::test]
    async fn test_delete_event_stops_running_constraint_status() {
        let (supervisor, mut rx) = running_supervisor().await;
        let mut listed = true;
        let gatekeeper = Gatekeeper::new(GATEKEEPER_NAME, GatekeeperSpec::default());

        handle_deletion_event(&supervisor, Event::Delete(gatekeeper), &mut listed).await;

        assert_eq!(
            supervisor.lock().await.state(SubControllerKind::ConstraintStatus),
            RunState::Stopped
        );
        // A requested stop does not ask for a new reconcile
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relist_without_gatekeeper_stops_sub_controllers() {
        let (supervisor, mut rx) = running_supervisor().await;
        let mut listed = true;

        handle_deletion_event(&supervisor, Event::Init, &mut listed).await;
        assert!(!listed);
        handle_deletion_event(&supervisor, Event::InitDone, &mut listed).await;

        assert_eq!(
            supervisor.lock().await.state(SubControllerKind::ConstraintStatus),
            RunState::Stopped
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relist_with_gatekeeper_keeps_sub_controllers() {
        let (supervisor, _rx) = running_supervisor().await;
        let mut listed = false;
        let gatekeeper = Gatekeeper::new(GATEKEEPER_NAME, GatekeeperSpec::default());

        handle_deletion_event(&supervisor, Event::Init, &mut listed).await;
        handle_deletion_event(&supervisor, Event::InitApply(gatekeeper.clone()), &mut listed).await;
        handle_deletion_event(&supervisor, Event::InitDone, &mut listed).await;
        handle_deletion_event(&supervisor, Event::Apply(gatekeeper), &mut listed).await;

        let mut supervisor = supervisor.into_inner();
        assert_ne!(
            supervisor.state(SubControllerKind::ConstraintStatus),
            RunState::Stopped
        );
        supervisor.stop_all().await;
    }
}
