// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Start/stop bookkeeping for the nested control loops.
//!
//! Each sub-controller runs as its own task. The task alone publishes its
//! run state over a watch channel; the supervisor only ever cancels the
//! task's token and waits for the published state to reach `Stopped`. A task
//! that ends without being asked to sends a [`ReconcileTrigger`] so the
//! primary loop re-evaluates and restarts it.

use crate::constants::crd;
use crate::constants::timing::STOP_POLL_INTERVAL;
use crate::error::{OperatorError, Result};
use crate::kubernetes::crd::crd_names_accepted;
use crate::types::Gatekeeper;
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::Client;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubControllerKind {
    Config,
    ConstraintStatus,
}

impl fmt::Display for SubControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubControllerKind::Config => write!(f, "Config"),
            SubControllerKind::ConstraintStatus => write!(f, "ConstraintPodStatus"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    StoppingRequested,
}

/// Signal asking the primary loop to reconcile the Gatekeeper again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileTrigger {
    pub source: SubControllerKind,
}

/// Builds the future of one sub-controller run. The future must return once
/// the token is cancelled.
pub type Launcher =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct RunningTask {
    token: CancellationToken,
    state: watch::Receiver<RunState>,
    handle: JoinHandle<()>,
}

struct SubController {
    kind: SubControllerKind,
    launcher: Launcher,
    task: Option<RunningTask>,
}

impl SubController {
    fn new(kind: SubControllerKind, launcher: Launcher) -> Self {
        Self {
            kind,
            launcher,
            task: None,
        }
    }

    fn state(&self) -> RunState {
        let Some(task) = &self.task else {
            return RunState::Stopped;
        };

        // A task that unwound never got to publish its final state
        if task.handle.is_finished() {
            return RunState::Stopped;
        }

        let published = *task.state.borrow();
        if task.token.is_cancelled() && published != RunState::Stopped {
            RunState::StoppingRequested
        } else {
            published
        }
    }

    /// Forget a task that has already finished on its own.
    fn reap(&mut self) {
        if self.task.is_some() && self.state() == RunState::Stopped {
            debug!("{} controller task has exited", self.kind);
            self.task = None;
        }
    }

    fn is_active(&mut self) -> bool {
        self.reap();
        self.task.is_some()
    }

    fn start(&mut self, trigger: mpsc::Sender<ReconcileTrigger>) {
        if self.is_active() {
            return;
        }

        info!("Starting the {} controller", self.kind);
        let token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(RunState::Starting);
        let run = (self.launcher)(token.clone());
        let kind = self.kind;
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let _ = state_tx.send(RunState::Running);
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("{} controller panicked", kind)),
            };
            let _ = state_tx.send(RunState::Stopped);

            match result {
                Ok(()) => info!("{} controller stopped", kind),
                Err(e) => error!("{} controller exited with error: {:#}", kind, e),
            }

            if !task_token.is_cancelled() {
                if let Err(e) = trigger.send(ReconcileTrigger { source: kind }).await {
                    error!("Failed to request a Gatekeeper reconcile: {}", e);
                }
            }
        });

        self.task = Some(RunningTask {
            token,
            state: state_rx,
            handle,
        });
    }

    fn request_stop(&mut self) {
        if let Some(task) = &self.task {
            task.token.cancel();
        }
    }

    /// Cancel the task and block until it reports `Stopped`.
    async fn stop(&mut self) {
        let Some(task) = self.task.as_mut() else {
            return;
        };

        info!("Stopping the {} controller", self.kind);
        task.token.cancel();

        loop {
            match timeout(
                STOP_POLL_INTERVAL,
                task.state.wait_for(|s| *s == RunState::Stopped),
            )
            .await
            {
                Ok(_) => break,
                Err(_) => info!("Waiting for the {} controller to stop", self.kind),
            }
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.handle.await {
                warn!("{} controller task did not finish cleanly: {}", self.kind, e);
            }
        }
    }
}

/// Keeps the Config and ConstraintPodStatus controllers in line with the
/// Gatekeeper resource and the CRDs they depend on.
pub struct Supervisor {
    client: Client,
    trigger: mpsc::Sender<ReconcileTrigger>,
    config: SubController,
    constraint_status: SubController,
}

impl Supervisor {
    pub fn new(
        client: Client,
        trigger: mpsc::Sender<ReconcileTrigger>,
        config_launcher: Launcher,
        constraint_status_launcher: Launcher,
    ) -> Self {
        Self {
            client,
            trigger,
            config: SubController::new(SubControllerKind::Config, config_launcher),
            constraint_status: SubController::new(
                SubControllerKind::ConstraintStatus,
                constraint_status_launcher,
            ),
        }
    }

    pub fn state(&self, kind: SubControllerKind) -> RunState {
        match kind {
            SubControllerKind::Config => self.config.state(),
            SubControllerKind::ConstraintStatus => self.constraint_status.state(),
        }
    }

    /// Bring both sub-controllers in line with `gatekeeper`. Both are always
    /// evaluated; when only CRDs are missing the error is `CrdNotReady`.
    pub async fn ensure_sub_controllers(&mut self, gatekeeper: &Gatekeeper) -> Result<()> {
        let config = self.ensure_config_controller().await;
        let constraint_status = self.ensure_constraint_status_controller(gatekeeper).await;

        let errors: Vec<OperatorError> = [config, constraint_status]
            .into_iter()
            .filter_map(|r| r.err())
            .collect();

        match OperatorError::aggregate(errors) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    pub async fn ensure_config_controller(&mut self) -> Result<()> {
        if self.config.is_active() {
            return Ok(());
        }

        self.require_crd(crd::CONFIG).await?;
        self.config.start(self.trigger.clone());
        Ok(())
    }

    /// The ConstraintPodStatus controller only runs while audit reads from a
    /// cache the operator maintains.
    pub async fn ensure_constraint_status_controller(
        &mut self,
        gatekeeper: &Gatekeeper,
    ) -> Result<()> {
        if !gatekeeper.audit_from_cache_automatic() {
            self.constraint_status.stop().await;
            return Ok(());
        }

        if self.constraint_status.is_active() {
            return Ok(());
        }

        self.require_crd(crd::CONSTRAINT_POD_STATUS).await?;
        self.constraint_status.start(self.trigger.clone());
        Ok(())
    }

    /// Ask a sub-controller to stop without waiting for it.
    pub fn request_stop(&mut self, kind: SubControllerKind) {
        match kind {
            SubControllerKind::Config => self.config.request_stop(),
            SubControllerKind::ConstraintStatus => self.constraint_status.request_stop(),
        }
    }

    pub async fn stop_all(&mut self) {
        self.constraint_status.stop().await;
        self.config.stop().await;
    }

    async fn require_crd(&self, name: &str) -> Result<()> {
        if crd_names_accepted(&self.client, name).await? {
            Ok(())
        } else {
            debug!("CRD {} is not ready yet", name);
            Err(OperatorError::CrdNotReady(name.to_string()))
        }
    }
}
