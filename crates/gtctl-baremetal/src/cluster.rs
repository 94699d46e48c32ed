//! Cluster orchestrator.
//!
//! Owns one cluster's runtime directory, its cancellation token and the
//! process runner every component shares.
//!
//! ```text
//! Uninitialized ─ new ─▶ DirectoriesReady ─ create ─▶ ComponentsStarting ─▶ Running
//!                              │                              │                 │
//!                            delete                    failure (teardown)      wait
//!                              ▼                              ▼                 ▼
//!                           Deleted                      ShuttingDown ◀──────────┘
//!                                                             │ wait { delete }
//!                                                             ▼
//!                                                          Deleted
//! ```
//!
//! Components start strictly in order: etcd, metasrv, datanodes, frontends.
//! A failure at any step stops everything started so far before the error
//! is returned; there is no partially created cluster.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gtctl_artifacts::{ArtifactError, ArtifactManager, InstalledArtifact};
use gtctl_core::addr::dial_addr;
use gtctl_core::{BareMetalClusterConfig, ClusterMetadata, ComponentKind, RuntimeLayout};
use gtctl_health::PollPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, info, info_span};

use crate::component::{Component, ComponentContext, Datanode, Etcd, Frontend, MetaSrv};
use crate::error::{BareMetalError, BareMetalResult};
use crate::lock::ClusterLock;
use crate::runner::{DEFAULT_GRACE_PERIOD, ProcessExit, ProcessRecord, ProcessRunner};

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Runtime root; the cluster lives in `<root_dir>/<name>`.
    pub root_dir: PathBuf,
    /// Time between SIGTERM and SIGKILL on shutdown.
    pub grace_period: Duration,
    pub readiness: PollPolicy,
    pub leader: PollPolicy,
}

impl ClusterOptions {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
            readiness: PollPolicy::readiness(),
            leader: PollPolicy::leader(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Uninitialized,
    DirectoriesReady,
    ComponentsStarting,
    Running,
    ShuttingDown,
    Deleted,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Per-component readiness budget, overriding [`ClusterOptions::readiness`].
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub retain_logs: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions {
    /// Reclaim the runtime directory once everything has stopped.
    pub delete: bool,
    pub retain_logs: bool,
}

pub struct Cluster {
    config: BareMetalClusterConfig,
    layout: RuntimeLayout,
    artifacts: Arc<ArtifactManager>,
    runner: ProcessRunner,
    readiness: PollPolicy,
    leader: PollPolicy,
    state: ClusterState,
    processes: Vec<ProcessRecord>,
    lock: Option<ClusterLock>,
    span: Span,
}

impl Cluster {
    /// Validate `config`, claim the cluster name and lay out its runtime
    /// directory.
    ///
    /// `cancel` governs the cluster's whole lifetime; cancelling it stops
    /// every component.
    pub fn new(
        config: BareMetalClusterConfig,
        options: ClusterOptions,
        artifacts: Arc<ArtifactManager>,
        cancel: CancellationToken,
    ) -> BareMetalResult<Self> {
        config.validate()?;

        let span = info_span!("cluster", name = %config.cluster.name);
        let layout = RuntimeLayout::new(&options.root_dir, &config.cluster.name);
        layout.create().map_err(BareMetalError::io(format!(
            "failed to create {}",
            layout.cluster_dir.display()
        )))?;
        let lock = ClusterLock::acquire(&layout)?;
        span.in_scope(|| info!(dir = %layout.cluster_dir.display(), "runtime directories ready"));

        Ok(Self {
            config,
            layout,
            artifacts,
            runner: ProcessRunner::new(cancel, options.grace_period),
            readiness: options.readiness,
            leader: options.leader,
            state: ClusterState::DirectoriesReady,
            processes: Vec::new(),
            lock: Some(lock),
            span,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.cluster.name
    }

    pub fn config(&self) -> &BareMetalClusterConfig {
        &self.config
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    /// Every replica launched so far, in start order.
    pub fn processes(&self) -> &[ProcessRecord] {
        &self.processes
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.runner.cancel_token()
    }

    /// Replicas that exited on their own.
    pub fn failures(&self) -> Vec<ProcessExit> {
        self.runner.failures()
    }

    /// Install both artifacts and start every component.
    pub async fn create(&mut self, options: CreateOptions) -> BareMetalResult<()> {
        let span = self.span.clone();
        self.create_components(options, false).instrument(span).await
    }

    /// Install etcd and start only the coordination cluster.
    pub async fn create_etcd(&mut self, options: CreateOptions) -> BareMetalResult<()> {
        let span = self.span.clone();
        self.create_components(options, true).instrument(span).await
    }

    async fn create_components(
        &mut self,
        options: CreateOptions,
        etcd_only: bool,
    ) -> BareMetalResult<()> {
        match self.state {
            ClusterState::DirectoriesReady => {}
            ClusterState::ComponentsStarting | ClusterState::Running => {
                return Err(self.running_error());
            }
            _ => return Err(BareMetalError::UnsupportedOperation("restarting a stopped cluster")),
        }
        self.config.validate()?;

        ClusterMetadata::new(self.config.clone(), std::process::id())
            .write(&self.layout.metadata_path())?;
        self.state = ClusterState::ComponentsStarting;

        match self.start_components(options, etcd_only).await {
            Ok(()) => {
                self.state = ClusterState::Running;
                info!(replicas = self.processes.len(), "cluster is running");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "cluster creation failed, stopping started components");
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn start_components(
        &mut self,
        options: CreateOptions,
        etcd_only: bool,
    ) -> BareMetalResult<()> {
        let (etcd, greptime) = self.install_artifacts(etcd_only).await?;

        let mut readiness = self.readiness;
        if let Some(timeout) = options.timeout {
            readiness.timeout = Some(timeout);
        }
        let ctx = self.context(readiness);

        for component in self.components(&ctx, greptime.is_some()) {
            let binary = match (component.kind(), &greptime) {
                (ComponentKind::Etcd, _) | (_, None) => &etcd.binary_path,
                (_, Some(greptime)) => &greptime.binary_path,
            };
            info!(
                component = component.name(),
                replicas = component.replicas(),
                binary = %binary.display(),
                "starting component"
            );
            let records = component.start(binary).await?;
            self.processes.extend(records);
        }
        Ok(())
    }

    /// Both artifacts are fetched concurrently. Cancellation abandons the
    /// download.
    async fn install_artifacts(
        &self,
        etcd_only: bool,
    ) -> BareMetalResult<(InstalledArtifact, Option<InstalledArtifact>)> {
        let etcd_spec = self.config.etcd_artifact();
        let greptime_spec = self.config.greptime_artifact();
        let installs = async {
            if etcd_only {
                let etcd = self.artifacts.ensure_installed(&etcd_spec).await?;
                return Ok::<_, ArtifactError>((etcd, None));
            }
            let (etcd, greptime) = tokio::try_join!(
                self.artifacts.ensure_installed(&etcd_spec),
                self.artifacts.ensure_installed(&greptime_spec),
            )?;
            Ok((etcd, Some(greptime)))
        };

        tokio::select! {
            installed = installs => Ok(installed?),
            _ = self.runner.cancel_token().cancelled() => {
                Err(self.runner.cancellation_error("artifact installation"))
            }
        }
    }

    fn context(&self, readiness: PollPolicy) -> ComponentContext {
        ComponentContext {
            layout: self.layout.clone(),
            runner: self.runner.clone(),
            readiness,
            leader: self.leader,
        }
    }

    /// Components in start order. Without `greptime` only etcd is included.
    fn components(&self, ctx: &ComponentContext, greptime: bool) -> Vec<Box<dyn Component>> {
        let mut components: Vec<Box<dyn Component>> =
            vec![Box::new(Etcd::new(self.config.etcd.clone(), ctx.clone()))];
        if !greptime {
            return components;
        }

        let cluster = &self.config.cluster;
        let store_addr = dial_addr(self.config.etcd.client_addr.as_deref().unwrap_or_default());
        let metasrv_addr = dial_addr(cluster.meta.server_addr.as_deref().unwrap_or_default());
        components.push(Box::new(MetaSrv::new(
            cluster.meta.clone(),
            store_addr,
            ctx.clone(),
        )));
        components.push(Box::new(Datanode::new(
            cluster.datanode.clone(),
            metasrv_addr.clone(),
            ctx.clone(),
        )));
        components.push(Box::new(Frontend::new(
            cluster.frontend.clone(),
            metasrv_addr,
            ctx.clone(),
        )));
        components
    }

    /// Stop every started replica and wait for them to exit.
    async fn teardown(&mut self) {
        self.state = ClusterState::ShuttingDown;
        self.runner.shutdown().await;
        info!("started components stopped");
    }

    /// Whether every component of a running cluster passes its health check.
    pub async fn is_running(&self) -> bool {
        if self.state != ClusterState::Running {
            return false;
        }
        let greptime = self
            .processes
            .iter()
            .any(|p| p.name != ComponentKind::Etcd.as_str());
        let ctx = self.context(self.readiness);
        for component in self.components(&ctx, greptime) {
            if !component.is_running().await {
                return false;
            }
        }
        true
    }

    /// Reclaim the runtime directory of a cluster with no live components.
    pub async fn delete(&mut self, options: DeleteOptions) -> BareMetalResult<()> {
        match self.state {
            ClusterState::ComponentsStarting | ClusterState::Running => Err(self.running_error()),
            ClusterState::Deleted => Ok(()),
            _ => {
                let span = self.span.clone();
                self.reclaim(options.retain_logs).instrument(span).await
            }
        }
    }

    /// Block until every replica has exited and the cluster token is
    /// cancelled, then optionally reclaim the runtime directory.
    ///
    /// Returns the first unexpected replica exit, if there was one.
    pub async fn wait(&mut self, options: WaitOptions) -> BareMetalResult<()> {
        let span = self.span.clone();
        async move {
            let cancel = self.runner.cancel_token().clone();
            tokio::join!(self.runner.wait(), cancel.cancelled());
            if self.state != ClusterState::Deleted {
                self.state = ClusterState::ShuttingDown;
            }
            info!("all components stopped");

            if options.delete {
                self.reclaim(options.retain_logs).await?;
            }
            self.lock.take();

            match self.runner.failures().into_iter().next() {
                Some(exit) => Err(exit.into()),
                None => Ok(()),
            }
        }
        .instrument(span)
        .await
    }

    async fn reclaim(&mut self, retain_logs: bool) -> BareMetalResult<()> {
        let ctx = self.context(self.readiness);
        for component in self.components(&ctx, true) {
            component.delete(retain_logs).await?;
        }
        self.layout
            .remove(retain_logs)
            .map_err(BareMetalError::io(format!(
                "failed to remove {}",
                self.layout.cluster_dir.display()
            )))?;
        self.lock.take();
        self.state = ClusterState::Deleted;
        info!(dir = %self.layout.cluster_dir.display(), retain_logs, "cluster deleted");
        Ok(())
    }

    fn running_error(&self) -> BareMetalError {
        BareMetalError::ClusterRunning {
            name: self.name().to_string(),
            pid: std::process::id(),
        }
    }
}
