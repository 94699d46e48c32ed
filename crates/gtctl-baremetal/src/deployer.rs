//! [`Deployer`] implementation that runs clusters as local processes.
//!
//! Creation goes through a [`Cluster`] owned by this process. Inspection and
//! deletion work from the runtime directory alone, so they also see clusters
//! started by other gtctl invocations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use gtctl_artifacts::{ArtifactManager, ArtifactManagerConfig, Platform};
use gtctl_core::layout::{artifacts_dir, read_pid_file};
use gtctl_core::{
    BareMetalClusterConfig, ClusterInfo, ClusterMetadata, ComponentKind, ComponentStatus,
    CreateClusterOptions, DeleteClusterOptions, Deployer, EtcdConfig, MetadataError,
    ReplicaStatus, RuntimeLayout,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cluster::{Cluster, ClusterOptions, CreateOptions, DeleteOptions, WaitOptions};
use crate::component::{Component, ComponentContext, Etcd};
use crate::error::{BareMetalError, BareMetalResult};
use crate::lock::ClusterLock;
use crate::runner::{ProcessRunner, is_process_alive};

pub struct BareMetalDeployer {
    artifacts: ArtifactManagerConfig,
    platform: Option<Platform>,
    options: ClusterOptions,
    cancel: CancellationToken,
    active: Mutex<Option<Cluster>>,
}

impl BareMetalDeployer {
    /// Deployer rooted at `root`, caching artifacts in `<root>/artifacts`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let options = ClusterOptions::new(root);
        Self {
            artifacts: ArtifactManagerConfig::new(artifacts_dir(&options.root_dir)),
            platform: None,
            options,
            cancel: CancellationToken::new(),
            active: Mutex::new(None),
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactManagerConfig) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Fetch packages for `platform` instead of the host's.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Timing knobs for created clusters. The root directory is kept.
    pub fn with_cluster_options(mut self, options: ClusterOptions) -> Self {
        let root_dir = std::mem::take(&mut self.options.root_dir);
        self.options = ClusterOptions { root_dir, ..options };
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn root_dir(&self) -> &Path {
        &self.options.root_dir
    }

    fn artifact_manager(&self, force_download: bool) -> BareMetalResult<Arc<ArtifactManager>> {
        let mut config = self.artifacts.clone();
        config.force_download |= force_download;
        let manager = match self.platform {
            Some(platform) => ArtifactManager::with_platform(config, platform)?,
            None => ArtifactManager::new(config)?,
        };
        Ok(Arc::new(manager))
    }

    fn layout(&self, name: &str) -> BareMetalResult<RuntimeLayout> {
        let layout = RuntimeLayout::new(&self.options.root_dir, name);
        if !layout.exists() {
            return Err(BareMetalError::ClusterNotFound(name.to_string()));
        }
        Ok(layout)
    }

    async fn create(&self, options: CreateClusterOptions, etcd_only: bool) -> BareMetalResult<()> {
        let mut active = self.active.lock().await;
        if let Some(cluster) = active.as_ref() {
            return Err(BareMetalError::ClusterRunning {
                name: cluster.name().to_string(),
                pid: std::process::id(),
            });
        }

        let artifacts = self.artifact_manager(options.force_download)?;
        let mut cluster = Cluster::new(
            options.config,
            self.options.clone(),
            artifacts,
            self.cancel.child_token(),
        )?;
        let create = CreateOptions {
            timeout: options.timeout,
        };
        if etcd_only {
            cluster.create_etcd(create).await?;
        } else {
            cluster.create(create).await?;
        }

        *active = Some(cluster);
        Ok(())
    }

    /// Block until the cluster created by this deployer has stopped.
    ///
    /// Returns immediately when nothing was created.
    pub async fn wait(&self, options: WaitOptions) -> BareMetalResult<()> {
        let cluster = self.active.lock().await.take();
        match cluster {
            Some(mut cluster) => cluster.wait(options).await,
            None => Ok(()),
        }
    }

    /// Refuse to touch a cluster that still has a live owner or replica.
    fn ensure_stopped(&self, info: &ClusterInfo) -> BareMetalResult<()> {
        if let Some(metadata) = &info.metadata {
            let owner = metadata.foreground_pid;
            if owner != std::process::id() && is_process_alive(owner) {
                return Err(BareMetalError::ClusterRunning {
                    name: info.name.clone(),
                    pid: owner,
                });
            }
        }
        let alive = info
            .components
            .iter()
            .flat_map(|c| &c.replicas)
            .find(|r| r.alive);
        if let Some(replica) = alive {
            return Err(BareMetalError::ClusterRunning {
                name: info.name.clone(),
                pid: replica.pid.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Take the active cluster out if it is the one named `name`.
    async fn take_active(&self, name: &str) -> BareMetalResult<Option<Cluster>> {
        let mut active = self.active.lock().await;
        match active.as_ref() {
            Some(cluster) if cluster.name() == name => {
                if cluster.cancel_token().is_cancelled() {
                    Ok(active.take())
                } else {
                    Err(BareMetalError::ClusterRunning {
                        name: name.to_string(),
                        pid: std::process::id(),
                    })
                }
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Deployer for BareMetalDeployer {
    type Error = BareMetalError;

    async fn get_cluster(&self, name: &str) -> BareMetalResult<ClusterInfo> {
        let layout = self.layout(name)?;
        let metadata = match ClusterMetadata::read(&layout.metadata_path()) {
            Ok(metadata) => Some(metadata),
            Err(MetadataError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let components = ComponentKind::ALL
            .into_iter()
            .map(|kind| {
                Ok(ComponentStatus {
                    kind,
                    replicas: scan_replicas(&layout, kind)?,
                })
            })
            .collect::<BareMetalResult<Vec<_>>>()?;

        Ok(ClusterInfo {
            name: name.to_string(),
            metadata,
            components,
        })
    }

    async fn list_clusters(&self) -> BareMetalResult<Vec<ClusterInfo>> {
        let root = &self.options.root_dir;
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BareMetalError::Io {
                    context: format!("failed to read {}", root.display()),
                    source: e,
                });
            }
        };

        let artifacts = artifacts_dir(root);
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir() && entry.path() != artifacts)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        let mut clusters = Vec::with_capacity(names.len());
        for name in names {
            clusters.push(self.get_cluster(&name).await?);
        }
        Ok(clusters)
    }

    async fn create_cluster(&self, options: CreateClusterOptions) -> BareMetalResult<()> {
        self.create(options, false).await
    }

    async fn update_cluster(
        &self,
        _name: &str,
        _config: BareMetalClusterConfig,
    ) -> BareMetalResult<()> {
        Err(BareMetalError::UnsupportedOperation("update"))
    }

    async fn delete_cluster(&self, options: DeleteClusterOptions) -> BareMetalResult<()> {
        let delete = DeleteOptions {
            retain_logs: options.retain_logs,
        };
        if let Some(mut cluster) = self.take_active(&options.name).await? {
            return cluster.delete(delete).await;
        }

        let info = self.get_cluster(&options.name).await?;
        self.ensure_stopped(&info)?;
        let layout = self.layout(&options.name)?;
        let _lock = ClusterLock::acquire(&layout)?;

        layout
            .remove(options.retain_logs)
            .map_err(BareMetalError::io(format!(
                "failed to remove {}",
                layout.cluster_dir.display()
            )))?;
        info!(
            cluster = %options.name,
            retain_logs = options.retain_logs,
            "cluster deleted"
        );
        Ok(())
    }

    async fn create_etcd_cluster(&self, options: CreateClusterOptions) -> BareMetalResult<()> {
        self.create(options, true).await
    }

    /// Removes only the etcd replica's directories.
    async fn delete_etcd_cluster(&self, options: DeleteClusterOptions) -> BareMetalResult<()> {
        let info = self.get_cluster(&options.name).await?;
        let etcd_alive = info
            .components
            .iter()
            .filter(|c| c.kind == ComponentKind::Etcd)
            .flat_map(|c| &c.replicas)
            .find(|r| r.alive);
        if let Some(replica) = etcd_alive {
            return Err(BareMetalError::ClusterRunning {
                name: options.name,
                pid: replica.pid.unwrap_or_default(),
            });
        }

        let layout = self.layout(&options.name)?;
        let config = info
            .metadata
            .map(|m| m.config.etcd)
            .unwrap_or_else(EtcdConfig::default);
        let ctx = ComponentContext {
            layout,
            runner: ProcessRunner::new(CancellationToken::new(), self.options.grace_period),
            readiness: self.options.readiness,
            leader: self.options.leader,
        };
        Etcd::new(config, ctx).delete(options.retain_logs).await?;
        info!(cluster = %options.name, "etcd deleted");
        Ok(())
    }
}

/// Replicas of `kind` that have a pid directory, ordered by index.
fn scan_replicas(layout: &RuntimeLayout, kind: ComponentKind) -> BareMetalResult<Vec<ReplicaStatus>> {
    let entries = match std::fs::read_dir(&layout.pids_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(BareMetalError::Io {
                context: format!("failed to read {}", layout.pids_dir.display()),
                source: e,
            });
        }
    };

    let mut replicas: Vec<ReplicaStatus> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| replica_index(kind, &entry.file_name().to_string_lossy()))
        .map(|index| {
            let dirs = layout.replica_dirs(kind, index);
            let pid = match read_pid_file(&dirs.pid_file()) {
                Ok(pid) => Some(pid),
                Err(e) => {
                    debug!(replica = %kind.replica_dir_name(index), error = %e, "no readable pid file");
                    None
                }
            };
            ReplicaStatus {
                index,
                pid,
                alive: pid.is_some_and(is_process_alive),
                log_dir: dirs.log_dir,
            }
        })
        .collect();
    replicas.sort_by_key(|r| r.index);
    Ok(replicas)
}

/// Index encoded in a replica directory name: `metasrv` is 0,
/// `datanode.2` is 2.
fn replica_index(kind: ComponentKind, dir_name: &str) -> Option<u32> {
    if kind.is_singleton() {
        return (dir_name == kind.as_str()).then_some(0);
    }
    dir_name
        .strip_prefix(kind.as_str())?
        .strip_prefix('.')?
        .parse()
        .ok()
}
