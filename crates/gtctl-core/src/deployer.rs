//! The backend-agnostic deployer interface.
//!
//! CLI commands pick a backend and then only talk to this trait. The
//! bare-metal backend lives in `gtctl-baremetal`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::BareMetalClusterConfig;
use crate::metadata::ClusterMetadata;
use crate::types::ComponentKind;

#[derive(Debug, Clone)]
pub struct CreateClusterOptions {
    pub config: BareMetalClusterConfig,
    /// Re-download and reinstall artifacts even if cached.
    pub force_download: bool,
    /// Per-component readiness budget; backend default when `None`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteClusterOptions {
    pub name: String,
    pub retain_logs: bool,
}

/// A cluster as seen from disk.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterInfo {
    pub name: String,
    pub metadata: Option<ClusterMetadata>,
    pub components: Vec<ComponentStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub kind: ComponentKind,
    pub replicas: Vec<ReplicaStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplicaStatus {
    pub index: u32,
    pub pid: Option<u32>,
    pub alive: bool,
    pub log_dir: PathBuf,
}

impl ClusterInfo {
    /// Whether any replica process is still alive.
    pub fn is_running(&self) -> bool {
        self.components
            .iter()
            .flat_map(|c| &c.replicas)
            .any(|r| r.alive)
    }
}

#[async_trait]
pub trait Deployer: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get_cluster(&self, name: &str) -> Result<ClusterInfo, Self::Error>;

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, Self::Error>;

    async fn create_cluster(&self, options: CreateClusterOptions) -> Result<(), Self::Error>;

    async fn update_cluster(
        &self,
        name: &str,
        config: BareMetalClusterConfig,
    ) -> Result<(), Self::Error>;

    async fn delete_cluster(&self, options: DeleteClusterOptions) -> Result<(), Self::Error>;

    async fn create_etcd_cluster(&self, options: CreateClusterOptions) -> Result<(), Self::Error>;

    async fn delete_etcd_cluster(&self, options: DeleteClusterOptions) -> Result<(), Self::Error>;
}
