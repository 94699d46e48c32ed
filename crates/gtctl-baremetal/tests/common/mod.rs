//! Shared fixtures: scripted binaries, free ports and `/health` servers.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use gtctl_artifacts::{ArtifactManager, ArtifactManagerConfig, Platform};
use gtctl_baremetal::{Cluster, ClusterOptions};
use gtctl_core::{ArtifactConfig, BareMetalClusterConfig};
use gtctl_health::PollPolicy;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Write an executable shell script.
pub fn script(path: &Path, body: &str) -> PathBuf {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_path_buf()
}

/// Prints its arguments, then idles until signalled.
pub const IDLE: &str = r#"echo "$@"
exec sleep 60"#;

/// `etcdctl` reporting an elected leader.
pub const LEADER_TABLE: &str = r#"echo "| ENDPOINT | ID | VERSION | IS LEADER | IS LEARNER |"
echo "| 127.0.0.1:2379 | 8e9e05c52164694d | 3.5.7 | true | false |""#;

/// First of `n` consecutive ports that were free a moment ago.
pub fn free_ports(n: u16) -> u16 {
    for _ in 0..100 {
        let first = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let base = first.local_addr().unwrap().port();
        if base.checked_add(n).is_none() {
            continue;
        }
        let rest: Vec<_> = (1..n)
            .map_while(|i| StdTcpListener::bind(("127.0.0.1", base + i)).ok())
            .collect();
        if rest.len() == usize::from(n - 1) {
            return base;
        }
    }
    panic!("no range of {n} free ports");
}

/// Serve `GET /health` with 200 on `addr` until the handle is aborted.
pub async fn health_server(addr: &str) -> JoinHandle<()> {
    let addr: SocketAddr = addr.parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let app = Router::new().route("/health", get(|| async { "OK" }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    })
}

/// Ports used by [`cluster_config`], relative to its base.
pub struct Ports {
    pub base: u16,
}

impl Ports {
    pub fn etcd_client(&self) -> u16 {
        self.base
    }
    pub fn metasrv_http(&self) -> u16 {
        self.base + 3
    }
    pub fn datanode_rpc(&self, i: u16) -> u16 {
        self.base + 4 + i
    }
    pub fn datanode_http(&self, i: u16) -> u16 {
        self.base + 7 + i
    }
    pub fn frontend_http(&self) -> u16 {
        self.base + 10
    }
}

pub fn addr(port: u16) -> String {
    format!("127.0.0.1:{port}")
}

/// Three datanodes and one frontend on ports from `free_ports(14)`,
/// running the scripted binaries in `bin_dir`.
pub fn cluster_config(name: &str, bin_dir: &Path) -> (BareMetalClusterConfig, Ports) {
    let ports = Ports {
        base: free_ports(14),
    };
    let b = ports.base;
    let mut config = BareMetalClusterConfig::scaffold(name);
    config.cluster.artifact = ArtifactConfig {
        version: None,
        local: Some(bin_dir.join("greptime")),
    };
    config.etcd.artifact = ArtifactConfig {
        version: None,
        local: Some(bin_dir.join("etcd")),
    };
    config.etcd.client_addr = Some(addr(b));
    config.etcd.peer_addr = Some(addr(b + 1));
    config.cluster.meta.server_addr = Some(addr(b + 2));
    config.cluster.meta.http_addr = Some(addr(b + 3));
    config.cluster.datanode.replicas = 3;
    config.cluster.datanode.rpc_addr = Some(addr(b + 4));
    config.cluster.datanode.http_addr = Some(addr(b + 7));
    config.cluster.frontend.replicas = 1;
    config.cluster.frontend.http_addr = Some(addr(b + 10));
    config.cluster.frontend.grpc_addr = Some(addr(b + 11));
    config.cluster.frontend.mysql_addr = Some(addr(b + 12));
    config.cluster.frontend.postgres_addr = Some(addr(b + 13));
    (config, ports)
}

/// Fast polling and a short grace period.
pub fn cluster_options(root: &Path, readiness_timeout: Duration) -> ClusterOptions {
    ClusterOptions {
        root_dir: root.to_path_buf(),
        grace_period: Duration::from_secs(2),
        readiness: PollPolicy::readiness()
            .with_interval(Duration::from_millis(50))
            .with_timeout(readiness_timeout),
        leader: PollPolicy::leader()
            .with_interval(Duration::from_millis(50))
            .with_max_attempts(5),
    }
}

pub fn artifacts(root: &Path) -> Arc<ArtifactManager> {
    let config = ArtifactManagerConfig::new(root.join("artifacts"));
    Arc::new(ArtifactManager::with_platform(config, Platform::new("linux", "amd64")).unwrap())
}

pub fn new_cluster(
    config: BareMetalClusterConfig,
    root: &Path,
    readiness_timeout: Duration,
) -> Cluster {
    Cluster::new(
        config,
        cluster_options(root, readiness_timeout),
        artifacts(root),
        CancellationToken::new(),
    )
    .unwrap()
}

/// Wait until `path` contains `needle`.
pub async fn wait_for_content(path: &Path, needle: &str) -> String {
    for _ in 0..200 {
        if let Ok(content) = std::fs::read_to_string(path) {
            if content.contains(needle) {
                return content;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{} never contained {needle:?}", path.display());
}
