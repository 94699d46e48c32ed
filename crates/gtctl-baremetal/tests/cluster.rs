//! End-to-end cluster lifecycles with scripted `etcd`, `etcdctl` and
//! `greptime` binaries. Health endpoints are served by the test itself.

#![cfg(unix)]

mod common;

use std::path::Path;
use std::time::{Duration, Instant};

use common::*;
use gtctl_baremetal::{
    BareMetalError, ClusterState, CreateOptions, DeleteOptions, WaitOptions, is_process_alive,
};
use gtctl_core::layout::read_pid_file;
use gtctl_core::{ClusterMetadata, ComponentKind, RuntimeLayout};

/// `etcd` and `greptime` that idle, plus an `etcdctl` reporting a leader.
fn idle_binaries(bin: &Path) {
    script(&bin.join("etcd"), IDLE);
    script(&bin.join("etcdctl"), LEADER_TABLE);
    script(&bin.join("greptime"), IDLE);
}

async fn serve_all_health(ports: &Ports) -> Vec<tokio::task::JoinHandle<()>> {
    let mut servers = vec![
        health_server(&addr(ports.metasrv_http())).await,
        health_server(&addr(ports.frontend_http())).await,
    ];
    for i in 0..3 {
        servers.push(health_server(&addr(ports.datanode_http(i))).await);
    }
    servers
}

#[tokio::test]
async fn full_cluster_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    idle_binaries(&bin);
    let (config, ports) = cluster_config("demo", &bin);
    let _servers = serve_all_health(&ports).await;

    let mut cluster = new_cluster(config, dir.path(), Duration::from_secs(10));
    assert_eq!(cluster.state(), ClusterState::DirectoriesReady);
    cluster.create(CreateOptions::default()).await.unwrap();
    assert_eq!(cluster.state(), ClusterState::Running);
    assert!(cluster.is_running().await);

    let names: Vec<&str> = cluster.processes().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        ["etcd", "metasrv", "datanode.0", "datanode.1", "datanode.2", "frontend.0"]
    );

    let layout = RuntimeLayout::new(dir.path(), "demo");
    let metadata = ClusterMetadata::read(&layout.metadata_path()).unwrap();
    assert_eq!(metadata.foreground_pid, std::process::id());
    assert_eq!(metadata.config.cluster.datanode.replicas, 3);

    for record in cluster.processes() {
        assert!(record.data_dir.is_dir(), "{}", record.name);
        assert!(record.log_dir.is_dir(), "{}", record.name);
        assert_eq!(read_pid_file(&record.pid_dir.join("pid")).unwrap(), record.pid);
        assert!(is_process_alive(record.pid));
    }

    // Each datanode sees its own id, ports and directories.
    let metasrv = addr(ports.base + 2);
    for i in 0..3u16 {
        let dirs = layout.replica_dirs(ComponentKind::Datanode, u32::from(i));
        let log = wait_for_content(&dirs.log_file(ComponentKind::Datanode), "datanode start").await;
        assert!(log.contains(&format!("--node-id={i}")), "{log}");
        assert!(log.contains(&format!("--metasrv-addrs={metasrv}")), "{log}");
        assert!(log.contains(&format!("--rpc-addr={}", addr(ports.datanode_rpc(i)))), "{log}");
        assert!(log.contains(&format!("--http-addr={}", addr(ports.datanode_http(i)))), "{log}");
        assert!(log.contains(&format!("--data-home={}", dirs.data_dir.display())), "{log}");
    }

    let etcd_log = wait_for_content(
        &layout
            .replica_dirs(ComponentKind::Etcd, 0)
            .log_file(ComponentKind::Etcd),
        "--initial-cluster",
    )
    .await;
    assert!(etcd_log.contains(&format!("--listen-client-urls=http://{}", addr(ports.etcd_client()))));

    let metasrv_log = wait_for_content(
        &layout
            .replica_dirs(ComponentKind::MetaSrv, 0)
            .log_file(ComponentKind::MetaSrv),
        "metasrv start",
    )
    .await;
    assert!(metasrv_log.contains(&format!("--store-addr={}", addr(ports.etcd_client()))));

    let err = cluster.delete(DeleteOptions::default()).await.unwrap_err();
    assert!(matches!(err, BareMetalError::ClusterRunning { .. }));

    let pids: Vec<u32> = cluster.processes().iter().map(|p| p.pid).collect();
    cluster.cancel_token().cancel();
    cluster
        .wait(WaitOptions {
            delete: true,
            retain_logs: false,
        })
        .await
        .unwrap();

    assert_eq!(cluster.state(), ClusterState::Deleted);
    assert!(!layout.exists());
    assert!(pids.iter().all(|pid| !is_process_alive(*pid)));
}

#[tokio::test]
async fn etcd_without_etcdctl_skips_leader_check() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    script(&bin.join("etcd"), IDLE);
    script(&bin.join("greptime"), IDLE);
    let (config, _ports) = cluster_config("etcd-only", &bin);

    let mut cluster = new_cluster(config, dir.path(), Duration::from_secs(10));
    cluster.create_etcd(CreateOptions::default()).await.unwrap();

    assert_eq!(cluster.state(), ClusterState::Running);
    assert_eq!(cluster.processes().len(), 1);
    assert_eq!(cluster.processes()[0].name, "etcd");

    cluster.cancel_token().cancel();
    cluster
        .wait(WaitOptions {
            delete: true,
            retain_logs: true,
        })
        .await
        .unwrap();

    let layout = cluster.layout();
    assert!(layout.replica_dirs(ComponentKind::Etcd, 0).log_dir.is_dir());
    assert!(!layout.data_dir.exists());
}

#[tokio::test]
async fn cancellation_during_readiness_stops_started_components() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    idle_binaries(&bin);
    let (config, _ports) = cluster_config("cancelled", &bin);

    // metasrv never becomes healthy.
    let mut cluster = new_cluster(config, dir.path(), Duration::from_secs(60));
    let cancel = cluster.cancel_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let err = cluster.create(CreateOptions::default()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(
        matches!(&err, BareMetalError::Cancelled { component } if component == "metasrv"),
        "{err}"
    );
    assert_eq!(cluster.state(), ClusterState::ShuttingDown);

    let layout = RuntimeLayout::new(dir.path(), "cancelled");
    for kind in [ComponentKind::Etcd, ComponentKind::MetaSrv] {
        let pid = read_pid_file(&layout.replica_dirs(kind, 0).pid_file()).unwrap();
        assert!(!is_process_alive(pid), "{kind} still alive");
    }
}

#[tokio::test]
async fn readiness_timeout_stops_started_components() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    idle_binaries(&bin);
    let (config, _ports) = cluster_config("slow", &bin);

    let mut cluster = new_cluster(config, dir.path(), Duration::from_millis(300));
    let err = cluster.create(CreateOptions::default()).await.unwrap_err();
    match err {
        BareMetalError::ReadinessTimeout {
            component, log_dir, ..
        } => {
            assert_eq!(component, "metasrv");
            assert!(log_dir.ends_with("logs/metasrv"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let pid = read_pid_file(
        &cluster
            .layout()
            .replica_dirs(ComponentKind::Etcd, 0)
            .pid_file(),
    )
    .unwrap();
    assert!(!is_process_alive(pid));
    assert!(cluster.cancel_token().is_cancelled());
}

#[tokio::test]
async fn failing_datanode_tears_down_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    script(&bin.join("etcd"), IDLE);
    script(&bin.join("etcdctl"), LEADER_TABLE);
    script(
        &bin.join("greptime"),
        r#"if [ "$3" = datanode ]; then
  echo "datanode refused to start" >&2
  exit 1
fi
exec sleep 60"#,
    );
    let (config, ports) = cluster_config("broken", &bin);
    let _metasrv = health_server(&addr(ports.metasrv_http())).await;

    let mut cluster = new_cluster(config, dir.path(), Duration::from_secs(30));
    let started = Instant::now();
    let err = cluster.create(CreateOptions::default()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(15));

    match &err {
        BareMetalError::ProcessExited {
            component, status, ..
        } => {
            assert!(component.starts_with("datanode."), "{component}");
            assert!(status.contains('1'), "{status}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let layout = cluster.layout();
    for kind in [ComponentKind::Etcd, ComponentKind::MetaSrv] {
        let pid = read_pid_file(&layout.replica_dirs(kind, 0).pid_file()).unwrap();
        assert!(!is_process_alive(pid), "{kind} still alive");
    }
    let log = std::fs::read_to_string(
        layout
            .replica_dirs(ComponentKind::Datanode, 0)
            .log_file(ComponentKind::Datanode),
    )
    .unwrap();
    assert!(log.contains("datanode refused to start"));
}

#[tokio::test]
async fn crash_after_startup_is_reported_by_wait() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    let trigger = dir.path().join("crash");
    script(&bin.join("etcd"), IDLE);
    script(&bin.join("etcdctl"), LEADER_TABLE);
    script(
        &bin.join("greptime"),
        &format!(
            r#"if [ "$3" = frontend ]; then
  while [ ! -f "{}" ]; do sleep 0.05; done
  exit 3
fi
exec sleep 60"#,
            trigger.display()
        ),
    );
    let (config, ports) = cluster_config("crashy", &bin);
    let _servers = serve_all_health(&ports).await;

    let mut cluster = new_cluster(config, dir.path(), Duration::from_secs(10));
    cluster.create(CreateOptions::default()).await.unwrap();
    let pids: Vec<u32> = cluster.processes().iter().map(|p| p.pid).collect();

    std::fs::write(&trigger, "").unwrap();
    let err = tokio::time::timeout(Duration::from_secs(15), cluster.wait(WaitOptions::default()))
        .await
        .unwrap()
        .unwrap_err();

    assert!(
        matches!(&err, BareMetalError::ProcessExited { component, .. } if component == "frontend.0"),
        "{err}"
    );
    assert_eq!(cluster.failures().len(), 1);
    assert!(pids.iter().all(|pid| !is_process_alive(*pid)));
    // Without `delete` the runtime directory stays for inspection.
    assert!(cluster.layout().exists());
}

#[tokio::test]
async fn second_orchestrator_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    idle_binaries(&bin);
    let (config, _ports) = cluster_config("shared", &bin);

    let first = new_cluster(config.clone(), dir.path(), Duration::from_secs(1));
    let err = gtctl_baremetal::Cluster::new(
        config.clone(),
        cluster_options(dir.path(), Duration::from_secs(1)),
        artifacts(dir.path()),
        tokio_util::sync::CancellationToken::new(),
    )
    .err()
    .unwrap();
    assert!(matches!(
        err,
        BareMetalError::ClusterLocked { ref name, pid } if name == "shared" && pid == std::process::id()
    ));

    drop(first);
    new_cluster(config, dir.path(), Duration::from_secs(1));
}

#[tokio::test]
async fn invalid_config_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    idle_binaries(&bin);
    let (mut config, _ports) = cluster_config("invalid", &bin);
    config.cluster.datanode.replicas = 0;

    let err = gtctl_baremetal::Cluster::new(
        config,
        cluster_options(dir.path(), Duration::from_secs(1)),
        artifacts(dir.path()),
        tokio_util::sync::CancellationToken::new(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, BareMetalError::Validation(_)));
    assert!(!RuntimeLayout::new(dir.path(), "invalid").exists());
}

#[tokio::test]
async fn missing_release_aborts_before_any_process_starts() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, axum::Router::new()).await.unwrap();
    });

    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    let spawned = dir.path().join("spawned");
    script(
        &bin.join("etcd"),
        &format!("touch {}\nexec sleep 60", spawned.display()),
    );
    script(&bin.join("etcdctl"), LEADER_TABLE);
    let (mut config, _ports) = cluster_config("unreleased", &bin);
    config.cluster.artifact = gtctl_core::ArtifactConfig::version("v0.4.0");

    let mut manager = gtctl_artifacts::ArtifactManagerConfig::new(dir.path().join("artifacts"));
    manager.download_base = upstream.clone();
    manager.release_api_base = upstream;
    let artifacts = gtctl_artifacts::ArtifactManager::with_platform(
        manager,
        gtctl_artifacts::Platform::new("linux", "amd64"),
    )
    .unwrap();
    let mut cluster = gtctl_baremetal::Cluster::new(
        config,
        cluster_options(dir.path(), Duration::from_secs(5)),
        std::sync::Arc::new(artifacts),
        tokio_util::sync::CancellationToken::new(),
    )
    .unwrap();

    let err = cluster.create(CreateOptions::default()).await.unwrap_err();
    assert!(
        matches!(
            err,
            BareMetalError::Artifact(gtctl_artifacts::ArtifactError::Download { status: 404, .. })
        ),
        "unexpected error: {err}"
    );
    assert!(cluster.processes().is_empty());
    assert_eq!(cluster.state(), ClusterState::ShuttingDown);
    assert_eq!(std::fs::read_dir(&cluster.layout().pids_dir).unwrap().count(), 0);
    assert!(!spawned.exists());
}
