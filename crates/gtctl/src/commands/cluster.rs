use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, ValueEnum};
use gtctl_baremetal::{BareMetalDeployer, WaitOptions, install_signal_handler};
use gtctl_core::{
    ArtifactConfig, BareMetalClusterConfig, ClusterInfo, CreateClusterOptions,
    DeleteClusterOptions, Deployer,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    pub name: String,
    /// Cluster configuration (YAML). Defaults to the built-in topology.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// GreptimeDB release to run, or "latest".
    #[arg(long)]
    pub greptime_version: Option<String>,
    /// etcd release to run.
    #[arg(long)]
    pub etcd_version: Option<String>,
    /// Run this greptime binary instead of downloading one.
    #[arg(long, conflicts_with = "greptime_version")]
    pub greptime_binary: Option<PathBuf>,
    /// Run this etcd binary instead of downloading one.
    #[arg(long, conflicts_with = "etcd_version")]
    pub etcd_binary: Option<PathBuf>,
    #[arg(long)]
    pub datanode_replicas: Option<u32>,
    #[arg(long)]
    pub frontend_replicas: Option<u32>,
    /// Download and reinstall artifacts even if cached.
    #[arg(long)]
    pub always_download: bool,
    /// Keep logs when the cluster is removed on exit.
    #[arg(long)]
    pub retain_logs: bool,
    /// Readiness timeout per component, in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl CreateArgs {
    /// The configuration file (or the default topology) with command-line
    /// overrides applied.
    pub fn cluster_config(&self) -> anyhow::Result<BareMetalClusterConfig> {
        let mut config = match &self.config {
            Some(path) => BareMetalClusterConfig::from_file(path)?,
            None => BareMetalClusterConfig::scaffold(&self.name),
        };
        config.cluster.name = self.name.clone();

        if let Some(version) = &self.greptime_version {
            config.cluster.artifact = ArtifactConfig::version(version);
        }
        if let Some(path) = &self.greptime_binary {
            config.cluster.artifact = local(path);
        }
        if let Some(version) = &self.etcd_version {
            config.etcd.artifact = ArtifactConfig::version(version);
        }
        if let Some(path) = &self.etcd_binary {
            config.etcd.artifact = local(path);
        }
        if let Some(replicas) = self.datanode_replicas {
            config.cluster.datanode.replicas = replicas;
        }
        if let Some(replicas) = self.frontend_replicas {
            config.cluster.frontend.replicas = replicas;
        }

        config.validate()?;
        Ok(config)
    }
}

fn local(path: &Path) -> ArtifactConfig {
    ArtifactConfig {
        version: None,
        local: Some(path.to_path_buf()),
    }
}

/// Create the cluster and stay in the foreground until it stops.
///
/// SIGINT or SIGTERM stops every component and removes the runtime
/// directory; `--retain-logs` keeps the logs.
pub async fn create(root: PathBuf, args: CreateArgs) -> anyhow::Result<()> {
    let config = args.cluster_config()?;
    let name = config.cluster.name.clone();

    let cancel = CancellationToken::new();
    install_signal_handler(cancel.clone()).context("failed to install signal handler")?;
    let deployer = BareMetalDeployer::new(root).with_cancel_token(cancel);

    deployer
        .create_cluster(CreateClusterOptions {
            config,
            force_download: args.always_download,
            timeout: args.timeout.map(Duration::from_secs),
        })
        .await
        .with_context(|| format!("failed to create cluster '{name}'"))?;

    println!("✓ Cluster '{name}' is running. Press Ctrl+C to stop it.");
    deployer
        .wait(WaitOptions {
            delete: true,
            retain_logs: args.retain_logs,
        })
        .await
        .with_context(|| format!("cluster '{name}' stopped with an error"))?;
    info!(cluster = %name, "cluster stopped");
    Ok(())
}

pub async fn get(root: PathBuf, name: &str, output: OutputFormat) -> anyhow::Result<()> {
    let info = BareMetalDeployer::new(root).get_cluster(name).await?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
        OutputFormat::Text => print!("{}", format_cluster(&info)),
    }
    Ok(())
}

pub async fn list(root: PathBuf, output: OutputFormat) -> anyhow::Result<()> {
    let clusters = BareMetalDeployer::new(root).list_clusters().await?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&clusters)?),
        OutputFormat::Text => {
            if clusters.is_empty() {
                println!("No clusters.");
            }
            for info in &clusters {
                println!("{}\t{}", info.name, status(info));
            }
        }
    }
    Ok(())
}

pub async fn delete(root: PathBuf, name: String, retain_logs: bool) -> anyhow::Result<()> {
    BareMetalDeployer::new(root)
        .delete_cluster(DeleteClusterOptions {
            name: name.clone(),
            retain_logs,
        })
        .await
        .with_context(|| format!("failed to delete cluster '{name}'"))?;
    println!("✓ Deleted cluster '{name}'");
    Ok(())
}

pub async fn scale(
    root: PathBuf,
    name: &str,
    component: &str,
    replicas: u32,
) -> anyhow::Result<()> {
    let deployer = BareMetalDeployer::new(root);
    let info = deployer.get_cluster(name).await?;
    let mut config = info
        .metadata
        .map(|m| m.config)
        .with_context(|| format!("cluster '{name}' has no recorded configuration"))?;

    match component {
        "datanode" => config.cluster.datanode.replicas = replicas,
        "frontend" => config.cluster.frontend.replicas = replicas,
        other => anyhow::bail!("cannot scale '{other}': only datanode and frontend scale"),
    }
    config.validate()?;

    deployer.update_cluster(name, config).await?;
    Ok(())
}

fn status(info: &ClusterInfo) -> &'static str {
    if info.is_running() { "running" } else { "stopped" }
}

/// Human-readable summary of one cluster.
pub fn format_cluster(info: &ClusterInfo) -> String {
    let mut out = format!("Cluster: {} ({})\n", info.name, status(info));
    if let Some(metadata) = &info.metadata {
        out.push_str(&format!("Created: {}\n", metadata.create_timestamp));
        out.push_str(&format!("Owner pid: {}\n", metadata.foreground_pid));
    }
    for component in &info.components {
        if component.replicas.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{}:\n", component.kind));
        for replica in &component.replicas {
            let pid = replica
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let state = if replica.alive { "alive" } else { "dead" };
            out.push_str(&format!(
                "  [{}] pid {pid:<8} {state:<6} {}\n",
                replica.index,
                replica.log_dir.display()
            ));
        }
    }
    out
}
