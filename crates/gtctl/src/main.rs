//! gtctl: manage GreptimeDB clusters.
//!
//! The bare-metal deployer runs every component as a local process under
//! `$GTCTL_HOME` (default `~/.gtctl`). `cluster create` and `playground`
//! stay in the foreground until interrupted.
//!
//! ```text
//! gtctl cluster create mycluster --datanode-replicas 3
//! gtctl cluster get mycluster
//! gtctl cluster delete mycluster --retain-logs
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::cluster::{CreateArgs, OutputFormat};

#[derive(Parser)]
#[command(
    name = "gtctl",
    about = "gtctl: GreptimeDB cluster manager",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runtime root directory (default: $GTCTL_HOME or ~/.gtctl).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage bare-metal clusters
    Cluster {
        #[command(subcommand)]
        action: ClusterAction,
    },
    /// Start a default cluster and remove it on exit
    Playground {
        /// Readiness timeout per component, in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ClusterAction {
    /// Create a cluster and supervise it until interrupted.
    ///
    /// Without --config a default topology is used: one metasrv, three
    /// datanodes, one frontend and a single-member etcd.
    Create(CreateArgs),
    /// Show one cluster
    Get {
        name: String,
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// List clusters under the runtime root
    List {
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
    /// Delete a stopped cluster's runtime directory
    Delete {
        name: String,
        /// Keep the logs directory.
        #[arg(long)]
        retain_logs: bool,
    },
    /// Change the replica count of a component
    Scale {
        name: String,
        /// Component to scale: datanode or frontend.
        #[arg(short, long)]
        component: String,
        #[arg(short, long)]
        replicas: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| format!("info,gtctl={level}").parse())?,
        )
        .init();

    let root = cli.root.unwrap_or_else(gtctl_core::layout::default_root);

    match cli.command {
        Commands::Cluster { action } => match action {
            ClusterAction::Create(args) => commands::cluster::create(root, args).await,
            ClusterAction::Get { name, output } => {
                commands::cluster::get(root, &name, output).await
            }
            ClusterAction::List { output } => commands::cluster::list(root, output).await,
            ClusterAction::Delete { name, retain_logs } => {
                commands::cluster::delete(root, name, retain_logs).await
            }
            ClusterAction::Scale {
                name,
                component,
                replicas,
            } => commands::cluster::scale(root, &name, &component, replicas).await,
        },
        Commands::Playground { timeout } => commands::playground::run(root, timeout).await,
    }
}
