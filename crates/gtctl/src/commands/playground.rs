use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use gtctl_baremetal::{BareMetalDeployer, WaitOptions, install_signal_handler};
use gtctl_core::{BareMetalClusterConfig, CreateClusterOptions, Deployer};
use tokio_util::sync::CancellationToken;

/// Cluster name used by the playground.
pub const PLAYGROUND_CLUSTER: &str = "playground";

/// Run the default topology in the foreground and remove every trace of it
/// on exit.
pub async fn run(root: PathBuf, timeout: Option<u64>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    install_signal_handler(cancel.clone()).context("failed to install signal handler")?;
    let deployer = BareMetalDeployer::new(root).with_cancel_token(cancel);

    deployer
        .create_cluster(CreateClusterOptions {
            config: BareMetalClusterConfig::scaffold(PLAYGROUND_CLUSTER),
            force_download: false,
            timeout: timeout.map(Duration::from_secs),
        })
        .await
        .context("failed to start the playground")?;

    println!("✓ Playground is running. Connect with:");
    println!("    mysql -h 127.0.0.1 -P 4002");
    println!("    psql -h 127.0.0.1 -p 4003 -d public");
    println!("  Press Ctrl+C to stop.");

    deployer
        .wait(WaitOptions {
            delete: true,
            retain_logs: false,
        })
        .await?;
    Ok(())
}
