//! Component supervisors.
//!
//! One [`Component`] per server role. A component owns the replicas of its
//! role: it lays out their directories, derives their addresses, renders
//! their command lines and decides when they are ready. Launching and
//! stopping processes is delegated to the shared [`ProcessRunner`].
//!
//! | Component  | Binary     | Replicas | Ready when                      |
//! |------------|------------|----------|---------------------------------|
//! | `etcd`     | `etcd`     | 1        | `etcdctl` reports a leader      |
//! | `metasrv`  | `greptime` | 1        | `GET /health` == 200            |
//! | `datanode` | `greptime` | N        | `GET /health` == 200 on all N   |
//! | `frontend` | `greptime` | N        | `GET /health` == 200 on all N   |

mod datanode;
mod etcd;
mod frontend;
mod metasrv;

pub use datanode::{Datanode, DatanodeArgs};
pub use etcd::{Etcd, EtcdArgs};
pub use frontend::{Frontend, FrontendArgs};
pub use metasrv::{MetaSrv, MetaSrvArgs};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gtctl_core::addr::{self, dial_addr};
use gtctl_core::{ComponentKind, RuntimeLayout};
use gtctl_health::{DEFAULT_PROBE_TIMEOUT, PollError, PollPolicy, all_healthy, poll_until};
use tokio::time::Instant;
use tracing::info;

use crate::error::{BareMetalError, BareMetalResult};
use crate::runner::{ProcessRecord, ProcessRunner};

/// What every component needs from the cluster that owns it.
#[derive(Debug, Clone)]
pub struct ComponentContext {
    pub layout: RuntimeLayout,
    pub runner: ProcessRunner,
    /// Readiness polling for `/health` probes.
    pub readiness: PollPolicy,
    /// Polling for the etcd leader check.
    pub leader: PollPolicy,
}

#[async_trait]
pub trait Component: Send + Sync {
    fn kind(&self) -> ComponentKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn replicas(&self) -> u32;

    /// Command line of replica `index`, without the binary.
    fn build_args(&self, index: u32) -> BareMetalResult<Vec<String>>;

    /// Launch every replica from `binary` and wait until they are ready.
    async fn start(&self, binary: &Path) -> BareMetalResult<Vec<ProcessRecord>>;

    /// Whether every replica answers its health check right now.
    async fn is_running(&self) -> bool;

    /// Remove replica directories; logs stay when `retain_logs`.
    async fn delete(&self, retain_logs: bool) -> BareMetalResult<()>;
}

/// Create directories for every replica of `component` and launch them.
pub(crate) fn spawn_replicas(
    component: &dyn Component,
    ctx: &ComponentContext,
    binary: &Path,
) -> BareMetalResult<Vec<ProcessRecord>> {
    let kind = component.kind();
    (0..component.replicas())
        .map(|index| {
            let dirs = ctx.layout.replica_dirs(kind, index);
            dirs.create().map_err(BareMetalError::io(format!(
                "failed to create directories for {}",
                kind.replica_dir_name(index)
            )))?;
            let args = component.build_args(index)?;
            ctx.runner.spawn(
                &kind.replica_dir_name(index),
                binary,
                &args,
                &dirs,
                &dirs.log_file(kind),
            )
        })
        .collect()
}

pub(crate) fn delete_replicas(
    kind: ComponentKind,
    replicas: u32,
    layout: &RuntimeLayout,
    retain_logs: bool,
) -> BareMetalResult<()> {
    for index in 0..replicas {
        layout
            .replica_dirs(kind, index)
            .remove(retain_logs)
            .map_err(BareMetalError::io(format!(
                "failed to remove directories of {}",
                kind.replica_dir_name(index)
            )))?;
    }
    Ok(())
}

/// Where to look when `kind` misbehaves: the replica's own log directory
/// for singletons, the cluster log directory otherwise.
pub(crate) fn component_log_dir(layout: &RuntimeLayout, kind: ComponentKind) -> PathBuf {
    if kind.is_singleton() {
        layout.replica_dirs(kind, 0).log_dir
    } else {
        layout.logs_dir.clone()
    }
}

/// Health addresses of every replica, in dialable form.
pub(crate) fn health_targets(base: &str, replicas: u32) -> BareMetalResult<Vec<String>> {
    let addrs = addr::replica_addrs(base, replicas)?;
    Ok(addrs.iter().map(|a| dial_addr(a)).collect())
}

pub(crate) async fn probe_all(targets: &[String]) -> bool {
    all_healthy(targets, DEFAULT_PROBE_TIMEOUT).await
}

/// Poll `/health` on every target until all answer 200.
pub(crate) async fn wait_for_health(
    kind: ComponentKind,
    targets: &[String],
    ctx: &ComponentContext,
) -> BareMetalResult<()> {
    let started = Instant::now();
    let result = poll_until(&ctx.readiness, ctx.runner.cancel_token(), || {
        probe_all(targets)
    })
    .await;

    match result {
        Ok(attempts) => {
            info!(component = %kind, replicas = targets.len(), attempts, "component is ready");
            Ok(())
        }
        Err(PollError::Cancelled { .. }) => Err(ctx.runner.cancellation_error(kind.as_str())),
        Err(PollError::Timeout { elapsed, .. }) => Err(BareMetalError::ReadinessTimeout {
            component: kind.to_string(),
            timeout: elapsed,
            log_dir: component_log_dir(&ctx.layout, kind),
        }),
        Err(PollError::Exhausted { .. }) => Err(BareMetalError::ReadinessTimeout {
            component: kind.to_string(),
            timeout: started.elapsed(),
            log_dir: component_log_dir(&ctx.layout, kind),
        }),
    }
}

/// `--name=value`
pub(crate) fn flag(name: &str, value: impl std::fmt::Display) -> String {
    format!("--{name}={value}")
}

pub(crate) fn replica_addr(base: &str, index: u32) -> BareMetalResult<String> {
    Ok(addr::replica_addr(base, index)?)
}

/// Leading arguments shared by every greptime subcommand:
/// `--log-level=<l> --log-dir=<d> <subcommand> start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreptimeArgs {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub subcommand: &'static str,
    pub config_file: Option<PathBuf>,
}

impl GreptimeArgs {
    /// Full command line with the subcommand's own `flags`.
    pub fn render(&self, flags: Vec<String>) -> Vec<String> {
        let mut args = vec![
            flag("log-level", &self.log_level),
            flag("log-dir", self.log_dir.display()),
            self.subcommand.to_string(),
            "start".to_string(),
        ];
        args.extend(flags);
        if let Some(config) = &self.config_file {
            args.push(flag("config-file", config.display()));
        }
        args
    }
}
