//! Process runner: launches replicas and supervises them until shutdown.
//!
//! Every spawned child gets a monitor task on the runner's [`TaskTracker`].
//! The monitor waits for whichever comes first:
//!
//! - the child exits on its own: the exit is recorded and the shared
//!   [`CancellationToken`] is cancelled so the rest of the cohort stops;
//! - the token is cancelled: the child receives SIGTERM, and is killed if it
//!   is still alive after the grace period.
//!
//! Waiting on the tracker therefore never outlives `grace_period` once the
//! token is cancelled.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gtctl_core::ReplicaDirs;
use gtctl_core::layout::write_pid_file;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{BareMetalError, BareMetalResult};

/// Time a child gets between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// A launched replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub name: String,
    pub pid: u32,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub pid_dir: PathBuf,
}

/// A child that exited while it was expected to keep running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub name: String,
    pub status: String,
    pub log_dir: PathBuf,
}

impl From<ProcessExit> for BareMetalError {
    fn from(exit: ProcessExit) -> Self {
        BareMetalError::ProcessExited {
            component: exit.name,
            status: exit.status,
            log_dir: exit.log_dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    cancel: CancellationToken,
    tracker: TaskTracker,
    grace_period: Duration,
    exits: Arc<Mutex<Vec<ProcessExit>>>,
}

impl ProcessRunner {
    pub fn new(cancel: CancellationToken, grace_period: Duration) -> Self {
        Self {
            cancel,
            tracker: TaskTracker::new(),
            grace_period,
            exits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of children still being supervised.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Launch `binary` with stdout and stderr appended to `log_file` and its
    /// pid written to the replica's pid file.
    pub fn spawn(
        &self,
        name: &str,
        binary: &Path,
        args: &[String],
        dirs: &ReplicaDirs,
        log_file: &Path,
    ) -> BareMetalResult<ProcessRecord> {
        let start_err = |source| BareMetalError::ProcessStart {
            component: name.to_string(),
            binary: binary.to_path_buf(),
            source,
        };

        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(BareMetalError::io(format!("failed to open {}", log_file.display())))?;
        let stderr = stdout
            .try_clone()
            .map_err(BareMetalError::io(format!("failed to open {}", log_file.display())))?;

        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        // Keep terminal signals away from the children; shutdown is driven
        // by the token so components stop in a controlled way.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(start_err)?;
        let pid = child.id().ok_or_else(|| {
            start_err(io::Error::new(
                io::ErrorKind::NotFound,
                "process exited before its pid was read",
            ))
        })?;

        let pid_file = dirs.pid_file();
        write_pid_file(&pid_file, pid)
            .map_err(BareMetalError::io(format!("failed to write {}", pid_file.display())))?;

        info!(component = %name, pid, log = %log_file.display(), "process started");
        debug!(component = %name, binary = %binary.display(), ?args, "process arguments");

        let record = ProcessRecord {
            name: name.to_string(),
            pid,
            data_dir: dirs.data_dir.clone(),
            log_dir: dirs.log_dir.clone(),
            pid_dir: dirs.pid_dir.clone(),
        };
        self.tracker
            .spawn(self.clone().monitor(child, record.clone()).in_current_span());
        Ok(record)
    }

    async fn monitor(self, mut child: Child, record: ProcessRecord) {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = self.cancel.cancelled() => None,
        };

        match exited {
            Some(status) => {
                let status = describe(status);
                if self.cancel.is_cancelled() {
                    info!(component = %record.name, %status, "process exited");
                    return;
                }
                error!(
                    component = %record.name,
                    %status,
                    log_dir = %record.log_dir.display(),
                    "process exited unexpectedly, stopping cluster"
                );
                self.record_exit(ProcessExit {
                    name: record.name,
                    status,
                    log_dir: record.log_dir,
                });
                self.cancel.cancel();
            }
            None => terminate(&mut child, &record, self.grace_period).await,
        }
    }

    fn record_exit(&self, exit: ProcessExit) {
        match self.exits.lock() {
            Ok(mut exits) => exits.push(exit),
            Err(poisoned) => poisoned.into_inner().push(exit),
        }
    }

    /// Children that exited before shutdown, in exit order.
    pub fn failures(&self) -> Vec<ProcessExit> {
        match self.exits.lock() {
            Ok(exits) => exits.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The error a cancelled operation on `component` should report: the
    /// first recorded exit if a child died, plain cancellation otherwise.
    pub fn cancellation_error(&self, component: &str) -> BareMetalError {
        match self.failures().into_iter().next() {
            Some(exit) => exit.into(),
            None => BareMetalError::Cancelled {
                component: component.to_string(),
            },
        }
    }

    /// Wait for every monitor to finish. Returns once the token has been
    /// cancelled and all children are gone.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Cancel the token and wait until every child is stopped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.wait().await;
    }
}

async fn terminate(child: &mut Child, record: &ProcessRecord, grace_period: Duration) {
    if let Err(e) = send_signal(record.pid, libc::SIGTERM) {
        debug!(component = %record.name, error = %e, "failed to send SIGTERM");
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(Ok(status)) => {
            info!(component = %record.name, %status, "process stopped");
        }
        Ok(Err(e)) => warn!(component = %record.name, error = %e, "failed to wait for process"),
        Err(_) => {
            warn!(
                component = %record.name,
                pid = record.pid,
                grace_period = ?grace_period,
                "process ignored SIGTERM, killing"
            );
            if let Err(e) = child.kill().await {
                warn!(component = %record.name, error = %e, "failed to kill process");
            }
        }
    }
}

fn describe(status: io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("unknown status: {e}"),
    }
}

fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // Zero and negative pids address process groups.
    let pid = libc::pid_t::try_from(pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) takes plain integers and touches no memory we own.
    if unsafe { libc::kill(pid, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether a process with `pid` exists.
pub fn is_process_alive(pid: u32) -> bool {
    match send_signal(pid, 0) {
        Ok(()) => true,
        // The process exists but belongs to someone else.
        Err(e) => e.raw_os_error() == Some(libc::EPERM),
    }
}
