//! Per-cluster lock file.
//!
//! `<root>/<cluster>/.lock` holds the pid of the gtctl process that manages
//! the cluster. A lock whose pid is gone is stale and gets replaced.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use gtctl_core::RuntimeLayout;
use gtctl_core::layout::read_pid_file;
use tracing::{debug, warn};

use crate::error::{BareMetalError, BareMetalResult};
use crate::runner::is_process_alive;

/// Held for as long as an orchestrator manages the cluster. Dropping it
/// removes the lock file.
#[derive(Debug)]
pub struct ClusterLock {
    path: PathBuf,
}

impl ClusterLock {
    pub fn acquire(layout: &RuntimeLayout) -> BareMetalResult<Self> {
        let path = layout.lock_path();
        let pid = std::process::id();

        // Second pass only after a stale lock was removed.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{pid}")
                        .map_err(BareMetalError::io(format!("failed to write {}", path.display())))?;
                    debug!(lock = %path.display(), pid, "cluster lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    match read_pid_file(&path) {
                        Ok(owner) if is_process_alive(owner) => {
                            return Err(BareMetalError::ClusterLocked {
                                name: layout.cluster_name().to_string(),
                                pid: owner,
                            });
                        }
                        _ => {
                            warn!(lock = %path.display(), "removing stale cluster lock");
                            remove_if_exists(&path).map_err(BareMetalError::io(format!(
                                "failed to remove {}",
                                path.display()
                            )))?;
                        }
                    }
                }
                Err(e) => {
                    return Err(BareMetalError::Io {
                        context: format!("failed to create {}", path.display()),
                        source: e,
                    });
                }
            }
        }

        Err(BareMetalError::Io {
            context: format!("failed to create {}", path.display()),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "lock keeps reappearing"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ClusterLock {
    fn drop(&mut self) {
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to release cluster lock");
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
