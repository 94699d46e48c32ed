//! On-disk runtime layout of a bare-metal cluster.
//!
//! ```text
//! <root>/
//!   artifacts/<kind>/<version>/{pkg,bin}/
//!   <cluster>/
//!     <cluster>.yaml
//!     .lock
//!     data/<component>[.<i>]/
//!     logs/<component>[.<i>]/<component>.log
//!     pids/<component>[.<i>]/pid
//! ```
//!
//! The layout is the durable source of truth: a later `gtctl` invocation can
//! find every replica's pid and logs without talking to the process that
//! started them.

use std::io;
use std::path::{Path, PathBuf};

use crate::types::ComponentKind;

/// Environment variable overriding the runtime root.
pub const HOME_ENV: &str = "GTCTL_HOME";

const PID_FILE: &str = "pid";
const LOCK_FILE: &str = ".lock";

/// Default runtime root: `$GTCTL_HOME`, else `$HOME/.gtctl`.
pub fn default_root() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(home);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".gtctl")
}

/// Artifact cache shared by every cluster under `root`.
pub fn artifacts_dir(root: &Path) -> PathBuf {
    root.join("artifacts")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    cluster_name: String,
    pub root_dir: PathBuf,
    pub cluster_dir: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub pids_dir: PathBuf,
}

/// Directories owned by one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaDirs {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub pid_dir: PathBuf,
}

impl RuntimeLayout {
    pub fn new(root: &Path, cluster_name: &str) -> Self {
        let cluster_dir = root.join(cluster_name);
        Self {
            cluster_name: cluster_name.to_string(),
            root_dir: root.to_path_buf(),
            data_dir: cluster_dir.join("data"),
            logs_dir: cluster_dir.join("logs"),
            pids_dir: cluster_dir.join("pids"),
            cluster_dir,
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Create `data/`, `logs/` and `pids/`.
    pub fn create(&self) -> io::Result<()> {
        for dir in [&self.data_dir, &self.logs_dir, &self.pids_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.cluster_dir.is_dir()
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.cluster_dir.join(format!("{}.yaml", self.cluster_name))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.cluster_dir.join(LOCK_FILE)
    }

    pub fn replica_dirs(&self, kind: ComponentKind, index: u32) -> ReplicaDirs {
        let name = kind.replica_dir_name(index);
        ReplicaDirs {
            data_dir: self.data_dir.join(&name),
            log_dir: self.logs_dir.join(&name),
            pid_dir: self.pids_dir.join(&name),
        }
    }

    /// Remove the whole cluster directory, or everything but `logs/`.
    pub fn remove(&self, retain_logs: bool) -> io::Result<()> {
        if !retain_logs {
            return remove_dir_if_exists(&self.cluster_dir);
        }
        remove_dir_if_exists(&self.data_dir)?;
        remove_dir_if_exists(&self.pids_dir)?;
        remove_file_if_exists(&self.metadata_path())?;
        remove_file_if_exists(&self.lock_path())
    }
}

impl ReplicaDirs {
    pub fn create(&self) -> io::Result<()> {
        for dir in [&self.data_dir, &self.log_dir, &self.pid_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn log_file(&self, kind: ComponentKind) -> PathBuf {
        self.log_dir.join(format!("{}.log", kind.as_str()))
    }

    pub fn pid_file(&self) -> PathBuf {
        self.pid_dir.join(PID_FILE)
    }

    /// Data and pid directories always go; logs stay when `retain_logs`.
    pub fn remove(&self, retain_logs: bool) -> io::Result<()> {
        remove_dir_if_exists(&self.data_dir)?;
        remove_dir_if_exists(&self.pid_dir)?;
        if !retain_logs {
            remove_dir_if_exists(&self.log_dir)?;
        }
        Ok(())
    }
}

/// Read the pid recorded in a replica's pid file.
pub fn read_pid_file(path: &Path) -> io::Result<u32> {
    let content = std::fs::read_to_string(path)?;
    content
        .trim()
        .parse::<u32>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    std::fs::write(path, format!("{pid}\n"))
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
