//! Domain types shared by the artifact manager and the deployers.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Version alias resolved against the upstream release index.
pub const LATEST_VERSION: &str = "latest";

/// Log level handed to managed processes when none is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log levels accepted by both etcd and greptime.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ── Artifacts ──────────────────────────────────────────────────────

/// A downloadable binary package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// The coordination service: `etcd`, `etcdctl` and `etcdutl`.
    Etcd,
    /// The database: a single `greptime` binary.
    #[serde(rename = "greptime")]
    GreptimeDB,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Etcd => "etcd",
            ArtifactKind::GreptimeDB => "greptime",
        }
    }

    /// Name of the server binary inside the installed `bin` directory.
    pub fn binary_name(&self) -> &'static str {
        match self {
            ArtifactKind::Etcd => "etcd",
            ArtifactKind::GreptimeDB => "greptime",
        }
    }

    /// Every binary the package must provide after installation.
    pub fn binaries(&self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Etcd => &["etcd", "etcdctl", "etcdutl"],
            ArtifactKind::GreptimeDB => &["greptime"],
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for a runnable binary of a given kind.
///
/// When `local_path` is set nothing is downloaded and the path is used as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub kind: ArtifactKind,
    pub version: String,
    pub local_path: Option<PathBuf>,
}

impl ArtifactSpec {
    pub fn version(kind: ArtifactKind, version: impl Into<String>) -> Self {
        Self {
            kind,
            version: version.into(),
            local_path: None,
        }
    }

    pub fn local(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            version: "local".to_string(),
            local_path: Some(path.into()),
        }
    }

    pub fn is_latest(&self) -> bool {
        self.local_path.is_none() && self.version == LATEST_VERSION
    }
}

// ── Components ─────────────────────────────────────────────────────

/// A kind of managed server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Etcd,
    MetaSrv,
    Datanode,
    Frontend,
}

impl ComponentKind {
    /// Start order of a full cluster.
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::Etcd,
        ComponentKind::MetaSrv,
        ComponentKind::Datanode,
        ComponentKind::Frontend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Etcd => "etcd",
            ComponentKind::MetaSrv => "metasrv",
            ComponentKind::Datanode => "datanode",
            ComponentKind::Frontend => "frontend",
        }
    }

    /// Singletons get an index-less directory name (`metasrv`, not `metasrv.0`).
    pub fn is_singleton(&self) -> bool {
        matches!(self, ComponentKind::Etcd | ComponentKind::MetaSrv)
    }

    /// Directory name for one replica under `data/`, `logs/` and `pids/`.
    pub fn replica_dir_name(&self, index: u32) -> String {
        if self.is_singleton() {
            self.as_str().to_string()
        } else {
            format!("{}.{index}", self.as_str())
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
