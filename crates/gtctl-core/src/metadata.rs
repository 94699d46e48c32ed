//! The per-cluster metadata file, `<root>/<cluster>/<cluster>.yaml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::BareMetalClusterConfig;
use crate::error::MetadataError;

/// What a running cluster records about itself for other invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    pub config: BareMetalClusterConfig,
    /// RFC 3339 creation time.
    pub create_timestamp: String,
    /// Pid of the gtctl process that owns the cluster in the foreground.
    pub foreground_pid: u32,
}

impl ClusterMetadata {
    pub fn new(config: BareMetalClusterConfig, foreground_pid: u32) -> Self {
        Self {
            config,
            create_timestamp: chrono::Utc::now().to_rfc3339(),
            foreground_pid,
        }
    }

    pub fn read(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                MetadataError::NotFound(path.to_path_buf())
            } else {
                MetadataError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        serde_yaml::from_str(&content).map_err(|source| MetadataError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), MetadataError> {
        let yaml = serde_yaml::to_string(self).map_err(|source| MetadataError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, yaml).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
