//! Bare-metal cluster configuration.
//!
//! Loaded from YAML (camelCase keys). Every address a component listens on
//! is a base `host:port`; replicas derive theirs by port offset
//! (see [`crate::addr`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::addr::{self, AddrError};
use crate::error::ValidationError;
use crate::types::{ArtifactKind, ArtifactSpec, DEFAULT_LOG_LEVEL, LATEST_VERSION, LOG_LEVELS};

/// etcd release used when the config does not pin one.
pub const DEFAULT_ETCD_VERSION: &str = "v3.5.7";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalClusterConfig {
    pub cluster: GreptimeClusterConfig,
    pub etcd: EtcdConfig,
}

/// Where a binary comes from: a released version, or a file on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GreptimeClusterConfig {
    pub name: String,
    #[serde(default)]
    pub artifact: ArtifactConfig,
    pub meta: MetaSrvConfig,
    pub datanode: DatanodeConfig,
    pub frontend: FrontendConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetaSrvConfig {
    pub server_addr: Option<String>,
    pub http_addr: Option<String>,
    pub log_level: Option<String>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatanodeConfig {
    pub replicas: u32,
    pub rpc_addr: Option<String>,
    pub http_addr: Option<String>,
    pub log_level: Option<String>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrontendConfig {
    pub replicas: u32,
    pub http_addr: Option<String>,
    pub grpc_addr: Option<String>,
    pub mysql_addr: Option<String>,
    pub postgres_addr: Option<String>,
    pub log_level: Option<String>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdConfig {
    #[serde(default)]
    pub artifact: ArtifactConfig,
    pub client_addr: Option<String>,
    pub peer_addr: Option<String>,
    pub log_level: Option<String>,
}

impl ArtifactConfig {
    pub fn version(version: &str) -> Self {
        Self {
            version: Some(version.to_string()),
            local: None,
        }
    }

    /// Resolve into an artifact spec; a local path wins over a version.
    pub fn to_spec(&self, kind: ArtifactKind, default_version: &str) -> ArtifactSpec {
        match &self.local {
            Some(path) => ArtifactSpec::local(kind, path.clone()),
            None => ArtifactSpec::version(
                kind,
                self.version.as_deref().unwrap_or(default_version),
            ),
        }
    }

    fn validate(&self, kind: ArtifactKind) -> Result<(), ValidationError> {
        if let Some(path) = &self.local {
            if !path.is_file() {
                return Err(ValidationError::MissingLocalArtifact {
                    artifact: kind.as_str(),
                    path: path.clone(),
                });
            }
        } else if self.version.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(ValidationError::EmptyVersion {
                artifact: kind.as_str(),
            });
        }
        Ok(())
    }
}

impl BareMetalClusterConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content).map_err(|source| ConfigLoadError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// A single-machine cluster with three datanodes and one frontend.
    pub fn scaffold(name: &str) -> Self {
        BareMetalClusterConfig {
            cluster: GreptimeClusterConfig {
                name: name.to_string(),
                artifact: ArtifactConfig::version(LATEST_VERSION),
                meta: MetaSrvConfig {
                    server_addr: Some("0.0.0.0:3002".to_string()),
                    http_addr: Some("0.0.0.0:14001".to_string()),
                    log_level: None,
                    config: None,
                },
                datanode: DatanodeConfig {
                    replicas: 3,
                    rpc_addr: Some("0.0.0.0:14100".to_string()),
                    http_addr: Some("0.0.0.0:14300".to_string()),
                    log_level: None,
                    config: None,
                },
                frontend: FrontendConfig {
                    replicas: 1,
                    http_addr: Some("0.0.0.0:4000".to_string()),
                    grpc_addr: Some("0.0.0.0:4001".to_string()),
                    mysql_addr: Some("0.0.0.0:4002".to_string()),
                    postgres_addr: Some("0.0.0.0:4003".to_string()),
                    log_level: None,
                    config: None,
                },
            },
            etcd: EtcdConfig {
                artifact: ArtifactConfig::version(DEFAULT_ETCD_VERSION),
                client_addr: Some("127.0.0.1:2379".to_string()),
                peer_addr: Some("127.0.0.1:2380".to_string()),
                log_level: None,
            },
        }
    }

    pub fn greptime_artifact(&self) -> ArtifactSpec {
        self.cluster
            .artifact
            .to_spec(ArtifactKind::GreptimeDB, LATEST_VERSION)
    }

    pub fn etcd_artifact(&self) -> ArtifactSpec {
        self.etcd
            .artifact
            .to_spec(ArtifactKind::Etcd, DEFAULT_ETCD_VERSION)
    }

    /// Check everything that can be checked without starting a process.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_cluster_name(&self.cluster.name)?;
        self.cluster.artifact.validate(ArtifactKind::GreptimeDB)?;
        self.etcd.artifact.validate(ArtifactKind::Etcd)?;

        // etcd
        let c = "etcd";
        required_addr(c, "clientAddr", self.etcd.client_addr.as_deref(), 1)?;
        required_addr(c, "peerAddr", self.etcd.peer_addr.as_deref(), 1)?;
        validate_log_level(c, self.etcd.log_level.as_deref())?;

        // metasrv
        let c = "metasrv";
        let meta = &self.cluster.meta;
        required_addr(c, "serverAddr", meta.server_addr.as_deref(), 1)?;
        required_addr(c, "httpAddr", meta.http_addr.as_deref(), 1)?;
        validate_log_level(c, meta.log_level.as_deref())?;
        validate_config_file(c, meta.config.as_deref())?;

        // datanode
        let c = "datanode";
        let datanode = &self.cluster.datanode;
        if datanode.replicas == 0 {
            return Err(ValidationError::NoReplicas { component: c });
        }
        optional_addr(c, "rpcAddr", datanode.rpc_addr.as_deref(), datanode.replicas)?;
        required_addr(c, "httpAddr", datanode.http_addr.as_deref(), datanode.replicas)?;
        validate_log_level(c, datanode.log_level.as_deref())?;
        validate_config_file(c, datanode.config.as_deref())?;

        // frontend
        let c = "frontend";
        let frontend = &self.cluster.frontend;
        if frontend.replicas == 0 {
            return Err(ValidationError::NoReplicas { component: c });
        }
        let n = frontend.replicas;
        required_addr(c, "httpAddr", frontend.http_addr.as_deref(), n)?;
        optional_addr(c, "grpcAddr", frontend.grpc_addr.as_deref(), n)?;
        optional_addr(c, "mysqlAddr", frontend.mysql_addr.as_deref(), n)?;
        optional_addr(c, "postgresAddr", frontend.postgres_addr.as_deref(), n)?;
        validate_log_level(c, frontend.log_level.as_deref())?;
        validate_config_file(c, frontend.config.as_deref())?;

        Ok(())
    }
}

/// Resolved log level: the configured one, or the default.
pub fn log_level(configured: Option<&str>) -> &str {
    configured.unwrap_or(DEFAULT_LOG_LEVEL)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

fn validate_cluster_name(name: &str) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidClusterName(name.to_string()))
    }
}

fn required_addr(
    component: &'static str,
    field: &'static str,
    addr: Option<&str>,
    replicas: u32,
) -> Result<(), ValidationError> {
    match addr {
        Some(addr) if !addr.trim().is_empty() => check_addr(component, field, addr, replicas),
        _ => Err(ValidationError::MissingAddress { component, field }),
    }
}

fn optional_addr(
    component: &'static str,
    field: &'static str,
    addr: Option<&str>,
    replicas: u32,
) -> Result<(), ValidationError> {
    match addr {
        Some(addr) => check_addr(component, field, addr, replicas),
        None => Ok(()),
    }
}

fn check_addr(
    component: &'static str,
    field: &'static str,
    addr: &str,
    replicas: u32,
) -> Result<(), ValidationError> {
    // The last replica has the highest port; if it fits, they all do.
    match addr::replica_addr(addr, replicas - 1) {
        Ok(_) => Ok(()),
        Err(AddrError::Invalid(_)) => Err(ValidationError::InvalidAddress {
            component,
            field,
            addr: addr.to_string(),
        }),
        Err(AddrError::Overflow { .. }) => Err(ValidationError::PortOverflow {
            component,
            addr: addr.to_string(),
            replicas,
        }),
    }
}

fn validate_log_level(component: &'static str, level: Option<&str>) -> Result<(), ValidationError> {
    match level {
        Some(level) if !LOG_LEVELS.contains(&level) => Err(ValidationError::InvalidLogLevel {
            component,
            level: level.to_string(),
        }),
        _ => Ok(()),
    }
}

fn validate_config_file(
    component: &'static str,
    path: Option<&Path>,
) -> Result<(), ValidationError> {
    match path {
        Some(path) if !path.is_file() => Err(ValidationError::MissingConfigFile {
            component,
            path: path.to_path_buf(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_is_valid() {
        let config = BareMetalClusterConfig::scaffold("mycluster");
        config.validate().unwrap();
        assert_eq!(config.cluster.datanode.replicas, 3);
        assert!(config.greptime_artifact().is_latest());
        assert_eq!(config.etcd_artifact().version, DEFAULT_ETCD_VERSION);
    }

    #[test]
    fn yaml_round_trip_uses_camel_case() {
        let config = BareMetalClusterConfig::scaffold("mycluster");
        let yaml = config.to_yaml_string().unwrap();
        assert!(yaml.contains("serverAddr"));
        assert!(yaml.contains("clientAddr"));
        let parsed = BareMetalClusterConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn parse_minimal_yaml() {
        let yaml = r#"
cluster:
  name: demo
  artifact:
    version: v0.9.0
  meta:
    serverAddr: 127.0.0.1:3002
    httpAddr: 127.0.0.1:14001
  datanode:
    replicas: 2
    rpcAddr: 127.0.0.1:14100
    httpAddr: 127.0.0.1:14300
    logLevel: debug
  frontend:
    replicas: 1
    httpAddr: 127.0.0.1:4000
etcd:
  clientAddr: 127.0.0.1:2379
  peerAddr: 127.0.0.1:2380
"#;
        let config = BareMetalClusterConfig::from_yaml_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.greptime_artifact().version, "v0.9.0");
        assert_eq!(config.etcd_artifact().version, DEFAULT_ETCD_VERSION);
        assert_eq!(config.cluster.datanode.log_level.as_deref(), Some("debug"));
        assert!(config.cluster.frontend.mysql_addr.is_none());
    }

    #[test]
    fn zero_replicas_rejected() {
        let mut config = BareMetalClusterConfig::scaffold("c");
        config.cluster.datanode.replicas = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::NoReplicas { component: "datanode" })
        );
    }

    #[test]
    fn missing_required_address_rejected() {
        let mut config = BareMetalClusterConfig::scaffold("c");
        config.cluster.meta.server_addr = None;
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingAddress {
                component: "metasrv",
                field: "serverAddr",
            })
        );
    }

    #[test]
    fn datanode_rpc_address_is_optional() {
        let mut config = BareMetalClusterConfig::scaffold("c");
        config.cluster.datanode.rpc_addr = None;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn invalid_optional_address_rejected() {
        let mut config = BareMetalClusterConfig::scaffold("c");
        config.cluster.frontend.mysql_addr = Some("nope".to_string());
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidAddress { field: "mysqlAddr", .. })
        ));
    }

    #[test]
    fn replica_ports_must_fit() {
        let mut config = BareMetalClusterConfig::scaffold("c");
        config.cluster.datanode.rpc_addr = Some("127.0.0.1:65534".to_string());
        assert!(matches!(
            config.validate(),
            Err(ValidationError::PortOverflow { replicas: 3, .. })
        ));
    }

    #[test]
    fn missing_local_artifact_rejected() {
        let mut config = BareMetalClusterConfig::scaffold("c");
        config.cluster.artifact.local = Some(PathBuf::from("/nonexistent/greptime"));
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingLocalArtifact { artifact: "greptime", .. })
        ));
    }

    #[test]
    fn local_artifact_wins_over_version() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("greptime");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();

        let mut config = BareMetalClusterConfig::scaffold("c");
        config.cluster.artifact.local = Some(bin.clone());
        config.validate().unwrap();
        assert_eq!(config.greptime_artifact().local_path, Some(bin));
    }

    #[test]
    fn unknown_log_level_rejected() {
        let mut config = BareMetalClusterConfig::scaffold("c");
        config.etcd.log_level = Some("loud".to_string());
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidLogLevel { component: "etcd", .. })
        ));
    }

    #[test]
    fn cluster_names_are_path_safe() {
        for bad in ["", "../x", ".hidden", "a/b", "a b"] {
            let config = BareMetalClusterConfig::scaffold(bad);
            assert!(
                matches!(config.validate(), Err(ValidationError::InvalidClusterName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn log_level_defaults_to_info() {
        assert_eq!(log_level(None), "info");
        assert_eq!(log_level(Some("warn")), "warn");
    }
}
