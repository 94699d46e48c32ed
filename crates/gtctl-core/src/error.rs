//! Error types for configuration validation and cluster metadata.

use std::path::PathBuf;

use thiserror::Error;

/// A configuration problem caught before any process is started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid cluster name '{0}': use letters, digits, '-' or '_'")]
    InvalidClusterName(String),

    #[error("{component}: replicas must be at least 1")]
    NoReplicas { component: &'static str },

    #[error("{component}: missing required address '{field}'")]
    MissingAddress {
        component: &'static str,
        field: &'static str,
    },

    #[error("{component}: invalid address '{addr}' for '{field}', expected host:port")]
    InvalidAddress {
        component: &'static str,
        field: &'static str,
        addr: String,
    },

    #[error("{component}: {replicas} replicas starting at '{addr}' overflow the port range")]
    PortOverflow {
        component: &'static str,
        addr: String,
        replicas: u32,
    },

    #[error("{component}: unknown log level '{level}'")]
    InvalidLogLevel {
        component: &'static str,
        level: String,
    },

    #[error("{component}: config file does not exist: {path}")]
    MissingConfigFile {
        component: &'static str,
        path: PathBuf,
    },

    #[error("local {artifact} artifact does not exist: {path}")]
    MissingLocalArtifact {
        artifact: &'static str,
        path: PathBuf,
    },

    #[error("{artifact}: artifact version must not be empty")]
    EmptyVersion { artifact: &'static str },
}

/// Errors reading or writing the per-cluster metadata file.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("cluster metadata not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to access cluster metadata {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed cluster metadata {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}
