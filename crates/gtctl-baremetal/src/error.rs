//! Bare-metal deployer error types.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use gtctl_artifacts::ArtifactError;
use gtctl_core::addr::AddrError;
use gtctl_core::{MetadataError, ValidationError};
use thiserror::Error;

pub type BareMetalResult<T> = Result<T, BareMetalError>;

#[derive(Debug, Error)]
pub enum BareMetalError {
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Address(#[from] AddrError),

    #[error("failed to start {component} from {binary}: {source}")]
    ProcessStart {
        component: String,
        binary: PathBuf,
        source: io::Error,
    },

    #[error("{component} not ready after {timeout:?}, see logs in {log_dir}")]
    ReadinessTimeout {
        component: String,
        timeout: Duration,
        log_dir: PathBuf,
    },

    #[error("{component}: cancelled")]
    Cancelled { component: String },

    #[error("{component} exited unexpectedly ({status}), see logs in {log_dir}")]
    ProcessExited {
        component: String,
        status: String,
        log_dir: PathBuf,
    },

    #[error("etcd elected no leader after {attempts} checks, see logs in {log_dir}")]
    LeaderNotFound { attempts: u32, log_dir: PathBuf },

    #[error("'{0}' is not supported by the bare-metal deployer")]
    UnsupportedOperation(&'static str),

    #[error("cluster '{name}' is still running (pid {pid}), stop it first")]
    ClusterRunning { name: String, pid: u32 },

    #[error("cluster '{name}' is already managed by gtctl process {pid}")]
    ClusterLocked { name: String, pid: u32 },

    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("{context}: {source}")]
    Io { context: String, source: io::Error },
}

impl BareMetalError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> BareMetalError {
        let context = context.into();
        move |source| BareMetalError::Io { context, source }
    }
}
