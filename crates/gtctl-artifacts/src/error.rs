//! Artifact manager error types.

use std::io;
use std::path::PathBuf;

use gtctl_core::ArtifactKind;
use thiserror::Error;

/// Result type alias for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to resolve latest {kind} version from {url}: {reason}")]
    Resolution {
        kind: ArtifactKind,
        url: String,
        reason: String,
    },

    #[error("download of {url} failed with status {status}")]
    Download { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        source: reqwest::Error,
    },

    #[error("{kind} is not installed: {path} does not exist")]
    NotInstalled { kind: ArtifactKind, path: PathBuf },

    #[error("unsupported platform {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("failed to extract {path}: {reason}")]
    Extract { path: PathBuf, reason: String },

    #[error("package {package} does not contain binary '{binary}'")]
    MissingBinary { package: PathBuf, binary: String },

    #[error("{context}: {source}")]
    Io { context: String, source: io::Error },
}

impl ArtifactError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> ArtifactError {
        let context = context.into();
        move |source| ArtifactError::Io { context, source }
    }
}
