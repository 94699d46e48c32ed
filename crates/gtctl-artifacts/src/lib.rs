//! gtctl-artifacts: downloads and installs the binaries a bare-metal
//! cluster runs.
//!
//! # Pipeline
//!
//! ```text
//! ArtifactSpec ─ resolve_version ─ download ─ install ─ InstalledArtifact
//!                 (latest → tag)   (cached)   (extract, flatten, chmod)
//! ```
//!
//! Version-dependent packaging details are isolated in [`package`].

pub mod error;
pub mod extract;
pub mod manager;
pub mod package;

pub use error::{ArtifactError, ArtifactResult};
pub use manager::{ArtifactManager, ArtifactManagerConfig, InstalledArtifact};
pub use package::{GREPTIME_LAYOUT_BREAKING_VERSION, PackageLayout, Platform};
