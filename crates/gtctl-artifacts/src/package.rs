//! Release package layouts.
//!
//! Everything that depends on *which* release is being installed (archive
//! name, URL, inner directory) is decided here, by [`PackageLayout::for_version`].
//! A new breaking change in upstream packaging is a change to this file only.

use gtctl_core::ArtifactKind;
use semver::Version;

use crate::error::{ArtifactError, ArtifactResult};

/// First greptime release whose archive is `greptime-<os>-<arch>-<version>.tar.gz`
/// with a versioned root directory. Earlier releases ship a flat
/// `greptime-<os>-<arch>.tgz`.
pub const GREPTIME_LAYOUT_BREAKING_VERSION: &str = "v0.4.0-nightly-20230802";

const GREPTIME_REPO: (&str, &str) = ("GreptimeTeam", "greptimedb");
const ETCD_REPO: (&str, &str) = ("etcd-io", "etcd");

/// Target OS and CPU architecture, named the way release archives name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    pub const fn new(os: &'static str, arch: &'static str) -> Self {
        Self { os, arch }
    }

    /// The platform this binary was built for.
    pub fn current() -> ArtifactResult<Self> {
        Self::from_rust(std::env::consts::OS, std::env::consts::ARCH)
    }

    fn from_rust(os: &str, arch: &str) -> ArtifactResult<Self> {
        let unsupported = || ArtifactError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        };
        let os = match os {
            "linux" => "linux",
            "macos" => "darwin",
            _ => return Err(unsupported()),
        };
        let arch = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            _ => return Err(unsupported()),
        };
        Ok(Self { os, arch })
    }
}

/// Owner and repository of the upstream releases for `kind`.
pub fn release_repo(kind: ArtifactKind) -> (&'static str, &'static str) {
    match kind {
        ArtifactKind::GreptimeDB => GREPTIME_REPO,
        ArtifactKind::Etcd => ETCD_REPO,
    }
}

/// How one release of one artifact is packaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayout {
    /// Archive file name, as published.
    pub file_name: String,
    /// Path of the archive below the download base URL.
    pub url_path: String,
    /// Root directory inside the archive, flattened away on install.
    pub inner_dir: Option<String>,
}

impl PackageLayout {
    /// Layout of `version` (already resolved, never `latest`) of `kind`.
    pub fn for_version(kind: ArtifactKind, version: &str, platform: Platform) -> Self {
        let Platform { os, arch } = platform;
        let (owner, repo) = release_repo(kind);

        let (file_name, inner_dir) = match kind {
            ArtifactKind::GreptimeDB if is_post_breaking(version) => {
                let stem = format!("greptime-{os}-{arch}-{version}");
                (format!("{stem}.tar.gz"), Some(stem))
            }
            ArtifactKind::GreptimeDB => (format!("greptime-{os}-{arch}.tgz"), None),
            ArtifactKind::Etcd => {
                let stem = format!("etcd-{version}-{os}-{arch}");
                let ext = if os == "darwin" { "zip" } else { "tar.gz" };
                (format!("{stem}.{ext}"), Some(stem))
            }
        };

        PackageLayout {
            url_path: format!("{owner}/{repo}/releases/download/{version}/{file_name}"),
            file_name,
            inner_dir,
        }
    }

    pub fn download_url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.url_path)
    }
}

/// Whether `version` is at or after [`GREPTIME_LAYOUT_BREAKING_VERSION`].
///
/// Tags that are not semver are assumed to be recent nightlies.
pub fn is_post_breaking(version: &str) -> bool {
    let boundary = parse_tag(GREPTIME_LAYOUT_BREAKING_VERSION);
    match (parse_tag(version), boundary) {
        (Some(v), Some(boundary)) => v >= boundary,
        _ => true,
    }
}

fn parse_tag(tag: &str) -> Option<Version> {
    Version::parse(tag.strip_prefix('v').unwrap_or(tag)).ok()
}
