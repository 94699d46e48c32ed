//! Artifact manager: turns an [`ArtifactSpec`] into a runnable binary.
//!
//! Packages are cached per `(kind, version)`:
//!
//! ```text
//! <cache>/<kind>/<version>/pkg/<archive>   downloaded + extracted package
//! <cache>/<kind>/<version>/bin/<binary>    normalized, executable binaries
//! ```
//!
//! A version is downloaded at most once unless `force_download` is set, in
//! which case the package is fetched and installed again over the old one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gtctl_core::{ArtifactKind, ArtifactSpec, LATEST_VERSION};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ArtifactError, ArtifactResult};
use crate::extract;
use crate::package::{PackageLayout, Platform, release_repo};

pub const DEFAULT_DOWNLOAD_BASE: &str = "https://github.com";
pub const DEFAULT_RELEASE_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Clone)]
pub struct ArtifactManagerConfig {
    /// Root of the artifact cache.
    pub cache_dir: PathBuf,
    /// Base URL release archives are downloaded from.
    pub download_base: String,
    /// Base URL of the GitHub-style release index.
    pub release_api_base: String,
    /// Re-download and reinstall even when cached.
    pub force_download: bool,
}

impl ArtifactManagerConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            release_api_base: DEFAULT_RELEASE_API_BASE.to_string(),
            force_download: false,
        }
    }
}

/// A binary ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledArtifact {
    pub kind: ArtifactKind,
    pub version: String,
    pub binary_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

pub struct ArtifactManager {
    config: ArtifactManagerConfig,
    platform: Platform,
    client: reqwest::Client,
    /// `latest` resolutions, kept for the manager's lifetime.
    resolved: Mutex<HashMap<ArtifactKind, String>>,
}

impl ArtifactManager {
    pub fn new(config: ArtifactManagerConfig) -> ArtifactResult<Self> {
        Self::with_platform(config, Platform::current()?)
    }

    pub fn with_platform(config: ArtifactManagerConfig, platform: Platform) -> ArtifactResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gtctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ArtifactError::Http {
                url: config.download_base.clone(),
                source,
            })?;
        Ok(Self {
            config,
            platform,
            client,
            resolved: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ArtifactManagerConfig {
        &self.config
    }

    pub fn version_dir(&self, kind: ArtifactKind, version: &str) -> PathBuf {
        self.config.cache_dir.join(kind.as_str()).join(version)
    }

    pub fn pkg_dir(&self, kind: ArtifactKind, version: &str) -> PathBuf {
        self.version_dir(kind, version).join("pkg")
    }

    pub fn bin_dir(&self, kind: ArtifactKind, version: &str) -> PathBuf {
        self.version_dir(kind, version).join("bin")
    }

    /// Resolve `latest` to a concrete release tag; other versions pass through.
    ///
    /// The release index is queried at most once per kind.
    pub async fn resolve_version(&self, kind: ArtifactKind, version: &str) -> ArtifactResult<String> {
        if version != LATEST_VERSION {
            return Ok(version.to_string());
        }

        // Held across the request so concurrent callers share one lookup.
        let mut resolved = self.resolved.lock().await;
        if let Some(tag) = resolved.get(&kind) {
            return Ok(tag.clone());
        }

        let (owner, repo) = release_repo(kind);
        let url = format!(
            "{}/repos/{owner}/{repo}/releases/latest",
            self.config.release_api_base.trim_end_matches('/')
        );
        let resolution_err = |reason: String| ArtifactError::Resolution {
            kind,
            url: url.clone(),
            reason,
        };

        let resp = self
            .client
            .get(&url)
            .header("accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| resolution_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(resolution_err(format!("status {}", resp.status())));
        }
        let release: LatestRelease = resp
            .json()
            .await
            .map_err(|e| resolution_err(e.to_string()))?;
        if release.tag_name.is_empty() {
            return Err(resolution_err("empty tag_name".to_string()));
        }

        info!(%kind, version = %release.tag_name, "resolved latest release");
        resolved.insert(kind, release.tag_name.clone());
        Ok(release.tag_name)
    }

    /// Download URL of an already resolved `version`.
    pub fn download_url(&self, kind: ArtifactKind, version: &str) -> String {
        PackageLayout::for_version(kind, version, self.platform)
            .download_url(&self.config.download_base)
    }

    /// Fetch the package archive into `dest_dir`, returning its path.
    ///
    /// An archive already present in `dest_dir` is reused unless
    /// `force_download` is set.
    pub async fn download(
        &self,
        kind: ArtifactKind,
        version: &str,
        dest_dir: &Path,
    ) -> ArtifactResult<PathBuf> {
        let layout = PackageLayout::for_version(kind, version, self.platform);
        let dest = dest_dir.join(&layout.file_name);
        if dest.is_file() && !self.config.force_download {
            debug!(%kind, %version, path = %dest.display(), "package already downloaded");
            return Ok(dest);
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(ArtifactError::io(format!("failed to create {}", dest_dir.display())))?;

        let url = layout.download_url(&self.config.download_base);
        info!(%kind, %version, %url, "downloading package");

        let http_err = |source| ArtifactError::Http {
            url: url.clone(),
            source,
        };
        let mut resp = self.client.get(&url).send().await.map_err(http_err)?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(ArtifactError::Download {
                url,
                status: resp.status().as_u16(),
            });
        }

        // Stream into a sibling temp file and rename, so a partial download
        // is never mistaken for a cached package.
        let partial = dest_dir.join(format!("{}.part", layout.file_name));
        let fetch = async {
            let mut file = tokio::fs::File::create(&partial)
                .await
                .map_err(ArtifactError::io(format!("failed to create {}", partial.display())))?;
            let mut written: u64 = 0;
            while let Some(chunk) = resp.chunk().await.map_err(http_err)? {
                file.write_all(&chunk)
                    .await
                    .map_err(ArtifactError::io(format!("failed to write {}", partial.display())))?;
                written += chunk.len() as u64;
            }
            file.sync_all()
                .await
                .map_err(ArtifactError::io(format!("failed to sync {}", partial.display())))?;
            Ok::<_, ArtifactError>(written)
        };
        let written = match fetch.await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %cleanup, "failed to remove partial download");
                }
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(ArtifactError::io(format!("failed to rename {}", partial.display())))?;

        info!(%kind, %version, bytes = written, path = %dest.display(), "package downloaded");
        Ok(dest)
    }

    /// Extract `artifact_file` next to itself and install its binaries into
    /// `dest_bin_dir`. Returns the path of the server binary.
    pub async fn install(
        &self,
        kind: ArtifactKind,
        version: &str,
        artifact_file: &Path,
        dest_bin_dir: &Path,
    ) -> ArtifactResult<PathBuf> {
        let layout = PackageLayout::for_version(kind, version, self.platform);
        let pkg_dir = artifact_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let archive = artifact_file.to_path_buf();
        let bin_dir = dest_bin_dir.to_path_buf();

        let installed = tokio::task::spawn_blocking(move || {
            extract::extract(&archive, &pkg_dir)?;
            if let Some(inner) = &layout.inner_dir {
                extract::flatten(&pkg_dir, inner)?;
            }
            extract::install_binaries(&pkg_dir, &bin_dir, kind.binaries())
        })
        .await
        .map_err(|e| ArtifactError::Extract {
            path: artifact_file.to_path_buf(),
            reason: e.to_string(),
        })??;

        info!(%kind, %version, binaries = installed.len(), dir = %dest_bin_dir.display(), "package installed");
        Ok(dest_bin_dir.join(kind.binary_name()))
    }

    /// Path of the binary for `spec`, without installing anything.
    pub async fn binary_path(&self, spec: &ArtifactSpec) -> ArtifactResult<PathBuf> {
        if let Some(path) = &spec.local_path {
            return Ok(path.clone());
        }

        let version = if spec.is_latest() {
            self.resolved.lock().await.get(&spec.kind).cloned()
        } else {
            Some(spec.version.clone())
        };
        let path = match version {
            Some(version) => self.bin_dir(spec.kind, &version).join(spec.kind.binary_name()),
            None => self.version_dir(spec.kind, LATEST_VERSION),
        };

        if path.is_file() {
            Ok(path)
        } else {
            Err(ArtifactError::NotInstalled {
                kind: spec.kind,
                path,
            })
        }
    }

    /// Resolve, download and install `spec` as needed.
    pub async fn ensure_installed(&self, spec: &ArtifactSpec) -> ArtifactResult<InstalledArtifact> {
        if let Some(path) = &spec.local_path {
            debug!(kind = %spec.kind, path = %path.display(), "using local artifact");
            return Ok(InstalledArtifact {
                kind: spec.kind,
                version: spec.version.clone(),
                binary_path: path.clone(),
            });
        }

        let version = self.resolve_version(spec.kind, &spec.version).await?;
        let bin_dir = self.bin_dir(spec.kind, &version);
        let installed_binary = bin_dir.join(spec.kind.binary_name());

        let binary_path = if installed_binary.is_file() && !self.config.force_download {
            debug!(kind = %spec.kind, %version, "artifact already installed");
            installed_binary
        } else {
            let archive = self
                .download(spec.kind, &version, &self.pkg_dir(spec.kind, &version))
                .await?;
            self.install(spec.kind, &version, &archive, &bin_dir).await?
        };

        Ok(InstalledArtifact {
            kind: spec.kind,
            version,
            binary_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path) -> ArtifactManager {
        ArtifactManager::with_platform(
            ArtifactManagerConfig::new(dir),
            Platform::new("linux", "amd64"),
        )
        .unwrap()
    }

    #[test]
    fn cache_layout() {
        let m = manager(Path::new("/cache"));
        assert_eq!(
            m.pkg_dir(ArtifactKind::Etcd, "v3.5.7"),
            Path::new("/cache/etcd/v3.5.7/pkg")
        );
        assert_eq!(
            m.bin_dir(ArtifactKind::GreptimeDB, "v0.9.0"),
            Path::new("/cache/greptime/v0.9.0/bin")
        );
    }

    #[tokio::test]
    async fn concrete_version_resolves_to_itself() {
        let m = manager(Path::new("/cache"));
        let v = m.resolve_version(ArtifactKind::GreptimeDB, "v0.9.0").await.unwrap();
        assert_eq!(v, "v0.9.0");
        let again = m.resolve_version(ArtifactKind::GreptimeDB, &v).await.unwrap();
        assert_eq!(again, v);
    }

    #[tokio::test]
    async fn local_binary_path_is_verbatim() {
        let m = manager(Path::new("/cache"));
        let spec = ArtifactSpec::local(ArtifactKind::GreptimeDB, "/opt/greptime/greptime");
        assert_eq!(
            m.binary_path(&spec).await.unwrap(),
            Path::new("/opt/greptime/greptime")
        );
    }

    #[tokio::test]
    async fn binary_path_never_installs() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let spec = ArtifactSpec::version(ArtifactKind::Etcd, "v3.5.7");

        let err = m.binary_path(&spec).await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotInstalled { kind: ArtifactKind::Etcd, .. }));
        assert!(!m.version_dir(ArtifactKind::Etcd, "v3.5.7").exists());

        let bin = m.bin_dir(ArtifactKind::Etcd, "v3.5.7");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("etcd"), "").unwrap();
        assert_eq!(m.binary_path(&spec).await.unwrap(), bin.join("etcd"));
    }

    #[tokio::test]
    async fn unresolved_latest_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let spec = ArtifactSpec::version(ArtifactKind::GreptimeDB, LATEST_VERSION);
        assert!(matches!(
            m.binary_path(&spec).await,
            Err(ArtifactError::NotInstalled { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_index_is_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ArtifactManagerConfig::new(dir.path());
        // Nothing listens on port 1.
        config.release_api_base = "http://127.0.0.1:1".to_string();
        let m = ArtifactManager::with_platform(config, Platform::new("linux", "amd64")).unwrap();

        let err = m
            .resolve_version(ArtifactKind::GreptimeDB, LATEST_VERSION)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Resolution { .. }));
    }
}
