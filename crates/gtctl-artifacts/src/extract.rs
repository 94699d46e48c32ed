//! Archive extraction and binary installation.
//!
//! All functions here block; the manager runs them on the blocking pool.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::{ArtifactError, ArtifactResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tgz") || name.ends_with(".tar.gz") || name.ends_with(".gz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

/// Unpack `archive` into `dest`.
pub fn extract(archive: &Path, dest: &Path) -> ArtifactResult<()> {
    let format = ArchiveFormat::detect(archive).ok_or_else(|| ArtifactError::Extract {
        path: archive.to_path_buf(),
        reason: "unsupported archive format".to_string(),
    })?;
    let file = File::open(archive)
        .map_err(ArtifactError::io(format!("failed to open {}", archive.display())))?;
    fs::create_dir_all(dest)
        .map_err(ArtifactError::io(format!("failed to create {}", dest.display())))?;

    let extract_err = |reason: String| ArtifactError::Extract {
        path: archive.to_path_buf(),
        reason,
    };
    match format {
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipArchive::new(file).map_err(|e| extract_err(e.to_string()))?;
            zip.extract(dest).map_err(|e| extract_err(e.to_string()))?;
        }
        ArchiveFormat::TarGz => {
            let mut tar = tar::Archive::new(GzDecoder::new(file));
            tar.unpack(dest).map_err(|e| extract_err(e.to_string()))?;
        }
    }

    debug!(archive = %archive.display(), dest = %dest.display(), ?format, "archive extracted");
    Ok(())
}

/// Move the contents of `pkg_dir/<inner>` up into `pkg_dir`.
///
/// Entries already present at the top level (from an earlier install) are
/// replaced.
pub fn flatten(pkg_dir: &Path, inner: &str) -> ArtifactResult<()> {
    let inner_dir = pkg_dir.join(inner);
    if !inner_dir.is_dir() {
        return Ok(());
    }

    let entries = fs::read_dir(&inner_dir)
        .map_err(ArtifactError::io(format!("failed to read {}", inner_dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(ArtifactError::io("failed to read directory entry"))?;
        let target = pkg_dir.join(entry.file_name());
        remove_path(&target)
            .map_err(ArtifactError::io(format!("failed to replace {}", target.display())))?;
        fs::rename(entry.path(), &target)
            .map_err(ArtifactError::io(format!("failed to move into {}", target.display())))?;
    }
    fs::remove_dir_all(&inner_dir)
        .map_err(ArtifactError::io(format!("failed to remove {}", inner_dir.display())))?;

    debug!(pkg = %pkg_dir.display(), %inner, "package flattened");
    Ok(())
}

/// Copy `binaries` from `src_dir` into `bin_dir` and mark them executable.
pub fn install_binaries(
    src_dir: &Path,
    bin_dir: &Path,
    binaries: &[&str],
) -> ArtifactResult<Vec<PathBuf>> {
    fs::create_dir_all(bin_dir)
        .map_err(ArtifactError::io(format!("failed to create {}", bin_dir.display())))?;

    let mut installed = Vec::with_capacity(binaries.len());
    for binary in binaries {
        let src = src_dir.join(binary);
        if !src.is_file() {
            return Err(ArtifactError::MissingBinary {
                package: src_dir.to_path_buf(),
                binary: binary.to_string(),
            });
        }
        let dst = bin_dir.join(binary);
        fs::copy(&src, &dst)
            .map_err(ArtifactError::io(format!("failed to copy {}", src.display())))?;
        set_executable(&dst)
            .map_err(ArtifactError::io(format!("failed to chmod {}", dst.display())))?;
        installed.push(dst);
    }
    Ok(installed)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::fast()));
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in files {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn detect_formats() {
        assert_eq!(ArchiveFormat::detect(Path::new("a.zip")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("a.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("a.rar")), None);
    }

    #[test]
    fn extract_tar_gz_and_flatten() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("greptime-linux-amd64-v0.9.0.tar.gz");
        write_tar_gz(
            &archive,
            &[("greptime-linux-amd64-v0.9.0/greptime", b"#!/bin/sh\n")],
        );

        let pkg = dir.path().join("pkg");
        extract(&archive, &pkg).unwrap();
        assert!(pkg.join("greptime-linux-amd64-v0.9.0/greptime").is_file());

        flatten(&pkg, "greptime-linux-amd64-v0.9.0").unwrap();
        assert!(pkg.join("greptime").is_file());
        assert!(!pkg.join("greptime-linux-amd64-v0.9.0").exists());

        // A second flatten after re-extraction replaces the old binary.
        extract(&archive, &pkg).unwrap();
        flatten(&pkg, "greptime-linux-amd64-v0.9.0").unwrap();
        assert!(pkg.join("greptime").is_file());
    }

    #[test]
    fn extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("etcd-v3.5.7-darwin-arm64.zip");
        write_zip(
            &archive,
            &[
                ("etcd-v3.5.7-darwin-arm64/etcd", b"etcd"),
                ("etcd-v3.5.7-darwin-arm64/etcdctl", b"etcdctl"),
            ],
        );

        let pkg = dir.path().join("pkg");
        extract(&archive, &pkg).unwrap();
        assert_eq!(
            fs::read(pkg.join("etcd-v3.5.7-darwin-arm64/etcdctl")).unwrap(),
            b"etcdctl"
        );
    }

    #[test]
    fn corrupt_archive_is_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.tar.gz");
        fs::write(&archive, b"not gzip").unwrap();
        let err = extract(&archive, &dir.path().join("pkg")).unwrap_err();
        assert!(matches!(err, ArtifactError::Extract { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn installed_binaries_are_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        for name in ["etcd", "etcdctl", "etcdutl"] {
            fs::write(src.join(name), name).unwrap();
        }

        let bin = dir.path().join("bin");
        let installed = install_binaries(&src, &bin, &["etcd", "etcdctl", "etcdutl"]).unwrap();
        assert_eq!(installed.len(), 3);
        for path in installed {
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755, "{}", path.display());
        }
    }

    #[test]
    fn missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = install_binaries(dir.path(), &dir.path().join("bin"), &["greptime"]).unwrap_err();
        assert!(matches!(err, ArtifactError::MissingBinary { ref binary, .. } if binary == "greptime"));
    }
}
