//! Recursive repository scan.
//!
//! Every directory below the repository root is scanned on its own and
//! becomes one mount. Directories without packages are still reported so
//! they can be served as plain file trees.

use crate::error::{Result, ScanError};
use crate::scan::{ScanOptions, scan_directory};
use larder_core::PackageIndex;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// One scanned directory of the repository.
#[derive(Debug)]
pub struct ScannedDirectory {
    /// URL path prefix, `/` for the root and `/a/b` below it.
    pub mount: String,
    /// Directory on disk.
    pub path: PathBuf,
    pub index: PackageIndex,
    /// Archives in this directory that could not be parsed.
    pub failed: usize,
}

impl ScannedDirectory {
    /// Whether this directory holds any packages.
    pub fn has_packages(&self) -> bool {
        !self.index.is_empty()
    }
}

/// Outcome of scanning a whole repository.
#[derive(Debug, Default)]
pub struct RepositoryScan {
    /// Scanned directories in walk order (parents before children).
    pub directories: Vec<ScannedDirectory>,
    pub elapsed: Duration,
}

impl RepositoryScan {
    /// Directories that hold at least one package.
    pub fn package_directories(&self) -> impl Iterator<Item = &ScannedDirectory> {
        self.directories.iter().filter(|d| d.has_packages())
    }

    /// Total number of indexed packages.
    pub fn package_count(&self) -> usize {
        self.directories.iter().map(|d| d.index.len()).sum()
    }

    /// Total number of archives that failed to parse.
    pub fn failed_count(&self) -> usize {
        self.directories.iter().map(|d| d.failed).sum()
    }
}

/// Scan `root` and every directory below it.
///
/// Symlinked directories are not followed. Entries the walk cannot read and
/// directories whose scan fails are logged and skipped.
pub async fn scan_repository(root: &Path, options: &ScanOptions) -> Result<RepositoryScan> {
    let started = Instant::now();
    check_root(root).await?;

    let directories = {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || list_directories(&root)).await?
    };

    let mut scan = RepositoryScan::default();
    for path in directories {
        let Some(mount) = mount_for(root, &path) else {
            tracing::warn!(path = %path.display(), "Skipping directory with non UTF-8 path");
            continue;
        };

        tracing::debug!(dir = %path.display(), mount = %mount, "Building index");
        let result = match scan_directory(&path, options).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(dir = %path.display(), error = %e, "Failed to scan directory");
                continue;
            }
        };

        if !result.index.is_empty() || result.failed > 0 {
            tracing::info!(
                mount = %mount,
                packages = result.index.len(),
                failed = result.failed,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Indexed package directory"
            );
        }

        scan.directories.push(ScannedDirectory {
            mount,
            path,
            index: result.index,
            failed: result.failed,
        });
    }

    scan.elapsed = started.elapsed();
    tracing::info!(
        directories = scan.package_directories().count(),
        packages = scan.package_count(),
        failed = scan.failed_count(),
        elapsed_ms = scan.elapsed.as_millis() as u64,
        "Repository scan complete"
    );
    Ok(scan)
}

async fn check_root(root: &Path) -> Result<()> {
    let root_error = |source| ScanError::Root {
        path: root.to_path_buf(),
        source,
    };
    let metadata = tokio::fs::metadata(root).await.map_err(root_error)?;
    if !metadata.is_dir() {
        return Err(root_error(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            "not a directory",
        )));
    }
    Ok(())
}

fn list_directories(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}

/// URL mount of `dir` relative to `root`.
fn mount_for(root: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(root).ok()?;
    let mut mount = String::new();
    for component in relative.components() {
        let Component::Normal(segment) = component else {
            continue;
        };
        mount.push('/');
        mount.push_str(segment.to_str()?);
    }
    if mount.is_empty() {
        mount.push('/');
    }
    Some(mount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::testing::{Container, build_ipk, control_for};
    use pretty_assertions::assert_eq;

    fn write_package(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let data = build_ipk(&control_for(name, "1.0"), Container::Ar);
        std::fs::write(dir.join(format!("{name}_1.0.ipk")), data).unwrap();
    }

    #[test]
    fn test_mount_for() {
        let root = Path::new("/srv/feeds");
        assert_eq!(mount_for(root, root).as_deref(), Some("/"));
        assert_eq!(
            mount_for(root, &root.join("armv7")).as_deref(),
            Some("/armv7")
        );
        assert_eq!(
            mount_for(root, &root.join("armv7/base")).as_deref(),
            Some("/armv7/base")
        );
        assert_eq!(mount_for(root, Path::new("/elsewhere")), None);
    }

    #[tokio::test]
    async fn test_nested_directories() {
        let root = tempfile::tempdir().unwrap();
        write_package(&root.path().join("armv7/base"), "busybox");
        write_package(&root.path().join("armv7/base"), "zlib");
        write_package(&root.path().join("mips/extra"), "curl");
        std::fs::write(root.path().join("mips/extra/broken.ipk"), b"junk").unwrap();
        std::fs::create_dir_all(root.path().join("docs")).unwrap();
        std::fs::write(root.path().join("docs/index.txt"), b"hi").unwrap();

        let scan = scan_repository(root.path(), &ScanOptions::default())
            .await
            .unwrap();

        let mounts: Vec<_> = scan.directories.iter().map(|d| d.mount.as_str()).collect();
        assert_eq!(
            mounts,
            vec!["/", "/armv7", "/armv7/base", "/docs", "/mips", "/mips/extra"]
        );

        let with_packages: Vec<_> = scan
            .package_directories()
            .map(|d| (d.mount.as_str(), d.index.len()))
            .collect();
        assert_eq!(with_packages, vec![("/armv7/base", 2), ("/mips/extra", 1)]);
        assert_eq!(scan.package_count(), 3);
        assert_eq!(scan.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_packages_in_root() {
        let root = tempfile::tempdir().unwrap();
        write_package(root.path(), "foo");

        let scan = scan_repository(root.path(), &ScanOptions::default())
            .await
            .unwrap();
        assert_eq!(scan.directories.len(), 1);
        assert_eq!(scan.directories[0].mount, "/");
        assert!(scan.directories[0].has_packages());
    }

    #[tokio::test]
    async fn test_root_must_be_directory() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        let err = scan_repository(&file, &ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Root { .. }));

        let err = scan_repository(&root.path().join("missing"), &ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Root { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directories_are_not_followed() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        write_package(outside.path(), "outside");
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let scan = scan_repository(root.path(), &ScanOptions::default())
            .await
            .unwrap();
        let mounts: Vec<_> = scan.directories.iter().map(|d| d.mount.as_str()).collect();
        assert_eq!(mounts, vec!["/"]);
    }
}
