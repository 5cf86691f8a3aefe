//! Single directory scan.

use crate::error::{Result, ScanError};
use crate::pool::WorkerPool;
use larder_core::config::RepositoryConfig;
use larder_core::{
    ChecksumSelection, PACKAGE_EXTENSION, PackageIndex, PackageIndexBuilder, PackageRecord,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Options controlling how archives are scanned.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// Maximum number of archives parsed at once.
    pub workers: usize,
    /// Checksums computed for each archive.
    pub checksums: ChecksumSelection,
    /// File extension (without the dot) that marks a package archive.
    pub extension: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            checksums: ChecksumSelection {
                md5: true,
                sha1: false,
            },
            extension: PACKAGE_EXTENSION.to_string(),
        }
    }
}

impl From<&RepositoryConfig> for ScanOptions {
    fn from(config: &RepositoryConfig) -> Self {
        Self {
            workers: config.workers,
            checksums: config.checksums(),
            extension: PACKAGE_EXTENSION.to_string(),
        }
    }
}

/// Outcome of scanning one directory.
#[derive(Debug)]
pub struct DirectoryScan {
    /// Records for every archive that parsed.
    pub index: PackageIndex,
    /// Number of archives that could not be parsed.
    pub failed: usize,
    /// Wall-clock time spent on the scan.
    pub elapsed: Duration,
}

/// Parse every package archive directly inside `dir`.
///
/// Subdirectories are not descended into. Archives that fail to parse are
/// logged and skipped; only an unreadable directory fails the scan.
pub async fn scan_directory(dir: &Path, options: &ScanOptions) -> Result<DirectoryScan> {
    let started = Instant::now();
    let filenames = list_archives(dir, &options.extension).await?;

    let pool = WorkerPool::new(options.workers);
    let builder = PackageIndexBuilder::new();
    let failed = Arc::new(AtomicUsize::new(0));
    let dir: Arc<PathBuf> = Arc::new(dir.to_path_buf());

    for filename in filenames {
        let builder = builder.clone();
        let failed = failed.clone();
        let dir = dir.clone();
        let checksums = options.checksums;

        pool.spawn(async move {
            let parsed = tokio::task::spawn_blocking({
                let dir = dir.clone();
                let filename = filename.clone();
                move || PackageRecord::from_file(&dir, &filename, checksums)
            })
            .await;

            match parsed {
                Ok(Ok(record)) => builder.insert(record),
                Ok(Err(e)) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        dir = %dir.display(),
                        file = %filename,
                        error = %e,
                        "Skipping unreadable package"
                    );
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        dir = %dir.display(),
                        file = %filename,
                        error = %e,
                        "Package parse task failed"
                    );
                }
            }
        })
        .await?;
    }

    pool.wait().await;

    Ok(DirectoryScan {
        index: builder.freeze(),
        failed: failed.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    })
}

/// Names of regular files in `dir` carrying the package extension.
async fn list_archives(dir: &Path, extension: &str) -> Result<Vec<String>> {
    let read_dir_error = |source| ScanError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_dir_error)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_dir_error)? {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != extension) {
            continue;
        }
        // follows symlinks so linked archives are picked up
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => {
                tracing::warn!(name = ?name, "Skipping package with non UTF-8 name");
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::testing::{Container, build_ipk, control_for};
    use pretty_assertions::assert_eq;

    fn write_package(dir: &Path, name: &str, version: &str, container: Container) {
        let data = build_ipk(&control_for(name, version), container);
        std::fs::write(dir.join(format!("{name}_{version}.ipk")), data).unwrap();
    }

    #[tokio::test]
    async fn test_malformed_archive_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "a", "1.0", Container::Ar);
        std::fs::write(dir.path().join("broken.ipk"), b"definitely not an archive").unwrap();

        let scan = scan_directory(dir.path(), &ScanOptions::default())
            .await
            .unwrap();

        assert_eq!(scan.index.len(), 1);
        assert_eq!(scan.failed, 1);
        let record = scan.index.get("a_1.0.ipk").unwrap();
        let md5 = record.checksums.md5.as_deref().unwrap();
        assert_eq!(md5.len(), 32);
        assert!(md5.bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(record.checksums.sha1.is_none());
    }

    #[tokio::test]
    async fn test_scans_all_valid_archives() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12 {
            let container = if i % 2 == 0 { Container::Ar } else { Container::TarGz };
            write_package(dir.path(), &format!("pkg{i:02}"), "1.0", container);
        }
        for i in 0..3 {
            std::fs::write(dir.path().join(format!("junk{i}.ipk")), b"junk").unwrap();
        }

        let options = ScanOptions {
            workers: 2,
            ..ScanOptions::default()
        };
        let scan = scan_directory(dir.path(), &options).await.unwrap();
        assert_eq!(scan.index.len(), 12);
        assert_eq!(scan.failed, 3);
    }

    #[tokio::test]
    async fn test_single_worker_releases_after_failures() {
        let dir = tempfile::tempdir().unwrap();
        // junk sorts first, so every later archive waits on a slot a failed
        // parse held
        for i in 0..4 {
            std::fs::write(dir.path().join(format!("a-junk{i}.ipk")), b"junk").unwrap();
        }
        for i in 0..4 {
            write_package(dir.path(), &format!("pkg{i}"), "1.0", Container::Ar);
        }

        let options = ScanOptions {
            workers: 1,
            ..ScanOptions::default()
        };
        let scan = tokio::time::timeout(
            Duration::from_secs(30),
            scan_directory(dir.path(), &options),
        )
        .await
        .expect("scan stalled on a leaked worker slot")
        .unwrap();
        assert_eq!(scan.index.len(), 4);
        assert_eq!(scan.failed, 4);
    }

    #[tokio::test]
    async fn test_ignores_other_files_and_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "a", "1.0", Container::Ar);
        std::fs::write(dir.path().join("README"), b"hello").unwrap();
        std::fs::write(dir.path().join("a_1.0.ipk.sig"), b"sig").unwrap();
        std::fs::create_dir(dir.path().join("nested.ipk")).unwrap();
        write_package(&dir.path().join("nested.ipk"), "b", "1.0", Container::Ar);

        let scan = scan_directory(dir.path(), &ScanOptions::default())
            .await
            .unwrap();
        let names: Vec<_> = scan.index.names().collect();
        assert_eq!(names, vec!["a_1.0.ipk"]);
        assert_eq!(scan.failed, 0);
    }

    #[tokio::test]
    async fn test_checksum_selection_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "a", "1.0", Container::Ar);

        let options = ScanOptions {
            checksums: ChecksumSelection::all(),
            ..ScanOptions::default()
        };
        let scan = scan_directory(dir.path(), &options).await.unwrap();
        let record = scan.index.get("a_1.0.ipk").unwrap();
        assert_eq!(record.checksums.sha1.as_ref().map(String::len), Some(40));
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_directory(&dir.path().join("missing"), &ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::ReadDir { .. }));
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let scan = scan_directory(dir.path(), &ScanOptions::default())
            .await
            .unwrap();
        assert!(scan.index.is_empty());
        assert_eq!(scan.failed, 0);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = RepositoryConfig::with_root("/srv");
        config.workers = 9;
        config.sha1 = true;
        let options = ScanOptions::from(&config);
        assert_eq!(options.workers, 9);
        assert_eq!(options.checksums, ChecksumSelection::all());
        assert_eq!(options.extension, "ipk");
    }
}
