//! End-to-end scans of on-disk repositories.

use larder_core::ChecksumSelection;
use larder_core::testing::{Container, build_ipk, control_for};
use larder_scanner::{ScanOptions, scan_repository};
use std::path::Path;

fn write_package(dir: &Path, name: &str, version: &str) -> Vec<u8> {
    std::fs::create_dir_all(dir).unwrap();
    let data = build_ipk(&control_for(name, version), Container::Ar);
    std::fs::write(dir.join(format!("{name}_{version}.ipk")), &data).unwrap();
    data
}

#[tokio::test]
async fn test_index_documents_for_scanned_directory() {
    let root = tempfile::tempdir().unwrap();
    let feed = root.path().join("base");
    let data = write_package(&feed, "busybox", "1.36.1-r0");
    write_package(&feed, "abc", "0.1");
    std::fs::write(feed.join("corrupt_1.0.ipk"), b"\x1f\x8bnot really gzip").unwrap();

    let options = ScanOptions {
        workers: 1,
        checksums: ChecksumSelection::all(),
        ..ScanOptions::default()
    };
    let scan = scan_repository(root.path(), &options).await.unwrap();

    let base = scan
        .directories
        .iter()
        .find(|d| d.mount == "/base")
        .expect("base directory scanned");
    assert_eq!(base.path, feed);

    let packages = base.index.to_packages_text();
    let stanzas: Vec<_> = packages.split("\n\n").filter(|s| !s.is_empty()).collect();
    assert_eq!(stanzas.len(), 2);
    assert!(stanzas[0].starts_with("Package: abc\n"));
    assert!(stanzas[1].starts_with("Package: busybox\n"));
    assert!(stanzas[1].contains("\nFilename: busybox_1.36.1-r0.ipk\n"));
    assert!(stanzas[1].contains(&format!("\nSize: {}\n", data.len())));
    assert!(stanzas[1].contains("\nMD5sum: "));
    assert!(stanzas[1].contains("\nSHA1sum: "));

    let stamps = base.index.to_stamps_text();
    let lines: Vec<_> = stamps.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let fields: Vec<_> = line.split(' ').collect();
        assert_eq!(fields.len(), 3, "unexpected stamp line {line:?}");
        assert_eq!(fields[1].len(), 32);
        assert_eq!(fields[2].len(), 40);
    }
}

#[tokio::test]
async fn test_rescan_is_deterministic() {
    let root = tempfile::tempdir().unwrap();
    for i in 0..8 {
        write_package(root.path(), &format!("pkg{i}"), "1.0");
    }

    let options = ScanOptions {
        workers: 4,
        ..ScanOptions::default()
    };
    let first = scan_repository(root.path(), &options).await.unwrap();
    let second = scan_repository(root.path(), &options).await.unwrap();

    assert_eq!(
        first.directories[0].index.to_packages_text(),
        second.directories[0].index.to_packages_text()
    );
}
