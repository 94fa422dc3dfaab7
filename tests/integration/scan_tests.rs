//! End-to-end scans of real directory trees.

use dupindex::config::IndexConfig;
use dupindex::index::{Classification, Index, ScanConfig, SizeBucket};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A data tree and a separate index directory.
fn workspace() -> (TempDir, PathBuf, IndexConfig) {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    let config = IndexConfig::with_index_dir(dir.path().join("index"));
    (dir, data, config)
}

fn write(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_scan_groups_identical_files_across_directories() {
    let (_dir, data, config) = workspace();
    write(&data.join("photos/a.jpg"), b"same bytes");
    write(&data.join("backup/2023/a.jpg"), b"same bytes");
    write(&data.join("backup/2024/b.jpg"), b"same bytes");
    write(&data.join("notes.txt"), b"other byte");

    let mut index = Index::new(config).unwrap();
    let summary = index.scan(&data, &ScanConfig::default()).unwrap();
    assert_eq!(summary.files, 4);

    let sets: Vec<_> = index.duplicate_groups().collect::<Result<_, _>>().unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].paths.len(), 3);
    assert!(sets[0].paths.iter().all(|p| p.ends_with("a.jpg") || p.ends_with("b.jpg")));

    let stats = index.stats();
    assert_eq!(stats.hash_groups, 2);
    assert_eq!(stats.redundant_files, 2);
}

#[test]
fn test_unique_sizes_are_never_hashed() {
    let (_dir, data, config) = workspace();
    for i in 0..20 {
        write(&data.join(format!("f{i}")), &vec![b'x'; i + 1]);
    }

    let mut index = Index::new(config).unwrap();
    let summary = index.scan(&data, &ScanConfig::default()).unwrap();

    assert_eq!(summary.files, 20);
    assert_eq!(summary.collisions, 0);
    assert!(index
        .buckets()
        .iter()
        .all(|(_, bucket)| matches!(bucket, SizeBucket::Single(_))));
}

#[test]
fn test_incremental_scans_share_one_index() {
    let (_dir, data, config) = workspace();
    write(&data.join("first/report.pdf"), b"quarterly numbers");

    let mut index = Index::new(config.clone()).unwrap();
    index.scan(&data.join("first"), &ScanConfig::default()).unwrap();
    index.save().unwrap();

    write(&data.join("second/report-copy.pdf"), b"quarterly numbers");
    let mut index = Index::open(config).unwrap();
    let summary = index.scan(&data.join("second"), &ScanConfig::default()).unwrap();

    assert_eq!(summary.duplicates, 1);
    assert_eq!(index.buckets().file_count(), 2);
    match index.classify(&data.join("first/report.pdf")).unwrap() {
        Classification::Duplicate { of, .. } => {
            assert_eq!(of, vec![data.join("second/report-copy.pdf")]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_ignored_directories_are_pruned() {
    let (_dir, data, config) = workspace();
    write(&data.join("src/main.c"), b"int main;");
    write(&data.join(".git/objects/ab"), b"int main;");
    write(&data.join("__pycache__/m.pyc"), b"int main;");

    let mut index = Index::new(config).unwrap();
    let summary = index.scan(&data, &ScanConfig::default()).unwrap();

    assert_eq!(summary.files, 1);
    assert_eq!(summary.duplicates, 0);
}

#[test]
fn test_empty_files_are_indexed() {
    let (_dir, data, config) = workspace();
    write(&data.join("a"), b"");
    write(&data.join("b"), b"");

    let mut index = Index::new(config).unwrap();
    let summary = index.scan(&data, &ScanConfig::default()).unwrap();

    assert_eq!(summary.files, 2);
    assert_eq!(summary.duplicates, 1);
    assert!(matches!(index.buckets().get(0), Some(SizeBucket::Multi(_))));
}

#[test]
fn test_large_files_use_external_threshold() {
    let (_dir, data, mut config) = workspace();
    config.hash_threshold = 16;
    write(&data.join("big1"), &[7u8; 64]);
    write(&data.join("big2"), &[7u8; 64]);
    write(&data.join("big3"), &[8u8; 64]);

    // Works with sha1sum present or through the streaming fallback
    let mut index = Index::new(config).unwrap();
    let summary = index.scan(&data, &ScanConfig::default()).unwrap();

    assert_eq!(summary.files, 3);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(index.stats().hash_groups, 2);
}

#[test]
#[cfg(unix)]
fn test_symlinks_are_not_indexed() {
    let (_dir, data, config) = workspace();
    write(&data.join("target"), b"linked content");
    std::os::unix::fs::symlink(data.join("target"), data.join("link")).unwrap();

    let mut index = Index::new(config).unwrap();
    let summary = index.scan(&data, &ScanConfig::default()).unwrap();

    assert_eq!(summary.files, 1);
    assert_eq!(summary.duplicates, 0);
}
