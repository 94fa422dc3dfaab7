//! Saving, reloading and damaging the on-disk index.

use dupindex::config::IndexConfig;
use dupindex::index::{Index, IndexError, ScanConfig};
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn populated() -> (TempDir, PathBuf, IndexConfig) {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    fs::create_dir_all(data.join("nested")).unwrap();
    fs::write(data.join("x"), [b'Z'; 500]).unwrap();
    fs::write(data.join("nested").join("y"), [b'Z'; 500]).unwrap();
    fs::write(data.join("z"), [b'W'; 500]).unwrap();
    fs::write(data.join("w"), [b'Q'; 300]).unwrap();
    let config = IndexConfig::with_index_dir(dir.path().join("index"));
    (dir, data, config)
}

#[test]
fn test_layout_on_disk() {
    let (_dir, data, config) = populated();
    let mut index = Index::new(config.clone()).unwrap();
    index.scan(&data, &ScanConfig::default()).unwrap();
    index.save().unwrap();

    let root = &config.index_dir;
    assert!(root.join("name_parts").is_file());

    let single = fs::read_to_string(root.join("files/300/dirinfo")).unwrap();
    assert!(single.starts_with("single "));
    assert!(single.lines().nth(1).unwrap().starts_with("mtime "));

    let multi = fs::read_to_string(root.join("files/500/dirinfo")).unwrap();
    let lines: Vec<_> = multi.lines().collect();
    assert_eq!(lines[0], "multi");
    assert_eq!(lines.len(), 3);
    // Groups are sorted by hash
    assert!(lines[1] < lines[2]);

    let names: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(root.join("name_parts")).unwrap()).unwrap();
    assert!(names.contains_key("nested"));
    assert_eq!(names.len(), index.names().len());
}

#[test]
fn test_reopen_preserves_everything() {
    let (_dir, data, config) = populated();
    let pinned = FileTime::from_unix_time(1_600_000_000, 250_000_000);
    set_file_mtime(data.join("w"), pinned).unwrap();

    let mut index = Index::new(config.clone()).unwrap();
    index.scan(&data, &ScanConfig::default()).unwrap();
    index.save().unwrap();

    let reopened = Index::open(config).unwrap();
    assert_eq!(reopened.names(), index.names());
    assert_eq!(reopened.buckets(), index.buckets());

    let record = reopened.buckets().get(300).unwrap().records().next().unwrap().clone();
    assert_eq!(record.mtime_cs, 160_000_000_025);
}

#[test]
fn test_rescan_after_reopen_is_a_no_op() {
    let (_dir, data, config) = populated();
    let mut index = Index::new(config.clone()).unwrap();
    index.scan(&data, &ScanConfig::default()).unwrap();
    index.save().unwrap();

    let mut reopened = Index::open(config).unwrap();
    let summary = reopened.scan(&data, &ScanConfig::default()).unwrap();
    assert_eq!(summary.rescans, 4);
    assert_eq!(reopened.buckets(), index.buckets());
}

#[test]
fn test_corrupt_name_parts_is_rejected() {
    let (_dir, data, config) = populated();
    let mut index = Index::new(config.clone()).unwrap();
    index.scan(&data, &ScanConfig::default()).unwrap();
    index.save().unwrap();

    let name_parts = config.index_dir.join("name_parts");
    for content in ["not json", "[1, 2]", r#"{"a": 0, "b": 0}"#, r#"{"a": 1}"#] {
        fs::write(&name_parts, content).unwrap();
        let err = Index::open(config.clone()).unwrap_err();
        assert!(
            matches!(err, IndexError::CorruptStore { .. }),
            "{content}: {err}"
        );
    }
}

#[test]
fn test_corrupt_dirinfo_is_rejected() {
    let (_dir, data, config) = populated();
    let mut index = Index::new(config.clone()).unwrap();
    index.scan(&data, &ScanConfig::default()).unwrap();
    index.save().unwrap();

    fs::write(config.index_dir.join("files/500/dirinfo"), "multi\ngarbage\n").unwrap();
    let err = Index::open(config).unwrap_err();
    match err {
        IndexError::CorruptStore { path, .. } => assert!(path.ends_with("files/500/dirinfo")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_failed_scan_still_saves_progress() {
    let (_dir, data, config) = populated();
    let mut index = Index::new(config.clone()).unwrap();
    index.scan(&data, &ScanConfig::default()).unwrap();

    let err = index
        .scan(&data.join("missing"), &ScanConfig::default())
        .unwrap_err();
    assert!(matches!(err, IndexError::Scan(_)));
    index.save().unwrap();

    let reopened = Index::open(config).unwrap();
    assert_eq!(reopened.buckets().file_count(), 4);
}
