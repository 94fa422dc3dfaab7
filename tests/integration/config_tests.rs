//! Layered configuration: defaults, TOML file, environment, CLI flags.

use clap::Parser;
use dupindex::cli::{Cli, Commands};
use dupindex::config::IndexConfig;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::tempdir;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Clear all DUPINDEX_* environment variables to avoid interference.
fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("DUPINDEX_") {
            std::env::remove_var(key);
        }
    }
}

#[test]
fn test_missing_file_uses_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();

    let config = IndexConfig::load_from_path(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.hash_threshold, 60_000);
    assert_eq!(config.external_hasher, "sha1sum");
    assert_eq!(config.ignored_names, vec![".git", ".svn", "__pycache__"]);
}

#[test]
fn test_load_from_toml() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
index_dir = "/srv/dupindex"
hash_threshold = 1000000
ignored_names = ["node_modules", "target"]
hash_timeout_secs = 10
"#,
    )
    .unwrap();

    let config = IndexConfig::load_from_path(&path).unwrap();
    assert_eq!(config.index_dir, PathBuf::from("/srv/dupindex"));
    assert_eq!(config.hash_threshold, 1_000_000);
    assert_eq!(config.ignored_names, vec!["node_modules", "target"]);
    assert_eq!(config.hash_timeout_secs, 10);
    assert!(config.verify_on_save);
}

#[test]
fn test_hierarchy_defaults_file_env_cli() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "hash_threshold = 111\nhash_timeout_secs = 5\n").unwrap();

    std::env::set_var("DUPINDEX_HASH_THRESHOLD", "222");
    let mut config = IndexConfig::load_from_path(&path).unwrap();
    std::env::remove_var("DUPINDEX_HASH_THRESHOLD");

    // Environment beats the file, the file beats defaults
    assert_eq!(config.hash_threshold, 222);
    assert_eq!(config.hash_timeout_secs, 5);

    let cli = Cli::try_parse_from([
        "dupindex",
        "scan",
        "/data",
        "--threshold",
        "333",
        "--ignore",
        "build",
        "--no-verify",
    ])
    .unwrap();
    let Commands::Scan(args) = cli.command;
    config.merge_scan_args(&args);

    assert_eq!(config.hash_threshold, 333);
    assert_eq!(config.hash_timeout_secs, 5);
    assert!(config.ignored_names.contains(&".git".to_string()));
    assert!(config.ignored_names.contains(&"build".to_string()));
    assert!(!config.verify_on_save);
}

#[test]
fn test_invalid_type_is_an_error() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "hash_threshold = \"huge\"\n").unwrap();

    let err = IndexConfig::load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("Invalid configuration"));
}

#[test]
fn test_save_then_load() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = IndexConfig::with_index_dir(dir.path().join("idx"));
    config.external_hasher = "/usr/local/bin/sha1sum".to_string();
    config.verify_on_save = false;
    config.save(&path).unwrap();

    assert_eq!(IndexConfig::load_from_path(&path).unwrap(), config);
}
