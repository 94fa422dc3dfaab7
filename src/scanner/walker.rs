//! Directory walker implementation using jwalk for parallel traversal.
//!
//! # Overview
//!
//! This module provides the [`Walker`] struct that feeds candidate files into
//! the index. It uses [`jwalk`] for parallel directory reading and applies the
//! traversal policy:
//!
//! - directories whose name is in the ignored set are not descended into
//! - symbolic links are never followed or reported
//! - special files (sockets, FIFOs, devices) are skipped
//! - paths are absolute, and siblings are visited in name order
//!
//! # Example
//!
//! ```no_run
//! use dupindex::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("."), WalkerConfig::default());
//! let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
//! println!("Found {} files", files.len());
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jwalk::WalkDir;

use super::{FileEntry, ScanError, WalkerConfig};

/// Directory walker for parallel file discovery.
#[derive(Debug)]
pub struct Walker {
    /// Absolute root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given path.
    ///
    /// Relative paths are made absolute against the current directory
    /// without resolving symlinks.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        let root = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            root,
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker will stop iteration
    /// as soon as possible.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// The absolute root being walked.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if shutdown has been requested.
    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Walk the directory tree, yielding file entries.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration; the caller decides which ones are fatal.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileEntry, ScanError>> + '_ {
        let ignored: Arc<HashSet<String>> =
            Arc::new(self.config.ignored_names.iter().cloned().collect());

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(false)
            .skip_hidden(false)
            .process_read_dir(move |_depth, _path, _read_dir_state, children| {
                // Prune ignored directories before jwalk descends into them
                children.retain(|child| match child {
                    Ok(entry) => {
                        !(entry.file_type().is_dir()
                            && entry
                                .file_name()
                                .to_str()
                                .is_some_and(|name| ignored.contains(name)))
                    }
                    Err(_) => true,
                });

                // Sort children for deterministic output
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        walk_dir.into_iter().filter_map(move |entry_result| {
            if self.is_shutdown_requested() {
                log::debug!("Walker: Shutdown requested, stopping iteration");
                return None;
            }

            match entry_result {
                Ok(entry) => {
                    let path = entry.path();
                    let file_type = entry.file_type();

                    if file_type.is_dir() {
                        return None;
                    }

                    if file_type.is_symlink() {
                        log::trace!("Skipping symlink: {}", path.display());
                        return None;
                    }

                    let metadata = match std::fs::symlink_metadata(&path) {
                        Ok(m) => m,
                        Err(e) => return Some(self.handle_io_error(&path, e)),
                    };

                    if !metadata.is_file() {
                        log::debug!("Skipping special file: {}", path.display());
                        return None;
                    }

                    Some(Ok(FileEntry::from_metadata(path, &metadata)))
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);
                    Some(self.handle_jwalk_error(path, e))
                }
            }
        })
    }

    /// Handle I/O errors during file access.
    fn handle_io_error(&self, path: &Path, error: std::io::Error) -> Result<FileEntry, ScanError> {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::PermissionDenied => {
                log::warn!("Permission denied: {}", path.display());
                Err(ScanError::PermissionDenied(path.to_path_buf()))
            }
            ErrorKind::NotFound => {
                log::debug!("File not found (may have been deleted): {}", path.display());
                Err(ScanError::NotFound(path.to_path_buf()))
            }
            _ => {
                log::warn!("I/O error for {}: {}", path.display(), error);
                Err(ScanError::Io {
                    path: path.to_path_buf(),
                    source: error,
                })
            }
        }
    }

    /// Handle jwalk errors, keeping permission denials recoverable.
    fn handle_jwalk_error(
        &self,
        path: PathBuf,
        error: jwalk::Error,
    ) -> Result<FileEntry, ScanError> {
        let kind = error.io_error().map(std::io::Error::kind);
        match kind {
            Some(std::io::ErrorKind::PermissionDenied) => {
                log::warn!("Permission denied: {}", path.display());
                Err(ScanError::PermissionDenied(path))
            }
            Some(std::io::ErrorKind::NotFound) => Err(ScanError::NotFound(path)),
            _ => {
                log::warn!("Walker error for {}: {}", path.display(), error);
                Err(ScanError::Io {
                    path,
                    source: std::io::Error::other(error.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    /// Three files of 13, 12 and 19 bytes, one of them nested.
    fn create_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file1.txt"), "Hello, world!").unwrap();
        fs::write(dir.path().join("file2.txt"), "Another file").unwrap();

        let subdir = dir.path().join("subdir");
        fs::create_dir(&subdir).unwrap();
        fs::write(subdir.join("nested.txt"), "Nested file content").unwrap();

        dir
    }

    fn names(files: &[FileEntry]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_walker_reports_size_and_mtime() {
        let dir = create_test_dir();
        let walker = Walker::new(dir.path(), WalkerConfig::default());

        let entries: Vec<FileEntry> = walker.walk().map(Result::unwrap).collect();
        let sizes: Vec<u64> = entries.iter().map(|e| e.size).collect();

        assert_eq!(sizes, vec![13, 12, 19]);
        for entry in &entries {
            assert!(entry.path.is_absolute());
            assert!(entry.path.starts_with(walker.root()));
            let on_disk = fs::metadata(&entry.path).unwrap().modified().unwrap();
            assert_eq!(entry.modified, on_disk);
        }
    }

    #[test]
    fn test_walker_includes_empty_files() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("empty")).unwrap();

        let walker = Walker::new(dir.path(), WalkerConfig::default());
        let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 0);
    }

    #[test]
    fn test_walker_prunes_ignored_directories() {
        let dir = create_test_dir();
        for ignored in [".git", "__pycache__"] {
            let sub = dir.path().join(ignored);
            fs::create_dir(&sub).unwrap();
            fs::write(sub.join("object"), "ignored content").unwrap();
        }
        // a file that merely shares an ignored name is still indexed
        fs::write(dir.path().join(".svn"), "not a directory").unwrap();

        let walker = Walker::new(dir.path(), WalkerConfig::default());
        let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();

        let found = names(&files);
        assert_eq!(files.len(), 4);
        assert!(!found.contains(&"object".to_string()));
        assert!(found.contains(&".svn".to_string()));
    }

    #[test]
    fn test_walker_custom_ignored_names() {
        let dir = create_test_dir();
        let walker = Walker::new(dir.path(), WalkerConfig::new(vec!["subdir".to_string()]));

        let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
        assert_eq!(names(&files), vec!["file1.txt", "file2.txt"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_walker_skips_symlinks() {
        let dir = create_test_dir();
        std::os::unix::fs::symlink(dir.path().join("file1.txt"), dir.path().join("link.txt"))
            .unwrap();
        std::os::unix::fs::symlink(dir.path().join("subdir"), dir.path().join("linkdir")).unwrap();

        let walker = Walker::new(dir.path(), WalkerConfig::default());
        let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();

        assert_eq!(files.len(), 3);
        assert!(!names(&files).contains(&"link.txt".to_string()));
    }

    #[test]
    fn test_walker_sorted_output() {
        let dir = TempDir::new().unwrap();
        for name in ["c", "a", "b"] {
            fs::write(dir.path().join(name), name).unwrap();
        }

        let walker = Walker::new(dir.path(), WalkerConfig::default());
        let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
        assert_eq!(names(&files), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_walker_shutdown_flag() {
        let dir = create_test_dir();
        for i in 0..10 {
            fs::write(dir.path().join(format!("file{}.txt", i)), format!("{i}")).unwrap();
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let walker = Walker::new(dir.path(), WalkerConfig::default())
            .with_shutdown_flag(Arc::clone(&shutdown));

        shutdown.store(true, Ordering::SeqCst);

        let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
        assert!(
            files.len() < 5,
            "Expected early termination, got {} files",
            files.len()
        );
    }

    #[test]
    fn test_walker_handles_nonexistent_path() {
        let walker = Walker::new(
            Path::new("/nonexistent/path/12345"),
            WalkerConfig::default(),
        );

        let results: Vec<_> = walker.walk().collect();
        assert!(results.is_empty() || results.iter().all(|r| r.is_err()));
    }

    #[test]
    fn test_walker_relative_root_is_absolute() {
        let walker = Walker::new(Path::new("."), WalkerConfig::default());
        assert!(walker.root().is_absolute());
    }
}
