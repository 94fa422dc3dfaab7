//! Scanner module for directory traversal and file hashing.
//!
//! This module provides functionality for:
//! - Parallel directory walking using jwalk, pruning ignored directory names
//! - Content hashing with SHA-1, streamed in-process or delegated to `sha1sum`
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and file discovery
//! - [`hasher`]: Size-based hash strategy selection
//!
//! # Example
//!
//! ```no_run
//! use dupindex::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("/home/user"), WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod hasher;
pub mod walker;

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

// Re-export main types
pub use hasher::{
    select_strategy, ContentHash, ExternalSha1, HashMethod, HashStrategy, Hasher, StreamingSha1,
    CHUNK_SIZE, DEFAULT_HASH_THRESHOLD,
};
pub use walker::Walker;

/// Directory names pruned from traversal unless configured otherwise.
pub const DEFAULT_IGNORED_NAMES: [&str; 3] = [".git", ".svn", "__pycache__"];

/// Metadata for a discovered file.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl FileEntry {
    /// Create a new FileEntry.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, modified: SystemTime) -> Self {
        Self {
            path,
            size,
            modified,
        }
    }

    /// Build an entry from filesystem metadata.
    #[must_use]
    pub fn from_metadata(path: PathBuf, metadata: &std::fs::Metadata) -> Self {
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Self::new(path, metadata.len(), modified)
    }

    /// Modification time in hundredths of a second since the Unix epoch.
    ///
    /// Times before the epoch clamp to zero.
    #[must_use]
    pub fn mtime_centiseconds(&self) -> u64 {
        let millis = self
            .modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        u64::try_from(millis / 10).unwrap_or(u64::MAX)
    }
}

/// Configuration for directory walking.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Directory names that are never descended into.
    pub ignored_names: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            ignored_names: DEFAULT_IGNORED_NAMES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl WalkerConfig {
    /// Create a new configuration with an explicit ignored-name set.
    #[must_use]
    pub fn new(ignored_names: Vec<String>) -> Self {
        Self { ignored_names }
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The specified path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Whether the scan may skip past this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The external hashing program could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The external hashing program ran but its result is unusable.
    #[error("{program} failed for {path}: {reason}")]
    External {
        /// Program that was run
        program: String,
        /// File being hashed
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// The external hashing program did not finish in time.
    #[error("Hashing {path} timed out after {seconds}s")]
    Timeout {
        /// File being hashed
        path: PathBuf,
        /// Configured limit
        seconds: u64,
    },
}

impl HashError {
    /// The file the error is about, if it concerns one.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::NotFound(path) | Self::PermissionDenied(path) => Some(path),
            Self::Io { path, .. } | Self::External { path, .. } | Self::Timeout { path, .. } => {
                Some(path)
            }
            Self::Spawn { .. } => None,
        }
    }

    /// Map an I/O error on `path` to the matching variant.
    pub(crate) fn from_io(path: &std::path::Path, error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }
}
