//! Content-addressed duplicate index.
//!
//! This module provides:
//! - [`names`]: interning of path components into compact numeric paths
//! - [`buckets`]: the per-size collision state machine with lazy hashing
//! - [`persist`]: the on-disk layout under the index directory
//! - [`coordinator`]: the [`Index`] that ties them together
//! - [`scan`]: feeding a directory tree into an [`Index`]
//!
//! # Example
//!
//! ```no_run
//! use dupindex::config::IndexConfig;
//! use dupindex::index::Index;
//! use std::path::Path;
//!
//! let mut index = Index::open(IndexConfig::default())?;
//! index.add(Path::new("/home/user/notes.txt"))?;
//! index.save()?;
//! # Ok::<(), dupindex::index::IndexError>(())
//! ```

pub mod buckets;
pub mod coordinator;
pub mod names;
pub mod persist;
pub mod scan;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::scanner::{HashError, ScanError};

pub use buckets::{
    ContentSource, DuplicateGroup, FileRecord, HashGroups, Observation, SizeBucket, SizeBuckets,
    Transition,
};
pub use coordinator::{Classification, DuplicateSet, Index, IndexStats};
pub use names::{NameComponentStore, PackedPath, PathComponentId};
pub use persist::IndexLayout;
pub use scan::{ScanConfig, ScanSummary};

/// Errors raised by the index.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The file to add could not be stat'ed.
    #[error("Cannot stat {path}: {source}")]
    Stat {
        /// File being added
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A content hash could not be computed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// The traversal hit an error it cannot skip.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Persisted state could not be parsed.
    #[error("Corrupt index data in {path}: {reason}")]
    CorruptStore {
        /// File that failed to parse
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// A path or path component cannot be interned.
    #[error("Invalid path component: {0}")]
    InvalidComponent(String),

    /// A packed path refers to an id the name store never assigned.
    #[error("Unknown path component id: {0}")]
    UnknownId(u32),

    /// A fresh index was requested where one is already saved.
    #[error("An index already exists in {0}; open it instead")]
    AlreadyExists(PathBuf),

    /// Internal state is inconsistent.
    #[error("Index invariant violated: {0}")]
    InvariantViolation(String),

    /// Reading or writing index files failed.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    /// Whether this error concerns only the one file being added.
    ///
    /// A scan counts these and moves on; anything else ends the scan.
    #[must_use]
    pub fn is_file_local(&self) -> bool {
        match self {
            Self::Stat { source, .. } => source.kind() == std::io::ErrorKind::PermissionDenied,
            Self::Hash(_) => true,
            Self::Scan(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// Replace `path` with `bytes` via a temporary sibling and a rename.
///
/// Creates missing parent directories.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| IndexError::Io { path, source }
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    file.write_all(bytes).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_err(path))
}
