//! On-disk layout of an index directory.
//!
//! ```text
//! <index_dir>/
//!   name_parts            JSON object, component -> id, in id order
//!   files/<size>/dirinfo  state of one size bucket
//! ```
//!
//! A `dirinfo` file is line oriented:
//!
//! ```text
//! single 0/1/2
//! mtime 171234567800
//! ```
//!
//! or, once promoted, one line per hash group:
//!
//! ```text
//! multi
//! 3f786850e387550fdab836ed7e6dc881de23001b 0/1/2@171234567800 0/3/2@171234569900
//! 89e6c98d92887913cadf06b2adb97f26cde4849b 0/4@171234512300
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use super::{write_atomic, DuplicateGroup, FileRecord, HashGroups, IndexError, SizeBucket};
use super::{PackedPath, SizeBuckets};
use crate::scanner::ContentHash;

/// File holding the name component mapping.
pub const NAME_PARTS_FILE: &str = "name_parts";
/// Directory holding one subdirectory per size.
pub const FILES_DIR: &str = "files";
/// Per-size state file.
pub const DIRINFO_FILE: &str = "dirinfo";

/// Paths inside an index directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The index directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the name component mapping.
    #[must_use]
    pub fn name_parts_path(&self) -> PathBuf {
        self.root.join(NAME_PARTS_FILE)
    }

    /// Directory containing all size buckets.
    #[must_use]
    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    /// Whether anything from a previous save is present.
    #[must_use]
    pub fn has_saved_state(&self) -> bool {
        self.name_parts_path().exists() || self.files_dir().exists()
    }

    /// State file of the bucket for `size`.
    #[must_use]
    pub fn dirinfo_path(&self, size: u64) -> PathBuf {
        self.files_dir().join(size.to_string()).join(DIRINFO_FILE)
    }

    /// Overwrite the state file for `size`.
    ///
    /// # Errors
    ///
    /// [`IndexError::Io`] if the file cannot be written.
    pub fn write_bucket(&self, size: u64, bucket: &SizeBucket) -> Result<(), IndexError> {
        write_atomic(&self.dirinfo_path(size), encode_bucket(bucket).as_bytes())
    }

    /// Read the state file for `size`; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// [`IndexError::CorruptStore`] if the file does not parse,
    /// [`IndexError::Io`] on read failure.
    pub fn read_bucket(&self, size: u64) -> Result<Option<SizeBucket>, IndexError> {
        let path = self.dirinfo_path(size);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(IndexError::Io { path, source }),
        };

        decode_bucket(&content, size)
            .map(Some)
            .map_err(|reason| IndexError::CorruptStore { path, reason })
    }

    /// Read every bucket under the files directory.
    ///
    /// A missing files directory yields an empty collection. Size
    /// directories without a state file are left over from an interrupted
    /// write and are skipped.
    ///
    /// # Errors
    ///
    /// [`IndexError::CorruptStore`] for entries that are not size
    /// directories or hold unparsable state, [`IndexError::Io`] otherwise.
    pub fn read_buckets(&self) -> Result<SizeBuckets, IndexError> {
        let files_dir = self.files_dir();
        let mut buckets = SizeBuckets::new();

        let entries = match fs::read_dir(&files_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(buckets),
            Err(source) => {
                return Err(IndexError::Io {
                    path: files_dir,
                    source,
                })
            }
        };

        for entry in entries {
            let entry = entry.map_err(|source| IndexError::Io {
                path: files_dir.clone(),
                source,
            })?;
            let size = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
                .ok_or_else(|| IndexError::CorruptStore {
                    path: entry.path(),
                    reason: "not a size directory".to_string(),
                })?;

            match self.read_bucket(size)? {
                Some(bucket) => buckets.insert_loaded(size, bucket),
                None => log::debug!("No bucket state in {}, skipping", entry.path().display()),
            }
        }

        Ok(buckets)
    }
}

/// Serialize a bucket to the `dirinfo` text format.
#[must_use]
pub fn encode_bucket(bucket: &SizeBucket) -> String {
    match bucket {
        SizeBucket::Single(record) => {
            format!("single {}\nmtime {}\n", record.path, record.mtime_cs)
        }
        SizeBucket::Multi(groups) => {
            let mut out = String::from("multi\n");
            for (hash, group) in groups {
                out.push_str(hash.as_str());
                for member in group.members() {
                    out.push_str(&format!(" {}@{}", member.path, member.mtime_cs));
                }
                out.push('\n');
            }
            out
        }
    }
}

/// Parse the `dirinfo` text format of the bucket stored under `size`.
///
/// Sizes are not repeated inside the file; every record gets `size`.
///
/// # Errors
///
/// A description of the first problem found.
pub fn decode_bucket(content: &str, size: u64) -> Result<SizeBucket, String> {
    let mut lines = content.lines();
    let header = lines.next().ok_or("empty bucket state")?;

    if let Some(packed) = header.strip_prefix("single ") {
        let path = parse_packed(packed)?;
        let mtime_cs = match lines.next() {
            Some(line) => parse_mtime_line(line)?,
            None => 0,
        };
        if let Some(extra) = lines.find(|l| !l.is_empty()) {
            return Err(format!("unexpected line '{extra}' after single record"));
        }
        return Ok(SizeBucket::Single(FileRecord::new(path, size, mtime_cs)));
    }

    if header != "multi" {
        return Err(format!("unknown bucket header '{header}'"));
    }

    let mut groups = HashGroups::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let mut fields = line.split(' ');
        let hash_text = fields.next().unwrap_or_default();
        let hash = ContentHash::from_hex(hash_text)
            .ok_or_else(|| format!("invalid content hash '{hash_text}'"))?;

        let members = fields
            .map(|field| parse_member(field, size))
            .collect::<Result<Vec<_>, _>>()?;
        let group = DuplicateGroup::from_members(members)
            .ok_or_else(|| format!("hash group {hash} has no members"))?;

        if groups.insert(hash.clone(), group).is_some() {
            return Err(format!("hash group {hash} listed twice"));
        }
    }

    let bucket = SizeBucket::Multi(groups);
    if bucket.file_count() < 2 {
        return Err("promoted bucket with fewer than two files".to_string());
    }
    Ok(bucket)
}

fn parse_packed(text: &str) -> Result<PackedPath, String> {
    text.parse::<PackedPath>()
        .map_err(|e| format!("invalid packed path '{text}': {e}"))
}

fn parse_mtime_line(line: &str) -> Result<u64, String> {
    line.strip_prefix("mtime ")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| format!("invalid mtime line '{line}'"))
}

fn parse_member(field: &str, size: u64) -> Result<FileRecord, String> {
    let (packed, mtime) = field
        .rsplit_once('@')
        .ok_or_else(|| format!("member '{field}' lacks an mtime"))?;
    let mtime_cs = mtime
        .parse()
        .map_err(|_| format!("invalid mtime in member '{field}'"))?;
    Ok(FileRecord::new(parse_packed(packed)?, size, mtime_cs))
}
