//! The index coordinator.
//!
//! [`Index`] owns the name store and the size buckets and is the only
//! thing that mutates them. Adding a file follows a fixed order:
//!
//! 1. validate the path and look up its packed form without interning
//! 2. plan the bucket transition, doing all hashing
//! 3. intern the path, check that it unpacks to itself, and commit
//!
//! Every fallible step that touches the filesystem happens in step 2, so a
//! failed add leaves both the name store and the buckets as they were.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use super::{
    ContentSource, FileRecord, IndexError, IndexLayout, NameComponentStore, Observation,
    PackedPath, SizeBucket, SizeBuckets,
};
use crate::config::IndexConfig;
use crate::scanner::{ContentHash, FileEntry, Hasher};

/// Persistent duplicate index.
#[derive(Debug)]
pub struct Index {
    config: IndexConfig,
    layout: IndexLayout,
    names: NameComponentStore,
    buckets: SizeBuckets,
    hasher: Hasher,
    /// Set once a save has been reloaded and compared
    verified: bool,
}

/// What the index knows about a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No indexed file has this size.
    Unindexed,
    /// No other indexed file has the same content.
    Unique,
    /// The content matches these other indexed files.
    Duplicate {
        /// Shared content hash
        hash: ContentHash,
        /// Absolute paths of the matching files
        of: Vec<PathBuf>,
    },
}

/// Counters describing the current index contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Distinct file sizes
    pub sizes: usize,
    /// Sizes with exactly one unhashed file
    pub single_sizes: usize,
    /// Sizes that have been hashed
    pub multi_sizes: usize,
    /// Hash groups across all hashed sizes
    pub hash_groups: usize,
    /// Hash groups with two or more members
    pub duplicate_groups: usize,
    /// Registered files
    pub files: usize,
    /// Files beyond the first of each duplicate group
    pub redundant_files: usize,
    /// Bytes taken by redundant files
    pub redundant_bytes: u64,
    /// Interned path components
    pub name_components: usize,
}

/// One group of identical files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSet {
    /// Size of each file
    pub size: u64,
    /// Shared content hash
    pub hash: ContentHash,
    /// Absolute paths, in the order the files were indexed
    pub paths: Vec<PathBuf>,
}

impl DuplicateSet {
    /// Bytes that would be freed by keeping a single copy.
    #[must_use]
    pub fn wasted_bytes(&self) -> u64 {
        self.size
            .saturating_mul(self.paths.len().saturating_sub(1) as u64)
    }
}

impl Index {
    /// Create an empty index that will be saved under `config.index_dir`.
    ///
    /// # Errors
    ///
    /// [`IndexError::AlreadyExists`] if the directory already holds saved
    /// state; use [`open`](Self::open) for that.
    pub fn new(config: IndexConfig) -> Result<Self, IndexError> {
        let index = Self::empty(config);
        if index.layout.has_saved_state() {
            return Err(IndexError::AlreadyExists(index.layout.root().to_path_buf()));
        }
        Ok(index)
    }

    fn empty(config: IndexConfig) -> Self {
        Self {
            layout: IndexLayout::new(config.index_dir.clone()),
            hasher: config.hasher(),
            names: NameComponentStore::new(),
            buckets: SizeBuckets::new(),
            verified: false,
            config,
        }
    }

    /// Load the index stored under `config.index_dir`.
    ///
    /// A directory with no saved state yields an empty index.
    ///
    /// # Errors
    ///
    /// [`IndexError::CorruptStore`] if the saved state does not parse or a
    /// stored path refers to an unknown component, [`IndexError::Io`] if it
    /// cannot be read.
    pub fn open(config: IndexConfig) -> Result<Self, IndexError> {
        let start = Instant::now();
        let mut index = Self::empty(config);
        let (names, buckets) = read_state(&index.layout)?;
        index.names = names;
        index.buckets = buckets;

        log::debug!("load: {:.4}s", start.elapsed().as_secs_f64());
        log::info!(
            "Opened index {}: {} files in {} sizes, {} name components",
            index.layout.root().display(),
            index.buckets.file_count(),
            index.buckets.len(),
            index.names.len()
        );
        Ok(index)
    }

    /// The configuration this index was created with.
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The on-disk layout.
    #[must_use]
    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    /// The name component store.
    #[must_use]
    pub fn names(&self) -> &NameComponentStore {
        &self.names
    }

    /// The size buckets.
    #[must_use]
    pub fn buckets(&self) -> &SizeBuckets {
        &self.buckets
    }

    /// Stat `path` and add it, returning its size.
    ///
    /// Relative paths are made absolute against the current directory.
    ///
    /// # Errors
    ///
    /// [`IndexError::Stat`] if the file cannot be stat'ed or is not a
    /// regular file, otherwise as [`add_entry`](Self::add_entry).
    pub fn add(&mut self, path: &Path) -> Result<u64, IndexError> {
        let entry = stat_entry(path)?;
        self.add_entry(&entry)?;
        Ok(entry.size)
    }

    /// Add a file whose metadata is already known.
    ///
    /// # Errors
    ///
    /// - [`IndexError::InvalidComponent`] for non-UTF-8 or malformed paths
    /// - [`IndexError::Hash`] if a needed hash cannot be computed
    /// - [`IndexError::InvariantViolation`] on internal inconsistency
    ///
    /// On error nothing in the index has changed.
    pub fn add_entry(&mut self, entry: &FileEntry) -> Result<Observation, IndexError> {
        let text = entry.path.to_str().ok_or_else(|| {
            IndexError::InvalidComponent(format!(
                "path is not valid UTF-8: {}",
                entry.path.display()
            ))
        })?;
        NameComponentStore::validate(text)?;
        let known = self.names.try_pack(text);

        let source = EntrySource {
            hasher: &self.hasher,
            names: &self.names,
            entry,
        };
        let transition = self.buckets.plan(entry.size, known.as_ref(), &source)?;

        // No filesystem access past this point
        let packed = match known {
            Some(packed) => packed,
            None => self.names.pack(text)?,
        };
        let restored = self.names.unpack(&packed)?;
        if restored != text {
            return Err(IndexError::InvariantViolation(format!(
                "'{text}' packs to {packed} which unpacks to '{restored}'"
            )));
        }

        let record = FileRecord::new(packed, entry.size, entry.mtime_centiseconds());
        let observation = self.buckets.observe(record, transition)?;

        match observation {
            Observation::NewSize => {}
            Observation::Rescan => log::debug!("Already indexed: {text}"),
            Observation::Promoted { merged } => log::info!(
                "Size collision at {} bytes: {text} ({})",
                entry.size,
                if merged { "duplicate" } else { "different content" }
            ),
            Observation::Duplicate { group_len } => log::info!(
                "Size collision at {} bytes: {text} (duplicate, {group_len} copies)",
                entry.size
            ),
            Observation::NewGroup => log::info!(
                "Size collision at {} bytes: {text} (different content)",
                entry.size
            ),
        }
        Ok(observation)
    }

    /// Write changed state to the index directory.
    ///
    /// The name store is written first so that bucket files on disk never
    /// reference ids missing from it. Only sizes changed since the last save
    /// are rewritten. The first save of a process with `verify_on_save` set
    /// reloads everything and compares it with memory.
    ///
    /// # Errors
    ///
    /// [`IndexError::Io`] if writing fails; the changed sizes are kept for
    /// the next attempt. [`IndexError::InvariantViolation`] if the reloaded
    /// state differs.
    pub fn save(&mut self) -> Result<(), IndexError> {
        let start = Instant::now();
        let dirty = self.buckets.take_dirty();

        if let Err(e) = self.write_state(&dirty) {
            self.buckets.restore_dirty(dirty);
            return Err(e);
        }
        log::debug!(
            "save: {} sizes in {:.2}s",
            dirty.len(),
            start.elapsed().as_secs_f64()
        );

        if self.config.verify_on_save && !self.verified {
            self.verify_saved()?;
            self.verified = true;
        }
        Ok(())
    }

    fn write_state(&self, dirty: &BTreeSet<u64>) -> Result<(), IndexError> {
        self.names.persist(&self.layout.name_parts_path())?;
        for &size in dirty {
            let bucket = self.buckets.get(size).ok_or_else(|| {
                IndexError::InvariantViolation(format!("changed size {size} has no bucket"))
            })?;
            self.layout.write_bucket(size, bucket)?;
        }
        Ok(())
    }

    fn verify_saved(&self) -> Result<(), IndexError> {
        let start = Instant::now();
        let (names, buckets) = read_state(&self.layout)?;
        if names != self.names {
            return Err(IndexError::InvariantViolation(
                "name components differ after save and reload".to_string(),
            ));
        }
        if buckets != self.buckets {
            return Err(IndexError::InvariantViolation(
                "size buckets differ after save and reload".to_string(),
            ));
        }
        log::debug!(
            "Verified saved index in {:.4}s",
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Tell whether the file at `path` duplicates an indexed file.
    ///
    /// Never modifies the index. Hashes at most the queried file and, for
    /// a size with a single unhashed file, that file.
    ///
    /// # Errors
    ///
    /// [`IndexError::Stat`] if `path` cannot be stat'ed, [`IndexError::Hash`]
    /// if a hash fails, [`IndexError::UnknownId`] on a damaged index.
    pub fn classify(&self, path: &Path) -> Result<Classification, IndexError> {
        let entry = stat_entry(path)?;
        let Some(bucket) = self.buckets.get(entry.size) else {
            return Ok(Classification::Unindexed);
        };

        let known = entry.path.to_str().and_then(|t| self.names.try_pack(t));
        let is_self = |p: &PackedPath| known.as_ref() == Some(p);
        let source = EntrySource {
            hasher: &self.hasher,
            names: &self.names,
            entry: &entry,
        };

        let (hash, group) = match bucket {
            SizeBucket::Single(record) if is_self(&record.path) => {
                return Ok(Classification::Unique)
            }
            SizeBucket::Single(record) => {
                let (existing, incoming) = source.hash_both(record)?;
                if existing != incoming {
                    return Ok(Classification::Unique);
                }
                let of = vec![self.unpack_path(&record.path)?];
                return Ok(Classification::Duplicate { hash: incoming, of });
            }
            SizeBucket::Multi(groups) => {
                let registered = groups
                    .iter()
                    .find(|(_, g)| g.members().iter().any(|m| is_self(&m.path)));
                match registered {
                    Some((hash, group)) => (hash.clone(), group),
                    None => {
                        let hash = source.hash_incoming()?;
                        match groups.get(&hash) {
                            Some(group) => (hash, group),
                            None => return Ok(Classification::Unique),
                        }
                    }
                }
            }
        };

        let of = group
            .members()
            .iter()
            .filter(|m| !is_self(&m.path))
            .map(|m| self.unpack_path(&m.path))
            .collect::<Result<Vec<_>, _>>()?;
        if of.is_empty() {
            Ok(Classification::Unique)
        } else {
            Ok(Classification::Duplicate { hash, of })
        }
    }

    /// Summary counters for the current contents.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats {
            sizes: self.buckets.len(),
            files: self.buckets.file_count(),
            name_components: self.names.len(),
            ..IndexStats::default()
        };
        for (size, bucket) in self.buckets.iter() {
            match bucket {
                SizeBucket::Single(_) => stats.single_sizes += 1,
                SizeBucket::Multi(groups) => {
                    stats.multi_sizes += 1;
                    stats.hash_groups += groups.len();
                    for group in groups.values().filter(|g| g.len() >= 2) {
                        stats.duplicate_groups += 1;
                        stats.redundant_files += group.len() - 1;
                        let redundant = size.saturating_mul(group.len() as u64 - 1);
                        stats.redundant_bytes = stats.redundant_bytes.saturating_add(redundant);
                    }
                }
            }
        }
        stats
    }

    /// Every group of two or more identical files, by ascending size.
    pub fn duplicate_groups(&self) -> impl Iterator<Item = Result<DuplicateSet, IndexError>> + '_ {
        self.buckets
            .iter()
            .filter_map(|(size, bucket)| match bucket {
                SizeBucket::Multi(groups) => Some((size, groups)),
                SizeBucket::Single(_) => None,
            })
            .flat_map(move |(size, groups)| {
                groups
                    .iter()
                    .filter(|(_, group)| group.len() >= 2)
                    .map(move |(hash, group)| {
                        let paths = group
                            .members()
                            .iter()
                            .map(|m| self.unpack_path(&m.path))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(DuplicateSet {
                            size,
                            hash: hash.clone(),
                            paths,
                        })
                    })
            })
    }

    fn unpack_path(&self, packed: &PackedPath) -> Result<PathBuf, IndexError> {
        self.names.unpack(packed).map(PathBuf::from)
    }
}

/// Stat a path that is about to be added or classified.
fn stat_entry(path: &Path) -> Result<FileEntry, IndexError> {
    let stat_error = |source| IndexError::Stat {
        path: path.to_path_buf(),
        source,
    };

    let metadata = fs::metadata(path).map_err(stat_error)?;
    if !metadata.is_file() {
        return Err(stat_error(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    let absolute = std::path::absolute(path).map_err(stat_error)?;
    Ok(FileEntry::from_metadata(absolute, &metadata))
}

/// Load names and buckets, checking that every stored path resolves.
fn read_state(layout: &IndexLayout) -> Result<(NameComponentStore, SizeBuckets), IndexError> {
    let names = NameComponentStore::load(&layout.name_parts_path())?;
    let buckets = layout.read_buckets()?;

    for (size, bucket) in buckets.iter() {
        for record in bucket.records() {
            names
                .unpack(&record.path)
                .map_err(|e| IndexError::CorruptStore {
                    path: layout.dirinfo_path(size),
                    reason: e.to_string(),
                })?;
        }
    }
    Ok((names, buckets))
}

/// Hashes the file being added and files already in the index.
struct EntrySource<'a> {
    hasher: &'a Hasher,
    names: &'a NameComponentStore,
    entry: &'a FileEntry,
}

impl EntrySource<'_> {
    fn existing_path(&self, record: &FileRecord) -> Result<PathBuf, IndexError> {
        self.names.unpack(&record.path).map(PathBuf::from)
    }
}

impl ContentSource for EntrySource<'_> {
    fn hash_incoming(&self) -> Result<ContentHash, IndexError> {
        Ok(self.hasher.hash(&self.entry.path, self.entry.size)?)
    }

    fn hash_existing(&self, record: &FileRecord) -> Result<ContentHash, IndexError> {
        let path = self.existing_path(record)?;
        Ok(self.hasher.hash(&path, record.size)?)
    }

    fn hash_both(&self, existing: &FileRecord) -> Result<(ContentHash, ContentHash), IndexError> {
        let path = self.existing_path(existing)?;
        let (old, new) = rayon::join(
            || self.hasher.hash(&path, existing.size),
            || self.hasher.hash(&self.entry.path, self.entry.size),
        );
        Ok((old?, new?))
    }
}
