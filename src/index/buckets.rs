//! Size-bucketed collision state machine.
//!
//! # Overview
//!
//! Files of different sizes cannot be duplicates, so the index keys
//! everything by size first. A size seen once holds a single unhashed
//! [`FileRecord`]; only when a second file of the same size shows up are
//! both hashed and the bucket promoted to hash-keyed [`DuplicateGroup`]s.
//! Most sizes are unique, so most files are never hashed.
//!
//! | Bucket       | Incoming file              | Result                         |
//! |--------------|----------------------------|--------------------------------|
//! | absent       | any                        | `Single`                       |
//! | `Single(r)`  | same path as `r`           | unchanged                      |
//! | `Single(r)`  | other path                 | `Multi`, both hashed           |
//! | `Multi`      | path already registered    | unchanged                      |
//! | `Multi`      | hash matches a group       | appended to that group         |
//! | `Multi`      | new hash                   | new singleton group            |
//!
//! Updating is split in two steps. [`SizeBuckets::plan`] reads the bucket
//! and does all hashing, producing a [`Transition`]; it never mutates.
//! [`SizeBuckets::observe`] applies a planned transition and performs no
//! I/O, so a failure while hashing can never leave a bucket half-updated.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::{IndexError, PackedPath};
use crate::scanner::ContentHash;

/// One observed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Interned absolute path
    pub path: PackedPath,
    /// File size in bytes
    pub size: u64,
    /// Modification time in hundredths of a second since the epoch
    pub mtime_cs: u64,
}

impl FileRecord {
    /// Create a new record.
    #[must_use]
    pub fn new(path: PackedPath, size: u64, mtime_cs: u64) -> Self {
        Self {
            path,
            size,
            mtime_cs,
        }
    }
}

/// Files sharing both size and content hash, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    members: Vec<FileRecord>,
}

impl DuplicateGroup {
    /// Start a group with its first member.
    #[must_use]
    pub fn new(first: FileRecord) -> Self {
        Self {
            members: vec![first],
        }
    }

    /// Rebuild a group from stored members; `None` if empty.
    #[must_use]
    pub fn from_members(members: Vec<FileRecord>) -> Option<Self> {
        if members.is_empty() {
            None
        } else {
            Some(Self { members })
        }
    }

    /// Members in insertion order.
    #[must_use]
    pub fn members(&self) -> &[FileRecord] {
        &self.members
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false for a constructed group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether a member has this path.
    #[must_use]
    pub fn contains(&self, path: &PackedPath) -> bool {
        self.members.iter().any(|m| &m.path == path)
    }

    fn push(&mut self, record: FileRecord) {
        self.members.push(record);
    }
}

/// Hash groups of a promoted bucket, ordered by digest.
pub type HashGroups = BTreeMap<ContentHash, DuplicateGroup>;

/// State of one size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeBucket {
    /// Exactly one known file, not hashed
    Single(FileRecord),
    /// Two or more known files, partitioned by content hash
    Multi(HashGroups),
}

impl SizeBucket {
    /// Number of files registered in this bucket.
    #[must_use]
    pub fn file_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Multi(groups) => groups.values().map(DuplicateGroup::len).sum(),
        }
    }

    /// Whether a file with this path is registered here.
    #[must_use]
    pub fn contains(&self, path: &PackedPath) -> bool {
        match self {
            Self::Single(record) => &record.path == path,
            Self::Multi(groups) => groups.values().any(|g| g.contains(path)),
        }
    }

    /// All records, group by group.
    pub fn records(&self) -> Box<dyn Iterator<Item = &FileRecord> + '_> {
        match self {
            Self::Single(record) => Box::new(std::iter::once(record)),
            Self::Multi(groups) => Box::new(groups.values().flat_map(|g| g.members().iter())),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Single(_) => "single",
            Self::Multi(_) => "multi",
        }
    }
}

/// Change to apply to a bucket, decided by [`SizeBuckets::plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// First file of this size
    Create,
    /// The file is already registered
    Rescan,
    /// Second file of this size; both hashed
    Promote {
        /// Hash of the file already in the bucket
        existing: ContentHash,
        /// Hash of the incoming file
        incoming: ContentHash,
    },
    /// Another file for a promoted bucket
    Insert(ContentHash),
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Rescan => write!(f, "rescan"),
            Self::Promote { .. } => write!(f, "promote"),
            Self::Insert(_) => write!(f, "insert"),
        }
    }
}

/// What an applied transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// A bucket was created in state `Single`
    NewSize,
    /// Nothing changed; the file was known
    Rescan,
    /// `Single` became `Multi`; `merged` if both files share a hash
    Promoted {
        /// Whether the two files ended up in one group
        merged: bool,
    },
    /// Appended to an existing group, now of `group_len` members
    Duplicate {
        /// Size of the grown group
        group_len: usize,
    },
    /// New singleton group in a promoted bucket
    NewGroup,
}

impl Observation {
    /// Whether the file ended up in a group with at least one other file.
    #[must_use]
    pub fn is_duplicate(self) -> bool {
        matches!(
            self,
            Self::Promoted { merged: true } | Self::Duplicate { .. }
        )
    }
}

/// Supplies content hashes while a transition is planned.
pub trait ContentSource {
    /// Hash the file being added.
    ///
    /// # Errors
    ///
    /// Any hashing failure, which aborts the add.
    fn hash_incoming(&self) -> Result<ContentHash, IndexError>;

    /// Hash a file already registered in the index.
    ///
    /// # Errors
    ///
    /// Any hashing failure, which aborts the add.
    fn hash_existing(&self, record: &FileRecord) -> Result<ContentHash, IndexError>;

    /// Hash both sides of a promotion, returning `(existing, incoming)`.
    ///
    /// # Errors
    ///
    /// The first failure of either hash.
    fn hash_both(&self, existing: &FileRecord) -> Result<(ContentHash, ContentHash), IndexError> {
        Ok((self.hash_existing(existing)?, self.hash_incoming()?))
    }
}

/// All size buckets of an index.
///
/// Tracks which sizes changed since the last [`take_dirty`](Self::take_dirty)
/// so persistence rewrites only those.
#[derive(Debug, Clone, Default)]
pub struct SizeBuckets {
    buckets: BTreeMap<u64, SizeBucket>,
    dirty: BTreeSet<u64>,
}

impl PartialEq for SizeBuckets {
    fn eq(&self, other: &Self) -> bool {
        self.buckets == other.buckets
    }
}

impl Eq for SizeBuckets {}

impl SizeBuckets {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket for `size`, if any file of that size is known.
    #[must_use]
    pub fn get(&self, size: u64) -> Option<&SizeBucket> {
        self.buckets.get(&size)
    }

    /// Number of distinct sizes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Check if no file is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Buckets in ascending size order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &SizeBucket)> {
        self.buckets.iter().map(|(&size, bucket)| (size, bucket))
    }

    /// Total number of registered files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.buckets.values().map(SizeBucket::file_count).sum()
    }

    /// Decide what adding a file of `size` does, hashing as needed.
    ///
    /// `incoming` is the packed path of the new file if all its components
    /// are already interned; `None` means it cannot be registered yet.
    ///
    /// # Errors
    ///
    /// Whatever `source` returns while hashing. Nothing is modified.
    pub fn plan<S: ContentSource + ?Sized>(
        &self,
        size: u64,
        incoming: Option<&PackedPath>,
        source: &S,
    ) -> Result<Transition, IndexError> {
        let known = |bucket: &SizeBucket| incoming.is_some_and(|path| bucket.contains(path));

        match self.buckets.get(&size) {
            None => Ok(Transition::Create),
            Some(bucket) if known(bucket) => Ok(Transition::Rescan),
            Some(SizeBucket::Single(existing)) => {
                let (existing, incoming) = source.hash_both(existing)?;
                Ok(Transition::Promote { existing, incoming })
            }
            Some(SizeBucket::Multi(_)) => Ok(Transition::Insert(source.hash_incoming()?)),
        }
    }

    /// Apply a planned transition for `record`.
    ///
    /// Performs no I/O. The record is moved into the bucket; on promotion
    /// the previously single record moves into its hash group.
    ///
    /// # Errors
    ///
    /// [`IndexError::InvariantViolation`] if `transition` does not fit the
    /// bucket's current state. The bucket is left as it was.
    pub fn observe(
        &mut self,
        record: FileRecord,
        transition: Transition,
    ) -> Result<Observation, IndexError> {
        let size = record.size;
        let current = self.buckets.remove(&size);

        let (next, observation) = match (current, transition) {
            (None, Transition::Create) => (SizeBucket::Single(record), Observation::NewSize),
            (Some(bucket), Transition::Rescan) if bucket.contains(&record.path) => {
                (bucket, Observation::Rescan)
            }
            (Some(SizeBucket::Single(old)), Transition::Promote { existing, incoming }) => {
                let merged = existing == incoming;
                let mut first = DuplicateGroup::new(old);
                let mut groups = HashGroups::new();
                if merged {
                    first.push(record);
                    groups.insert(existing, first);
                } else {
                    groups.insert(existing, first);
                    groups.insert(incoming, DuplicateGroup::new(record));
                }
                (SizeBucket::Multi(groups), Observation::Promoted { merged })
            }
            (Some(SizeBucket::Multi(mut groups)), Transition::Insert(hash)) => {
                let observation = match groups.get_mut(&hash) {
                    Some(group) => {
                        group.push(record);
                        Observation::Duplicate {
                            group_len: group.len(),
                        }
                    }
                    None => {
                        groups.insert(hash, DuplicateGroup::new(record));
                        Observation::NewGroup
                    }
                };
                (SizeBucket::Multi(groups), observation)
            }
            (current, transition) => {
                let state = current.as_ref().map_or("empty", SizeBucket::kind);
                if let Some(bucket) = current {
                    self.buckets.insert(size, bucket);
                }
                return Err(IndexError::InvariantViolation(format!(
                    "transition '{transition}' does not apply to {state} bucket of size {size}"
                )));
            }
        };

        self.buckets.insert(size, next);
        if observation != Observation::Rescan {
            self.dirty.insert(size);
        }
        Ok(observation)
    }

    /// Sizes changed since the last call, clearing the set.
    pub fn take_dirty(&mut self) -> BTreeSet<u64> {
        std::mem::take(&mut self.dirty)
    }

    /// Put dirty sizes back after a failed flush.
    pub(crate) fn restore_dirty(&mut self, sizes: BTreeSet<u64>) {
        self.dirty.extend(sizes);
    }

    /// Insert a bucket read from disk. Not marked dirty.
    pub(crate) fn insert_loaded(&mut self, size: u64, bucket: SizeBucket) {
        self.buckets.insert(size, bucket);
    }
}
