//! Path component interning.
//!
//! # Overview
//!
//! Absolute paths share long prefixes, so the index stores them as
//! sequences of small integers instead of strings. Every distinct path
//! segment gets a [`PathComponentId`] in first-seen order starting at 0;
//! a [`PackedPath`] is the list of ids for one path, with the root implied.
//!
//! ```
//! use dupindex::index::NameComponentStore;
//!
//! let mut store = NameComponentStore::new();
//! let packed = store.pack("/home/user/a.txt").unwrap();
//! assert_eq!(packed.to_string(), "0/1/2");
//! assert_eq!(store.unpack(&packed).unwrap(), "/home/user/a.txt");
//! ```
//!
//! The store is persisted as a JSON object mapping each component to its id,
//! written in id order.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use super::{write_atomic, IndexError};

/// Separator between path segments, and between ids in a packed path.
pub const SEPARATOR: char = '/';

/// Identifier of one interned path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathComponentId(pub u32);

impl fmt::Display for PathComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An absolute path as a sequence of interned component ids.
///
/// The textual form joins the ids with `/`, e.g. `2/7/4/9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PackedPath(Vec<PathComponentId>);

impl PackedPath {
    /// The component ids, root first.
    #[must_use]
    pub fn ids(&self) -> &[PathComponentId] {
        &self.0
    }

    /// Number of segments below the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the packed form of the root itself.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<PathComponentId>> for PackedPath {
    fn from(ids: Vec<PathComponentId>) -> Self {
        Self(ids)
    }
}

impl fmt::Display for PackedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl FromStr for PackedPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty packed path".to_string());
        }
        s.split(SEPARATOR)
            .map(|part| {
                part.parse::<u32>()
                    .map(PathComponentId)
                    .map_err(|_| format!("invalid component id '{part}' in '{s}'"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

/// Bidirectional `component ↔ id` mapping.
///
/// Invariant: `words[id]` and `index[word]` are inverse bijections, and
/// `words.len()` is the number of distinct components ever interned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameComponentStore {
    words: Vec<String>,
    index: HashMap<String, PathComponentId>,
}

impl NameComponentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if nothing has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Return the id for `component`, assigning the next free id if new.
    ///
    /// # Errors
    ///
    /// [`IndexError::InvalidComponent`] for an empty string.
    pub fn intern_index(&mut self, component: &str) -> Result<PathComponentId, IndexError> {
        if component.is_empty() {
            return Err(IndexError::InvalidComponent(
                "empty path component".to_string(),
            ));
        }
        if let Some(&id) = self.index.get(component) {
            return Ok(id);
        }
        let id = self.next_id()?;
        self.words.push(component.to_string());
        self.index.insert(component.to_string(), id);
        Ok(id)
    }

    /// Look up the id of an already interned component.
    #[must_use]
    pub fn get(&self, component: &str) -> Option<PathComponentId> {
        self.index.get(component).copied()
    }

    /// Return the component string for `id`.
    ///
    /// # Errors
    ///
    /// [`IndexError::UnknownId`] if `id` was never assigned.
    pub fn lookup(&self, id: PathComponentId) -> Result<&str, IndexError> {
        self.words
            .get(id.0 as usize)
            .map(String::as_str)
            .ok_or(IndexError::UnknownId(id.0))
    }

    /// Intern every segment of `path` and return its packed form.
    ///
    /// The whole path is validated before anything is interned, so a
    /// rejected path leaves the store unchanged.
    ///
    /// # Errors
    ///
    /// [`IndexError::InvalidComponent`] for relative paths, empty segments
    /// (`//`, trailing `/`) or the bare root.
    pub fn pack(&mut self, path: &str) -> Result<PackedPath, IndexError> {
        let segments = split_absolute(path)?;
        if self.index.len() + segments.len() > u32::MAX as usize {
            return Err(IndexError::InvalidComponent(format!(
                "component id space exhausted while packing '{path}'"
            )));
        }
        segments
            .into_iter()
            .map(|segment| self.intern_index(segment))
            .collect::<Result<Vec<_>, _>>()
            .map(PackedPath)
    }

    /// Packed form of `path` if every segment is already interned.
    ///
    /// Never modifies the store. `None` also covers paths that would be
    /// rejected by [`pack`](Self::pack).
    #[must_use]
    pub fn try_pack(&self, path: &str) -> Option<PackedPath> {
        let segments = split_absolute(path).ok()?;
        segments
            .into_iter()
            .map(|segment| self.get(segment))
            .collect::<Option<Vec<_>>>()
            .map(PackedPath)
    }

    /// Check that `path` could be packed, without touching any store.
    ///
    /// # Errors
    ///
    /// The same [`IndexError::InvalidComponent`] that [`pack`](Self::pack)
    /// would return.
    pub fn validate(path: &str) -> Result<(), IndexError> {
        split_absolute(path).map(drop)
    }

    /// Rebuild the absolute path of a packed path.
    ///
    /// # Errors
    ///
    /// [`IndexError::UnknownId`] if an id does not belong to this store.
    pub fn unpack(&self, packed: &PackedPath) -> Result<String, IndexError> {
        let mut path = String::new();
        for &id in packed.ids() {
            path.push(SEPARATOR);
            path.push_str(self.lookup(id)?);
        }
        if path.is_empty() {
            path.push(SEPARATOR);
        }
        Ok(path)
    }

    /// Write the full mapping to `location`.
    ///
    /// # Errors
    ///
    /// [`IndexError::Io`] if the file cannot be written.
    pub fn persist(&self, location: &Path) -> Result<(), IndexError> {
        let mut buffer =
            serde_json::to_vec(&InIdOrder(&self.words)).map_err(|e| IndexError::Io {
                path: location.to_path_buf(),
                source: std::io::Error::other(e),
            })?;
        buffer.push(b'\n');
        write_atomic(location, &buffer)
    }

    /// Read a mapping written by [`persist`](Self::persist).
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// [`IndexError::CorruptStore`] if the content is not a valid mapping
    /// (ids must be exactly `0..n`), [`IndexError::Io`] on read failure.
    pub fn load(location: &Path) -> Result<Self, IndexError> {
        let content = match fs::read_to_string(location) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No name store at {}, starting empty", location.display());
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(IndexError::Io {
                    path: location.to_path_buf(),
                    source,
                })
            }
        };

        let corrupt = |reason: String| IndexError::CorruptStore {
            path: location.to_path_buf(),
            reason,
        };

        let mapping: HashMap<String, u64> =
            serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;

        let mut slots: Vec<Option<String>> = vec![None; mapping.len()];
        for (word, id) in mapping {
            if word.is_empty() || word.contains(SEPARATOR) {
                return Err(corrupt(format!("invalid component '{word}'")));
            }
            let slot = usize::try_from(id)
                .ok()
                .and_then(|i| slots.get_mut(i))
                .ok_or_else(|| corrupt(format!("id {id} out of range")))?;
            if slot.replace(word).is_some() {
                return Err(corrupt(format!("id {id} assigned twice")));
            }
        }

        let mut store = Self::new();
        for (id, word) in slots.into_iter().enumerate() {
            // All slots are filled: n distinct ids inside 0..n
            let word = word.ok_or_else(|| corrupt(format!("id {id} missing")))?;
            store.index.insert(word.clone(), PathComponentId(id as u32));
            store.words.push(word);
        }
        Ok(store)
    }

    fn next_id(&self) -> Result<PathComponentId, IndexError> {
        u32::try_from(self.words.len())
            .map(PathComponentId)
            .map_err(|_| IndexError::InvalidComponent("component id space exhausted".to_string()))
    }
}

/// Serializes `word -> id` pairs in id order.
struct InIdOrder<'a>(&'a [String]);

impl Serialize for InIdOrder<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().enumerate().map(|(id, word)| (word, id)))
    }
}

/// Split an absolute path into its segments below the root.
fn split_absolute(path: &str) -> Result<Vec<&str>, IndexError> {
    let rest = path.strip_prefix(SEPARATOR).ok_or_else(|| {
        IndexError::InvalidComponent(format!("'{path}' is not an absolute path"))
    })?;
    let segments: Vec<&str> = rest.split(SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(IndexError::InvalidComponent(format!(
            "'{path}' has an empty path segment"
        )));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_intern_assigns_in_first_seen_order() {
        let mut store = NameComponentStore::new();
        assert_eq!(store.intern_index("home").unwrap(), PathComponentId(0));
        assert_eq!(store.intern_index("user").unwrap(), PathComponentId(1));
        assert_eq!(store.intern_index("home").unwrap(), PathComponentId(0));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_intern_rejects_empty() {
        let mut store = NameComponentStore::new();
        assert!(matches!(
            store.intern_index(""),
            Err(IndexError::InvalidComponent(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_lookup_unknown_id() {
        let store = NameComponentStore::new();
        assert!(matches!(
            store.lookup(PathComponentId(3)),
            Err(IndexError::UnknownId(3))
        ));
    }

    #[test]
    fn test_pack_shares_prefix_ids() {
        let mut store = NameComponentStore::new();
        let a = store.pack("/home/user/some/directory").unwrap();
        let b = store.pack("/home/user/other").unwrap();

        assert_eq!(a.to_string(), "0/1/2/3");
        assert_eq!(b.to_string(), "0/1/4");
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let mut store = NameComponentStore::new();
        for path in ["/a/x", "/a b/ü/file name.txt", "/a/a/a", "/.hidden/..", "/x"] {
            let packed = store.pack(path).unwrap();
            assert_eq!(store.unpack(&packed).unwrap(), path);
        }
    }

    #[test]
    fn test_pack_rejects_malformed_without_interning() {
        let mut store = NameComponentStore::new();
        for path in ["relative/path", "/a//b", "/a/b/", "/", ""] {
            assert!(
                matches!(store.pack(path), Err(IndexError::InvalidComponent(_))),
                "{path} should be rejected"
            );
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_try_pack_is_read_only() {
        let mut store = NameComponentStore::new();
        assert!(store.try_pack("/a/x").is_none());
        assert!(store.is_empty());

        let packed = store.pack("/a/x").unwrap();
        assert_eq!(store.try_pack("/a/x"), Some(packed));
        assert!(store.try_pack("/a/y").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_packed_path_parse() {
        let packed: PackedPath = "2/7/4/9".parse().unwrap();
        assert_eq!(packed.len(), 4);
        assert_eq!(packed.to_string(), "2/7/4/9");

        assert!("".parse::<PackedPath>().is_err());
        assert!("1//2".parse::<PackedPath>().is_err());
        assert!("1/x".parse::<PackedPath>().is_err());
        assert!("-1".parse::<PackedPath>().is_err());
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("name_parts");

        let mut store = NameComponentStore::new();
        store.pack("/home/user/\"quoted\"/new\nline").unwrap();
        store.pack("/home/other").unwrap();
        store.persist(&location).unwrap();

        let loaded = NameComponentStore::load(&location).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.lookup(PathComponentId(0)).unwrap(), "home");
    }

    #[test]
    fn test_persist_writes_id_order() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("name_parts");

        let mut store = NameComponentStore::new();
        store.pack("/zeta/alpha").unwrap();
        store.persist(&location).unwrap();

        let content = fs::read_to_string(&location).unwrap();
        assert_eq!(content, "{\"zeta\":0,\"alpha\":1}\n");
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = NameComponentStore::load(&dir.path().join("absent")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_corrupt() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("name_parts");

        for content in [
            "not json",
            "[1, 2]",
            "{\"a\": 0, \"b\": 0}",
            "{\"a\": 0, \"b\": 2}",
            "{\"a\": -1}",
            "{\"\": 0}",
            "{\"a/b\": 0}",
        ] {
            fs::write(&location, content).unwrap();
            assert!(
                matches!(
                    NameComponentStore::load(&location),
                    Err(IndexError::CorruptStore { .. })
                ),
                "{content} should be corrupt"
            );
        }
    }
}
