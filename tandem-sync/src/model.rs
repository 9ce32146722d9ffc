//! Snapshot, change and clash records shared by every sync phase

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque content identifier. Equal hashes mean identical content for sync purposes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Local content hash: BLAKE3 over the path key, a NUL separator and the bytes
    pub fn compute(path: &str, content: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(content);
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..8).unwrap_or(&self.0);
        write!(f, "ContentHash({}...)", short)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a point-in-time state of the remote tree (a commit)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Complete trackable state of one store: normalized path key to content hash.
///
/// Ordered so that serialization and change lists are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<String, ContentHash>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&ContentHash> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Insert or replace the hash recorded for `path`
    pub fn insert(&mut self, path: impl Into<String>, hash: ContentHash) -> Option<ContentHash> {
        self.entries.insert(path.into(), hash)
    }

    pub fn remove(&mut self, path: &str) -> Option<ContentHash> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContentHash)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Make `path` match `source`: copy its entry, or drop ours if `source` has none
    pub fn restore_from(&mut self, source: &Snapshot, path: &str) {
        match source.get(path) {
            Some(hash) => {
                self.entries.insert(path.to_string(), hash.clone());
            }
            None => {
                self.entries.remove(path);
            }
        }
    }
}

impl<K: Into<String>> FromIterator<(K, ContentHash)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (K, ContentHash)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Kind of a detected change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        }
    }

    /// Whether the change leaves content at the path
    pub fn has_content(&self) -> bool {
        !matches!(self, ChangeKind::Removed)
    }
}

/// A single path-level change between two snapshots of the same store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    /// New content hash; `None` only for removals
    pub content_hash: Option<ContentHash>,
}

impl Change {
    pub fn added(path: impl Into<String>, hash: ContentHash) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Added,
            content_hash: Some(hash),
        }
    }

    pub fn modified(path: impl Into<String>, hash: ContentHash) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Modified,
            content_hash: Some(hash),
        }
    }

    pub fn removed(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Removed,
            content_hash: None,
        }
    }
}

/// Local side of a clash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalState {
    Added,
    Modified,
    Removed,
    /// Local status cannot be derived from the cached snapshot
    Untracked,
}

impl LocalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalState::Added => "added",
            LocalState::Modified => "modified",
            LocalState::Removed => "removed",
            LocalState::Untracked => "untracked",
        }
    }
}

impl From<ChangeKind> for LocalState {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Added => LocalState::Added,
            ChangeKind::Modified => LocalState::Modified,
            ChangeKind::Removed => LocalState::Removed,
        }
    }
}

/// Result of a best-effort local existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Existence {
    Exists,
    Absent,
    /// The check failed; callers must assume the file exists
    Unknown,
}

impl Existence {
    /// Only a confirmed absence counts as absent
    pub fn is_confirmed_absent(&self) -> bool {
        matches!(self, Existence::Absent)
    }
}

/// A path changed on both sides, or whose local status could not be verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clash {
    pub path: String,
    pub local: LocalState,
    pub remote: ChangeKind,
    /// Probe result for untracked paths
    pub existence: Option<Existence>,
    /// Path sits in the quarantine area or is excluded from sync
    pub protected: bool,
}

/// Durable record of the last successful sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCache {
    pub schema_version: u32,
    pub local_snapshot: Snapshot,
    pub remote_revision: Option<RevisionId>,
    pub remote_snapshot: Snapshot,
    /// Paths whose `remote_snapshot` entry predates `remote_revision`
    /// because an existence check left them undecided
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pending_remote: BTreeSet<String>,
}

impl SyncCache {
    pub const SCHEMA_VERSION: u32 = 1;

    pub fn new(
        local_snapshot: Snapshot,
        remote_revision: Option<RevisionId>,
        remote_snapshot: Snapshot,
    ) -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION,
            local_snapshot,
            remote_revision,
            remote_snapshot,
            pending_remote: BTreeSet::new(),
        }
    }

    pub fn with_pending_remote(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.pending_remote = paths.into_iter().collect();
        self
    }

    /// Whether `remote_snapshot` is exactly the tree at `revision`
    pub fn mirrors_remote(&self, revision: &RevisionId) -> bool {
        self.remote_revision.as_ref() == Some(revision) && self.pending_remote.is_empty()
    }
}

impl Default for SyncCache {
    fn default() -> Self {
        Self::new(Snapshot::new(), None, Snapshot::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_depends_on_path_and_content() {
        let a = ContentHash::compute("a.txt", b"hello");
        assert_eq!(a, ContentHash::compute("a.txt", b"hello"));
        assert_ne!(a, ContentHash::compute("b.txt", b"hello"));
        assert_ne!(a, ContentHash::compute("a.txt", b"hello!"));
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_snapshot_serializes_sorted() {
        let snapshot: Snapshot = vec![
            ("z.md", ContentHash::new("2")),
            ("a.md", ContentHash::new("1")),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"a.md":"1","z.md":"2"}"#);
    }

    #[test]
    fn test_restore_from() {
        let cached: Snapshot = vec![("keep.md", ContentHash::new("old"))]
            .into_iter()
            .collect();
        let mut next: Snapshot = vec![("gone.md", ContentHash::new("x"))]
            .into_iter()
            .collect();
        next.restore_from(&cached, "keep.md");
        next.restore_from(&cached, "gone.md");
        assert_eq!(next.get("keep.md"), Some(&ContentHash::new("old")));
        assert!(!next.contains("gone.md"));
    }

    #[test]
    fn test_cache_round_trip_keeps_schema() {
        let cache = SyncCache::new(
            Snapshot::new(),
            Some(RevisionId::new("abc")),
            Snapshot::new(),
        );
        let json = serde_json::to_vec(&cache).unwrap();
        let back: SyncCache = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, cache);
        assert_eq!(back.schema_version, SyncCache::SCHEMA_VERSION);
    }

    #[test]
    fn test_pending_remote_paths_block_snapshot_reuse() {
        let r2 = RevisionId::new("r2");
        let settled = SyncCache::new(Snapshot::new(), Some(r2.clone()), Snapshot::new());
        assert!(settled.mirrors_remote(&r2));
        assert!(!settled.mirrors_remote(&RevisionId::new("r3")));
        // Settled caches keep the old on-disk shape
        let json = serde_json::to_string(&settled).unwrap();
        assert!(!json.contains("pending_remote"));

        let held = settled.with_pending_remote(vec!["x.md".to_string()]);
        assert!(!held.mirrors_remote(&r2));
        let back: SyncCache = serde_json::from_str(&serde_json::to_string(&held).unwrap()).unwrap();
        assert!(back.pending_remote.contains("x.md"));
    }
}
