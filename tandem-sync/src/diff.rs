//! Snapshot diff computation
//!
//! Compares the current snapshot of a store with the snapshot cached at the
//! last successful sync and reports what changed on that store since then.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::model::{Change, ChangeKind, Snapshot};

/// Statistics about a diff operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_removed: usize,
}

impl DiffStats {
    pub fn from_changes(changes: &[Change]) -> Self {
        let mut stats = DiffStats::default();
        for change in changes {
            match change.kind {
                ChangeKind::Added => stats.files_added += 1,
                ChangeKind::Modified => stats.files_modified += 1,
                ChangeKind::Removed => stats.files_removed += 1,
            }
        }
        stats
    }

    pub fn total(&self) -> usize {
        self.files_added + self.files_modified + self.files_removed
    }
}

/// Changes that transform `cached` into `current`, ordered by path.
///
/// - Added: path only in `current`
/// - Modified: path in both with a different hash
/// - Removed: path only in `cached`
pub fn detect(current: &Snapshot, cached: &Snapshot) -> Vec<Change> {
    let paths: BTreeSet<&String> = current.paths().chain(cached.paths()).collect();

    let changes: Vec<Change> = paths
        .into_iter()
        .filter_map(|path| match (current.get(path), cached.get(path)) {
            (Some(now), None) => Some(Change::added(path.clone(), now.clone())),
            (Some(now), Some(before)) if now != before => {
                Some(Change::modified(path.clone(), now.clone()))
            }
            (None, Some(_)) => Some(Change::removed(path.clone())),
            _ => None,
        })
        .collect();

    let stats = DiffStats::from_changes(&changes);
    debug!(
        "Diff complete: {} added, {} modified, {} removed",
        stats.files_added, stats.files_modified, stats.files_removed
    );

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentHash;

    fn snapshot(entries: &[(&str, &str)]) -> Snapshot {
        entries
            .iter()
            .map(|(path, hash)| (*path, ContentHash::new(*hash)))
            .collect()
    }

    #[test]
    fn test_diff_added_files() {
        let cached = snapshot(&[]);
        let current = snapshot(&[("new.txt", "h1")]);

        let changes = detect(&current, &cached);
        assert_eq!(changes, vec![Change::added("new.txt", ContentHash::new("h1"))]);
    }

    #[test]
    fn test_diff_modified_files() {
        let cached = snapshot(&[("file.txt", "h1")]);
        let current = snapshot(&[("file.txt", "h2")]);

        let changes = detect(&current, &cached);
        assert_eq!(
            changes,
            vec![Change::modified("file.txt", ContentHash::new("h2"))]
        );
    }

    #[test]
    fn test_diff_removed_files() {
        let cached = snapshot(&[("old.txt", "h1")]);
        let current = snapshot(&[]);

        let changes = detect(&current, &cached);
        assert_eq!(changes, vec![Change::removed("old.txt")]);
        assert!(changes[0].content_hash.is_none());
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let a = snapshot(&[("a.txt", "h1"), ("dir/b.txt", "h2")]);
        assert!(detect(&a, &a).is_empty());
        assert!(detect(&Snapshot::new(), &Snapshot::new()).is_empty());
    }

    #[test]
    fn test_diff_is_mirrored() {
        let a = snapshot(&[("same", "1"), ("changed", "2"), ("only_a", "3")]);
        let b = snapshot(&[("same", "1"), ("changed", "9"), ("only_b", "4")]);

        let forward = detect(&a, &b);
        let backward = detect(&b, &a);
        assert_eq!(forward.len(), backward.len());

        for change in &forward {
            let mirror = backward
                .iter()
                .find(|c| c.path == change.path)
                .expect("mirrored path");
            let expected = match change.kind {
                ChangeKind::Added => ChangeKind::Removed,
                ChangeKind::Removed => ChangeKind::Added,
                ChangeKind::Modified => ChangeKind::Modified,
            };
            assert_eq!(mirror.kind, expected);
        }
    }

    #[test]
    fn test_diff_ordered_by_path() {
        let cached = snapshot(&[("m", "1")]);
        let current = snapshot(&[("z", "1"), ("a", "1")]);
        let paths: Vec<_> = detect(&current, &cached)
            .into_iter()
            .map(|c| c.path)
            .collect();
        assert_eq!(paths, vec!["a", "m", "z"]);

        let stats = DiffStats::from_changes(&detect(&current, &cached));
        assert_eq!(stats.files_added, 2);
        assert_eq!(stats.files_removed, 1);
        assert_eq!(stats.total(), 3);
    }
}
