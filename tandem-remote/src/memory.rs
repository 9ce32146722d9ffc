//! In-process remote store
//!
//! Keeps every revision in memory with monotonically numbered ids (`r0`,
//! `r1`, ...). Applies are fast-forward only, like the GitHub store. Hooks let
//! callers commit "from elsewhere" and inject failures.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use tandem_sync::errors::{ErrorKind, Result, SyncError};
use tandem_sync::model::{ContentHash, RevisionId, Snapshot};
use tandem_sync::store::{FileWrite, RemoteCommit, RemoteStore};

type Tree = BTreeMap<String, Bytes>;

/// Remote operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOp {
    CurrentRevision,
    ReadSnapshot,
    ReadContent,
    Apply,
}

#[derive(Default)]
struct MemoryState {
    revisions: Vec<Tree>,
    head: usize,
    failures: Vec<(MemoryOp, ErrorKind)>,
    applies: usize,
}

/// Remote store held entirely in memory
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Empty repository at `r0`
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                revisions: vec![Tree::new()],
                ..Default::default()
            }),
        }
    }

    /// Repository whose first commit `r1` holds `files`
    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
        let remote = Self::new();
        let writes: Vec<(&str, &[u8])> = files.into_iter().collect();
        remote.commit_external(&writes, &[]);
        remote
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Commit on top of head as another client would
    pub fn commit_external(&self, writes: &[(&str, &[u8])], deletes: &[&str]) -> RevisionId {
        let mut state = self.lock();
        let mut tree = state.revisions[state.head].clone();
        for (path, content) in writes {
            tree.insert(path.to_string(), Bytes::copy_from_slice(content));
        }
        for path in deletes {
            tree.remove(*path);
        }
        push_revision(&mut state, tree)
    }

    /// New revision with an unchanged tree
    pub fn touch(&self) -> RevisionId {
        let mut state = self.lock();
        let tree = state.revisions[state.head].clone();
        push_revision(&mut state, tree)
    }

    /// Make the next call of `op` fail with an error of `kind`
    pub fn fail_next(&self, op: MemoryOp, kind: ErrorKind) {
        self.lock().failures.push((op, kind));
    }

    pub fn head(&self) -> RevisionId {
        revision_id(self.lock().head)
    }

    /// Content at head
    pub fn file(&self, path: &str) -> Option<Bytes> {
        let state = self.lock();
        state.revisions[state.head].get(path).cloned()
    }

    pub fn files(&self) -> BTreeMap<String, Bytes> {
        let state = self.lock();
        state.revisions[state.head].clone()
    }

    /// Successful applies so far
    pub fn apply_count(&self) -> usize {
        self.lock().applies
    }

    fn take_failure(state: &mut MemoryState, op: MemoryOp) -> Result<()> {
        if let Some(index) = state.failures.iter().position(|(o, _)| *o == op) {
            let (_, kind) = state.failures.remove(index);
            return Err(injected(kind, op));
        }
        Ok(())
    }

    fn tree_at<'a>(state: &'a MemoryState, revision: &RevisionId) -> Result<&'a Tree> {
        parse_revision(revision)
            .and_then(|index| state.revisions.get(index))
            .ok_or_else(|| SyncError::remote_not_found(format!("no revision {}", revision)))
    }
}

fn revision_id(index: usize) -> RevisionId {
    RevisionId::new(format!("r{}", index))
}

fn parse_revision(revision: &RevisionId) -> Option<usize> {
    revision.as_str().strip_prefix('r')?.parse().ok()
}

fn push_revision(state: &mut MemoryState, tree: Tree) -> RevisionId {
    state.revisions.push(tree);
    state.head = state.revisions.len() - 1;
    revision_id(state.head)
}

fn snapshot_of(tree: &Tree) -> Snapshot {
    tree.iter()
        .map(|(path, content)| (path.clone(), ContentHash::compute(path, content)))
        .collect()
}

fn injected(kind: ErrorKind, op: MemoryOp) -> SyncError {
    let detail = format!("injected failure in {:?}", op);
    match kind {
        ErrorKind::Network => SyncError::network(detail),
        ErrorKind::RemoteAccess => SyncError::remote_access(detail),
        ErrorKind::RemoteNotFound => SyncError::remote_not_found(detail),
        ErrorKind::Filesystem => SyncError::filesystem(
            "remote",
            detail.clone(),
            std::io::Error::new(std::io::ErrorKind::Other, detail),
        ),
        ErrorKind::AlreadySyncing => SyncError::AlreadySyncing,
        ErrorKind::Unknown => SyncError::unknown(detail),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn current_revision(&self) -> Result<RevisionId> {
        let mut state = self.lock();
        Self::take_failure(&mut state, MemoryOp::CurrentRevision)?;
        Ok(revision_id(state.head))
    }

    async fn read_snapshot_at(&self, revision: &RevisionId) -> Result<Snapshot> {
        let mut state = self.lock();
        Self::take_failure(&mut state, MemoryOp::ReadSnapshot)?;
        Ok(snapshot_of(Self::tree_at(&state, revision)?))
    }

    async fn read_content(&self, revision: &RevisionId, path: &str) -> Result<Bytes> {
        let mut state = self.lock();
        Self::take_failure(&mut state, MemoryOp::ReadContent)?;
        Self::tree_at(&state, revision)?
            .get(path)
            .cloned()
            .ok_or_else(|| {
                SyncError::remote_not_found(format!("{} not present at {}", path, revision))
            })
    }

    async fn apply_changes(
        &self,
        base: &RevisionId,
        writes: Vec<FileWrite>,
        deletes: Vec<String>,
    ) -> Result<RemoteCommit> {
        let mut state = self.lock();
        Self::take_failure(&mut state, MemoryOp::Apply)?;

        let head = revision_id(state.head);
        if &head != base {
            return Err(SyncError::network(format!(
                "branch ref moved during push: expected {}, found {}",
                base, head
            )));
        }

        let mut tree = state.revisions[state.head].clone();
        for write in writes {
            tree.insert(write.path, write.content);
        }
        for path in &deletes {
            tree.remove(path);
        }

        let snapshot = snapshot_of(&tree);
        let revision = push_revision(&mut state, tree);
        state.applies += 1;
        debug!("Memory remote advanced to {}", revision);

        Ok(RemoteCommit { revision, snapshot })
    }
}
