//! Storage abstractions consumed by the sync engine

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

use crate::errors::Result;
use crate::model::{Existence, RevisionId, Snapshot};

/// The local file tree.
///
/// Path keys are `/`-separated and NFC-normalized.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Complete trackable state of the tree; protected paths are never included
    async fn read_snapshot(&self) -> Result<Snapshot>;

    async fn read_content(&self, path: &str) -> Result<Bytes>;

    /// Replace the file at `path`, creating parent directories
    async fn write_content(&self, path: &str, content: Bytes) -> Result<()>;

    /// Remove the file at `path`; removing a missing file succeeds
    async fn delete(&self, path: &str) -> Result<()>;

    /// One batched existence check. Entries are `Exists` or `Absent`; the call
    /// may fail as a whole but never reports a wrong entry.
    async fn stat_batch(&self, paths: &[String]) -> Result<HashMap<String, Existence>>;
}

/// Content to create or replace on the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: Bytes,
}

/// State of the remote after a successful apply
#[derive(Debug, Clone)]
pub struct RemoteCommit {
    pub revision: RevisionId,
    pub snapshot: Snapshot,
}

/// The remote version-controlled tree
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Head of the tracked branch
    async fn current_revision(&self) -> Result<RevisionId>;

    async fn read_snapshot_at(&self, revision: &RevisionId) -> Result<Snapshot>;

    async fn read_content(&self, revision: &RevisionId, path: &str) -> Result<Bytes>;

    /// Atomically apply writes and deletes on top of `base`.
    ///
    /// Fails with a retryable network error if the branch no longer points at `base`.
    async fn apply_changes(
        &self,
        base: &RevisionId,
        writes: Vec<FileWrite>,
        deletes: Vec<String>,
    ) -> Result<RemoteCommit>;
}
