//! Clash resolution
//!
//! [`resolution_for`] is a total mapping from `(local state, remote kind,
//! existence, protection)` to an action. [`resolve_clash`] carries out the
//! actions that need content: byte comparison and quarantine writes.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::model::{ChangeKind, Clash, Existence, LocalState, RevisionId};
use crate::rules::PathRules;
use crate::store::{LocalStore, RemoteStore};

/// What to do about a clash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClashAction {
    /// Both sides already agree; nothing to do, not reported
    Vacuous,
    /// No local data is at risk; apply the remote change as a safe change
    ApplyRemote,
    /// Compare bytes: identical is vacuous, otherwise quarantine the remote content
    CompareOrQuarantine,
    /// Write the remote content to the quarantine area
    Quarantine,
    /// Write the local content directly to the remote
    PushLocal,
    /// Leave both sides untouched and report the clash
    Skip,
    /// Leave both sides untouched and re-evaluate on the next sync
    Defer,
}

impl ClashAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClashAction::Vacuous => "vacuous",
            ClashAction::ApplyRemote => "apply_remote",
            ClashAction::CompareOrQuarantine => "compare_or_quarantine",
            ClashAction::Quarantine => "quarantine",
            ClashAction::PushLocal => "push_local",
            ClashAction::Skip => "skip",
            ClashAction::Defer => "defer",
        }
    }

    /// Needs remote content written to the quarantine area (unless found identical)
    pub fn quarantines(&self) -> bool {
        matches!(
            self,
            ClashAction::CompareOrQuarantine | ClashAction::Quarantine
        )
    }
}

/// Resolution table. Every combination is listed.
pub fn resolution_for(clash: &Clash) -> ClashAction {
    use ChangeKind as Remote;
    use ClashAction::*;
    use LocalState as Local;

    if clash.protected {
        return match clash.remote {
            Remote::Added | Remote::Modified => Quarantine,
            Remote::Removed => Skip,
        };
    }

    match (clash.local, clash.remote) {
        (Local::Added | Local::Modified, Remote::Added | Remote::Modified) => CompareOrQuarantine,
        (Local::Added | Local::Modified, Remote::Removed) => PushLocal,
        (Local::Removed, Remote::Added | Remote::Modified) => Quarantine,
        (Local::Removed, Remote::Removed) => Vacuous,
        (Local::Untracked, Remote::Added | Remote::Modified) => match clash.existence {
            Some(Existence::Absent) => ApplyRemote,
            Some(Existence::Exists) => CompareOrQuarantine,
            Some(Existence::Unknown) | None => Quarantine,
        },
        (Local::Untracked, Remote::Removed) => match clash.existence {
            Some(Existence::Absent) => Vacuous,
            Some(Existence::Exists) => Skip,
            Some(Existence::Unknown) | None => Defer,
        },
    }
}

/// Outcome of carrying out a content-bearing clash action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedClash {
    /// Local and remote bytes are identical
    Identical,
    /// Remote content was written to the quarantine path
    Quarantined { quarantine_path: String },
    /// The action needs no content work here
    Untouched,
}

/// Carry out the content work for a clash.
///
/// Never writes to or deletes the local original.
pub async fn resolve_clash(
    clash: &Clash,
    action: ClashAction,
    local: &dyn LocalStore,
    remote: &dyn RemoteStore,
    revision: &RevisionId,
    rules: &PathRules,
) -> Result<ResolvedClash> {
    if !action.quarantines() {
        return Ok(ResolvedClash::Untouched);
    }

    let remote_bytes = remote
        .read_content(revision, &clash.path)
        .await
        .map_err(|e| e.during("read remote clash content"))?;

    if action == ClashAction::CompareOrQuarantine {
        match local.read_content(&clash.path).await {
            Ok(local_bytes) if local_bytes == remote_bytes => {
                debug!("Clash on {} is vacuous: contents identical", clash.path);
                return Ok(ResolvedClash::Identical);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "Could not read local {} for comparison, quarantining remote copy: {}",
                    clash.path, e
                );
            }
        }
    }

    let quarantine_path = rules.quarantine_path(&clash.path);
    local.write_content(&quarantine_path, remote_bytes).await?;
    info!(
        "Quarantined remote version of {} at {} (local {}, remote {})",
        clash.path,
        quarantine_path,
        clash.local.as_str(),
        clash.remote.as_str()
    );

    Ok(ResolvedClash::Quarantined { quarantine_path })
}
