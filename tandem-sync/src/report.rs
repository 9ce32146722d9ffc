//! Outcome reporting for sync runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ChangeKind, Clash, RevisionId};
use crate::resolve::ClashAction;

/// A change that was carried out on one of the stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub path: String,
    pub kind: ChangeKind,
}

impl AppliedChange {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// A clash left for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedClash {
    pub clash: Clash,
    pub action: ClashAction,
    /// Where the remote version was written, when quarantined
    pub quarantine_path: Option<String>,
}

/// Result of a successful sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Remote revision recorded by this run
    pub revision: RevisionId,
    /// Applied to the remote
    pub pushed: Vec<AppliedChange>,
    /// Applied to the local tree
    pub pulled: Vec<AppliedChange>,
    pub unresolved: Vec<UnresolvedClash>,
    /// Local deletions not pushed because absence could not be confirmed
    pub withheld: Vec<String>,
    /// Paths found already in agreement
    pub vacuous: Vec<String>,
    /// The durable cache was rewritten
    pub cache_updated: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    /// Nothing was applied on either side and nothing needs attention
    pub fn is_quiet(&self) -> bool {
        self.pushed.is_empty()
            && self.pulled.is_empty()
            && self.unresolved.is_empty()
            && self.withheld.is_empty()
    }

    pub fn quarantined(&self) -> impl Iterator<Item = &UnresolvedClash> {
        self.unresolved
            .iter()
            .filter(|u| u.quarantine_path.is_some())
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
