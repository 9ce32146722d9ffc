//! Clash classification
//!
//! Partitions the detected changes into changes that are safe to apply on the
//! opposite store and clashes that need a resolution. Paths whose local status
//! is ambiguous are checked with a single batched existence probe.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

use crate::model::{Change, ChangeKind, Clash, Existence, LocalState, Snapshot};
use crate::probe::{probe, ProbeResults};
use crate::resolve::{resolution_for, ClashAction};
use crate::rules::PathRules;
use crate::store::LocalStore;

/// A clash together with the action the resolution table assigned to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedClash {
    pub clash: Clash,
    pub action: ClashAction,
}

impl PlannedClash {
    /// The action only stands because the existence check gave no answer,
    /// so the remote change must be looked at again on the next run
    pub fn awaits_existence(&self) -> bool {
        match self.action {
            ClashAction::Defer => true,
            ClashAction::Quarantine => {
                !self.clash.protected
                    && self.clash.local == LocalState::Untracked
                    && !matches!(
                        self.clash.existence,
                        Some(Existence::Exists) | Some(Existence::Absent)
                    )
            }
            _ => false,
        }
    }
}

/// Output of classification. Every input change lands in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationResult {
    /// Local changes to push to the remote
    pub safe_local: Vec<Change>,
    /// Remote changes to apply locally
    pub safe_remote: Vec<Change>,
    /// Clashes that need work or reporting
    pub clashes: Vec<PlannedClash>,
    /// Local removals not pushed because absence was not confirmed
    pub withheld_local: Vec<Change>,
    /// Paths where both sides already agree
    pub vacuous: Vec<String>,
    /// Local changes under protected paths, never pushed
    pub ignored_local: Vec<String>,
}

impl ClassificationResult {
    pub fn clashes_with(&self, action: ClashAction) -> impl Iterator<Item = &PlannedClash> {
        self.clashes.iter().filter(move |p| p.action == action)
    }

    pub fn is_noop(&self) -> bool {
        self.safe_local.is_empty() && self.safe_remote.is_empty() && self.clashes.is_empty()
    }
}

/// Which paths the engine already knows about locally
#[derive(Debug, Clone, Copy)]
pub struct TrackedPaths<'a> {
    pub current: &'a Snapshot,
    pub cached: &'a Snapshot,
}

impl<'a> TrackedPaths<'a> {
    pub fn new(current: &'a Snapshot, cached: &'a Snapshot) -> Self {
        Self { current, cached }
    }

    /// Status derivable from one of the two local snapshots
    pub fn is_tracked(&self, path: &str) -> bool {
        self.current.contains(path) || self.cached.contains(path)
    }

    pub fn present_now(&self, path: &str) -> bool {
        self.current.contains(path)
    }
}

/// Classification state between candidate selection and the probe
#[derive(Debug, Default)]
pub struct ClassificationPlan {
    result: ClassificationResult,
    untracked: Vec<(Clash, Change)>,
    removals: Vec<Change>,
}

impl ClassificationPlan {
    /// Paths that need an existence check, deduplicated
    pub fn probe_paths(&self) -> BTreeSet<String> {
        self.untracked
            .iter()
            .map(|(clash, _)| clash.path.clone())
            .chain(self.removals.iter().map(|c| c.path.clone()))
            .collect()
    }

    /// Settle the pending paths with probe results
    pub fn finish(mut self, existence: &ProbeResults) -> ClassificationResult {
        for (mut clash, change) in self.untracked {
            clash.existence = Some(existence.get(&clash.path));
            place(&mut self.result, clash, change);
        }

        for change in self.removals {
            match existence.get(&change.path) {
                Existence::Absent => self.result.safe_local.push(change),
                other => {
                    info!(
                        "Withholding deletion of {}: local absence not confirmed ({:?})",
                        change.path, other
                    );
                    self.result.withheld_local.push(change);
                }
            }
        }

        let result = &mut self.result;
        result.safe_local.sort_by(|a, b| a.path.cmp(&b.path));
        result.safe_remote.sort_by(|a, b| a.path.cmp(&b.path));
        result.withheld_local.sort_by(|a, b| a.path.cmp(&b.path));
        result.clashes.sort_by(|a, b| a.clash.path.cmp(&b.clash.path));
        result.vacuous.sort();

        debug!(
            "Classified: {} safe local, {} safe remote, {} clashes, {} withheld, {} vacuous",
            result.safe_local.len(),
            result.safe_remote.len(),
            result.clashes.len(),
            result.withheld_local.len(),
            result.vacuous.len()
        );
        self.result
    }
}

/// Route a clash by its table action
fn place(result: &mut ClassificationResult, clash: Clash, change: Change) {
    match resolution_for(&clash) {
        ClashAction::ApplyRemote => result.safe_remote.push(change),
        ClashAction::Vacuous => result.vacuous.push(clash.path),
        action => result.clashes.push(PlannedClash { clash, action }),
    }
}

/// Select candidates without touching any store
pub fn plan(
    local_changes: &[Change],
    remote_changes: &[Change],
    tracked: TrackedPaths<'_>,
    rules: &PathRules,
) -> ClassificationPlan {
    let mut plan = ClassificationPlan::default();

    let mut local_by_path: HashMap<&str, &Change> = HashMap::new();
    for change in local_changes {
        if rules.is_protected(&change.path) {
            debug!("Ignoring local change to protected path {}", change.path);
            plan.result.ignored_local.push(change.path.clone());
        } else {
            local_by_path.insert(change.path.as_str(), change);
        }
    }

    let mut clashed: HashSet<&str> = HashSet::new();

    for remote in remote_changes {
        let path = remote.path.as_str();

        if rules.is_protected(path) {
            let clash = Clash {
                path: remote.path.clone(),
                local: LocalState::Untracked,
                remote: remote.kind,
                existence: None,
                protected: true,
            };
            place(&mut plan.result, clash, remote.clone());
            continue;
        }

        if let Some(local) = local_by_path.get(path) {
            clashed.insert(path);
            let clash = Clash {
                path: remote.path.clone(),
                local: local.kind.into(),
                remote: remote.kind,
                existence: None,
                protected: false,
            };
            place(&mut plan.result, clash, remote.clone());
            continue;
        }

        let untracked = Clash {
            path: remote.path.clone(),
            local: LocalState::Untracked,
            remote: remote.kind,
            existence: None,
            protected: false,
        };

        if !tracked.is_tracked(path) {
            plan.untracked.push((untracked, remote.clone()));
        } else if remote.kind == ChangeKind::Added && tracked.present_now(path) {
            // Remote added a path we already hold unchanged: caches have drifted
            let clash = Clash {
                existence: Some(Existence::Exists),
                ..untracked
            };
            place(&mut plan.result, clash, remote.clone());
        } else {
            plan.result.safe_remote.push(remote.clone());
        }
    }

    for (path, change) in local_by_path {
        if clashed.contains(path) {
            continue;
        }
        match change.kind {
            ChangeKind::Removed => plan.removals.push(change.clone()),
            ChangeKind::Added | ChangeKind::Modified => plan.result.safe_local.push(change.clone()),
        }
    }

    plan
}

/// Classify detected changes, probing ambiguous paths in one batch
pub async fn classify(
    local_changes: &[Change],
    remote_changes: &[Change],
    tracked: TrackedPaths<'_>,
    rules: &PathRules,
    local: &dyn LocalStore,
) -> ClassificationResult {
    let plan = plan(local_changes, remote_changes, tracked, rules);
    let existence = probe(local, &plan.probe_paths()).await;
    plan.finish(&existence)
}
