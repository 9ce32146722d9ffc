//! Main sync orchestration logic
//!
//! One call to [`SyncOrchestrator::sync`] runs detection, classification and
//! execution, then persists the new cache. The cache is written last and only
//! after every step succeeded, so an interrupted run is simply redone.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clash::{classify, ClassificationResult, TrackedPaths};
use crate::diff::{self, DiffStats};
use crate::errors::{Result, SyncError};
use crate::journal::{AttemptRecord, SyncJournal};
use crate::model::{Change, ChangeKind, ContentHash, RevisionId, Snapshot, SyncCache};
use crate::persistence::CacheFile;
use crate::report::{AppliedChange, SyncReport, UnresolvedClash};
use crate::resolve::{resolve_clash, ClashAction, ResolvedClash};
use crate::rules::PathRules;
use crate::state::{PhaseCell, PhaseGuard, SyncPhase};
use crate::store::{FileWrite, LocalStore, RemoteCommit, RemoteStore};

/// File name of the journal database inside the state directory
pub const JOURNAL_FILE_NAME: &str = "journal.db";

/// Configuration for the sync orchestrator
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory holding the cache and the journal
    pub state_dir: PathBuf,
    pub rules: PathRules,
    /// Keep a journal of attempts and clashes
    pub journal: bool,
}

impl SyncConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            rules: PathRules::default(),
            journal: true,
        }
    }

    pub fn with_rules(mut self, rules: PathRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn without_journal(mut self) -> Self {
        self.journal = false;
        self
    }

    pub fn journal_path(&self) -> PathBuf {
        self.state_dir.join(JOURNAL_FILE_NAME)
    }
}

/// Both stores' current state and their changes since the last sync
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub local_snapshot: Snapshot,
    pub local_changes: Vec<Change>,
    pub remote_revision: RevisionId,
    pub remote_snapshot: Snapshot,
    pub remote_changes: Vec<Change>,
}

impl DetectionResult {
    pub fn has_changes(&self) -> bool {
        !self.local_changes.is_empty() || !self.remote_changes.is_empty()
    }
}

/// Everything the execution step did
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Set when changes were pushed
    pub remote_commit: Option<RemoteCommit>,
    pub pushed: Vec<AppliedChange>,
    pub pulled: Vec<AppliedChange>,
    pub unresolved: Vec<UnresolvedClash>,
    /// Clashes found identical by content
    pub identical: Vec<String>,
    /// Local snapshot entries to record; `None` removes the entry
    pub local_entries: BTreeMap<String, Option<ContentHash>>,
}

/// Main sync orchestrator
pub struct SyncOrchestrator {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    rules: PathRules,
    cache: CacheFile,
    journal: Option<SyncJournal>,
    phase: PhaseCell,
}

impl SyncOrchestrator {
    /// Create new orchestrator, preparing the state directory
    pub async fn new(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.state_dir)
            .await
            .map_err(|e| {
                SyncError::filesystem(
                    "create state directory",
                    config.state_dir.display().to_string(),
                    e,
                )
            })?;

        let journal = if config.journal {
            match SyncJournal::open(config.journal_path()) {
                Ok(journal) => Some(journal),
                Err(e) => {
                    warn!("Sync journal unavailable, continuing without it: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            local,
            remote,
            rules: config.rules,
            cache: CacheFile::in_dir(&config.state_dir),
            journal,
            phase: PhaseCell::new(),
        })
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.get()
    }

    pub fn journal(&self) -> Option<&SyncJournal> {
        self.journal.as_ref()
    }

    pub fn cache_path(&self) -> &Path {
        self.cache.path()
    }

    /// State recorded by the last successful sync
    pub async fn cached_state(&self) -> Result<SyncCache> {
        self.cache.load().await
    }

    /// Run one full sync cycle.
    ///
    /// Rejected with [`SyncError::AlreadySyncing`] while another cycle runs.
    pub async fn sync(&self) -> Result<SyncReport> {
        let guard = self.phase.begin()?;
        let started_at = Utc::now();
        info!("Starting sync");

        let result = self.run(&guard).await;

        match &result {
            Ok(report) => {
                info!(
                    "Sync complete at {}: {} pushed, {} pulled, {} unresolved, {} withheld",
                    report.revision,
                    report.pushed.len(),
                    report.pulled.len(),
                    report.unresolved.len(),
                    report.withheld.len()
                );
                self.journal_attempt(AttemptRecord::from_report(report), &report.unresolved)
                    .await;
            }
            Err(e) => {
                warn!("Sync failed ({}): {}", e.kind(), e);
                self.journal_attempt(AttemptRecord::from_error(started_at, e), &[])
                    .await;
            }
        }

        guard.finish(result.is_ok());
        result
    }

    async fn run(&self, guard: &PhaseGuard<'_>) -> Result<SyncReport> {
        let started_at = Utc::now();
        let cache = self.cache.load().await?;

        let detection = self.detect(&cache).await?;

        guard.advance(SyncPhase::Classifying);
        let classification = classify(
            &detection.local_changes,
            &detection.remote_changes,
            TrackedPaths::new(&detection.local_snapshot, &cache.local_snapshot),
            &self.rules,
            self.local.as_ref(),
        )
        .await;

        guard.advance(SyncPhase::Executing);
        let execution = self.execute(&detection, &classification).await?;

        let next = next_cache(&cache, &detection, &classification, &execution);
        let cache_updated = next != cache;
        if cache_updated {
            self.cache.persist(&next).await?;
        } else {
            debug!("Cache unchanged, skipping write");
        }

        let mut vacuous = classification.vacuous.clone();
        vacuous.extend(execution.identical.iter().cloned());
        vacuous.sort();

        Ok(SyncReport {
            revision: next
                .remote_revision
                .unwrap_or_else(|| detection.remote_revision.clone()),
            pushed: execution.pushed,
            pulled: execution.pulled,
            unresolved: execution.unresolved,
            withheld: classification
                .withheld_local
                .iter()
                .map(|c| c.path.clone())
                .collect(),
            vacuous,
            cache_updated,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Scan the local tree and fetch the remote state concurrently
    pub async fn detect(&self, cache: &SyncCache) -> Result<DetectionResult> {
        let local = async {
            let snapshot = self
                .local
                .read_snapshot()
                .await
                .map_err(|e| e.during("scan local tree"))?;
            let changes = diff::detect(&snapshot, &cache.local_snapshot);
            Ok::<_, SyncError>((snapshot, changes))
        };

        let remote = async {
            let revision = self
                .remote
                .current_revision()
                .await
                .map_err(|e| e.during("read remote revision"))?;
            let snapshot = if cache.mirrors_remote(&revision) {
                debug!("Remote unchanged at {}, reusing cached snapshot", revision);
                cache.remote_snapshot.clone()
            } else {
                if !cache.pending_remote.is_empty() {
                    debug!(
                        "Re-reading remote at {} for {} pending paths",
                        revision,
                        cache.pending_remote.len()
                    );
                }
                self.remote
                    .read_snapshot_at(&revision)
                    .await
                    .map_err(|e| e.during("read remote snapshot"))?
            };
            let changes = diff::detect(&snapshot, &cache.remote_snapshot);
            Ok::<_, SyncError>((revision, snapshot, changes))
        };

        let ((local_snapshot, local_changes), (remote_revision, remote_snapshot, remote_changes)) =
            tokio::try_join!(local, remote)?;

        let local_stats = DiffStats::from_changes(&local_changes);
        let remote_stats = DiffStats::from_changes(&remote_changes);
        info!(
            "Detected {} local and {} remote changes (remote at {})",
            local_stats.total(),
            remote_stats.total(),
            remote_revision
        );

        Ok(DetectionResult {
            local_snapshot,
            local_changes,
            remote_revision,
            remote_snapshot,
            remote_changes,
        })
    }

    /// Push, quarantine, then apply remote changes locally
    pub async fn execute(
        &self,
        detection: &DetectionResult,
        classification: &ClassificationResult,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::default();
        let base = &detection.remote_revision;

        // Remote first, as a single commit
        let mut writes = Vec::new();
        let mut deletes = Vec::new();
        let outgoing = classification
            .safe_local
            .iter()
            .map(|c| (c.path.as_str(), c.kind))
            .chain(
                classification
                    .clashes_with(ClashAction::PushLocal)
                    .map(|p| (p.clash.path.as_str(), ChangeKind::Added)),
            );
        for (path, kind) in outgoing {
            match kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    let content = self
                        .local
                        .read_content(path)
                        .await
                        .map_err(|e| e.during("read local content for push"))?;
                    result.local_entries.insert(
                        path.to_string(),
                        Some(ContentHash::compute(path, &content)),
                    );
                    writes.push(FileWrite {
                        path: path.to_string(),
                        content,
                    });
                }
                ChangeKind::Removed => deletes.push(path.to_string()),
            }
            result.pushed.push(AppliedChange::new(path, kind));
        }

        if !writes.is_empty() || !deletes.is_empty() {
            info!(
                "Pushing {} writes and {} deletes on top of {}",
                writes.len(),
                deletes.len(),
                base
            );
            let commit = self
                .remote
                .apply_changes(base, writes, deletes)
                .await
                .map_err(|e| e.during("push local changes"))?;
            debug!("Remote advanced to {}", commit.revision);
            result.remote_commit = Some(commit);
        }

        // Quarantine, never touching local originals
        for planned in &classification.clashes {
            if planned.action == ClashAction::PushLocal {
                continue;
            }
            let resolved = resolve_clash(
                &planned.clash,
                planned.action,
                self.local.as_ref(),
                self.remote.as_ref(),
                base,
                &self.rules,
            )
            .await?;
            match resolved {
                ResolvedClash::Identical => result.identical.push(planned.clash.path.clone()),
                ResolvedClash::Quarantined { quarantine_path } => {
                    result.unresolved.push(UnresolvedClash {
                        clash: planned.clash.clone(),
                        action: planned.action,
                        quarantine_path: Some(quarantine_path),
                    })
                }
                ResolvedClash::Untouched => result.unresolved.push(UnresolvedClash {
                    clash: planned.clash.clone(),
                    action: planned.action,
                    quarantine_path: None,
                }),
            }
        }

        // Remote changes with no local counterpart
        for change in &classification.safe_remote {
            let path = change.path.as_str();
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    let content = self
                        .remote
                        .read_content(base, path)
                        .await
                        .map_err(|e| e.during("read remote content"))?;
                    let hash = ContentHash::compute(path, &content);
                    self.local.write_content(path, content).await?;
                    result.local_entries.insert(path.to_string(), Some(hash));
                }
                ChangeKind::Removed => {
                    self.local.delete(path).await?;
                    result.local_entries.insert(path.to_string(), None);
                }
            }
            debug!("Applied remote {} of {}", change.kind.as_str(), path);
            result.pulled.push(AppliedChange::new(path, change.kind));
        }

        Ok(result)
    }

    async fn journal_attempt(&self, attempt: AttemptRecord, clashes: &[UnresolvedClash]) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(&attempt, clashes).await {
                warn!("Failed to journal sync attempt: {}", e);
            }
        }
    }
}

/// Cache describing both stores after a successful execution
pub fn next_cache(
    cache: &SyncCache,
    detection: &DetectionResult,
    classification: &ClassificationResult,
    execution: &ExecutionResult,
) -> SyncCache {
    let mut local = detection.local_snapshot.clone();
    for (path, entry) in &execution.local_entries {
        match entry {
            Some(hash) => {
                local.insert(path.clone(), hash.clone());
            }
            None => {
                local.remove(path);
            }
        }
    }
    // Unconfirmed deletions stay pending for the next run
    for change in &classification.withheld_local {
        local.restore_from(&cache.local_snapshot, &change.path);
    }

    let (revision, mut remote) = match &execution.remote_commit {
        Some(commit) => (commit.revision.clone(), commit.snapshot.clone()),
        None => (
            detection.remote_revision.clone(),
            detection.remote_snapshot.clone(),
        ),
    };
    // Undecided remote changes keep their old entry so the next run sees them again
    let mut pending = Vec::new();
    for planned in classification.clashes.iter().filter(|p| p.awaits_existence()) {
        remote.restore_from(&cache.remote_snapshot, &planned.clash.path);
        pending.push(planned.clash.path.clone());
    }

    SyncCache::new(local, Some(revision), remote).with_pending_remote(pending)
}
