//! Two-replica synchronization engine for tandem
//!
//! This crate provides the sync core that keeps a local file tree and a remote
//! version-controlled tree in agreement:
//! - Change detection against a cached snapshot of each side
//! - Clash classification with best-effort local existence probing
//! - Clash resolution that never overwrites or deletes local data
//! - Orchestration of a full cycle with an atomic, crash-safe cache
//! - An advisory SQLite journal of attempts and clashes

pub mod atomic;
pub mod clash;
pub mod diff;
pub mod errors;
pub mod journal;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod probe;
pub mod report;
pub mod resolve;
pub mod rules;
pub mod state;
pub mod store;

pub use clash::{classify, ClassificationResult, PlannedClash, TrackedPaths};
pub use diff::{detect, DiffStats};
pub use errors::{ErrorKind, Result, SyncError};
pub use journal::{AttemptRecord, ClashLogEntry, SyncJournal};
pub use model::{
    Change, ChangeKind, Clash, ContentHash, Existence, LocalState, RevisionId, Snapshot,
    SyncCache,
};
pub use orchestrator::{DetectionResult, ExecutionResult, SyncConfig, SyncOrchestrator};
pub use persistence::CacheFile;
pub use probe::{probe, ProbeResults};
pub use report::{AppliedChange, SyncReport, UnresolvedClash};
pub use resolve::{resolution_for, resolve_clash, ClashAction, ResolvedClash};
pub use rules::PathRules;
pub use state::SyncPhase;
pub use store::{FileWrite, LocalStore, RemoteCommit, RemoteStore};
