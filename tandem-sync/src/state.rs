//! Sync run lifecycle
//!
//! A run moves `Idle -> Detecting -> Classifying -> Executing` and ends in
//! `Succeeded` or `Failed`. At most one run is in flight per orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, trace};

use crate::errors::{Result, SyncError};

/// Phase of the current (or last) sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SyncPhase {
    /// Never run
    Idle = 0,
    Detecting = 1,
    Classifying = 2,
    Executing = 3,
    Succeeded = 4,
    Failed = 5,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Detecting => "detecting",
            SyncPhase::Classifying => "classifying",
            SyncPhase::Executing => "executing",
            SyncPhase::Succeeded => "succeeded",
            SyncPhase::Failed => "failed",
        }
    }

    /// A run is in flight
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SyncPhase::Detecting | SyncPhase::Classifying | SyncPhase::Executing
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SyncPhase::Detecting,
            2 => SyncPhase::Classifying,
            3 => SyncPhase::Executing,
            4 => SyncPhase::Succeeded,
            5 => SyncPhase::Failed,
            _ => SyncPhase::Idle,
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder of the current phase
#[derive(Debug)]
pub struct PhaseCell {
    phase: AtomicU8,
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseCell {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(SyncPhase::Idle as u8),
        }
    }

    pub fn get(&self) -> SyncPhase {
        SyncPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Enter `Detecting`, or fail with `AlreadySyncing` if a run is in flight
    pub fn begin(&self) -> Result<PhaseGuard<'_>> {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            if SyncPhase::from_u8(current).is_running() {
                debug!("Rejecting sync request: run already in flight");
                return Err(SyncError::AlreadySyncing);
            }
            match self.phase.compare_exchange(
                current,
                SyncPhase::Detecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!("Sync phase -> detecting");
                    return Ok(PhaseGuard {
                        cell: self,
                        finished: false,
                    });
                }
                Err(observed) => current = observed,
            }
        }
    }

    fn set(&self, phase: SyncPhase) {
        trace!("Sync phase -> {}", phase);
        self.phase.store(phase as u8, Ordering::Release);
    }
}

/// Ownership of an in-flight run. Dropping it unfinished marks the run failed.
#[derive(Debug)]
pub struct PhaseGuard<'a> {
    cell: &'a PhaseCell,
    finished: bool,
}

impl PhaseGuard<'_> {
    pub fn advance(&self, phase: SyncPhase) {
        self.cell.set(phase);
    }

    pub fn finish(mut self, success: bool) {
        self.finished = true;
        self.cell.set(if success {
            SyncPhase::Succeeded
        } else {
            SyncPhase::Failed
        });
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cell.set(SyncPhase::Failed);
        }
    }
}
