//! SQLite journal of sync attempts and unresolved clashes
//!
//! Purely advisory: the sync cache is the source of truth and a failing
//! journal never fails a sync.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{Result, SyncError};
use crate::report::{SyncReport, UnresolvedClash};

/// One row of `sync_history`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub revision: Option<String>,
    pub pushed: u64,
    pub pulled: u64,
    pub unresolved: u64,
}

impl AttemptRecord {
    pub fn from_report(report: &SyncReport) -> Self {
        Self {
            id: None,
            started_at: report.started_at,
            finished_at: report.finished_at,
            success: true,
            error_kind: None,
            error_message: None,
            revision: Some(report.revision.to_string()),
            pushed: report.pushed.len() as u64,
            pulled: report.pulled.len() as u64,
            unresolved: report.unresolved.len() as u64,
        }
    }

    pub fn from_error(started_at: DateTime<Utc>, error: &SyncError) -> Self {
        Self {
            id: None,
            started_at,
            finished_at: Utc::now(),
            success: false,
            error_kind: Some(error.kind().to_string()),
            error_message: Some(error.to_string()),
            revision: None,
            pushed: 0,
            pulled: 0,
            unresolved: 0,
        }
    }
}

/// One row of `clash_log`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClashLogEntry {
    pub attempt_id: i64,
    pub path: String,
    pub local_state: String,
    pub remote_change: String,
    pub action: String,
    pub quarantine_path: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Async-safe handle to the journal database
#[derive(Clone)]
pub struct SyncJournal {
    conn: Arc<Mutex<Connection>>,
}

impl SyncJournal {
    /// Open or create a journal
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// In-memory journal (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                success BOOLEAN NOT NULL DEFAULT 0,
                error_kind TEXT,
                error_message TEXT,
                revision TEXT,
                files_pushed INTEGER NOT NULL DEFAULT 0,
                files_pulled INTEGER NOT NULL DEFAULT 0,
                unresolved INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS clash_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                attempt_id INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                local_state TEXT NOT NULL,
                remote_change TEXT NOT NULL,
                action TEXT NOT NULL,
                quarantine_path TEXT,
                recorded_at TEXT NOT NULL,
                FOREIGN KEY (attempt_id) REFERENCES sync_history(id)
            );

            CREATE INDEX IF NOT EXISTS idx_sync_history_start ON sync_history(start_time DESC);
            CREATE INDEX IF NOT EXISTS idx_clash_log_path ON clash_log(file_path);
            "#,
        )?;

        info!("Sync journal initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record an attempt and its unresolved clashes; returns the attempt id
    pub async fn record(
        &self,
        attempt: &AttemptRecord,
        clashes: &[UnresolvedClash],
    ) -> Result<i64> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO sync_history
                (start_time, end_time, success, error_kind, error_message,
                 revision, files_pushed, files_pulled, unresolved)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                attempt.started_at.to_rfc3339(),
                attempt.finished_at.to_rfc3339(),
                attempt.success,
                attempt.error_kind,
                attempt.error_message,
                attempt.revision,
                attempt.pushed as i64,
                attempt.pulled as i64,
                attempt.unresolved as i64,
            ],
        )?;
        let attempt_id = tx.last_insert_rowid();

        let recorded_at = attempt.finished_at.to_rfc3339();
        for unresolved in clashes {
            tx.execute(
                r#"
                INSERT INTO clash_log
                    (attempt_id, file_path, local_state, remote_change, action,
                     quarantine_path, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    attempt_id,
                    unresolved.clash.path,
                    unresolved.clash.local.as_str(),
                    unresolved.clash.remote.as_str(),
                    unresolved.action.as_str(),
                    unresolved.quarantine_path,
                    recorded_at,
                ],
            )?;
        }

        tx.commit()?;
        debug!(
            "Journaled sync attempt {} ({} clashes)",
            attempt_id,
            clashes.len()
        );
        Ok(attempt_id)
    }

    /// Most recent attempts first
    pub async fn recent_attempts(&self, limit: usize) -> Result<Vec<AttemptRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, start_time, end_time, success, error_kind, error_message,
                   revision, files_pushed, files_pulled, unresolved
            FROM sync_history
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AttemptRecord {
                id: Some(row.get(0)?),
                started_at: parse_time(&row.get::<_, String>(1)?),
                finished_at: parse_time(&row.get::<_, String>(2)?),
                success: row.get(3)?,
                error_kind: row.get(4)?,
                error_message: row.get(5)?,
                revision: row.get(6)?,
                pushed: row.get::<_, i64>(7)? as u64,
                pulled: row.get::<_, i64>(8)? as u64,
                unresolved: row.get::<_, i64>(9)? as u64,
            })
        })?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Clash log entries for one attempt
    pub async fn clashes_for(&self, attempt_id: i64) -> Result<Vec<ClashLogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT attempt_id, file_path, local_state, remote_change, action,
                   quarantine_path, recorded_at
            FROM clash_log
            WHERE attempt_id = ?1
            ORDER BY file_path
            "#,
        )?;

        let rows = stmt.query_map(params![attempt_id], |row| {
            Ok(ClashLogEntry {
                attempt_id: row.get(0)?,
                path: row.get(1)?,
                local_state: row.get(2)?,
                remote_change: row.get(3)?,
                action: row.get(4)?,
                quarantine_path: row.get(5)?,
                recorded_at: parse_time(&row.get::<_, String>(6)?),
            })
        })?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeKind, Clash, LocalState};
    use crate::resolve::ClashAction;

    fn clash(path: &str) -> UnresolvedClash {
        UnresolvedClash {
            clash: Clash {
                path: path.into(),
                local: LocalState::Removed,
                remote: ChangeKind::Modified,
                existence: None,
                protected: false,
            },
            action: ClashAction::Quarantine,
            quarantine_path: Some(format!(".tandem-quarantine/{}", path)),
        }
    }

    #[tokio::test]
    async fn test_record_and_list_attempts() {
        let journal = SyncJournal::open_in_memory().unwrap();
        let now = Utc::now();

        let ok = AttemptRecord {
            id: None,
            started_at: now,
            finished_at: now,
            success: true,
            error_kind: None,
            error_message: None,
            revision: Some("abc".into()),
            pushed: 2,
            pulled: 1,
            unresolved: 1,
        };
        let first = journal.record(&ok, &[clash("b.md"), clash("a.md")]).await.unwrap();

        let failed = AttemptRecord::from_error(now, &SyncError::network("connection reset"));
        journal.record(&failed, &[]).await.unwrap();

        let attempts = journal.recent_attempts(10).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].error_kind.as_deref(), Some("network"));
        assert!(attempts[1].success);
        assert_eq!(attempts[1].revision.as_deref(), Some("abc"));
        assert_eq!(attempts[1].pushed, 2);

        let clashes = journal.clashes_for(first).await.unwrap();
        assert_eq!(clashes.len(), 2);
        assert_eq!(clashes[0].path, "a.md");
        assert_eq!(clashes[0].action, "quarantine");
        assert_eq!(clashes[0].local_state, "removed");
    }

    #[tokio::test]
    async fn test_recent_attempts_limit() {
        let journal = SyncJournal::open_in_memory().unwrap();
        let err = SyncError::AlreadySyncing;
        for _ in 0..5 {
            journal
                .record(&AttemptRecord::from_error(Utc::now(), &err), &[])
                .await
                .unwrap();
        }
        assert_eq!(journal.recent_attempts(3).await.unwrap().len(), 3);
    }
}
