//! Failure ledger: every failed backend attempt is appended to a JSON-lines
//! log and to SQLite, along with one row per completed search.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

use crate::kind::ErrorKind;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemediationAction {
    RetryScheduled { delay_ms: u64 },
    SessionDiscarded { delay_ms: u64 },
    Abort,
}

impl RemediationAction {
    pub fn label(&self) -> &'static str {
        match self {
            RemediationAction::RetryScheduled { .. } => "retry_scheduled",
            RemediationAction::SessionDiscarded { .. } => "session_discarded",
            RemediationAction::Abort => "abort",
        }
    }

    pub fn delay_ms(&self) -> u64 {
        match self {
            RemediationAction::RetryScheduled { delay_ms }
            | RemediationAction::SessionDiscarded { delay_ms } => *delay_ms,
            RemediationAction::Abort => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureContext {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub query: String,
    pub kind: ErrorKind,
    pub error_message: String,
    pub attempt: u32,
    pub generation: Option<u64>,
    pub action: RemediationAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub query: String,
    pub requested: usize,
    pub returned: usize,
    pub attempts: u32,
    pub duration_ms: i64,
    pub success: bool,
}

/// A failure row read back from the ledger database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFailure {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub query: String,
    pub kind: String,
    pub error_message: String,
    pub attempt: u32,
    pub remediation: String,
    pub delay_ms: u64,
}

#[derive(Debug)]
pub struct FailureLedger {
    log: Mutex<File>,
    conn: Mutex<Connection>,
    log_path: PathBuf,
    db_path: PathBuf,
}

impl FailureLedger {
    pub fn new(
        log_path: impl AsRef<Path>,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, TelemetryError> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        let ledger = Self {
            log: Mutex::new(file),
            conn: Mutex::new(conn),
            log_path,
            db_path,
        };
        ledger.initialize_db()?;
        Ok(ledger)
    }

    fn initialize_db(&self) -> Result<(), TelemetryError> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS search_failures (
                ts DATETIME NOT NULL,
                request_id TEXT,
                query TEXT,
                kind TEXT,
                error_message TEXT,
                attempt INTEGER,
                generation INTEGER,
                remediation TEXT,
                delay_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_search_failures_ts ON search_failures(ts DESC);
            CREATE TABLE IF NOT EXISTS search_runs (
                ts DATETIME NOT NULL,
                request_id TEXT,
                query TEXT,
                requested INTEGER,
                returned INTEGER,
                attempts INTEGER,
                duration_ms INTEGER,
                success INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_search_runs_ts ON search_runs(ts DESC);",
        )?;
        Ok(())
    }

    /// One connection for the ledger's lifetime; callers on an async
    /// runtime should go through `spawn_blocking`.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_failure(&self, failure: &FailureContext) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(failure)?;
        {
            let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(log, "{json}")?;
            log.flush()?;
        }
        self.conn().execute(
            "INSERT INTO search_failures (
                ts, request_id, query, kind, error_message, attempt, generation, remediation, delay_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                failure.timestamp,
                failure.request_id,
                failure.query,
                failure.kind.as_str(),
                failure.error_message,
                failure.attempt as i64,
                failure.generation.map(|g| g as i64),
                failure.action.label(),
                failure.action.delay_ms() as i64,
            ],
        )?;
        Ok(())
    }

    pub fn record_run(&self, run: &RunContext) -> Result<(), TelemetryError> {
        self.conn().execute(
            "INSERT INTO search_runs (
                ts, request_id, query, requested, returned, attempts, duration_ms, success
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.timestamp,
                run.request_id,
                run.query,
                run.requested as i64,
                run.returned as i64,
                run.attempts as i64,
                run.duration_ms,
                if run.success { 1 } else { 0 },
            ],
        )?;
        Ok(())
    }

    /// Most recent failures first.
    pub fn recent_failures(&self, limit: usize) -> Result<Vec<StoredFailure>, TelemetryError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ts, request_id, query, kind, error_message, attempt, remediation, delay_ms
             FROM search_failures ORDER BY ts DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(StoredFailure {
                timestamp: row.get(0)?,
                request_id: row.get(1)?,
                query: row.get(2)?,
                kind: row.get(3)?,
                error_message: row.get(4)?,
                attempt: row.get::<_, i64>(5)? as u32,
                remediation: row.get(6)?,
                delay_ms: row.get::<_, i64>(7)? as u64,
            })
        })?;
        let mut failures = Vec::new();
        for row in rows {
            failures.push(row?);
        }
        Ok(failures)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}
