use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use netwatch_core::{TestKind, TestResult};
use netwatch_scheduler::db::{from_db_time, to_db_time};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, ResultsError};

/// One persisted measurement.
#[derive(Debug, Clone, Serialize)]
pub struct StoredResult {
    pub id: String,
    pub job_id: String,
    pub job_name: String,
    pub kind: TestKind,
    pub result: TestResult,
    pub created_at: DateTime<Utc>,
}

struct ResultRow {
    id: String,
    job_id: String,
    job_name: String,
    payload: String,
    created_at: String,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            job_name: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_result(self) -> Result<StoredResult> {
        let result: TestResult =
            serde_json::from_str(&self.payload).map_err(|e| ResultsError::Corrupt {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;
        let created_at = from_db_time(&self.created_at).ok_or_else(|| ResultsError::Corrupt {
            id: self.id.clone(),
            reason: format!("bad timestamp '{}'", self.created_at),
        })?;
        Ok(StoredResult {
            id: self.id,
            job_id: self.job_id,
            job_name: self.job_name,
            kind: result.kind(),
            result,
            created_at,
        })
    }
}

/// Measurement history backed by one SQLite connection.
pub struct ResultStore {
    db: Mutex<Connection>,
}

impl ResultStore {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(skip(self, result), fields(kind = %result.kind()))]
    pub fn save(&self, job_id: &str, job_name: &str, result: &TestResult) -> Result<StoredResult> {
        let stored = StoredResult {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            kind: result.kind(),
            result: result.clone(),
            created_at: Utc::now(),
        };
        let payload = serde_json::to_string(result)?;

        self.lock().execute(
            "INSERT INTO results (id, job_id, job_name, kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stored.id,
                stored.job_id,
                stored.job_name,
                stored.kind.to_string(),
                payload,
                to_db_time(stored.created_at),
            ],
        )?;

        debug!(result_id = %stored.id, "result stored");
        Ok(stored)
    }

    /// Newest first, optionally restricted to one test kind.
    pub fn list_recent(&self, limit: usize, kind: Option<TestKind>) -> Result<Vec<StoredResult>> {
        let db = self.lock();
        let rows = match kind {
            Some(kind) => {
                let mut stmt = db.prepare_cached(
                    "SELECT id, job_id, job_name, payload, created_at FROM results
                     WHERE kind = ?1 ORDER BY created_at DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![kind.to_string(), limit as i64], ResultRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = db.prepare_cached(
                    "SELECT id, job_id, job_name, payload, created_at FROM results
                     ORDER BY created_at DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit as i64], ResultRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        drop(db);
        Ok(decode(rows))
    }

    /// History of one job, newest first.
    #[instrument(skip(self))]
    pub fn list_for_job(&self, job_id: &str, limit: usize) -> Result<Vec<StoredResult>> {
        let db = self.lock();
        let mut stmt = db.prepare_cached(
            "SELECT id, job_id, job_name, payload, created_at FROM results
             WHERE job_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![job_id, limit as i64], ResultRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(decode(rows))
    }

    /// Delete results older than `days` days. Returns the number removed.
    pub fn prune_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now() - TimeDelta::days(i64::from(days));
        let removed = self.lock().execute(
            "DELETE FROM results WHERE created_at < ?1",
            params![to_db_time(cutoff)],
        )?;
        if removed > 0 {
            info!(removed, days, "pruned old results");
        }
        Ok(removed)
    }
}

// Undecodable rows are logged and left out rather than failing the listing.
fn decode(rows: Vec<ResultRow>) -> Vec<StoredResult> {
    rows.into_iter()
        .filter_map(|row| match row.into_result() {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("skipping result: {e}");
                None
            }
        })
        .collect()
}
