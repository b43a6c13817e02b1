use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use netwatch_core::JobOptions;
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::{from_db_time, init_db, to_db_time},
    error::{Result, StoreError},
    interval::Interval,
    types::{Job, NewJob, RunStatus},
};

/// Durable record of recurring jobs, as seen by the engine.
///
/// Implementations must be safe for concurrent calls from the poll loop and
/// from every dispatched task.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Enabled jobs whose `next_run` is at or before `now`.
    async fn due_jobs(&self, now: DateTime<Utc>) -> std::result::Result<Vec<Job>, StoreError>;

    /// The stored state of one job, or `None` if it no longer exists.
    async fn current_job(&self, id: &str) -> std::result::Result<Option<Job>, StoreError>;

    /// Persist `last_run`, `next_run` and run bookkeeping of `job`.
    ///
    /// `job.next_run` was derived from `job.interval`. If the stored interval
    /// differs, the job was edited mid-run and `next_run` must be derived
    /// from the stored interval instead.
    async fn update_after_run(&self, job: &Job) -> std::result::Result<(), StoreError>;

    /// Enabled jobs that have never had a `next_run` computed.
    async fn unscheduled_jobs(&self) -> std::result::Result<Vec<Job>, StoreError>;

    async fn set_next_run(
        &self,
        id: &str,
        next_run: DateTime<Utc>,
    ) -> std::result::Result<(), StoreError>;
}

const JOB_COLUMNS: &str = "id, name, enabled, interval, options, last_run, next_run,
     run_count, last_status, last_error, created_at, updated_at";

/// SQLite-backed [`ScheduleStore`] that also serves job management calls.
///
/// Wraps a single connection in a `Mutex`; every statement is short, so the
/// lock is never held across an await point.
pub struct SqliteScheduleStore {
    conn: Mutex<Connection>,
    /// Zone for exact-time intervals when a job is created or re-enabled.
    tz: Tz,
}

impl SqliteScheduleStore {
    pub fn new(conn: Connection, tz: Tz) -> std::result::Result<Self, StoreError> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tz,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a new job. The first `next_run` is one interval from now.
    pub fn add_job(&self, new: NewJob) -> Result<Job> {
        let now = Utc::now();
        let next_run = Interval::parse(&new.interval)?.next_after(now, &self.tz)?;
        let id = Uuid::new_v4().to_string();
        let options_json = serde_json::to_string(&new.options).map_err(StoreError::from)?;

        self.lock()
            .execute(
                "INSERT INTO scheduled_jobs
                 (id, name, kind, enabled, interval, options, last_run, next_run,
                  run_count, last_status, last_error, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,NULL,?7,0,NULL,NULL,?8,?8)",
                rusqlite::params![
                    id,
                    new.name,
                    new.options.kind().to_string(),
                    new.enabled,
                    new.interval,
                    options_json,
                    to_db_time(next_run),
                    to_db_time(now),
                ],
            )
            .map_err(StoreError::from)?;

        info!(job_id = %id, name = %new.name, kind = %new.options.kind(), "job added");

        Ok(Job {
            id,
            name: new.name,
            enabled: new.enabled,
            interval: new.interval,
            options: new.options,
            last_run: None,
            next_run: Some(next_run),
            run_count: 0,
            last_status: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace name, interval and options of an existing job.
    ///
    /// `next_run` is recomputed from now when the interval changed or the
    /// job is being re-enabled, as [`set_enabled`](Self::set_enabled) does.
    #[instrument(skip(self, update), fields(job_id = %id))]
    pub fn update_job(&self, id: &str, update: NewJob) -> Result<Job> {
        let mut job = self.get_job(id)?;
        let now = Utc::now();

        let re_enabled = update.enabled && !job.enabled;
        if job.interval != update.interval || re_enabled {
            job.next_run = Some(Interval::parse(&update.interval)?.next_after(now, &self.tz)?);
        }
        job.name = update.name;
        job.interval = update.interval;
        job.options = update.options;
        job.enabled = update.enabled;
        job.updated_at = now;

        let options_json = serde_json::to_string(&job.options).map_err(StoreError::from)?;
        self.lock()
            .execute(
                "UPDATE scheduled_jobs SET name=?1, kind=?2, enabled=?3, interval=?4,
                  options=?5, next_run=?6, updated_at=?7
                 WHERE id=?8",
                rusqlite::params![
                    job.name,
                    job.options.kind().to_string(),
                    job.enabled,
                    job.interval,
                    options_json,
                    job.next_run.map(to_db_time),
                    to_db_time(now),
                    id,
                ],
            )
            .map_err(StoreError::from)?;

        info!("job updated");
        Ok(job)
    }

    /// Enable or disable a job. Enabling reschedules it one interval from now.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Job> {
        let mut job = self.get_job(id)?;
        let now = Utc::now();

        if enabled && !job.enabled {
            job.next_run = Some(Interval::parse(&job.interval)?.next_after(now, &self.tz)?);
        }
        job.enabled = enabled;
        job.updated_at = now;

        self.lock()
            .execute(
                "UPDATE scheduled_jobs SET enabled=?1, next_run=?2, updated_at=?3 WHERE id=?4",
                rusqlite::params![
                    enabled,
                    job.next_run.map(to_db_time),
                    to_db_time(now),
                    id
                ],
            )
            .map_err(StoreError::from)?;

        info!(enabled, "job toggled");
        Ok(job)
    }

    /// Remove a job by ID. Returns `JobNotFound` if no row is deleted.
    pub fn remove_job(&self, id: &str) -> std::result::Result<(), StoreError> {
        let n = self
            .lock()
            .execute("DELETE FROM scheduled_jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> std::result::Result<Job, StoreError> {
        let row = self
            .lock()
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?1"),
                [id],
                JobRow::from_row,
            )
            .optional()?;

        row.ok_or_else(|| StoreError::JobNotFound { id: id.to_string() })?
            .into_job()
    }

    /// Return all known jobs ordered by creation time. Corrupt rows are skipped.
    pub fn list_jobs(&self) -> std::result::Result<Vec<Job>, StoreError> {
        self.query_jobs(
            &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY created_at"),
            [],
        )
    }

    fn query_jobs<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> std::result::Result<Vec<Job>, StoreError> {
        // Collect rows before decoding so the statement is dropped under the lock.
        let rows: Vec<JobRow> = {
            let conn = self.lock();
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt
                .query_map(params, JobRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        Ok(rows
            .into_iter()
            .filter_map(|row| match row.into_job() {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!("skipping unreadable job row: {e}");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn due_jobs(&self, now: DateTime<Utc>) -> std::result::Result<Vec<Job>, StoreError> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM scheduled_jobs
                 WHERE enabled = 1 AND next_run IS NOT NULL AND next_run <= ?1
                 ORDER BY next_run"
            ),
            [to_db_time(now)],
        )
    }

    async fn current_job(&self, id: &str) -> std::result::Result<Option<Job>, StoreError> {
        match self.get_job(id) {
            Ok(job) => Ok(Some(job)),
            Err(StoreError::JobNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn update_after_run(&self, job: &Job) -> std::result::Result<(), StoreError> {
        // One lock for read and write so an edit cannot slip in between.
        let conn = self.lock();
        let stored: Option<String> = conn
            .query_row(
                "SELECT interval FROM scheduled_jobs WHERE id = ?1",
                [&job.id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Err(StoreError::JobNotFound { id: job.id.clone() });
        };

        let next_run = if stored == job.interval {
            job.next_run
        } else {
            let reference = job.last_run.unwrap_or(job.updated_at);
            match Interval::parse(&stored).and_then(|i| i.next_after(reference, &self.tz)) {
                Ok(next) => {
                    info!(interval = %stored, next_run = %next, "interval edited during run, next_run recomputed");
                    Some(next)
                }
                Err(e) => {
                    warn!("{e}; keeping stored next_run");
                    None
                }
            }
        };

        conn.execute(
            "UPDATE scheduled_jobs SET last_run=?1, next_run=COALESCE(?2, next_run), run_count=?3,
              last_status=?4, last_error=?5, updated_at=?6
             WHERE id=?7",
            rusqlite::params![
                job.last_run.map(to_db_time),
                next_run.map(to_db_time),
                job.run_count,
                job.last_status.map(|s| s.to_string()),
                job.last_error,
                to_db_time(job.updated_at),
                job.id,
            ],
        )?;
        Ok(())
    }

    async fn unscheduled_jobs(&self) -> std::result::Result<Vec<Job>, StoreError> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM scheduled_jobs
                 WHERE enabled = 1 AND next_run IS NULL"
            ),
            [],
        )
    }

    async fn set_next_run(
        &self,
        id: &str,
        next_run: DateTime<Utc>,
    ) -> std::result::Result<(), StoreError> {
        let n = self.lock().execute(
            "UPDATE scheduled_jobs SET next_run=?1, updated_at=?2 WHERE id=?3",
            rusqlite::params![to_db_time(next_run), to_db_time(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

/// Raw column values, decoded outside the connection lock.
struct JobRow {
    id: String,
    name: String,
    enabled: bool,
    interval: String,
    options: String,
    last_run: Option<String>,
    next_run: Option<String>,
    run_count: u32,
    last_status: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            enabled: row.get(2)?,
            interval: row.get(3)?,
            options: row.get(4)?,
            last_run: row.get(5)?,
            next_run: row.get(6)?,
            run_count: row.get(7)?,
            last_status: row.get(8)?,
            last_error: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_job(self) -> std::result::Result<Job, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.clone(),
            reason,
        };
        let time = |s: &str| from_db_time(s).ok_or_else(|| corrupt(format!("bad timestamp '{s}'")));
        let opt_time = |s: Option<String>| s.as_deref().map(time).transpose();

        let options: JobOptions = serde_json::from_str(&self.options)
            .map_err(|e| corrupt(format!("bad options JSON: {e}")))?;
        let last_status = self
            .last_status
            .map(|s| s.parse::<RunStatus>().map_err(&corrupt))
            .transpose()?;
        let last_run = opt_time(self.last_run)?;
        let next_run = opt_time(self.next_run)?;
        let created_at = time(&self.created_at)?;
        let updated_at = time(&self.updated_at)?;

        Ok(Job {
            id: id.clone(),
            name: self.name,
            enabled: self.enabled,
            interval: self.interval,
            options,
            last_run,
            next_run,
            run_count: self.run_count,
            last_status,
            last_error: self.last_error,
            created_at,
            updated_at,
        })
    }
}
