use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `scheduled_jobs` table (idempotent) and an index on
/// `(enabled, next_run)` so the due-job query stays cheap.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            name        TEXT    NOT NULL,
            kind        TEXT    NOT NULL,   -- speed_test | packet_loss
            enabled     INTEGER NOT NULL DEFAULT 1,
            interval    TEXT    NOT NULL,   -- '30m' or '03:00,15:00'
            options     TEXT    NOT NULL,   -- JSON-encoded JobOptions
            last_run    TEXT,
            next_run    TEXT,
            run_count   INTEGER NOT NULL DEFAULT 0,
            last_status TEXT,
            last_error  TEXT,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        -- Due query: WHERE enabled = 1 AND next_run <= ?
        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due
            ON scheduled_jobs (enabled, next_run);
        ",
    )
}

/// Fixed-width UTC timestamp so SQLite string comparison orders correctly.
pub fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_db_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
