use rusqlite::Connection;

/// Create the `results` table. Idempotent.
///
/// `payload` holds the serialized `TestResult`; `kind` is duplicated out of
/// it so history can be filtered without parsing JSON.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS results (
            id          TEXT PRIMARY KEY,
            job_id      TEXT NOT NULL,
            job_name    TEXT NOT NULL,
            kind        TEXT NOT NULL,
            payload     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_results_job
            ON results(job_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_results_created
            ON results(created_at DESC);",
    )
}
