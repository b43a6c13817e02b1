use thiserror::Error;

/// Failures raised by a [`crate::store::ScheduleStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored column could not be decoded (bad JSON, bad timestamp, ...).
    #[error("Corrupt row for job {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// Any other backend failure (used by non-SQLite stores).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Error returned by a [`crate::executor::TestExecutor`].
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    /// The executor observed the cancellation token or its deadline.
    #[error("execution cancelled")]
    Cancelled,

    /// The executor task panicked; caught by the engine.
    #[error("executor panicked: {0}")]
    Panicked(String),
}

/// Error returned by a [`crate::sink::ResultSink`].
#[derive(Debug, Error)]
#[error("Result sink error: {0}")]
pub struct SinkError(pub String);

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Reading due jobs failed; the tick is skipped.
    #[error("Failed to discover due jobs: {0}")]
    Discovery(#[source] StoreError),

    /// The executor returned an error.
    #[error("Job {job_id} failed: {source}")]
    Execution {
        job_id: String,
        #[source]
        source: ExecutionError,
    },

    /// The execution exceeded its deadline.
    #[error("Job {job_id} timed out after {ms}ms")]
    Timeout { job_id: String, ms: u64 },

    /// Writing the job back after a run failed.
    #[error("Failed to persist job {job_id}: {source}")]
    Persistence {
        job_id: String,
        #[source]
        source: StoreError,
    },

    /// The interval specification could not be parsed.
    #[error("Invalid interval '{interval}': {reason}")]
    InvalidInterval { interval: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    pub(crate) fn invalid_interval(interval: &str, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidInterval {
            interval: interval.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
