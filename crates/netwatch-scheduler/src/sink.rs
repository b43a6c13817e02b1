use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netwatch_core::{TestKind, TestResult};
use serde::Serialize;

use crate::error::SinkError;
use crate::types::{Job, RunStatus};

/// Terminal state of one execution attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { result: TestResult },
    Failed { error: String },
    TimedOut { after_ms: u64 },
    Cancelled,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Success { .. } => RunStatus::Success,
            RunOutcome::Failed { .. } => RunStatus::Failed,
            RunOutcome::TimedOut { .. } => RunStatus::TimedOut,
            RunOutcome::Cancelled => RunStatus::Cancelled,
        }
    }

    /// Error text for the failure variants.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RunOutcome::Success { .. } => None,
            RunOutcome::Failed { error } => Some(error.clone()),
            RunOutcome::TimedOut { after_ms } => Some(format!("timed out after {after_ms}ms")),
            RunOutcome::Cancelled => Some("cancelled".to_string()),
        }
    }
}

/// Notification payload describing a finished attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job_id: String,
    pub job_name: String,
    pub kind: TestKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub next_run: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Where finished attempts go: result history and notifications.
///
/// Both calls are best-effort from the engine's point of view; errors are
/// logged and never affect scheduling.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist a successful result.
    async fn save_result(&self, job: &Job, result: &TestResult) -> Result<(), SinkError>;

    /// Announce a finished attempt (success or failure). `job` carries the
    /// state already written back, including the new `next_run`.
    async fn notify(&self, job: &Job, report: &RunReport);
}
