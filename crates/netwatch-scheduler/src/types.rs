use chrono::{DateTime, Utc};
use netwatch_core::{JobOptions, TestKind};
use serde::{Deserialize, Serialize};

/// How the most recent execution attempt of a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// The executor returned an error.
    Failed,
    /// The attempt hit its deadline.
    TimedOut,
    /// An operator cancelled the running attempt.
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed_out",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "timed_out" => Ok(RunStatus::TimedOut),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A persisted recurring job: a speed-test schedule or a packet-loss monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string, primary key.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Disabled jobs are never selected as due.
    pub enabled: bool,
    /// Duration ("30m") or exact-time list ("03:00,15:00").
    pub interval: String,
    /// Test parameters forwarded verbatim to the executor.
    pub options: JobOptions,
    /// When the most recent attempt finished.
    pub last_run: Option<DateTime<Utc>>,
    /// Earliest instant the job may be dispatched again.
    pub next_run: Option<DateTime<Utc>>,
    /// Total number of finished attempts, successful or not.
    pub run_count: u32,
    pub last_status: Option<RunStatus>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn kind(&self) -> TestKind {
        self.options.kind()
    }

    /// Enabled and `next_run` has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|at| at <= now)
    }
}

/// Payload for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub interval: String,
    pub options: JobOptions,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn bool_true() -> bool {
    true
}
