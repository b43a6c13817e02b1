use netwatch_scheduler::ExecutionError;
use thiserror::Error;

/// Failures while driving an external measurement tool.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The binary is not installed or not on `$PATH`.
    #[error("{program} not found; is it installed?")]
    NotFound { program: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran but exited unsuccessfully.
    #[error("{program} exited with {}: {stderr}", code.map_or("signal".to_string(), |c| format!("code {c}")))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {ms}ms")]
    Timeout { program: String, ms: u64 },

    #[error("Measurement cancelled")]
    Cancelled,

    /// Output did not have the expected shape.
    #[error("Could not parse {program} output: {reason}")]
    Parse { program: String, reason: String },

    /// The job options cannot be run by this backend.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl MonitorError {
    pub(crate) fn parse(program: &str, reason: impl Into<String>) -> Self {
        MonitorError::Parse {
            program: program.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<MonitorError> for ExecutionError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Cancelled => ExecutionError::Cancelled,
            other => ExecutionError::Failed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
