use async_trait::async_trait;
use netwatch_core::{JobOptions, TestResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;

/// Per-attempt limits handed to the executor.
///
/// The engine enforces `deadline` itself, but executors that own external
/// processes should watch `cancel` (or the deadline) and tear them down.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub job_id: String,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(job_id: impl Into<String>, deadline: Instant, cancel: CancellationToken) -> Self {
        Self {
            job_id: job_id.into(),
            deadline,
            cancel,
        }
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Performs one measurement. May take seconds to minutes, may fail.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn execute(
        &self,
        options: &JobOptions,
        ctx: ExecutionContext,
    ) -> Result<TestResult, ExecutionError>;
}
