use std::sync::Arc;

use async_trait::async_trait;
use netwatch_core::TestResult;
use netwatch_scheduler::{Job, ResultSink, RunReport, SinkError};

use crate::notify::Notifier;
use crate::store::ResultStore;

/// The scheduler's result sink: history in SQLite, webhooks via [`Notifier`].
pub struct ResultRecorder {
    store: Arc<ResultStore>,
    notifier: Option<Notifier>,
}

impl ResultRecorder {
    pub fn new(store: Arc<ResultStore>, notifier: Option<Notifier>) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }
}

#[async_trait]
impl ResultSink for ResultRecorder {
    async fn save_result(&self, job: &Job, result: &TestResult) -> Result<(), SinkError> {
        self.store
            .save(&job.id, &job.name, result)
            .map(|_| ())
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn notify(&self, job: &Job, report: &RunReport) {
        if let Some(notifier) = &self.notifier {
            // Delivery tasks run detached.
            drop(notifier.notify(job, report));
        }
    }
}
