//! Per-job mutual exclusion.
//!
//! The engine inserts a job id before dispatch and the dispatched task holds
//! an [`InFlightGuard`]; dropping the guard removes the entry, so the slot is
//! released on every exit path, including a panic inside the task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct InFlightEntry {
    job_name: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Snapshot of one running execution, for status views.
#[derive(Debug, Clone, Serialize)]
pub struct InFlightInfo {
    pub job_id: String,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
}

/// Shared set of job ids that currently have an execution in flight.
///
/// Cheap to clone; all clones see the same set.
#[derive(Clone, Default)]
pub struct InFlightSet {
    entries: Arc<Mutex<HashMap<String, InFlightEntry>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    // The map is only touched inside short non-panicking sections, so a
    // poisoned lock still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, InFlightEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `job_id`. Returns `None` if it is already in flight.
    pub fn try_acquire(
        &self,
        job_id: &str,
        job_name: &str,
        cancel: CancellationToken,
    ) -> Option<InFlightGuard> {
        let mut entries = self.lock();
        if entries.contains_key(job_id) {
            return None;
        }
        entries.insert(
            job_id.to_string(),
            InFlightEntry {
                job_name: job_name.to_string(),
                started_at: Utc::now(),
                cancel,
            },
        );
        debug!(job_id, in_flight = entries.len(), "in-flight slot acquired");
        Some(InFlightGuard {
            set: self.clone(),
            job_id: job_id.to_string(),
        })
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Running executions, oldest first.
    pub fn snapshot(&self) -> Vec<InFlightInfo> {
        let mut infos: Vec<InFlightInfo> = self
            .lock()
            .iter()
            .map(|(id, entry)| InFlightInfo {
                job_id: id.clone(),
                job_name: entry.job_name.clone(),
                started_at: entry.started_at,
            })
            .collect();
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    /// Signal cancellation to the running execution of `job_id`.
    ///
    /// The slot stays claimed until the task notices and exits.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().get(job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn release(&self, job_id: &str) {
        let mut entries = self.lock();
        entries.remove(job_id);
        debug!(job_id, in_flight = entries.len(), "in-flight slot released");
    }
}

impl std::fmt::Debug for InFlightSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightSet")
            .field("len", &self.len())
            .finish()
    }
}

/// Scoped ownership of a job's in-flight slot.
#[must_use = "dropping the guard releases the slot immediately"]
pub struct InFlightGuard {
    set: InFlightSet,
    job_id: String,
}

impl InFlightGuard {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.release(&self.job_id);
    }
}
