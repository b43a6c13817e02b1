use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Runs dispatched executions as independent Tokio tasks.
///
/// Unbounded by default: every due job gets its own task immediately. With a
/// limit, tasks still spawn at once but wait for a permit before running the
/// future, so the poll loop never blocks on a full pool.
#[derive(Debug, Clone)]
pub struct TaskSpawner {
    permits: Option<Arc<Semaphore>>,
}

impl TaskSpawner {
    pub fn unbounded() -> Self {
        Self { permits: None }
    }

    /// At most `limit` futures run at the same time. A limit of 0 is treated as 1.
    pub fn bounded(limit: usize) -> Self {
        Self {
            permits: Some(Arc::new(Semaphore::new(limit.max(1)))),
        }
    }

    pub fn from_limit(limit: Option<usize>) -> Self {
        limit.map_or_else(Self::unbounded, Self::bounded)
    }

    /// Currently free permits, or `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|p| p.available_permits())
    }

    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.permits {
            None => tokio::spawn(fut),
            Some(permits) => {
                let permits = Arc::clone(permits);
                tokio::spawn(async move {
                    // The semaphore is never closed, so acquire only fails on a bug.
                    let Ok(_permit) = permits.acquire_owned().await else {
                        debug!("spawner semaphore closed, dropping task");
                        return;
                    };
                    fut.await;
                    // Permit is released when dropped
                })
            }
        }
    }
}

impl Default for TaskSpawner {
    fn default() -> Self {
        Self::unbounded()
    }
}
