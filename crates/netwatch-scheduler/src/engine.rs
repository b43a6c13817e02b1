use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use netwatch_core::config::SchedulerConfig;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ExecutionError, SchedulerError},
    executor::{ExecutionContext, TestExecutor},
    inflight::{InFlightGuard, InFlightSet},
    interval::Interval,
    sink::{ResultSink, RunOutcome, RunReport},
    spawner::TaskSpawner,
    store::ScheduleStore,
    types::Job,
};

/// What one poll cycle did.
///
/// Dropping the report detaches the dispatched tasks; [`TickReport::join`]
/// waits for them instead.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Jobs the store reported as due.
    pub due: usize,
    /// Jobs handed to the spawner this tick.
    pub dispatched: Vec<String>,
    /// Due jobs skipped because an execution is still in flight.
    pub skipped: Vec<String>,
    /// Due jobs not dispatched because their interval does not parse.
    pub rejected: Vec<String>,
    /// Set when discovery failed and the tick was abandoned.
    pub error: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl TickReport {
    /// Wait until every execution dispatched by this tick has finished.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("dispatched job task failed: {e}");
            }
        }
    }
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// State shared by the poll loop and every dispatched task.
struct EngineInner {
    store: Arc<dyn ScheduleStore>,
    executor: Arc<dyn TestExecutor>,
    sink: Arc<dyn ResultSink>,
    in_flight: InFlightSet,
    spawner: TaskSpawner,
    poll_interval: Duration,
    execution_timeout: Duration,
    tz: Tz,
}

/// Core scheduler: polls the store on a fixed tick and runs due jobs.
///
/// Lifecycle is `Stopped → Running → Stopped`; `start` and `stop` may be
/// called repeatedly. Executions already dispatched are never cancelled by
/// `stop`; they finish or hit their own deadline.
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
    running: Mutex<Option<LoopHandle>>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        executor: Arc<dyn TestExecutor>,
        sink: Arc<dyn ResultSink>,
        config: &SchedulerConfig,
    ) -> Self {
        let tz = config.tz().unwrap_or_else(|e| {
            warn!("{e}; exact-time intervals fall back to UTC");
            Tz::UTC
        });

        Self {
            inner: Arc::new(EngineInner {
                store,
                executor,
                sink,
                in_flight: InFlightSet::new(),
                spawner: TaskSpawner::from_limit(config.max_concurrent),
                poll_interval: config.poll_interval(),
                execution_timeout: config.execution_timeout(),
                tz,
            }),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the poll loop. Returns `false` (and does nothing) if it is
    /// already running.
    pub fn start(&self) -> bool {
        let mut running = self.running();
        if running.is_some() {
            debug!("scheduler engine already running");
            return false;
        }

        let (shutdown, rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.run(rx).await });
        *running = Some(LoopHandle { shutdown, task });
        true
    }

    /// Ask the poll loop to exit after its current tick and wait for it.
    pub async fn stop(&self) {
        let handle = self.running().take();
        let Some(handle) = handle else {
            debug!("scheduler engine not running");
            return;
        };

        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            error!("scheduler loop ended abnormally: {e}");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Run one poll cycle now, independent of the loop.
    pub async fn tick(&self) -> TickReport {
        self.inner.tick().await
    }

    /// Jobs currently executing.
    pub fn in_flight(&self) -> &InFlightSet {
        &self.inner.in_flight
    }

    /// Cancel the running execution of `job_id`, if any.
    pub fn cancel(&self, job_id: &str) -> bool {
        let cancelled = self.inner.in_flight.cancel(job_id);
        if cancelled {
            info!(job_id, "execution cancellation requested");
        }
        cancelled
    }
}

impl Drop for SchedulerEngine {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = running.take() {
            let _ = handle.shutdown.send(true);
        }
    }
}

impl EngineInner {
    /// Main loop. Ticks every `poll_interval` until `shutdown` broadcasts `true`.
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            timeout_secs = self.execution_timeout.as_secs(),
            "scheduler engine started"
        );
        self.schedule_unscheduled().await;

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if !report.dispatched.is_empty() {
                        info!(
                            dispatched = report.dispatched.len(),
                            skipped = report.skipped.len(),
                            "poll cycle dispatched jobs"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.in_flight.len(), "scheduler engine stopped");
    }

    /// Give enabled jobs without a `next_run` their first one.
    async fn schedule_unscheduled(&self) {
        let jobs = match self.store.unscheduled_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("unscheduled-job sweep failed: {e}");
                return;
            }
        };

        let now = Utc::now();
        for job in jobs {
            let next = match Interval::parse(&job.interval).and_then(|i| i.next_after(now, &self.tz)) {
                Ok(next) => next,
                Err(e) => {
                    error!(job_id = %job.id, name = %job.name, "{e}");
                    continue;
                }
            };
            match self.store.set_next_run(&job.id, next).await {
                Ok(()) => info!(job_id = %job.id, next_run = %next, "job scheduled"),
                Err(e) => warn!(job_id = %job.id, "failed to set first next_run: {e}"),
            }
        }
    }

    /// Process all jobs whose next_run has arrived.
    async fn tick(self: &Arc<Self>) -> TickReport {
        let now = Utc::now();
        let due = match self.store.due_jobs(now).await {
            Ok(jobs) => jobs,
            Err(e) => {
                let err = SchedulerError::Discovery(e);
                error!("{err}; skipping tick");
                return TickReport {
                    error: Some(err.to_string()),
                    ..TickReport::default()
                };
            }
        };

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        if due.is_empty() {
            debug!("no jobs due");
            return report;
        }

        for job in due {
            if !job.enabled {
                continue;
            }

            let cancel = CancellationToken::new();
            let Some(guard) = self.in_flight.try_acquire(&job.id, &job.name, cancel.clone())
            else {
                debug!(job_id = %job.id, name = %job.name, "previous execution still running, skipping");
                report.skipped.push(job.id);
                continue;
            };

            // The due list may predate a run that finished and wrote back
            // after discovery; only the stored row under the guard counts.
            let job = match self.store.current_job(&job.id).await {
                Ok(Some(current)) if current.is_due(now) => current,
                Ok(_) => {
                    debug!(job_id = %job.id, name = %job.name, "no longer due, skipping");
                    report.skipped.push(job.id);
                    continue;
                }
                Err(e) => {
                    warn!(job_id = %job.id, "could not re-read due job: {e}; skipping");
                    report.skipped.push(job.id);
                    continue;
                }
            };

            // Reported every tick until someone fixes the interval.
            let interval = match Interval::parse(&job.interval) {
                Ok(interval) => interval,
                Err(e) => {
                    error!(job_id = %job.id, name = %job.name, "{e}; job not dispatched");
                    report.rejected.push(job.id);
                    continue;
                }
            };

            report.dispatched.push(job.id.clone());
            let inner = Arc::clone(self);
            let task = self
                .spawner
                .spawn(async move { inner.execute_job(job, interval, guard, cancel).await });
            report.tasks.push(task);
        }

        report
    }

    /// Run one attempt and record its outcome. Holds the in-flight slot
    /// until it returns (or unwinds).
    async fn execute_job(
        self: Arc<Self>,
        mut job: Job,
        interval: Interval,
        _guard: InFlightGuard,
        cancel: CancellationToken,
    ) {
        let started_at = Utc::now();
        let deadline = deadline_after(self.execution_timeout);
        let ctx = ExecutionContext::new(job.id.clone(), deadline, cancel.clone());

        info!(job_id = %job.id, name = %job.name, kind = %job.kind(), "executing job");

        // The executor runs in its own task so a panic surfaces as a JoinError.
        let executor = Arc::clone(&self.executor);
        let options = job.options.clone();
        let mut execution = tokio::spawn(async move { executor.execute(&options, ctx).await });

        let outcome = tokio::select! {
            joined = &mut execution => match joined {
                Ok(Ok(result)) => RunOutcome::Success { result },
                Ok(Err(_)) if Instant::now() >= deadline => RunOutcome::TimedOut {
                    after_ms: self.execution_timeout.as_millis() as u64,
                },
                Ok(Err(ExecutionError::Cancelled)) if cancel.is_cancelled() => RunOutcome::Cancelled,
                Ok(Err(e)) => RunOutcome::Failed { error: e.to_string() },
                Err(e) => RunOutcome::Failed { error: join_failure(e).to_string() },
            },
            _ = tokio::time::sleep_until(deadline) => {
                cancel.cancel();
                execution.abort();
                RunOutcome::TimedOut {
                    after_ms: self.execution_timeout.as_millis() as u64,
                }
            }
            _ = cancel.cancelled() => {
                execution.abort();
                RunOutcome::Cancelled
            }
        };

        let finished_at = Utc::now();
        let elapsed_ms = (finished_at - started_at).num_milliseconds();
        match &outcome {
            RunOutcome::Success { .. } => {
                info!(job_id = %job.id, name = %job.name, elapsed_ms, "job completed");
            }
            RunOutcome::Failed { error } => {
                let err = SchedulerError::Execution {
                    job_id: job.id.clone(),
                    source: ExecutionError::Failed(error.clone()),
                };
                warn!(name = %job.name, elapsed_ms, "{err}");
            }
            RunOutcome::TimedOut { after_ms } => {
                let err = SchedulerError::Timeout {
                    job_id: job.id.clone(),
                    ms: *after_ms,
                };
                warn!(name = %job.name, "{err}");
            }
            RunOutcome::Cancelled => {
                info!(job_id = %job.id, name = %job.name, elapsed_ms, "job cancelled");
            }
        }

        // Failures advance next_run like successes: no immediate retry.
        job.last_run = Some(finished_at);
        job.run_count = job.run_count.saturating_add(1);
        job.last_status = Some(outcome.status());
        job.last_error = outcome.error_message();
        job.updated_at = finished_at;
        match interval.next_after(finished_at, &self.tz) {
            Ok(next) => job.next_run = Some(next),
            Err(e) => error!(job_id = %job.id, "{e}; next_run left unchanged"),
        }

        if let Err(e) = self.store.update_after_run(&job).await {
            let err = SchedulerError::Persistence {
                job_id: job.id.clone(),
                source: e,
            };
            warn!("{err}");
        }

        if let RunOutcome::Success { result } = &outcome {
            if let Err(e) = self.sink.save_result(&job, result).await {
                warn!(job_id = %job.id, "{e}");
            }
        }

        let report = RunReport {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            kind: job.kind(),
            started_at,
            finished_at,
            next_run: job.next_run,
            outcome,
        };
        self.sink.notify(&job, &report).await;

        debug!(job_id = %job.id, next_run = ?job.next_run, "execution recorded");
    }
}

/// `now + timeout`, saturating at roughly thirty years out.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// Map a failed executor task into an [`ExecutionError`].
fn join_failure(err: JoinError) -> ExecutionError {
    if !err.is_panic() {
        return ExecutionError::Cancelled;
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    ExecutionError::Panicked(message)
}
