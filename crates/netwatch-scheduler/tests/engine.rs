//! Engine behaviour against in-memory collaborators.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use netwatch_core::config::SchedulerConfig;
use netwatch_core::{JobOptions, PacketLossOptions, PacketLossResult, TestKind, TestResult};
use netwatch_scheduler::{
    ExecutionContext, ExecutionError, Job, ResultSink, RunOutcome, RunReport, RunStatus,
    ScheduleStore, SchedulerEngine, SinkError, StoreError, TestExecutor,
};

// ── Fakes ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryStore {
    jobs: Mutex<Vec<Job>>,
    updates: Mutex<Vec<Job>>,
    fail_discovery: AtomicBool,
    fail_update: AtomicBool,
    /// Delay between taking the due snapshot and returning it.
    discovery_delay_ms: AtomicU64,
}

impl MemoryStore {
    fn with_jobs(jobs: Vec<Job>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(jobs),
            ..Self::default()
        })
    }

    fn job(&self, id: &str) -> Job {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .unwrap()
    }

    fn updates_for(&self, id: &str) -> Vec<Job> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.id == id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk on fire".to_string()));
        }
        let snapshot: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect();
        let delay = self.discovery_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(snapshot)
    }

    async fn current_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned())
    }

    async fn update_after_run(&self, job: &Job) -> Result<(), StoreError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read-only filesystem".to_string()));
        }
        self.updates.lock().unwrap().push(job.clone());
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(slot) = jobs.iter_mut().find(|j| j.id == job.id) {
            *slot = job.clone();
        }
        Ok(())
    }

    async fn unscheduled_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.enabled && j.next_run.is_none())
            .cloned()
            .collect())
    }

    async fn set_next_run(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::JobNotFound { id: id.to_string() })?;
        job.next_run = Some(at);
        Ok(())
    }
}

enum Behavior {
    Succeed,
    Fail,
    Sleep(Duration),
    Panic,
    WaitForCancel,
}

struct FakeExecutor {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl FakeExecutor {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestExecutor for FakeExecutor {
    async fn execute(
        &self,
        options: &JobOptions,
        ctx: ExecutionContext,
    ) -> Result<TestResult, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed => Ok(sample_result(options)),
            Behavior::Fail => Err(ExecutionError::Failed("ping exited with 2".to_string())),
            Behavior::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(sample_result(options))
            }
            Behavior::Panic => panic!("parser exploded"),
            Behavior::WaitForCancel => {
                ctx.cancel.cancelled().await;
                Err(ExecutionError::Cancelled)
            }
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    saved: Mutex<Vec<(String, TestResult)>>,
    reports: Mutex<Vec<RunReport>>,
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn save_result(&self, job: &Job, result: &TestResult) -> Result<(), SinkError> {
        self.saved
            .lock()
            .unwrap()
            .push((job.id.clone(), result.clone()));
        Ok(())
    }

    async fn notify(&self, _job: &Job, report: &RunReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn options() -> JobOptions {
    JobOptions::PacketLoss(PacketLossOptions {
        host: "1.1.1.1".to_string(),
        packet_count: Some(5),
        use_mtr: false,
        threshold_pct: None,
    })
}

fn sample_result(options: &JobOptions) -> TestResult {
    let host = match options {
        JobOptions::PacketLoss(o) => o.host.clone(),
        JobOptions::SpeedTest(_) => "speed".to_string(),
    };
    TestResult::PacketLoss(PacketLossResult {
        host,
        packets_sent: 5,
        packets_received: 5,
        loss_pct: 0.0,
        rtt_min_ms: Some(9.1),
        rtt_avg_ms: Some(10.4),
        rtt_max_ms: Some(12.0),
        hop_count: None,
        used_mtr: false,
        measured_at: Utc::now(),
    })
}

fn job(id: &str, interval: &str, next_run: Option<DateTime<Utc>>) -> Job {
    let now = Utc::now();
    Job {
        id: id.to_string(),
        name: format!("job {id}"),
        enabled: true,
        interval: interval.to_string(),
        options: options(),
        last_run: None,
        next_run,
        run_count: 0,
        last_status: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}

fn overdue() -> Option<DateTime<Utc>> {
    Some(Utc::now() - TimeDelta::seconds(1))
}

fn config(timeout_secs: u64) -> SchedulerConfig {
    SchedulerConfig {
        execution_timeout_secs: timeout_secs,
        ..SchedulerConfig::default()
    }
}

fn engine(
    store: &Arc<MemoryStore>,
    executor: &Arc<FakeExecutor>,
    sink: &Arc<RecordingSink>,
    timeout_secs: u64,
) -> SchedulerEngine {
    SchedulerEngine::new(
        store.clone(),
        executor.clone(),
        sink.clone(),
        &config(timeout_secs),
    )
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_store_tick_is_a_no_op() {
    let store = MemoryStore::with_jobs(vec![]);
    let executor = FakeExecutor::new(Behavior::Succeed);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    let report = engine.tick().await;
    assert_eq!(report.due, 0);
    assert!(report.dispatched.is_empty());
    assert!(report.error.is_none());
    report.join().await;

    assert_eq!(executor.calls(), 0);
    assert!(store.updates.lock().unwrap().is_empty());
    assert!(sink.reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn successful_run_advances_next_run_by_interval() {
    let store = MemoryStore::with_jobs(vec![job("a", "1m", overdue())]);
    let executor = FakeExecutor::new(Behavior::Succeed);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    let report = engine.tick().await;
    assert_eq!(report.dispatched, vec!["a".to_string()]);
    report.join().await;

    let updates = store.updates_for("a");
    assert_eq!(updates.len(), 1);
    let updated = &updates[0];
    let last_run = updated.last_run.unwrap();
    assert_eq!(updated.next_run, Some(last_run + TimeDelta::minutes(1)));
    assert_eq!(updated.run_count, 1);
    assert_eq!(updated.last_status, Some(RunStatus::Success));
    assert!(updated.last_error.is_none());

    let saved = sink.saved.lock().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "a");

    let reports = sink.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, TestKind::PacketLoss);
    assert!(matches!(reports[0].outcome, RunOutcome::Success { .. }));
    assert!(engine.in_flight().is_empty());
}

#[tokio::test]
async fn failed_run_still_advances_and_is_not_saved() {
    let store = MemoryStore::with_jobs(vec![job("f", "30m", overdue())]);
    let executor = FakeExecutor::new(Behavior::Fail);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    engine.tick().await.join().await;

    let updated = store.job("f");
    let last_run = updated.last_run.unwrap();
    assert_eq!(updated.next_run, Some(last_run + TimeDelta::minutes(30)));
    assert_eq!(updated.last_status, Some(RunStatus::Failed));
    assert_eq!(updated.last_error.as_deref(), Some("ping exited with 2"));

    assert!(sink.saved.lock().unwrap().is_empty());
    let reports = sink.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0].outcome, RunOutcome::Failed { .. }));

    // Not retried on the next tick: next_run is 30 minutes out.
    drop(reports);
    let report = engine.tick().await;
    assert_eq!(report.due, 0);
    assert_eq!(executor.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn in_flight_job_is_skipped_by_later_ticks() {
    let store = MemoryStore::with_jobs(vec![job("slow", "1m", overdue())]);
    let executor = FakeExecutor::new(Behavior::Sleep(Duration::from_secs(30)));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    let first = engine.tick().await;
    assert_eq!(first.dispatched.len(), 1);
    assert!(engine.in_flight().contains("slow"));

    // The store still reports the job as due while the first run is going.
    let second = engine.tick().await;
    assert_eq!(second.due, 1);
    assert!(second.dispatched.is_empty());
    assert_eq!(second.skipped, vec!["slow".to_string()]);

    first.join().await;
    second.join().await;

    assert_eq!(executor.calls(), 1);
    assert_eq!(store.updates_for("slow").len(), 1);
    assert!(!engine.in_flight().contains("slow"));
}

#[tokio::test]
async fn concurrent_due_jobs_each_get_one_update() {
    let store = MemoryStore::with_jobs(vec![
        job("ten-seconds", "10s", overdue()),
        job("ten-millis", "10ms", overdue()),
    ]);
    let executor = FakeExecutor::new(Behavior::Succeed);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    let report = engine.tick().await;
    assert_eq!(report.dispatched.len(), 2);
    report.join().await;

    let a = store.updates_for("ten-seconds");
    let b = store.updates_for("ten-millis");
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(
        a[0].next_run,
        Some(a[0].last_run.unwrap() + TimeDelta::seconds(10))
    );
    assert_eq!(
        b[0].next_run,
        Some(b[0].last_run.unwrap() + TimeDelta::milliseconds(10))
    );
    assert_eq!(executor.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn execution_past_deadline_is_timed_out() {
    let store = MemoryStore::with_jobs(vec![job("hang", "5m", overdue())]);
    let executor = FakeExecutor::new(Behavior::Sleep(Duration::from_secs(3600)));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 2);

    engine.tick().await.join().await;

    let updated = store.job("hang");
    assert_eq!(updated.last_status, Some(RunStatus::TimedOut));
    assert_eq!(
        updated.next_run,
        Some(updated.last_run.unwrap() + TimeDelta::minutes(5))
    );
    assert!(sink.saved.lock().unwrap().is_empty());
    let reports = sink.reports.lock().unwrap();
    assert!(matches!(
        reports[0].outcome,
        RunOutcome::TimedOut { after_ms: 2000 }
    ));
    assert!(engine.in_flight().is_empty());
}

#[tokio::test]
async fn panicking_executor_is_recorded_as_failure() {
    let store = MemoryStore::with_jobs(vec![job("boom", "1h", overdue())]);
    let executor = FakeExecutor::new(Behavior::Panic);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    engine.tick().await.join().await;

    let updated = store.job("boom");
    assert_eq!(updated.last_status, Some(RunStatus::Failed));
    assert!(updated
        .last_error
        .as_deref()
        .unwrap()
        .contains("parser exploded"));
    assert!(updated.next_run.unwrap() > Utc::now());
    assert!(engine.in_flight().is_empty());
}

#[tokio::test]
async fn cancelled_execution_is_recorded() {
    let store = MemoryStore::with_jobs(vec![job("c", "1h", overdue())]);
    let executor = FakeExecutor::new(Behavior::WaitForCancel);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    let report = engine.tick().await;
    assert!(engine.cancel("c"));
    assert!(!engine.cancel("unknown"));
    report.join().await;

    let updated = store.job("c");
    assert_eq!(updated.last_status, Some(RunStatus::Cancelled));
    assert!(updated.next_run.unwrap() > Utc::now());
    assert!(matches!(
        sink.reports.lock().unwrap()[0].outcome,
        RunOutcome::Cancelled
    ));
}

#[tokio::test]
async fn invalid_interval_is_reported_every_tick_and_never_dispatched() {
    let store = MemoryStore::with_jobs(vec![
        job("bad", "every tuesday", overdue()),
        job("good", "1h", overdue()),
    ]);
    let executor = FakeExecutor::new(Behavior::Succeed);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    let first = engine.tick().await;
    assert_eq!(first.rejected, vec!["bad".to_string()]);
    assert_eq!(first.dispatched, vec!["good".to_string()]);
    first.join().await;

    let second = engine.tick().await;
    assert_eq!(second.rejected, vec!["bad".to_string()]);
    assert!(second.dispatched.is_empty());

    assert_eq!(executor.calls(), 1);
    assert!(store.updates_for("bad").is_empty());
}

#[tokio::test]
async fn discovery_failure_skips_the_tick() {
    let store = MemoryStore::with_jobs(vec![job("a", "1m", overdue())]);
    store.fail_discovery.store(true, Ordering::SeqCst);
    let executor = FakeExecutor::new(Behavior::Succeed);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    let report = engine.tick().await;
    assert!(report.error.as_deref().unwrap().contains("disk on fire"));
    assert!(report.dispatched.is_empty());
    assert_eq!(executor.calls(), 0);

    // Recovers on the next tick.
    store.fail_discovery.store(false, Ordering::SeqCst);
    engine.tick().await.join().await;
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn disabled_job_is_never_dispatched() {
    let mut disabled = job("off", "1m", overdue());
    disabled.enabled = false;
    let store = MemoryStore::with_jobs(vec![disabled]);
    let executor = FakeExecutor::new(Behavior::Succeed);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    let report = engine.tick().await;
    assert_eq!(report.due, 0);
    assert_eq!(executor.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_and_sweeps_unscheduled_jobs() {
    let store = MemoryStore::with_jobs(vec![job("new", "1h", None)]);
    let executor = FakeExecutor::new(Behavior::Succeed);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    assert!(!engine.is_running());
    assert!(engine.start());
    assert!(!engine.start());
    assert!(engine.is_running());

    for _ in 0..100 {
        if store.job("new").next_run.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let scheduled = store.job("new").next_run.unwrap();
    assert!(scheduled > Utc::now() + TimeDelta::minutes(59));

    engine.stop().await;
    assert!(!engine.is_running());
    // Second stop is a no-op.
    engine.stop().await;

    // Not due, so the loop never ran it.
    assert_eq!(executor.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_finishing_during_slow_discovery_is_not_redispatched() {
    let store = MemoryStore::with_jobs(vec![job("x", "1h", overdue())]);
    store.discovery_delay_ms.store(100, Ordering::SeqCst);
    let executor = FakeExecutor::new(Behavior::Sleep(Duration::from_millis(10)));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    let first = engine.tick().await;
    assert_eq!(first.dispatched, vec!["x".to_string()]);

    // The snapshot still lists "x" as due; the run writes back while the
    // store is slow to answer.
    let second = engine.tick().await;
    assert_eq!(second.due, 1);
    assert!(second.dispatched.is_empty());
    assert_eq!(second.skipped, vec!["x".to_string()]);

    first.join().await;
    second.join().await;
    assert_eq!(executor.calls(), 1);
    assert_eq!(store.updates_for("x").len(), 1);
    assert!(engine.in_flight().is_empty());
}

#[tokio::test]
async fn failed_write_back_releases_slot_and_job_runs_again() {
    let store = MemoryStore::with_jobs(vec![job("w", "1h", overdue())]);
    store.fail_update.store(true, Ordering::SeqCst);
    let executor = FakeExecutor::new(Behavior::Succeed);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    engine.tick().await.join().await;
    assert!(engine.in_flight().is_empty());
    assert!(store.updates_for("w").is_empty());
    // Sink side effects still happen.
    assert_eq!(sink.saved.lock().unwrap().len(), 1);
    assert_eq!(sink.reports.lock().unwrap().len(), 1);

    // next_run was never advanced, so the job is due again.
    let retry = engine.tick().await;
    assert_eq!(retry.dispatched, vec!["w".to_string()]);
    retry.join().await;
    assert_eq!(executor.calls(), 2);

    store.fail_update.store(false, Ordering::SeqCst);
    engine.tick().await.join().await;
    assert_eq!(store.updates_for("w").len(), 1);
    assert!(store.job("w").next_run.unwrap() > Utc::now());
}

#[tokio::test(start_paused = true)]
async fn stop_lets_in_flight_execution_finish() {
    let store = MemoryStore::with_jobs(vec![job("slow", "1h", overdue())]);
    let executor = FakeExecutor::new(Behavior::Sleep(Duration::from_secs(30)));
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, 300);

    assert!(engine.start());
    for _ in 0..100 {
        if executor.calls() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(executor.calls(), 1);
    assert!(engine.in_flight().contains("slow"));

    engine.stop().await;
    assert!(!engine.is_running());
    assert!(engine.in_flight().contains("slow"));

    tokio::time::sleep(Duration::from_secs(31)).await;
    for _ in 0..100 {
        if !engine.in_flight().contains("slow") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let updates = store.updates_for("slow");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].last_status, Some(RunStatus::Success));
    assert!(matches!(
        sink.reports.lock().unwrap()[0].outcome,
        RunOutcome::Success { .. }
    ));
    assert!(engine.in_flight().is_empty());
}

#[tokio::test]
async fn oversized_timeout_does_not_break_dispatch() {
    let store = MemoryStore::with_jobs(vec![job("t", "1h", overdue())]);
    let executor = FakeExecutor::new(Behavior::Succeed);
    let sink = Arc::new(RecordingSink::default());
    let engine = engine(&store, &executor, &sink, u64::MAX);

    engine.tick().await.join().await;

    let updated = store.job("t");
    assert_eq!(updated.last_status, Some(RunStatus::Success));
    assert!(updated.next_run.unwrap() > Utc::now());
}
