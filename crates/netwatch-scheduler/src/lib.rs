//! `netwatch-scheduler`: recurring-test scheduling with SQLite persistence.
//!
//! # Overview
//!
//! Jobs (speed-test schedules and packet-loss monitors) live in a
//! [`store::ScheduleStore`]. The [`engine::SchedulerEngine`] polls the store
//! on a fixed tick, dispatches every due job as its own task, bounds each
//! execution with a deadline and writes the recomputed `next_run` back once
//! the attempt finishes. A job never has two executions in flight at once.
//!
//! # Interval forms
//!
//! | Form          | Example          | Next run                                  |
//! |---------------|------------------|-------------------------------------------|
//! | Duration      | `30m`, `1h30m`   | reference + duration                      |
//! | Exact times   | `03:00,15:00`    | soonest listed wall-clock time after ref  |

pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod inflight;
pub mod interval;
pub mod sink;
pub mod spawner;
pub mod store;
pub mod types;

pub use engine::{SchedulerEngine, TickReport};
pub use error::{ExecutionError, Result, SchedulerError, SinkError, StoreError};
pub use executor::{ExecutionContext, TestExecutor};
pub use inflight::{InFlightGuard, InFlightInfo, InFlightSet};
pub use interval::Interval;
pub use sink::{ResultSink, RunOutcome, RunReport};
pub use spawner::TaskSpawner;
pub use store::{ScheduleStore, SqliteScheduleStore};
pub use types::{Job, NewJob, RunStatus};
