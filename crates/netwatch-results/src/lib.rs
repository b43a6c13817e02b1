//! `netwatch-results`: measurement history and outgoing notifications.
//!
//! [`ResultRecorder`] is the scheduler's [`netwatch_scheduler::ResultSink`]:
//! successful results go to the SQLite [`ResultStore`], finished runs are
//! handed to the webhook [`Notifier`].

pub mod db;
pub mod error;
pub mod notify;
pub mod recorder;
pub mod store;

pub use error::{Result, ResultsError};
pub use notify::{Notifier, NotifyEvent};
pub use recorder::ResultRecorder;
pub use store::{ResultStore, StoredResult};
