//! Subprocess-backed test executors.
//!
//! Each backend builds an argument list, runs the external CLI through
//! [`command::run_command`] and parses its output into the shared result
//! types. [`MonitorExecutor`] picks the backend from the job's options and is
//! what the scheduler engine calls.

pub mod command;
pub mod error;
pub mod executor;
pub mod iperf;
pub mod librespeed;
pub mod packetloss;
pub mod speedtest;
pub mod truncate;

pub use error::{MonitorError, Result};
pub use executor::MonitorExecutor;
