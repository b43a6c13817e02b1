//! `netwatch-core`: configuration, shared error type and the domain types
//! exchanged between the scheduler, the executors and the result sink.

pub mod config;
pub mod error;
pub mod types;

pub use config::NetwatchConfig;
pub use error::{NetwatchError, Result};
pub use types::{
    JobOptions, PacketLossOptions, PacketLossResult, SpeedTestKind, SpeedTestOptions,
    SpeedTestResult, TestKind, TestResult,
};
