use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two families of recurring test the service knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    SpeedTest,
    PacketLoss,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestKind::SpeedTest => write!(f, "speed_test"),
            TestKind::PacketLoss => write!(f, "packet_loss"),
        }
    }
}

impl std::str::FromStr for TestKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "speed_test" => Ok(TestKind::SpeedTest),
            "packet_loss" => Ok(TestKind::PacketLoss),
            other => Err(format!("unknown test kind: {other}")),
        }
    }
}

/// Which speed-test backend a schedule drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTestKind {
    /// Ookla speedtest.net CLI.
    Speedtest,
    Iperf3,
    Librespeed,
}

impl fmt::Display for SpeedTestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpeedTestKind::Speedtest => "speedtest",
            SpeedTestKind::Iperf3 => "iperf3",
            SpeedTestKind::Librespeed => "librespeed",
        };
        write!(f, "{s}")
    }
}

/// Options for a scheduled speed test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestOptions {
    pub backend: SpeedTestKind,
    /// Backend-specific server ids. Empty means "let the backend pick".
    #[serde(default)]
    pub server_ids: Vec<String>,
    /// `host[:port]` of the iperf3 server. Required for the iperf3 backend.
    #[serde(default)]
    pub server_host: Option<String>,
    #[serde(default = "bool_true")]
    pub download: bool,
    #[serde(default = "bool_true")]
    pub upload: bool,
}

/// Options for a packet-loss monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketLossOptions {
    pub host: String,
    /// Echo requests per run. `None` falls back to `packet_loss.default_count`.
    #[serde(default)]
    pub packet_count: Option<u32>,
    /// Probe with MTR instead of plain ping (adds hop count).
    #[serde(default)]
    pub use_mtr: bool,
    /// Loss percentage above which a run is reported as a breach.
    #[serde(default)]
    pub threshold_pct: Option<f64>,
}

/// Job-specific parameters. Opaque to the scheduler, interpreted by executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOptions {
    SpeedTest(SpeedTestOptions),
    PacketLoss(PacketLossOptions),
}

impl JobOptions {
    pub fn kind(&self) -> TestKind {
        match self {
            JobOptions::SpeedTest(_) => TestKind::SpeedTest,
            JobOptions::PacketLoss(_) => TestKind::PacketLoss,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub backend: SpeedTestKind,
    pub server_name: String,
    pub server_id: Option<String>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub measured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketLossResult {
    pub host: String,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub loss_pct: f64,
    pub rtt_min_ms: Option<f64>,
    pub rtt_avg_ms: Option<f64>,
    pub rtt_max_ms: Option<f64>,
    /// Number of hops to the target; only known for MTR probes.
    pub hop_count: Option<u32>,
    pub used_mtr: bool,
    pub measured_at: DateTime<Utc>,
}

impl PacketLossResult {
    /// True when the measured loss exceeds `threshold_pct`.
    pub fn breaches(&self, threshold_pct: f64) -> bool {
        self.loss_pct > threshold_pct
    }
}

/// Outcome payload of a successful test execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestResult {
    SpeedTest(SpeedTestResult),
    PacketLoss(PacketLossResult),
}

impl TestResult {
    pub fn kind(&self) -> TestKind {
        match self {
            TestResult::SpeedTest(_) => TestKind::SpeedTest,
            TestResult::PacketLoss(_) => TestKind::PacketLoss,
        }
    }
}

fn bool_true() -> bool {
    true
}
