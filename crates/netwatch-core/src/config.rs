use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 7575;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 300; // 5 minutes
pub const MAX_EXECUTION_TIMEOUT_SECS: u64 = 86_400;
pub const DEFAULT_PACKET_COUNT: u32 = 10;

/// Top-level config (netwatch.toml + NETWATCH_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetwatchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub speedtest: SpeedtestConfig,
    #[serde(default)]
    pub packet_loss: PacketLossConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Results older than this many days are pruned at startup. 0 keeps everything.
    #[serde(default)]
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            retention_days: 0,
        }
    }
}

/// Poll loop and execution limits for the scheduler engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Hard ceiling for a single test execution, capped at one day.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Upper bound on concurrently running tests. `None` means one task per due job.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    /// IANA zone used to interpret exact-time intervals such as "03:00,15:00".
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs.clamp(1, MAX_EXECUTION_TIMEOUT_SECS))
    }

    /// Parse `timezone` into a `chrono_tz::Tz`.
    pub fn tz(&self) -> crate::error::Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| crate::error::NetwatchError::TimeZone(self.timezone.clone()))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            execution_timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            max_concurrent: None,
            timezone: default_timezone(),
        }
    }
}

/// Paths to the speed-test binaries. Bare names are resolved through `$PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedtestConfig {
    #[serde(default = "default_speedtest_bin")]
    pub speedtest_bin: String,
    #[serde(default = "default_librespeed_bin")]
    pub librespeed_bin: String,
    #[serde(default = "default_iperf3_bin")]
    pub iperf3_bin: String,
    /// Seconds per iperf3 direction.
    #[serde(default = "default_iperf_duration_secs")]
    pub iperf_duration_secs: u32,
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            speedtest_bin: default_speedtest_bin(),
            librespeed_bin: default_librespeed_bin(),
            iperf3_bin: default_iperf3_bin(),
            iperf_duration_secs: default_iperf_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketLossConfig {
    #[serde(default = "default_ping_bin")]
    pub ping_bin: String,
    #[serde(default = "default_mtr_bin")]
    pub mtr_bin: String,
    #[serde(default = "default_packet_count")]
    pub default_count: u32,
}

impl Default for PacketLossConfig {
    fn default() -> Self {
        Self {
            ping_bin: default_ping_bin(),
            mtr_bin: default_mtr_bin(),
            default_count: DEFAULT_PACKET_COUNT,
        }
    }
}

/// A single outgoing webhook target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub name: String,
    pub url: String,
    /// When set, request bodies are signed with HMAC-SHA256.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub notify_on_success: bool,
    #[serde(default = "bool_true")]
    pub notify_on_failure: bool,
    /// Global packet-loss threshold (%) for monitors without their own.
    #[serde(default)]
    pub packet_loss_threshold: Option<f64>,
    #[serde(default)]
    pub webhooks: Vec<WebhookTarget>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            notify_on_success: false,
            notify_on_failure: true,
            packet_loss_threshold: None,
            webhooks: Vec::new(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_execution_timeout_secs() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT_SECS
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_speedtest_bin() -> String {
    "speedtest".to_string()
}
fn default_librespeed_bin() -> String {
    "librespeed-cli".to_string()
}
fn default_iperf3_bin() -> String {
    "iperf3".to_string()
}
fn default_iperf_duration_secs() -> u32 {
    10
}
fn default_ping_bin() -> String {
    "ping".to_string()
}
fn default_mtr_bin() -> String {
    "mtr".to_string()
}
fn default_packet_count() -> u32 {
    DEFAULT_PACKET_COUNT
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.netwatch/netwatch.db", home)
}

impl NetwatchConfig {
    /// Load config from a TOML file with NETWATCH_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `NETWATCH_SCHEDULER__POLL_INTERVAL_SECS=30`. A missing file is not an
    /// error: every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: NetwatchConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("NETWATCH_").split("__"))
            .extract()
            .map_err(|e| crate::error::NetwatchError::Config(e.to_string()))?;

        config.scheduler.tz()?;
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.netwatch/netwatch.toml", home)
}
