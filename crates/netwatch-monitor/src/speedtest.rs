//! Ookla `speedtest` CLI backend.

use chrono::Utc;
use netwatch_core::{SpeedTestKind, SpeedTestOptions, SpeedTestResult};
use netwatch_scheduler::ExecutionContext;
use serde::Deserialize;
use tracing::debug;

use crate::command::run_command;
use crate::error::{MonitorError, Result};

const PROGRAM: &str = "speedtest";

#[derive(Debug, Deserialize)]
struct OoklaReport {
    ping: Option<OoklaPing>,
    download: Option<OoklaTransfer>,
    upload: Option<OoklaTransfer>,
    server: Option<OoklaServer>,
}

#[derive(Debug, Deserialize)]
struct OoklaPing {
    latency: Option<f64>,
    jitter: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OoklaTransfer {
    /// Bytes per second.
    bandwidth: f64,
}

#[derive(Debug, Deserialize)]
struct OoklaServer {
    id: Option<serde_json::Value>,
    name: Option<String>,
    location: Option<String>,
}

pub fn args(options: &SpeedTestOptions) -> Vec<String> {
    let mut args = vec![
        "--format=json".to_string(),
        "--accept-license".to_string(),
        "--accept-gdpr".to_string(),
    ];
    // The CLI takes a single server; the first configured one wins.
    if let Some(id) = options.server_ids.first() {
        args.push(format!("--server-id={id}"));
    }
    args
}

/// Parse the `--format=json` result object.
pub fn parse(stdout: &str) -> Result<SpeedTestResult> {
    let report: OoklaReport = serde_json::from_str(stdout.trim())
        .map_err(|e| MonitorError::parse(PROGRAM, e.to_string()))?;

    if report.download.is_none() && report.upload.is_none() {
        return Err(MonitorError::parse(PROGRAM, "no download or upload section"));
    }

    let (server_name, server_id) = match report.server {
        Some(server) => {
            let name = match (server.name, server.location) {
                (Some(name), Some(location)) => format!("{name} ({location})"),
                (Some(name), None) => name,
                (None, Some(location)) => location,
                (None, None) => "unknown".to_string(),
            };
            let id = server.id.map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            (name, id)
        }
        None => ("unknown".to_string(), None),
    };

    Ok(SpeedTestResult {
        backend: SpeedTestKind::Speedtest,
        server_name,
        server_id,
        download_mbps: report.download.map(|t| bytes_per_sec_to_mbps(t.bandwidth)),
        upload_mbps: report.upload.map(|t| bytes_per_sec_to_mbps(t.bandwidth)),
        latency_ms: report.ping.as_ref().and_then(|p| p.latency),
        jitter_ms: report.ping.as_ref().and_then(|p| p.jitter),
        measured_at: Utc::now(),
    })
}

fn bytes_per_sec_to_mbps(bandwidth: f64) -> f64 {
    bandwidth * 8.0 / 1_000_000.0
}

pub async fn run(bin: &str, options: &SpeedTestOptions, ctx: &ExecutionContext) -> Result<SpeedTestResult> {
    if !options.download || !options.upload {
        debug!(job_id = %ctx.job_id, "speedtest CLI always measures both directions");
    }
    let stdout = run_command(bin, &args(options), ctx).await?.into_stdout()?;
    let mut result = parse(&stdout)?;
    if !options.download {
        result.download_mbps = None;
    }
    if !options.upload {
        result.upload_mbps = None;
    }
    Ok(result)
}
