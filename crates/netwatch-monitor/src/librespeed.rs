//! librespeed-cli backend.

use chrono::Utc;
use netwatch_core::{SpeedTestKind, SpeedTestOptions, SpeedTestResult};
use netwatch_scheduler::ExecutionContext;
use serde::Deserialize;

use crate::command::run_command;
use crate::error::{MonitorError, Result};

const PROGRAM: &str = "librespeed-cli";

#[derive(Debug, Deserialize)]
struct LibrespeedReport {
    server: Option<LibrespeedServer>,
    /// Milliseconds.
    ping: Option<f64>,
    jitter: Option<f64>,
    /// Already in Mbps.
    download: Option<f64>,
    upload: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LibrespeedServer {
    name: Option<String>,
    url: Option<String>,
}

pub fn args(options: &SpeedTestOptions) -> Vec<String> {
    let mut args = vec!["--json".to_string()];
    for id in &options.server_ids {
        args.push("--server".to_string());
        args.push(id.clone());
    }
    if !options.download {
        args.push("--no-download".to_string());
    }
    if !options.upload {
        args.push("--no-upload".to_string());
    }
    args
}

/// Parse `--json` output: an array with one entry per tested server (first wins).
pub fn parse(stdout: &str) -> Result<SpeedTestResult> {
    let reports: Vec<LibrespeedReport> = serde_json::from_str(stdout.trim())
        .map_err(|e| MonitorError::parse(PROGRAM, e.to_string()))?;
    let report = reports
        .into_iter()
        .next()
        .ok_or_else(|| MonitorError::parse(PROGRAM, "empty result list"))?;

    let server_name = report
        .server
        .and_then(|s| s.name.or(s.url))
        .unwrap_or_else(|| "unknown".to_string());

    Ok(SpeedTestResult {
        backend: SpeedTestKind::Librespeed,
        server_name,
        server_id: None,
        // librespeed reports 0 for skipped directions.
        download_mbps: report.download.filter(|v| *v > 0.0),
        upload_mbps: report.upload.filter(|v| *v > 0.0),
        latency_ms: report.ping,
        jitter_ms: report.jitter,
        measured_at: Utc::now(),
    })
}

pub async fn run(bin: &str, options: &SpeedTestOptions, ctx: &ExecutionContext) -> Result<SpeedTestResult> {
    let stdout = run_command(bin, &args(options), ctx).await?.into_stdout()?;
    let mut result = parse(&stdout)?;
    if let Some(id) = options.server_ids.first() {
        result.server_id = Some(id.clone());
    }
    Ok(result)
}
