//! iperf3 backend. Needs a reachable iperf3 server (`server_host`).
//!
//! Download is measured with `-R` (server sends), upload without. Each
//! direction is a separate iperf3 invocation.

use chrono::Utc;
use netwatch_core::{SpeedTestKind, SpeedTestOptions, SpeedTestResult};
use netwatch_scheduler::ExecutionContext;
use serde_json::Value;

use crate::command::run_command;
use crate::error::{MonitorError, Result};

const PROGRAM: &str = "iperf3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

/// Split `host[:port]`. A trailing segment that is not a port number is left
/// as part of the host (bare IPv6 addresses).
pub fn split_host(server: &str) -> (&str, Option<u16>) {
    match server.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (server, None),
        },
        _ => (server, None),
    }
}

pub fn args(server: &str, duration_secs: u32, direction: Direction) -> Vec<String> {
    let (host, port) = split_host(server);
    let mut args = vec![
        "-c".to_string(),
        host.to_string(),
        "-J".to_string(),
        "-t".to_string(),
        duration_secs.max(1).to_string(),
    ];
    if let Some(port) = port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    if direction == Direction::Download {
        args.push("-R".to_string());
    }
    args
}

/// Received throughput in Mbps from an iperf3 `-J` report.
pub fn parse(stdout: &str) -> Result<f64> {
    let report: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| MonitorError::parse(PROGRAM, e.to_string()))?;

    if let Some(error) = report.get("error").and_then(Value::as_str) {
        return Err(MonitorError::Failed {
            program: PROGRAM.to_string(),
            code: None,
            stderr: error.to_string(),
        });
    }

    report
        .pointer("/end/sum_received/bits_per_second")
        .and_then(Value::as_f64)
        .map(|bps| bps / 1_000_000.0)
        .ok_or_else(|| MonitorError::parse(PROGRAM, "missing end.sum_received.bits_per_second"))
}

/// Run the requested directions against `options.server_host`.
pub async fn run(
    bin: &str,
    duration_secs: u32,
    options: &SpeedTestOptions,
    ctx: &ExecutionContext,
) -> Result<SpeedTestResult> {
    let server = options
        .server_host
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| MonitorError::InvalidOptions("iperf3 requires server_host".to_string()))?;
    if !options.download && !options.upload {
        return Err(MonitorError::InvalidOptions(
            "at least one of download/upload must be enabled".to_string(),
        ));
    }

    let mut download_mbps = None;
    let mut upload_mbps = None;
    for (enabled, direction) in [
        (options.download, Direction::Download),
        (options.upload, Direction::Upload),
    ] {
        if !enabled {
            continue;
        }
        let output = run_command(bin, &args(server, duration_secs, direction), ctx).await?;
        // iperf3 reports connection errors as JSON on stdout with a non-zero exit.
        let mbps = match parse(&output.stdout) {
            Ok(mbps) if output.success() => mbps,
            Ok(_) => return Err(output.into_failure()),
            Err(e @ MonitorError::Failed { .. }) => return Err(e),
            Err(e) if output.success() => return Err(e),
            Err(_) => return Err(output.into_failure()),
        };
        match direction {
            Direction::Download => download_mbps = Some(mbps),
            Direction::Upload => upload_mbps = Some(mbps),
        }
    }

    Ok(SpeedTestResult {
        backend: SpeedTestKind::Iperf3,
        server_name: server.to_string(),
        server_id: None,
        download_mbps,
        upload_mbps,
        latency_ms: None,
        jitter_ms: None,
        measured_at: Utc::now(),
    })
}
