//! Packet-loss probes: plain `ping`, or `mtr` when hop data is wanted.

use chrono::Utc;
use netwatch_core::{PacketLossOptions, PacketLossResult};
use netwatch_scheduler::ExecutionContext;
use serde_json::Value;

use crate::command::run_command;
use crate::error::{MonitorError, Result};

pub fn ping_args(host: &str, count: u32) -> Vec<String> {
    vec![
        "-c".to_string(),
        count.max(1).to_string(),
        "-n".to_string(),
        host.to_string(),
    ]
}

pub fn mtr_args(host: &str, count: u32) -> Vec<String> {
    vec![
        "--json".to_string(),
        "--no-dns".to_string(),
        "-c".to_string(),
        count.max(1).to_string(),
        host.to_string(),
    ]
}

/// Parse the statistics footer of iputils, BSD or busybox ping.
///
/// ```text
/// 10 packets transmitted, 9 received, 10% packet loss, time 9012ms
/// rtt min/avg/max/mdev = 9.870/11.212/14.007/1.127 ms
/// ```
pub fn parse_ping(host: &str, stdout: &str) -> Result<PacketLossResult> {
    let summary = stdout
        .lines()
        .find(|l| l.contains("packets transmitted"))
        .ok_or_else(|| MonitorError::parse("ping", "no statistics line"))?;

    let mut sent = None;
    let mut received = None;
    for part in summary.split(',').map(str::trim) {
        let mut words = part.split_whitespace();
        let (Some(number), Some(label)) = (words.next(), words.next()) else {
            continue;
        };
        let label = if label == "packets" { words.next().unwrap_or(label) } else { label };
        match label {
            "transmitted" => sent = number.parse::<u32>().ok(),
            "received" => received = number.parse::<u32>().ok(),
            _ => {}
        }
    }
    let (Some(sent), Some(received)) = (sent, received) else {
        return Err(MonitorError::parse("ping", format!("unrecognised summary '{summary}'")));
    };
    if sent == 0 {
        return Err(MonitorError::parse("ping", "no packets transmitted"));
    }

    let rtt: Vec<f64> = stdout
        .lines()
        .find(|l| l.contains("min/avg/max"))
        .and_then(|l| l.split_once('='))
        .map(|(_, values)| {
            values
                .trim()
                .trim_end_matches("ms")
                .split('/')
                .filter_map(|v| v.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    Ok(PacketLossResult {
        host: host.to_string(),
        packets_sent: sent,
        packets_received: received.min(sent),
        loss_pct: loss_pct(sent, received.min(sent)),
        rtt_min_ms: rtt.first().copied(),
        rtt_avg_ms: rtt.get(1).copied(),
        rtt_max_ms: rtt.get(2).copied(),
        hop_count: None,
        used_mtr: false,
        measured_at: Utc::now(),
    })
}

/// Parse `mtr --json`. Loss and latency come from the final hop.
pub fn parse_mtr(host: &str, stdout: &str) -> Result<PacketLossResult> {
    let report: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| MonitorError::parse("mtr", e.to_string()))?;
    let hubs = report
        .pointer("/report/hubs")
        .and_then(Value::as_array)
        .filter(|hubs| !hubs.is_empty())
        .ok_or_else(|| MonitorError::parse("mtr", "report has no hubs"))?;
    let Some(last) = hubs.last() else {
        return Err(MonitorError::parse("mtr", "report has no hubs"));
    };

    let number = |key: &str| last.get(key).and_then(as_number);
    let sent = number("Snt")
        .map(|v| v as u32)
        .ok_or_else(|| MonitorError::parse("mtr", "final hop has no Snt"))?;
    let loss = number("Loss%").unwrap_or(0.0).clamp(0.0, 100.0);
    let received = (f64::from(sent) * (100.0 - loss) / 100.0).round() as u32;
    let answered = received > 0;

    Ok(PacketLossResult {
        host: host.to_string(),
        packets_sent: sent,
        packets_received: received,
        loss_pct: loss,
        rtt_min_ms: number("Best").filter(|_| answered),
        rtt_avg_ms: number("Avg").filter(|_| answered),
        rtt_max_ms: number("Wrst").filter(|_| answered),
        hop_count: Some(hubs.len() as u32),
        used_mtr: true,
        measured_at: Utc::now(),
    })
}

// Older mtr releases emit numbers as strings.
fn as_number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn loss_pct(sent: u32, received: u32) -> f64 {
    let lost = f64::from(sent - received);
    (lost / f64::from(sent) * 10_000.0).round() / 100.0
}

/// Probe `options.host` with `count` packets.
pub async fn run(
    ping_bin: &str,
    mtr_bin: &str,
    count: u32,
    options: &PacketLossOptions,
    ctx: &ExecutionContext,
) -> Result<PacketLossResult> {
    let host = options.host.trim();
    if host.is_empty() {
        return Err(MonitorError::InvalidOptions("host must not be empty".to_string()));
    }

    if options.use_mtr {
        let stdout = run_command(mtr_bin, &mtr_args(host, count), ctx)
            .await?
            .into_stdout()?;
        return parse_mtr(host, &stdout);
    }

    let output = run_command(ping_bin, &ping_args(host, count), ctx).await?;
    // ping exits 1 when some or all replies are missing but still prints stats.
    match parse_ping(host, &output.stdout) {
        Ok(result) if output.success() || output.code == Some(1) => Ok(result),
        Ok(_) => Err(output.into_failure()),
        Err(e) if output.success() => Err(e),
        Err(_) => Err(output.into_failure()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPUTILS: &str = "PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.
64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=10.2 ms

--- 1.1.1.1 ping statistics ---
10 packets transmitted, 9 received, 10% packet loss, time 9012ms
rtt min/avg/max/mdev = 9.870/11.212/14.007/1.127 ms
";

    const BSD: &str = "--- example.com ping statistics ---
5 packets transmitted, 5 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 20.118/21.532/23.901/1.299 ms
";

    const ALL_LOST: &str = "--- 10.9.9.9 ping statistics ---
4 packets transmitted, 0 received, +4 errors, 100% packet loss, time 3050ms
";

    #[test]
    fn ping_args_clamp_count() {
        assert_eq!(ping_args("1.1.1.1", 0), vec!["-c", "1", "-n", "1.1.1.1"]);
        assert_eq!(mtr_args("h", 10), vec!["--json", "--no-dns", "-c", "10", "h"]);
    }

    #[test]
    fn parses_iputils_summary() {
        let r = parse_ping("1.1.1.1", IPUTILS).unwrap();
        assert_eq!((r.packets_sent, r.packets_received), (10, 9));
        assert_eq!(r.loss_pct, 10.0);
        assert_eq!(r.rtt_min_ms, Some(9.870));
        assert_eq!(r.rtt_avg_ms, Some(11.212));
        assert_eq!(r.rtt_max_ms, Some(14.007));
        assert!(!r.used_mtr);
    }

    #[test]
    fn parses_bsd_summary() {
        let r = parse_ping("example.com", BSD).unwrap();
        assert_eq!((r.packets_sent, r.packets_received), (5, 5));
        assert_eq!(r.loss_pct, 0.0);
        assert_eq!(r.rtt_avg_ms, Some(21.532));
    }

    #[test]
    fn total_loss_has_no_rtt() {
        let r = parse_ping("10.9.9.9", ALL_LOST).unwrap();
        assert_eq!(r.packets_received, 0);
        assert_eq!(r.loss_pct, 100.0);
        assert_eq!(r.rtt_avg_ms, None);
        assert!(r.breaches(50.0));
    }

    #[test]
    fn garbage_ping_output_is_a_parse_error() {
        assert!(matches!(
            parse_ping("x", "ping: unknown host x"),
            Err(MonitorError::Parse { .. })
        ));
    }

    #[test]
    fn parses_mtr_final_hop() {
        let json = r#"{"report":{"mtr":{"src":"box","dst":"1.1.1.1","tests":10},
            "hubs":[
              {"count":1,"host":"192.168.1.1","Loss%":0.0,"Snt":10,"Last":0.9,"Avg":1.1,"Best":0.8,"Wrst":2.0,"StDev":0.3},
              {"count":2,"host":"10.0.0.1","Loss%":0.0,"Snt":10,"Last":5.0,"Avg":5.2,"Best":4.9,"Wrst":6.1,"StDev":0.4},
              {"count":3,"host":"1.1.1.1","Loss%":20.0,"Snt":10,"Last":9.9,"Avg":10.4,"Best":9.7,"Wrst":12.3,"StDev":0.8}
            ]}}"#;
        let r = parse_mtr("1.1.1.1", json).unwrap();
        assert_eq!(r.hop_count, Some(3));
        assert_eq!((r.packets_sent, r.packets_received), (10, 8));
        assert_eq!(r.loss_pct, 20.0);
        assert_eq!(r.rtt_avg_ms, Some(10.4));
        assert!(r.used_mtr);
    }

    #[test]
    fn mtr_string_numbers_and_empty_report() {
        let json = r#"{"report":{"hubs":[{"count":"1","host":"???","Loss%":"100.00","Snt":"5","Avg":"0.00"}]}}"#;
        let r = parse_mtr("h", json).unwrap();
        assert_eq!(r.packets_received, 0);
        assert_eq!(r.rtt_avg_ms, None);
        assert!(parse_mtr("h", r#"{"report":{"hubs":[]}}"#).is_err());
    }
}
