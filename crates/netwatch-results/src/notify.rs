//! Outgoing webhooks for finished runs.
//!
//! Delivery is fire-and-forget: every target gets its own task, failures are
//! logged and never reach the scheduler.

use std::time::Duration;

use hmac::{Hmac, Mac};
use netwatch_core::config::{NotificationsConfig, WebhookTarget};
use netwatch_core::{JobOptions, TestResult};
use netwatch_scheduler::{Job, RunOutcome, RunReport};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use sha2::Sha256;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, ResultsError};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>` of the request body when the target has a secret.
pub const SIGNATURE_HEADER: &str = "X-Netwatch-Signature";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    RunSucceeded,
    /// Failed or timed out.
    RunFailed,
    /// A packet-loss run measured more loss than its threshold.
    PacketLossBreach,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: NotifyEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold_pct: Option<f64>,
    report: &'a RunReport,
}

pub struct Notifier {
    client: reqwest::Client,
    config: NotificationsConfig,
}

impl Notifier {
    pub fn new(config: NotificationsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(concat!("netwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: NotificationsConfig, client: reqwest::Client) -> Self {
        Self { client, config }
    }

    /// Decide whether `report` warrants a webhook, and as which event.
    ///
    /// A per-job `threshold_pct` overrides the global `packet_loss_threshold`.
    /// Operator cancellations are never announced.
    pub fn classify(&self, job: &Job, report: &RunReport) -> Option<(NotifyEvent, Option<f64>)> {
        if !self.config.enabled || self.config.webhooks.is_empty() {
            return None;
        }

        match &report.outcome {
            RunOutcome::Success { result } => {
                let threshold = match &job.options {
                    JobOptions::PacketLoss(opts) => {
                        opts.threshold_pct.or(self.config.packet_loss_threshold)
                    }
                    JobOptions::SpeedTest(_) => None,
                };
                if let (TestResult::PacketLoss(measured), Some(limit)) = (result, threshold) {
                    if measured.breaches(limit) {
                        return Some((NotifyEvent::PacketLossBreach, Some(limit)));
                    }
                }
                self.config
                    .notify_on_success
                    .then_some((NotifyEvent::RunSucceeded, None))
            }
            RunOutcome::Failed { .. } | RunOutcome::TimedOut { .. } => self
                .config
                .notify_on_failure
                .then_some((NotifyEvent::RunFailed, None)),
            RunOutcome::Cancelled => None,
        }
    }

    /// Post the report to every configured webhook in the background.
    ///
    /// Returns the delivery tasks; callers that don't care can drop them.
    pub fn notify(&self, job: &Job, report: &RunReport) -> Vec<JoinHandle<()>> {
        let Some((event, threshold_pct)) = self.classify(job, report) else {
            debug!(job_id = %report.job_id, "no notification for this run");
            return Vec::new();
        };

        let payload = WebhookPayload {
            event,
            threshold_pct,
            report,
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(job_id = %report.job_id, "failed to serialize webhook payload: {e}");
                return Vec::new();
            }
        };

        self.config
            .webhooks
            .iter()
            .map(|target| {
                let client = self.client.clone();
                let target = target.clone();
                let body = body.clone();
                let job_id = report.job_id.clone();
                tokio::spawn(async move {
                    match deliver(&client, &target, body).await {
                        Ok(()) => info!(webhook = %target.name, job_id = %job_id, ?event, "notification delivered"),
                        Err(e) => warn!(webhook = %target.name, job_id = %job_id, "notification failed: {e}"),
                    }
                })
            })
            .collect()
    }
}

async fn deliver(client: &reqwest::Client, target: &WebhookTarget, body: Vec<u8>) -> Result<()> {
    let mut request = client
        .post(&target.url)
        .header(CONTENT_TYPE, "application/json");
    if let Some(signature) = target.secret.as_deref().and_then(|s| sign(s, &body)) {
        request = request.header(SIGNATURE_HEADER, signature);
    }

    let response = request.body(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ResultsError::Webhook {
            name: target.name.clone(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

/// `sha256=<hex HMAC-SHA256 of body keyed by secret>`.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
