use async_trait::async_trait;
use netwatch_core::config::{NetwatchConfig, PacketLossConfig, SpeedtestConfig};
use netwatch_core::{JobOptions, SpeedTestKind, TestResult};
use netwatch_scheduler::{ExecutionContext, ExecutionError, TestExecutor};
use tracing::{debug, instrument};

use crate::{iperf, librespeed, packetloss, speedtest};

/// [`TestExecutor`] that runs the configured measurement binaries.
#[derive(Debug, Clone)]
pub struct MonitorExecutor {
    speedtest: SpeedtestConfig,
    packet_loss: PacketLossConfig,
}

impl MonitorExecutor {
    pub fn new(speedtest: SpeedtestConfig, packet_loss: PacketLossConfig) -> Self {
        Self {
            speedtest,
            packet_loss,
        }
    }

    pub fn from_config(config: &NetwatchConfig) -> Self {
        Self::new(config.speedtest.clone(), config.packet_loss.clone())
    }
}

#[async_trait]
impl TestExecutor for MonitorExecutor {
    #[instrument(skip_all, fields(job_id = %ctx.job_id, kind = %options.kind()))]
    async fn execute(
        &self,
        options: &JobOptions,
        ctx: ExecutionContext,
    ) -> Result<TestResult, ExecutionError> {
        let result = match options {
            JobOptions::SpeedTest(opts) => {
                debug!(backend = %opts.backend, "running speed test");
                let outcome = match opts.backend {
                    SpeedTestKind::Speedtest => {
                        speedtest::run(&self.speedtest.speedtest_bin, opts, &ctx).await
                    }
                    SpeedTestKind::Iperf3 => {
                        iperf::run(
                            &self.speedtest.iperf3_bin,
                            self.speedtest.iperf_duration_secs,
                            opts,
                            &ctx,
                        )
                        .await
                    }
                    SpeedTestKind::Librespeed => {
                        librespeed::run(&self.speedtest.librespeed_bin, opts, &ctx).await
                    }
                };
                outcome.map(TestResult::SpeedTest)
            }
            JobOptions::PacketLoss(opts) => {
                let count = opts.packet_count.unwrap_or(self.packet_loss.default_count);
                debug!(host = %opts.host, count, mtr = opts.use_mtr, "running packet-loss probe");
                packetloss::run(
                    &self.packet_loss.ping_bin,
                    &self.packet_loss.mtr_bin,
                    count,
                    opts,
                    &ctx,
                )
                .await
                .map(TestResult::PacketLoss)
            }
        };

        result.map_err(ExecutionError::from)
    }
}
