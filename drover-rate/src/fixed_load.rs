//! Fixed-load controller
//!
//! Closed-loop admission control: maintains a target number of in-flight
//! (submitted-but-unfinished) transactions by sleeping proportionally to the
//! backlog excess and the observed average latency.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use drover_stats::{locked, SharedCollector};

use crate::controller::{parse_options, sleep_millis, FactoryArgs, RateController};
use crate::error::RateControlError;

const NAME: &str = "fixed-load";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixedLoadOptions {
    #[serde(default = "default_start_tps")]
    start_tps: f64,
    #[serde(default = "default_transaction_load")]
    transaction_load: f64,
}

fn default_start_tps() -> f64 {
    5.0
}

fn default_transaction_load() -> f64 {
    10.0
}

/// Maintains a target backlog of unfinished transactions.
pub struct FixedLoad {
    stats: SharedCollector,
    /// Bootstrap interval used until completions provide latency data.
    sleep_time_ms: f64,
    /// Per-worker target of in-flight transactions.
    target_load: f64,
}

impl FixedLoad {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        let options: FixedLoadOptions = parse_options(NAME, &args.spec.rate_control.opts)?;
        if options.start_tps <= 0.0 || options.transaction_load <= 0.0 {
            return Err(RateControlError::invalid_options(
                NAME,
                "startTps and transactionLoad must be positive",
            ));
        }

        let workers = args.spec.total_workers as f64;
        Ok(Self {
            stats: args.stats,
            sleep_time_ms: 1_000.0 / (options.start_tps / workers),
            target_load: options.transaction_load / workers,
        })
    }

    /// Sleep needed to drain the backlog excess at the observed completion
    /// rate; `None` when the backlog is at or below target.
    fn backlog_sleep_ms(
        &self,
        submitted: u64,
        finished: u64,
        successful: u64,
        failed: u64,
        total_latency_ms: u64,
    ) -> Option<f64> {
        let unfinished = submitted.saturating_sub(finished) as f64;
        if unfinished < self.target_load {
            return None;
        }

        let excess = unfinished - self.target_load;
        let completed = (successful + failed) as f64;
        let latency_secs = total_latency_ms as f64 / 1_000.0;
        let tps = if latency_secs > 0.0 { completed / latency_secs } else { 0.0 };

        let sleep = if tps != 0.0 {
            excess * 1_000.0 / tps
        } else {
            excess * self.sleep_time_ms
        };
        Some(sleep)
    }
}

#[async_trait]
impl RateController for FixedLoad {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        let (submitted, finished, successful, failed, latency) = {
            let stats = locked(&self.stats);
            (
                stats.total_submitted(),
                stats.total_finished(),
                stats.total_successful(),
                stats.total_failed(),
                stats.total_latency_successful() + stats.total_latency_failed(),
            )
        };

        // No completions yet: pace at the bootstrap interval.
        if finished == 0 {
            sleep_millis(self.sleep_time_ms).await;
            return Ok(());
        }

        if let Some(sleep) = self.backlog_sleep_ms(submitted, finished, successful, failed, latency)
        {
            debug!(
                backlog_excess = submitted.saturating_sub(finished),
                sleep_ms = sleep,
                "throttling to drain backlog"
            );
            sleep_millis(sleep).await;
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        Ok(())
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(FixedLoad::new(args)?))
}
