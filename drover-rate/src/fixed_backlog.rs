//! Fixed-backlog controller
//!
//! Variant of closed-loop admission control that throttles purely from the
//! observed average completion delay: sleep = backlog error x average delay.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use drover_stats::{locked, SharedCollector};

use crate::controller::{parse_options, sleep_millis, FactoryArgs, RateController};
use crate::error::RateControlError;

const NAME: &str = "fixed-backlog";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixedBacklogOptions {
    #[serde(default = "default_starting_tps")]
    starting_tps: f64,
    #[serde(default = "default_unfinished_per_worker")]
    unfinished_per_worker: f64,
}

fn default_starting_tps() -> f64 {
    1.0
}

fn default_unfinished_per_worker() -> f64 {
    10.0
}

/// Maintains a target backlog by sleeping `error x average delay`.
pub struct FixedBacklog {
    stats: SharedCollector,
    sleep_time_ms: f64,
    unfinished_per_worker: f64,
}

impl FixedBacklog {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        let options: FixedBacklogOptions = parse_options(NAME, &args.spec.rate_control.opts)?;
        if options.starting_tps <= 0.0 || options.unfinished_per_worker <= 0.0 {
            return Err(RateControlError::invalid_options(
                NAME,
                "startingTps and unfinishedPerWorker must be positive",
            ));
        }

        let tps_per_worker = options.starting_tps / args.spec.total_workers as f64;
        Ok(Self {
            stats: args.stats,
            sleep_time_ms: 1_000.0 / tps_per_worker,
            unfinished_per_worker: options.unfinished_per_worker,
        })
    }

    /// Throttle sleep from the backlog error and the mean delay per
    /// completed transaction; `None` below the target backlog.
    fn backlog_sleep_ms(&self, submitted: u64, finished: u64, total_latency_ms: u64) -> Option<f64> {
        let unfinished = submitted.saturating_sub(finished) as f64;
        if unfinished < self.unfinished_per_worker {
            return None;
        }
        let error = unfinished - self.unfinished_per_worker;
        let average_delay_ms = total_latency_ms as f64 / finished as f64;
        Some(error * average_delay_ms)
    }
}

#[async_trait]
impl RateController for FixedBacklog {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        let (submitted, finished, latency) = {
            let stats = locked(&self.stats);
            (
                stats.total_submitted(),
                stats.total_finished(),
                stats.total_latency_successful() + stats.total_latency_failed(),
            )
        };

        // Keep the starting pace until completions provide delay data.
        if finished == 0 {
            sleep_millis(self.sleep_time_ms).await;
            return Ok(());
        }

        if let Some(sleep) = self.backlog_sleep_ms(submitted, finished, latency) {
            debug!(sleep_ms = sleep, "backlog above target");
            sleep_millis(sleep).await;
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        Ok(())
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(FixedBacklog::new(args)?))
}
