//! Fixed-feedback-rate controller
//!
//! Drives a fixed interval like `fixed-rate`, but when the unfinished
//! backlog crosses multiples of the configured limit it backs off in staged
//! steps, with a separate escalating ladder while no transaction has
//! succeeded yet.

use async_trait::async_trait;
use serde::Deserialize;

use drover_stats::{locked, now_millis, SharedCollector};

use crate::controller::{parse_options, sleep_millis, FactoryArgs, RateController, MIN_SLEEP_MS};
use crate::error::RateControlError;

const NAME: &str = "fixed-feedback-rate";
const MAX_BACKLOG_STAGE: u64 = 10;
const MAX_ZERO_SUCCESS_STAGE: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixedFeedbackOptions {
    #[serde(default = "default_tps")]
    tps: f64,
    /// Base backoff step in milliseconds.
    #[serde(default = "default_sleep_time")]
    sleep_time: f64,
    #[serde(default = "default_transaction_load")]
    transaction_load: f64,
}

fn default_tps() -> f64 {
    10.0
}

fn default_sleep_time() -> f64 {
    100.0
}

fn default_transaction_load() -> f64 {
    10.0
}

/// What one pacing decision resolved to.
#[derive(Debug, PartialEq)]
enum FeedbackAction {
    Proceed,
    /// Drift-compensating sleep toward the nominal schedule.
    Pace(f64),
    /// Staged backoff; the controller accounts this as throttle time.
    BackOff(f64),
}

/// Fixed interval with staged feedback backoff.
pub struct FixedFeedback {
    stats: SharedCollector,
    general_sleep_ms: f64,
    backoff_ms: f64,
    unfinished_per_worker: f64,
    zero_success_streak: u64,
    /// Accumulated backoff, excluded from the schedule drift computation.
    total_backoff_ms: f64,
}

impl FixedFeedback {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        let options: FixedFeedbackOptions = parse_options(NAME, &args.spec.rate_control.opts)?;
        if options.tps < 0.0 || options.sleep_time <= 0.0 || options.transaction_load <= 0.0 {
            return Err(RateControlError::invalid_options(
                NAME,
                "tps, sleepTime and transactionLoad must be positive",
            ));
        }

        let workers = args.spec.total_workers as f64;
        let tps_per_worker = options.tps / workers;
        Ok(Self {
            stats: args.stats,
            general_sleep_ms: if tps_per_worker > 0.0 {
                1_000.0 / tps_per_worker
            } else {
                0.0
            },
            backoff_ms: options.sleep_time,
            unfinished_per_worker: options.transaction_load / workers,
            zero_success_streak: 0,
            total_backoff_ms: 0.0,
        })
    }

    fn decide(
        &mut self,
        submitted: u64,
        finished: u64,
        successful: u64,
        round_start: u64,
        now: u64,
    ) -> FeedbackAction {
        if self.general_sleep_ms == 0.0 || (submitted as f64) < self.unfinished_per_worker {
            return FeedbackAction::Proceed;
        }
        if finished == 0 {
            return FeedbackAction::Proceed;
        }

        let unfinished = submitted.saturating_sub(finished) as f64;
        if unfinished < self.unfinished_per_worker / 2.0 {
            return FeedbackAction::Proceed;
        }

        // On or behind schedule once the accumulated backoff is discounted.
        let elapsed = now.saturating_sub(round_start) as f64 - self.total_backoff_ms;
        let drift = self.general_sleep_ms * submitted as f64 - elapsed;
        if drift > MIN_SLEEP_MS {
            return FeedbackAction::Pace(drift);
        }

        // Nothing committed yet: escalate the wait each consecutive time.
        if successful == 0 {
            self.zero_success_streak += 1;
            let stage = self.zero_success_streak.min(MAX_ZERO_SUCCESS_STAGE);
            let backoff = stage as f64 * self.backoff_ms;
            self.total_backoff_ms += backoff;
            return FeedbackAction::BackOff(backoff);
        }
        self.zero_success_streak = 0;

        // Back off by the highest exceeded multiple of the backlog limit.
        for stage in (1..=MAX_BACKLOG_STAGE).rev() {
            if unfinished >= stage as f64 * self.unfinished_per_worker {
                let backoff = stage as f64 * self.backoff_ms;
                self.total_backoff_ms += backoff;
                return FeedbackAction::BackOff(backoff);
            }
        }
        FeedbackAction::Proceed
    }
}

#[async_trait]
impl RateController for FixedFeedback {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        let (submitted, finished, successful, round_start) = {
            let stats = locked(&self.stats);
            (
                stats.total_submitted(),
                stats.total_finished(),
                stats.total_successful(),
                stats.round_start_time(),
            )
        };

        match self.decide(submitted, finished, successful, round_start, now_millis()) {
            FeedbackAction::Proceed => {}
            FeedbackAction::Pace(ms) | FeedbackAction::BackOff(ms) => sleep_millis(ms).await,
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        Ok(())
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(FixedFeedback::new(args)?))
}
