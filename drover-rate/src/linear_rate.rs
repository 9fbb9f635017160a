//! Linear ramp controller
//!
//! Interpolates the sleep interval between a starting and a finishing TPS,
//! over the transaction index for count-bounded rounds and over elapsed time
//! for duration-bounded rounds.

use async_trait::async_trait;
use serde::Deserialize;

use drover_messaging::RoundTarget;
use drover_stats::{locked, now_millis, SharedCollector};

use crate::controller::{parse_options, sleep_millis, FactoryArgs, RateController};
use crate::error::RateControlError;

const NAME: &str = "linear-rate";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinearRateOptions {
    starting_tps: f64,
    finishing_tps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Interpolation {
    /// Count-based round: x axis is the submitted-TX index.
    FromIndex,
    /// Duration-based round: x axis is elapsed milliseconds.
    FromTime,
}

/// Generates a linearly changing workload.
pub struct LinearRate {
    stats: SharedCollector,
    starting_sleep_ms: f64,
    /// Slope of the (index-or-time, sleep) line.
    gradient: f64,
    interpolation: Interpolation,
}

impl LinearRate {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        let options: LinearRateOptions = parse_options(NAME, &args.spec.rate_control.opts)?;
        if options.starting_tps <= 0.0 || options.finishing_tps <= 0.0 {
            return Err(RateControlError::invalid_options(
                NAME,
                "startingTps and finishingTps must be positive",
            ));
        }

        let workers = args.spec.total_workers as f64;
        let starting_sleep_ms = 1_000.0 / (options.starting_tps / workers);
        let finishing_sleep_ms = 1_000.0 / (options.finishing_tps / workers);

        let (span, interpolation) = match args.spec.target()? {
            RoundTarget::TxCount(count) => (count as f64, Interpolation::FromIndex),
            RoundTarget::Duration(duration) => {
                (duration.as_millis() as f64, Interpolation::FromTime)
            }
        };

        Ok(Self {
            stats: args.stats,
            starting_sleep_ms,
            gradient: (finishing_sleep_ms - starting_sleep_ms) / span,
            interpolation,
        })
    }

    fn interpolated_sleep_ms(&self, position: f64) -> f64 {
        self.starting_sleep_ms + position * self.gradient
    }
}

#[async_trait]
impl RateController for LinearRate {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        let position = match self.interpolation {
            Interpolation::FromIndex => locked(&self.stats).total_submitted() as f64,
            Interpolation::FromTime => {
                let round_start = locked(&self.stats).round_start_time();
                now_millis().saturating_sub(round_start) as f64
            }
        };
        sleep_millis(self.interpolated_sleep_ms(position)).await;
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        Ok(())
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(LinearRate::new(args)?))
}
