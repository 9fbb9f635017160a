//! Maximum-rate controller
//!
//! Damped hill-climbing search for the sustainable maximum throughput: each
//! sampling window compares achieved TPS against the previous window; gains
//! push the setpoint up by a step, losses pull it back and halve the step
//! (bounded below), so the search settles around the knee.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use drover_stats::{locked, now_millis, SharedCollector};

use crate::controller::{parse_options, sleep_millis, FactoryArgs, RateController};
use crate::error::RateControlError;

const NAME: &str = "maximum-rate";
const MIN_STEP_TPS: f64 = 0.2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaxRateOptions {
    #[serde(default = "default_tps")]
    tps: f64,
    #[serde(default = "default_step")]
    step: f64,
    /// Sampling window length in seconds.
    #[serde(default = "default_sample_interval")]
    sample_interval: f64,
    #[serde(default = "default_include_failed")]
    include_failed: bool,
}

fn default_tps() -> f64 {
    5.0
}

fn default_step() -> f64 {
    5.0
}

fn default_sample_interval() -> f64 {
    10.0
}

fn default_include_failed() -> bool {
    true
}

/// Adaptive search for maximum sustainable TPS.
pub struct MaxRate {
    stats: SharedCollector,
    tps_setpoint: f64,
    step: f64,
    sample_interval_ms: f64,
    include_failed: bool,
    /// Start of the current sampling window; zero until the first call.
    window_start_ms: u64,
    window_start_finished: u64,
    observed_tps: f64,
}

impl MaxRate {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        let options: MaxRateOptions = parse_options(NAME, &args.spec.rate_control.opts)?;
        if options.tps <= 0.0 || options.step <= 0.0 || options.sample_interval <= 0.0 {
            return Err(RateControlError::invalid_options(
                NAME,
                "tps, step and sampleInterval must be positive",
            ));
        }

        let workers = args.spec.total_workers as f64;
        Ok(Self {
            stats: args.stats,
            tps_setpoint: options.tps / workers,
            step: options.step / workers,
            sample_interval_ms: options.sample_interval * 1_000.0,
            include_failed: options.include_failed,
            window_start_ms: 0,
            window_start_finished: 0,
            observed_tps: 0.0,
        })
    }

    /// Close the current sampling window and adjust the setpoint.
    fn adjust(&mut self, now: u64, finished: u64) {
        let window_ms = now.saturating_sub(self.window_start_ms).max(1) as f64;
        let achieved = (finished.saturating_sub(self.window_start_finished)) as f64 * 1_000.0
            / window_ms;

        let previous = self.observed_tps;
        self.observed_tps = achieved;

        if achieved > previous {
            // Keep ramping, try for a new maximum.
            self.tps_setpoint += self.step;
            debug!(tps = self.tps_setpoint, "throughput rising, raising setpoint");
        } else {
            // Overshot: back off and search with a finer step.
            self.tps_setpoint = (self.tps_setpoint - self.step).max(MIN_STEP_TPS);
            if self.step > MIN_STEP_TPS {
                self.step /= 2.0;
            }
            debug!(
                tps = self.tps_setpoint,
                step = self.step,
                "throughput fell, lowering setpoint"
            );
        }

        self.window_start_ms = now;
        self.window_start_finished = finished;
    }

    fn window_elapsed(&self, now: u64) -> bool {
        now.saturating_sub(self.window_start_ms) as f64 >= self.sample_interval_ms
    }
}

#[async_trait]
impl RateController for MaxRate {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        let (round_start, successful, failed) = {
            let stats = locked(&self.stats);
            (
                stats.round_start_time(),
                stats.total_successful(),
                stats.total_failed(),
            )
        };
        let finished = if self.include_failed {
            successful + failed
        } else {
            successful
        };

        let now = now_millis();
        if self.window_start_ms == 0 {
            self.window_start_ms = if round_start > 0 { round_start } else { now };
        } else if self.window_elapsed(now) {
            self.adjust(now, finished);
        }

        // Constant pace within the window at the current setpoint.
        sleep_millis(1_000.0 / self.tps_setpoint).await;
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        Ok(())
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(MaxRate::new(args)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RateControllerRegistry;
    use drover_messaging::{RateControlSpec, TestSpec};
    use drover_stats::TransactionStatisticsCollector;

    fn build(opts: serde_json::Value, workers: u64) -> MaxRate {
        let spec = TestSpec {
            label: "max".into(),
            round_index: 0,
            total_workers: workers,
            number_of_txs: None,
            round_duration: Some(120),
            rate_control: RateControlSpec {
                controller_type: "maximum-rate".into(),
                opts,
            },
            trim: None,
            workload: Default::default(),
            worker_args: serde_json::Value::Null,
        };
        let registry = RateControllerRegistry::with_builtins();
        MaxRate::new(FactoryArgs {
            spec: &spec,
            stats: TransactionStatisticsCollector::new_shared(0, 0, "max"),
            worker_index: 0,
            registry: &registry,
        })
        .unwrap()
    }

    #[test]
    fn test_setpoint_and_step_divided_across_workers() {
        let controller = build(serde_json::json!({"tps": 20, "step": 4}), 4);
        assert_eq!(controller.tps_setpoint, 5.0);
        assert_eq!(controller.step, 1.0);
    }

    #[test]
    fn test_gain_raises_setpoint() {
        let mut controller = build(serde_json::json!({"tps": 10, "step": 2}), 1);
        controller.window_start_ms = 0;
        controller.observed_tps = 5.0;
        // 10 finished over 1 s -> 10 TPS achieved, above the previous 5.
        controller.adjust(1_000, 10);
        assert_eq!(controller.tps_setpoint, 12.0);
        assert_eq!(controller.step, 2.0);
    }

    #[test]
    fn test_loss_lowers_setpoint_and_halves_step() {
        let mut controller = build(serde_json::json!({"tps": 10, "step": 2}), 1);
        controller.window_start_ms = 0;
        controller.observed_tps = 20.0;
        // 10 finished over 1 s -> 10 TPS, below the previous 20.
        controller.adjust(1_000, 10);
        assert_eq!(controller.tps_setpoint, 8.0);
        assert_eq!(controller.step, 1.0);
    }

    #[test]
    fn test_step_is_bounded_below() {
        let mut controller = build(serde_json::json!({"tps": 1, "step": 0.3}), 1);
        controller.window_start_ms = 0;
        controller.observed_tps = 100.0;
        controller.adjust(1_000, 0);
        assert_eq!(controller.step, 0.15);
        controller.observed_tps = 100.0;
        controller.window_start_ms = 0;
        controller.adjust(2_000, 0);
        // Below the floor the step stays put.
        assert_eq!(controller.step, 0.15);
        assert!(controller.tps_setpoint >= MIN_STEP_TPS);
    }

    #[test]
    fn test_window_gating() {
        let controller = build(serde_json::json!({"sampleInterval": 10}), 1);
        assert!(!controller.window_elapsed(5_000));
        assert!(controller.window_elapsed(10_000));
    }
}
