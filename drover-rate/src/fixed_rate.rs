//! Fixed-rate controller
//!
//! Drives a constant TPS by compensating drift: the sleep before the n-th
//! submission targets the absolute time `round_start + n * interval` instead
//! of accumulating per-transaction error.

use async_trait::async_trait;
use serde::Deserialize;

use drover_stats::{locked, now_millis, SharedCollector};

use crate::controller::{parse_options, sleep_millis, FactoryArgs, RateController};
use crate::error::RateControlError;

const NAME: &str = "fixed-rate";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixedRateOptions {
    #[serde(default = "default_tps")]
    tps: f64,
}

fn default_tps() -> f64 {
    10.0
}

/// Sends transactions at a fixed interval, compensating accumulated drift.
pub struct FixedRate {
    stats: SharedCollector,
    /// Per-worker submission interval in milliseconds; zero disables pacing.
    sleep_time_ms: f64,
}

impl FixedRate {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        let options: FixedRateOptions = parse_options(NAME, &args.spec.rate_control.opts)?;
        if options.tps < 0.0 {
            return Err(RateControlError::invalid_options(NAME, "tps must not be negative"));
        }

        let tps_per_worker = options.tps / args.spec.total_workers as f64;
        let sleep_time_ms = if tps_per_worker > 0.0 {
            1_000.0 / tps_per_worker
        } else {
            0.0
        };

        Ok(Self {
            stats: args.stats,
            sleep_time_ms,
        })
    }

    /// Remaining wait so that submission number `submitted` lands on its
    /// scheduled offset. Negative values mean the worker is behind schedule.
    fn pending_sleep_ms(interval_ms: f64, submitted: u64, elapsed_ms: u64) -> f64 {
        interval_ms * submitted as f64 - elapsed_ms as f64
    }
}

#[async_trait]
impl RateController for FixedRate {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        if self.sleep_time_ms == 0.0 {
            return Ok(());
        }

        let (submitted, round_start) = {
            let stats = locked(&self.stats);
            (stats.total_submitted(), stats.round_start_time())
        };
        let elapsed = now_millis().saturating_sub(round_start);
        sleep_millis(Self::pending_sleep_ms(self.sleep_time_ms, submitted, elapsed)).await;
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        Ok(())
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(FixedRate::new(args)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RateControllerRegistry;
    use drover_messaging::{RateControlSpec, TestSpec};
    use drover_stats::TransactionStatisticsCollector;

    fn spec(tps: serde_json::Value, total_workers: u64) -> TestSpec {
        TestSpec {
            label: "round".into(),
            round_index: 0,
            total_workers,
            number_of_txs: Some(100),
            round_duration: None,
            rate_control: RateControlSpec {
                controller_type: "fixed-rate".into(),
                opts: tps,
            },
            trim: None,
            workload: Default::default(),
            worker_args: serde_json::Value::Null,
        }
    }

    fn build(tps: serde_json::Value, total_workers: u64) -> FixedRate {
        let registry = RateControllerRegistry::with_builtins();
        FixedRate::new(FactoryArgs {
            spec: &spec(tps, total_workers),
            stats: TransactionStatisticsCollector::new_shared(0, 0, "round"),
            worker_index: 0,
            registry: &registry,
        })
        .unwrap()
    }

    #[test]
    fn test_interval_divided_across_workers() {
        // 10 TPS over 2 workers: 5 TPS each, 200 ms interval
        let controller = build(serde_json::json!({"tps": 10}), 2);
        assert_eq!(controller.sleep_time_ms, 200.0);
    }

    #[test]
    fn test_default_tps() {
        let controller = build(serde_json::json!({}), 1);
        assert_eq!(controller.sleep_time_ms, 100.0);
    }

    #[test]
    fn test_negative_tps_rejected() {
        let registry = RateControllerRegistry::with_builtins();
        let result = FixedRate::new(FactoryArgs {
            spec: &spec(serde_json::json!({"tps": -1}), 1),
            stats: TransactionStatisticsCollector::new_shared(0, 0, "round"),
            worker_index: 0,
            registry: &registry,
        });
        assert!(matches!(result, Err(RateControlError::InvalidOptions { .. })));
    }

    #[test]
    fn test_drift_correction() {
        // 100 ms interval. The 10th submission is scheduled at 1000 ms; at
        // 400 ms elapsed the controller must sleep the full remaining 600 ms
        // rather than a constant interval.
        assert_eq!(FixedRate::pending_sleep_ms(100.0, 10, 400), 600.0);
        // Behind schedule: no sleep (negative pending).
        assert!(FixedRate::pending_sleep_ms(100.0, 3, 500) < 0.0);
        // Exactly on schedule.
        assert_eq!(FixedRate::pending_sleep_ms(100.0, 5, 500), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_tps_returns_immediately() {
        let mut controller = build(serde_json::json!({"tps": 0}), 1);
        controller.apply_rate_control().await.unwrap();
        controller.end().await.unwrap();
    }
}
