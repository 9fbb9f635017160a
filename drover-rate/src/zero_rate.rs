//! Zero-rate controller
//!
//! Pauses load generation entirely: the worker sleeps through the round.
//! Only meaningful for duration-bounded rounds; a count target would never
//! complete, so construction rejects it.

use async_trait::async_trait;

use drover_messaging::RoundTarget;

use crate::controller::{sleep_millis, FactoryArgs, RateController};
use crate::error::RateControlError;

const NAME: &str = "zero-rate";

/// Sleeps the round away without submitting.
pub struct ZeroRate {
    sleep_time_ms: f64,
}

impl ZeroRate {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        match args.spec.target()? {
            RoundTarget::TxCount(_) => Err(RateControlError::unsupported_round(
                NAME,
                "only duration-based rounds can pause load generation",
            )),
            RoundTarget::Duration(duration) => Ok(Self {
                sleep_time_ms: duration.as_millis() as f64,
            }),
        }
    }
}

#[async_trait]
impl RateController for ZeroRate {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        sleep_millis(self.sleep_time_ms).await;
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        Ok(())
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(ZeroRate::new(args)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RateControllerRegistry;
    use drover_messaging::{RateControlSpec, TestSpec};
    use drover_stats::TransactionStatisticsCollector;

    fn spec(number_of_txs: Option<u64>, round_duration: Option<u64>) -> TestSpec {
        TestSpec {
            label: "pause".into(),
            round_index: 0,
            total_workers: 1,
            number_of_txs,
            round_duration,
            rate_control: RateControlSpec {
                controller_type: "zero-rate".into(),
                opts: serde_json::json!({}),
            },
            trim: None,
            workload: Default::default(),
            worker_args: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_count_round_rejected() {
        let registry = RateControllerRegistry::with_builtins();
        let result = ZeroRate::new(FactoryArgs {
            spec: &spec(Some(10), None),
            stats: TransactionStatisticsCollector::new_shared(0, 0, "pause"),
            worker_index: 0,
            registry: &registry,
        });
        assert!(matches!(result, Err(RateControlError::UnsupportedRound { .. })));
    }

    #[test]
    fn test_duration_round_sleeps_full_round() {
        let registry = RateControllerRegistry::with_builtins();
        let controller = ZeroRate::new(FactoryArgs {
            spec: &spec(None, Some(30)),
            stats: TransactionStatisticsCollector::new_shared(0, 0, "pause"),
            worker_index: 0,
            registry: &registry,
        })
        .unwrap();
        assert_eq!(controller.sleep_time_ms, 30_000.0);
    }
}
