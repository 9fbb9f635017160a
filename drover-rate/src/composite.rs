//! Composite rate controller
//!
//! Partitions a round into weighted segments, each governed by its own
//! sub-controller and its own statistics sub-collector. Exactly one
//! sub-collector accumulates at any time; the cutover deactivates the old
//! segment and activates the new one before the next rate-control call can
//! observe either, so no transaction is double-counted or dropped at the
//! boundary. The final segment never switches away.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use drover_messaging::{RateControlSpec, RoundTarget, TestSpec};
use drover_stats::{locked, now_millis, SharedCollector, TransactionStatisticsCollector};

use crate::controller::{parse_options, FactoryArgs, RateController};
use crate::error::RateControlError;

const NAME: &str = "composite-rate";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositeOptions {
    weights: Vec<f64>,
    rate_controllers: Vec<RateControlSpec>,
}

/// How segment cutover points are expressed.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cutover {
    /// Switch after this absolute transaction index.
    TxIndex(u64),
    /// Switch at this offset from the round start, in milliseconds.
    ElapsedMs(u64),
}

/// A sub-controller with its scheduling information and sub-collector.
struct ControllerData {
    controller: Box<dyn RateController>,
    sub_collector: SharedCollector,
    cutover: Cutover,
    is_last: bool,
}

/// Applies different rate controllers after one another in the same round.
pub struct CompositeRate {
    stats: SharedCollector,
    controllers: Vec<ControllerData>,
    active_index: usize,
    worker_index: u64,
}

impl CompositeRate {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        let options: CompositeOptions = parse_options(NAME, &args.spec.rate_control.opts)?;
        let weights = Self::normalize_weights(&options.weights, &options.rate_controllers)?;
        let target = args.spec.target()?;

        let mut controllers = Vec::new();
        let mut cumulative = 0.0;
        for (weight, sub_spec) in weights.iter().zip(options.rate_controllers.iter()) {
            // Zero weights allow temporarily removing a segment from the
            // configuration without touching the controller list.
            if *weight == 0.0 {
                continue;
            }
            cumulative += weight;

            let sub_collector = TransactionStatisticsCollector::new_shared(
                args.worker_index as i64,
                args.spec.round_index as i64,
                args.spec.label.clone(),
            );
            locked(&args.stats).add_sub_collector(sub_collector.clone());

            // The sub-controller sees a round scaled to its own segment and
            // believes it is the only controller in it.
            let mut segment_spec: TestSpec = args.spec.clone();
            segment_spec.rate_control = sub_spec.clone();
            let cutover = match target {
                RoundTarget::TxCount(total) => {
                    segment_spec.number_of_txs = Some((total as f64 * weight).floor() as u64);
                    Cutover::TxIndex((total as f64 * cumulative).floor() as u64)
                }
                RoundTarget::Duration(duration) => {
                    let total_ms = duration.as_millis() as f64;
                    segment_spec.round_duration =
                        Some((duration.as_secs_f64() * weight).floor() as u64);
                    Cutover::ElapsedMs((total_ms * cumulative).floor() as u64)
                }
            };

            let controller =
                args.registry
                    .create(&segment_spec, sub_collector.clone(), args.worker_index)?;
            controllers.push(ControllerData {
                controller,
                sub_collector,
                cutover,
                is_last: false,
            });
        }

        controllers
            .last_mut()
            .expect("normalize_weights guarantees at least one positive weight")
            .is_last = true;

        // The first segment starts accounting immediately.
        locked(&controllers[0].sub_collector).activate();

        Ok(Self {
            stats: args.stats,
            controllers,
            active_index: 0,
            worker_index: args.worker_index,
        })
    }

    fn normalize_weights(
        weights: &[f64],
        controllers: &[RateControlSpec],
    ) -> Result<Vec<f64>, RateControlError> {
        if weights.len() != controllers.len() {
            return Err(RateControlError::invalid_options(
                NAME,
                "the number of weights and controllers must be the same",
            ));
        }
        if weights.is_empty() {
            return Err(RateControlError::invalid_options(NAME, "no controllers configured"));
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite()) {
            return Err(RateControlError::invalid_options(
                NAME,
                format!("not-a-number element among weights: {bad}"),
            ));
        }
        if let Some(negative) = weights.iter().find(|w| **w < 0.0) {
            return Err(RateControlError::invalid_options(
                NAME,
                format!("negative element among weights: {negative}"),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if sum == 0.0 {
            return Err(RateControlError::invalid_options(NAME, "every weight is zero"));
        }
        Ok(weights.iter().map(|w| w / sum).collect())
    }

    /// Switch segments when the active one's cutover has been reached.
    async fn switch_if_due(&mut self) -> Result<(), RateControlError> {
        let (submitted, round_start) = {
            let stats = locked(&self.stats);
            (stats.total_submitted(), stats.round_start_time())
        };

        let active = &self.controllers[self.active_index];
        let due = !active.is_last
            && match active.cutover {
                Cutover::TxIndex(last_index) => submitted > last_index,
                Cutover::ElapsedMs(offset) => now_millis().saturating_sub(round_start) >= offset,
            };
        if !due {
            return Ok(());
        }

        // Hand off accounting atomically with respect to rate-control
        // invocations: no await between deactivate and activate would let a
        // submission land in neither collector.
        locked(&self.controllers[self.active_index].sub_collector).deactivate();
        self.controllers[self.active_index].controller.end().await?;

        self.active_index += 1;
        locked(&self.controllers[self.active_index].sub_collector).activate();

        debug!(
            worker = self.worker_index,
            segment = self.active_index,
            at_tx = submitted,
            "switched composite segment"
        );
        Ok(())
    }
}

#[async_trait]
impl RateController for CompositeRate {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        self.switch_if_due().await?;
        self.controllers[self.active_index]
            .controller
            .apply_rate_control()
            .await
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        locked(&self.controllers[self.active_index].sub_collector).deactivate();
        self.controllers[self.active_index].controller.end().await
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(CompositeRate::new(args)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RateControllerRegistry;

    fn spec(opts: serde_json::Value, number_of_txs: Option<u64>, duration: Option<u64>) -> TestSpec {
        TestSpec {
            label: "mixed".into(),
            round_index: 0,
            total_workers: 1,
            number_of_txs,
            round_duration: duration,
            rate_control: RateControlSpec {
                controller_type: "composite-rate".into(),
                opts,
            },
            trim: None,
            workload: Default::default(),
            worker_args: serde_json::Value::Null,
        }
    }

    fn fixed(tps: u64) -> serde_json::Value {
        serde_json::json!({"type": "fixed-rate", "opts": {"tps": tps}})
    }

    fn build(
        opts: serde_json::Value,
        number_of_txs: Option<u64>,
        duration: Option<u64>,
    ) -> Result<(CompositeRate, SharedCollector), RateControlError> {
        let registry = RateControllerRegistry::with_builtins();
        let stats = TransactionStatisticsCollector::new_shared(0, 0, "mixed");
        let controller = CompositeRate::new(FactoryArgs {
            spec: &spec(opts, number_of_txs, duration),
            stats: stats.clone(),
            worker_index: 0,
            registry: &registry,
        })?;
        Ok((controller, stats))
    }

    #[test]
    fn test_weight_validation() {
        let cases = [
            // mismatched lengths
            serde_json::json!({"weights": [1], "rateControllers": [fixed(5), fixed(10)]}),
            // negative weight
            serde_json::json!({"weights": [1, -1], "rateControllers": [fixed(5), fixed(10)]}),
            // all zero
            serde_json::json!({"weights": [0, 0], "rateControllers": [fixed(5), fixed(10)]}),
            // empty
            serde_json::json!({"weights": [], "rateControllers": []}),
            // missing arrays entirely
            serde_json::json!({}),
        ];
        for opts in cases {
            assert!(
                build(opts.clone(), Some(100), None).is_err(),
                "expected rejection for {opts}"
            );
        }
    }

    #[test]
    fn test_equal_weights_cut_at_half() {
        let opts = serde_json::json!({"weights": [1, 1], "rateControllers": [fixed(5), fixed(10)]});
        let (controller, _stats) = build(opts, Some(100), None).unwrap();

        assert_eq!(controller.controllers.len(), 2);
        assert_eq!(controller.controllers[0].cutover, Cutover::TxIndex(50));
        assert!(!controller.controllers[0].is_last);
        assert!(controller.controllers[1].is_last);
    }

    #[test]
    fn test_zero_weight_segments_are_skipped() {
        let opts = serde_json::json!({
            "weights": [1, 0, 1],
            "rateControllers": [fixed(5), fixed(99), fixed(10)],
        });
        let (controller, _stats) = build(opts, Some(100), None).unwrap();
        assert_eq!(controller.controllers.len(), 2);
    }

    #[test]
    fn test_only_first_sub_collector_active_initially() {
        let opts = serde_json::json!({"weights": [1, 1], "rateControllers": [fixed(5), fixed(10)]});
        let (controller, _stats) = build(opts, Some(100), None).unwrap();
        assert!(locked(&controller.controllers[0].sub_collector).is_active());
        assert!(!locked(&controller.controllers[1].sub_collector).is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_segment_switch_preserves_submitted_counts() {
        let opts = serde_json::json!({"weights": [1, 1], "rateControllers": [fixed(1000), fixed(1000)]});
        let (mut controller, stats) = build(opts, Some(10), None).unwrap();
        locked(&stats).activate();

        for _ in 0..10 {
            controller.apply_rate_control().await.unwrap();
            locked(&stats).tx_submitted(1);
        }
        controller.end().await.unwrap();

        let first = locked(&controller.controllers[0].sub_collector).total_submitted();
        let second = locked(&controller.controllers[1].sub_collector).total_submitted();
        assert_eq!(locked(&stats).total_submitted(), 10);
        assert_eq!(first + second, 10);
        // Cutover for weights [1,1] over 10 TXs falls at index 5 (+-1).
        assert!((4..=6).contains(&first), "first segment took {first} TXs");
        // After the round both sub-collectors are inactive.
        assert!(!locked(&controller.controllers[0].sub_collector).is_active());
        assert!(!locked(&controller.controllers[1].sub_collector).is_active());
    }

    #[test]
    fn test_duration_segments_scale() {
        let opts = serde_json::json!({"weights": [3, 1], "rateControllers": [fixed(5), fixed(10)]});
        let (controller, _stats) = build(opts, None, Some(40)).unwrap();
        assert_eq!(controller.controllers[0].cutover, Cutover::ElapsedMs(30_000));
        assert_eq!(controller.controllers[1].cutover, Cutover::ElapsedMs(40_000));
    }
}
