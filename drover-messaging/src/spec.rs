//! Round specification carried by `prepare` and `test` messages

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MessagingError;

/// Selects and parameterizes a rate controller for a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateControlSpec {
    /// Name of a registered controller, e.g. `fixed-rate`.
    #[serde(rename = "type")]
    pub controller_type: String,
    /// Controller-specific options, interpreted at construction time.
    #[serde(default)]
    pub opts: serde_json::Value,
}

/// Names the workload module a worker runs and its user arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkloadSpec {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// The bound of one round: a transaction count or a wall-clock duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTarget {
    TxCount(u64),
    Duration(Duration),
}

/// Per-round test specification. The manager prepares one per worker; the
/// count target and trim are already divided down to the worker's share when
/// the message is sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    /// Human-readable round label.
    pub label: String,
    /// 0-based round index.
    #[serde(rename = "testRound")]
    pub round_index: u64,
    /// Number of workers participating in the round.
    pub total_workers: u64,
    /// Count target; mutually exclusive with `round_duration`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_txs: Option<u64>,
    /// Duration target in seconds; mutually exclusive with `number_of_txs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_duration: Option<u64>,
    /// Rate controller selection for the round.
    pub rate_control: RateControlSpec,
    /// Leading results to trim (a TX count, or seconds for duration rounds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim: Option<u64>,
    /// Workload module to execute.
    #[serde(default)]
    pub workload: WorkloadSpec,
    /// Connector-specific arguments for this worker.
    #[serde(default)]
    pub worker_args: serde_json::Value,
}

impl TestSpec {
    /// Eagerly validate the structural invariants: exactly one round target,
    /// and at least one worker.
    pub fn validate(&self) -> Result<(), MessagingError> {
        match (self.number_of_txs, self.round_duration) {
            (Some(_), Some(_)) => Err(MessagingError::InvalidRoundSpec(
                "numberOfTxs and roundDuration are mutually exclusive".into(),
            )),
            (None, None) => Err(MessagingError::InvalidRoundSpec(
                "one of numberOfTxs or roundDuration must be set".into(),
            )),
            _ => {
                if self.total_workers == 0 {
                    return Err(MessagingError::InvalidRoundSpec(
                        "totalWorkers must be at least 1".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// The validated round bound.
    pub fn target(&self) -> Result<RoundTarget, MessagingError> {
        self.validate()?;
        match (self.number_of_txs, self.round_duration) {
            (Some(count), None) => Ok(RoundTarget::TxCount(count)),
            (None, Some(seconds)) => Ok(RoundTarget::Duration(Duration::from_secs(seconds))),
            _ => unreachable!("validate rejects other combinations"),
        }
    }

    /// True for count-bounded rounds.
    pub fn is_count_based(&self) -> bool {
        self.number_of_txs.is_some()
    }

    /// Derive the specification sent to one worker: the count target and a
    /// count-based trim are replaced by that worker's share. Duration targets
    /// apply to every worker unchanged.
    pub fn for_worker(&self, worker_index: u64, worker_args: serde_json::Value) -> TestSpec {
        let mut spec = self.clone();
        spec.worker_args = worker_args;
        if let Some(total) = self.number_of_txs {
            spec.number_of_txs = Some(worker_share(total, self.total_workers, worker_index));
            spec.trim = self
                .trim
                .map(|t| worker_share(t, self.total_workers, worker_index));
        }
        spec
    }
}

/// Even division of `total` across `workers` with the remainder assigned to
/// the last worker, so the shares always sum to `total` exactly.
pub fn worker_share(total: u64, workers: u64, worker_index: u64) -> u64 {
    debug_assert!(workers > 0 && worker_index < workers);
    let base = total / workers;
    if worker_index == workers - 1 {
        base + total % workers
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(number_of_txs: Option<u64>, round_duration: Option<u64>) -> TestSpec {
        TestSpec {
            label: "round".into(),
            round_index: 0,
            total_workers: 3,
            number_of_txs,
            round_duration,
            rate_control: RateControlSpec {
                controller_type: "fixed-rate".into(),
                opts: serde_json::json!({"tps": 10}),
            },
            trim: None,
            workload: Default::default(),
            worker_args: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_exactly_one_target_required() {
        assert!(spec(Some(10), None).validate().is_ok());
        assert!(spec(None, Some(30)).validate().is_ok());
        assert!(spec(Some(10), Some(30)).validate().is_err());
        assert!(spec(None, None).validate().is_err());
    }

    #[test]
    fn test_target_resolution() {
        assert_eq!(spec(Some(10), None).target().unwrap(), RoundTarget::TxCount(10));
        assert_eq!(
            spec(None, Some(30)).target().unwrap(),
            RoundTarget::Duration(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_worker_share_sums_exactly() {
        // 10 TXs over 3 workers: the remainder goes to the last worker
        let shares: Vec<u64> = (0..3).map(|i| worker_share(10, 3, i)).collect();
        assert_eq!(shares, vec![3, 3, 4]);
        assert_eq!(shares.iter().sum::<u64>(), 10);

        let shares: Vec<u64> = (0..4).map(|i| worker_share(8, 4, i)).collect();
        assert_eq!(shares, vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_for_worker_divides_count_and_trim() {
        let mut base = spec(Some(10), None);
        base.trim = Some(6);

        let last = base.for_worker(2, serde_json::json!({"account": 2}));
        assert_eq!(last.number_of_txs, Some(4));
        assert_eq!(last.trim, Some(2));
        assert_eq!(last.worker_args["account"], 2);

        let first = base.for_worker(0, serde_json::Value::Null);
        assert_eq!(first.number_of_txs, Some(3));
    }

    #[test]
    fn test_for_worker_keeps_duration() {
        let base = spec(None, Some(30));
        let derived = base.for_worker(1, serde_json::Value::Null);
        assert_eq!(derived.round_duration, Some(30));
        assert_eq!(derived.number_of_txs, None);
    }
}
