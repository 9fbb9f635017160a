//! Cumulative TX statistics for a worker round
//!
//! The collector is the single source of truth a worker's rate controller
//! reads while pacing submissions. It only accumulates while active, so the
//! composite controller can hand accounting off between round segments
//! without double counting.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::now_millis;
use crate::status::TxStatus;

/// Index value used in merged snapshots when the inputs disagree.
pub const MERGED_INDEX_SENTINEL: i64 = -1;

/// A collector shared between the round runner, the observers and the rate
/// controller. The guard must never be held across an await point.
pub type SharedCollector = Arc<Mutex<TransactionStatisticsCollector>>;

/// Lock a shared collector. A poisoned lock still yields the guard: the
/// counters stay usable even if some task panicked mid-update.
pub fn locked(stats: &SharedCollector) -> std::sync::MutexGuard<'_, TransactionStatisticsCollector> {
    stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Round/worker identification for a statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsMetadata {
    pub worker_index: i64,
    pub round_index: i64,
    pub round_label: String,
    /// Epoch milliseconds when the collector was activated; zero before that.
    pub round_start_time: u64,
    /// Epoch milliseconds when the collector was deactivated; zero before that.
    pub round_finish_time: u64,
}

/// Monotonically increasing transaction counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TxCounters {
    pub total_submitted: u64,
    pub total_finished: u64,
    pub total_successful: u64,
    pub total_failed: u64,
}

/// First/last submission and completion times.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxTimestamps {
    pub first_create_time: u64,
    pub last_create_time: u64,
    pub first_finish_time: u64,
    pub last_finish_time: u64,
}

impl Default for TxTimestamps {
    fn default() -> Self {
        Self {
            first_create_time: u64::MAX,
            last_create_time: 0,
            first_finish_time: u64::MAX,
            last_finish_time: 0,
        }
    }
}

/// Latency bounds and totals for one outcome class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatencyStats {
    pub min: u64,
    pub max: u64,
    pub total: u64,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            total: 0,
        }
    }
}

impl LatencyStats {
    fn record(&mut self, latency: u64) {
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);
        self.total += latency;
    }
}

/// The serializable statistics content of a collector. This is what crosses
/// the wire in `txUpdate` and `testResult` messages; sub-collectors and the
/// active flag stay local to the owning worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsSnapshot {
    pub metadata: StatsMetadata,
    pub tx_counters: TxCounters,
    pub timestamps: TxTimestamps,
    pub latency_successful: LatencyStats,
    pub latency_failed: LatencyStats,
}

/// Encapsulates TX statistics for a given worker for a given round.
#[derive(Debug)]
pub struct TransactionStatisticsCollector {
    stats: StatsSnapshot,
    active: bool,
    sub_collectors: Vec<SharedCollector>,
}

impl TransactionStatisticsCollector {
    /// Create an inactive collector for the given worker and round.
    pub fn new(worker_index: i64, round_index: i64, round_label: impl Into<String>) -> Self {
        Self {
            stats: StatsSnapshot {
                metadata: StatsMetadata {
                    worker_index,
                    round_index,
                    round_label: round_label.into(),
                    round_start_time: 0,
                    round_finish_time: 0,
                },
                tx_counters: TxCounters::default(),
                timestamps: TxTimestamps::default(),
                latency_successful: LatencyStats::default(),
                latency_failed: LatencyStats::default(),
            },
            active: false,
            sub_collectors: Vec::new(),
        }
    }

    /// Create a shared, inactive collector.
    pub fn new_shared(
        worker_index: i64,
        round_index: i64,
        round_label: impl Into<String>,
    ) -> SharedCollector {
        Arc::new(Mutex::new(Self::new(worker_index, round_index, round_label)))
    }

    /// Rebuild a collector around a snapshot received from the wire.
    pub fn from_snapshot(stats: StatsSnapshot) -> Self {
        Self {
            stats,
            active: false,
            sub_collectors: Vec::new(),
        }
    }

    pub fn worker_index(&self) -> i64 {
        self.stats.metadata.worker_index
    }

    pub fn round_index(&self) -> i64 {
        self.stats.metadata.round_index
    }

    pub fn round_label(&self) -> &str {
        &self.stats.metadata.round_label
    }

    pub fn round_start_time(&self) -> u64 {
        self.stats.metadata.round_start_time
    }

    pub fn round_finish_time(&self) -> u64 {
        self.stats.metadata.round_finish_time
    }

    pub fn total_submitted(&self) -> u64 {
        self.stats.tx_counters.total_submitted
    }

    pub fn total_finished(&self) -> u64 {
        self.stats.tx_counters.total_finished
    }

    pub fn total_successful(&self) -> u64 {
        self.stats.tx_counters.total_successful
    }

    pub fn total_failed(&self) -> u64 {
        self.stats.tx_counters.total_failed
    }

    pub fn total_latency_successful(&self) -> u64 {
        self.stats.latency_successful.total
    }

    pub fn total_latency_failed(&self) -> u64 {
        self.stats.latency_failed.total
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// A copy of the cumulative statistics at the time of the call.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.clone()
    }

    /// Register a nested collector that observes the same TX events while it
    /// is itself active. Sub-collectors are activated independently.
    pub fn add_sub_collector(&mut self, collector: SharedCollector) {
        self.sub_collectors.push(collector);
    }

    /// Activate the collector and mark the round start time.
    /// Sub-collectors are not activated.
    pub fn activate(&mut self) {
        self.stats.metadata.round_start_time = now_millis();
        self.active = true;
    }

    /// Deactivate the collector and mark the round finish time.
    /// Sub-collectors are not deactivated.
    pub fn deactivate(&mut self) {
        self.stats.metadata.round_finish_time = now_millis();
        self.active = false;
    }

    /// Record submitted TXs. `count` can exceed one for a batch.
    pub fn tx_submitted(&mut self, count: u64) {
        if !self.active {
            return;
        }

        self.stats.tx_counters.total_submitted += count;
        for sub in &self.sub_collectors {
            locked(sub).tx_submitted(count);
        }
    }

    /// Record a finished TX. Results created before this collector's round
    /// start are ignored so segment hand-offs stay exact.
    pub fn tx_finished(&mut self, result: &TxStatus) {
        if !self.active || result.time_create < self.round_start_time() {
            return;
        }

        self.update_statistics(result);
        for sub in &self.sub_collectors {
            locked(sub).tx_finished(result);
        }
    }

    /// Record a batch of finished TXs.
    pub fn tx_finished_batch(&mut self, results: &[TxStatus]) {
        for result in results {
            self.tx_finished(result);
        }
    }

    fn update_statistics(&mut self, result: &TxStatus) {
        self.stats.tx_counters.total_finished += 1;

        let timestamps = &mut self.stats.timestamps;
        timestamps.first_create_time = timestamps.first_create_time.min(result.time_create);
        timestamps.last_create_time = timestamps.last_create_time.max(result.time_create);
        timestamps.first_finish_time = timestamps.first_finish_time.min(result.time_final);
        timestamps.last_finish_time = timestamps.last_finish_time.max(result.time_final);

        let latency = result.latency();
        if result.success {
            self.stats.tx_counters.total_successful += 1;
            self.stats.latency_successful.record(latency);
        } else {
            self.stats.tx_counters.total_failed += 1;
            self.stats.latency_failed.record(latency);
        }
    }
}

/// Merge snapshots into one: counters and latency totals sum, mins take the
/// minimum, maxes the maximum. Worker/round indices collapse to the shared
/// value, or to [`MERGED_INDEX_SENTINEL`] when the inputs disagree.
///
/// The same operation serves round-level summaries (same round, all workers)
/// and segment summaries (same worker, composite sub-collectors).
pub fn merge_snapshots(snapshots: &[StatsSnapshot]) -> StatsSnapshot {
    let collapse = |values: Vec<i64>| -> i64 {
        match values.first() {
            Some(&first) if values.iter().all(|v| *v == first) => first,
            _ => MERGED_INDEX_SENTINEL,
        }
    };

    let worker_index = collapse(snapshots.iter().map(|s| s.metadata.worker_index).collect());
    let round_index = collapse(snapshots.iter().map(|s| s.metadata.round_index).collect());
    let round_label = snapshots
        .first()
        .map(|s| s.metadata.round_label.clone())
        .unwrap_or_default();

    let min = |f: fn(&StatsSnapshot) -> u64| snapshots.iter().map(f).min().unwrap_or(u64::MAX);
    let max = |f: fn(&StatsSnapshot) -> u64| snapshots.iter().map(f).max().unwrap_or(0);
    let sum = |f: fn(&StatsSnapshot) -> u64| snapshots.iter().map(f).sum::<u64>();

    StatsSnapshot {
        metadata: StatsMetadata {
            worker_index,
            round_index,
            round_label,
            round_start_time: min(|s| s.metadata.round_start_time),
            round_finish_time: max(|s| s.metadata.round_finish_time),
        },
        tx_counters: TxCounters {
            total_submitted: sum(|s| s.tx_counters.total_submitted),
            total_finished: sum(|s| s.tx_counters.total_finished),
            total_successful: sum(|s| s.tx_counters.total_successful),
            total_failed: sum(|s| s.tx_counters.total_failed),
        },
        timestamps: TxTimestamps {
            first_create_time: min(|s| s.timestamps.first_create_time),
            last_create_time: max(|s| s.timestamps.last_create_time),
            first_finish_time: min(|s| s.timestamps.first_finish_time),
            last_finish_time: max(|s| s.timestamps.last_finish_time),
        },
        latency_successful: LatencyStats {
            min: min(|s| s.latency_successful.min),
            max: max(|s| s.latency_successful.max),
            total: sum(|s| s.latency_successful.total),
        },
        latency_failed: LatencyStats {
            min: min(|s| s.latency_failed.min),
            max: max(|s| s.latency_failed.max),
            total: sum(|s| s.latency_failed.total),
        },
    }
}
