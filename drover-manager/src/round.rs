//! Round result merging

use drover_stats::{merge_snapshots, StatsSnapshot};

/// The merged outcome of one round across all workers.
#[derive(Debug, Clone)]
pub struct RoundResult {
    /// Counter/latency merge of every worker's final statistics.
    pub stats: StatsSnapshot,
    /// Latest worker round start, epoch milliseconds.
    pub start: u64,
    /// Earliest worker round finish, epoch milliseconds.
    pub end: u64,
}

/// Merge the per-worker final statistics into one result.
///
/// The reported window is `[max(worker starts), min(worker ends)]` — the
/// span during which every worker was concurrently active. Results outside
/// the window stay in the merged counters; only the window narrows.
pub fn merge_worker_results(snapshots: &[StatsSnapshot]) -> RoundResult {
    let stats = merge_snapshots(snapshots);
    let start = snapshots
        .iter()
        .map(|s| s.metadata.round_start_time)
        .max()
        .unwrap_or(0);
    let end = snapshots
        .iter()
        .map(|s| s.metadata.round_finish_time)
        .min()
        .unwrap_or(0);
    RoundResult { stats, start, end }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_stats::TransactionStatisticsCollector;

    fn snapshot(worker: i64, start: u64, finish: u64, submitted: u64) -> StatsSnapshot {
        let mut collector = TransactionStatisticsCollector::new(worker, 0, "round");
        collector.activate();
        collector.tx_submitted(submitted);
        collector.deactivate();
        let mut snapshot = collector.snapshot();
        snapshot.metadata.round_start_time = start;
        snapshot.metadata.round_finish_time = finish;
        snapshot
    }

    #[test]
    fn test_window_narrows_to_concurrent_span() {
        let results = [
            snapshot(0, 1_000, 5_000, 6),
            snapshot(1, 1_200, 4_800, 4),
        ];
        let merged = merge_worker_results(&results);

        assert_eq!(merged.start, 1_200);
        assert_eq!(merged.end, 4_800);
        // All transactions stay in the merged counters.
        assert_eq!(merged.stats.tx_counters.total_submitted, 10);
    }

    #[test]
    fn test_single_worker_window() {
        let merged = merge_worker_results(&[snapshot(0, 500, 900, 3)]);
        assert_eq!(merged.start, 500);
        assert_eq!(merged.end, 900);
    }
}
