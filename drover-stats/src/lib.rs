//! Transaction statistics collection for drover
//!
//! This crate provides the per-worker, per-round statistics collector that
//! rate controllers read and TX observers report from, together with the
//! merge operation used both by the manager (across workers) and by the
//! composite rate controller (across round segments).

pub mod collector;
pub mod status;

pub use collector::{
    locked, merge_snapshots, SharedCollector, StatsSnapshot, TransactionStatisticsCollector,
    MERGED_INDEX_SENTINEL,
};
pub use status::TxStatus;

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// All collector timestamps and rate-control arithmetic use this clock so
/// that snapshots serialized across the wire stay comparable within a run.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
