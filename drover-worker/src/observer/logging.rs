//! Logging TX observer

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use drover_stats::TxStatus;

use crate::observer::TxObserver;

/// Logs finished transaction statuses. Purely local: generates no manager
/// traffic and never touches the statistics collector.
pub struct LoggingTxObserver {
    worker_index: u64,
    logged: AtomicU64,
}

impl LoggingTxObserver {
    pub fn new(worker_index: u64) -> Self {
        Self {
            worker_index,
            logged: AtomicU64::new(0),
        }
    }
}

impl TxObserver for LoggingTxObserver {
    fn tx_submitted(&self, _count: u64) {}

    fn tx_finished(&self, status: &TxStatus) {
        self.logged.fetch_add(1, Ordering::Relaxed);
        info!(
            worker = self.worker_index,
            id = status.id.as_deref().unwrap_or("-"),
            success = status.success,
            latency_ms = status.latency(),
            "transaction finished"
        );
    }
}
