//! Result information for a single submitted transaction

use serde::{Deserialize, Serialize};

use crate::now_millis;

/// Outcome of one workload transaction, as reported by the workload seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxStatus {
    /// Optional SUT-assigned identifier of the transaction.
    pub id: Option<String>,
    /// Whether the transaction was committed successfully.
    pub success: bool,
    /// Submission time, milliseconds since the Unix epoch.
    pub time_create: u64,
    /// Completion time, milliseconds since the Unix epoch.
    pub time_final: u64,
    /// Opaque result payload forwarded from the connector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl TxStatus {
    /// Create a status stamped with the current time as its creation time.
    /// The finish time is filled in by [`TxStatus::finish`].
    pub fn new(id: Option<String>) -> Self {
        Self {
            id,
            success: false,
            time_create: now_millis(),
            time_final: 0,
            result: None,
        }
    }

    /// Create an already-completed successful status from explicit timestamps.
    pub fn success(time_create: u64, time_final: u64) -> Self {
        Self {
            id: None,
            success: true,
            time_create,
            time_final,
            result: None,
        }
    }

    /// Create an already-completed failed status from explicit timestamps.
    pub fn failure(time_create: u64, time_final: u64) -> Self {
        Self {
            id: None,
            success: false,
            time_create,
            time_final,
            result: None,
        }
    }

    /// Mark the transaction finished now with the given outcome.
    pub fn finish(&mut self, success: bool) {
        self.success = success;
        self.time_final = now_millis();
    }

    /// Latency in milliseconds; zero when the finish time predates creation.
    pub fn latency(&self) -> u64 {
        self.time_final.saturating_sub(self.time_create)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_from_timestamps() {
        let status = TxStatus::success(1_000, 1_250);
        assert!(status.success);
        assert_eq!(status.latency(), 250);
    }

    #[test]
    fn test_finish_stamps_final_time() {
        let mut status = TxStatus::new(Some("tx-1".into()));
        assert!(!status.success);
        status.finish(true);
        assert!(status.success);
        assert!(status.time_final >= status.time_create);
    }

    #[test]
    fn test_latency_saturates() {
        let status = TxStatus::failure(2_000, 1_000);
        assert_eq!(status.latency(), 0);
    }
}
