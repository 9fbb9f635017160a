//! The workload execution seam
//!
//! The harness core is SUT-agnostic: what a transaction *is* lives behind
//! [`WorkloadModule`], and how a worker builds its SUT session lives behind
//! [`WorkerHooks`]. Both are implemented by connector crates.

use async_trait::async_trait;

use drover_messaging::{TestSpec, WorkloadSpec};
use drover_stats::TxStatus;

use crate::error::WorkerError;

/// Per-round context handed to a workload module before the round starts.
#[derive(Debug, Clone)]
pub struct WorkloadContext {
    pub worker_index: u64,
    pub total_workers: u64,
    pub round_index: u64,
    /// User arguments from the workload specification.
    pub arguments: serde_json::Value,
    /// Connector-specific arguments assigned to this worker.
    pub worker_args: serde_json::Value,
}

/// One round's workload. `initialize` runs before sharing; submission runs
/// concurrently, so the module keeps per-transaction state interior.
#[async_trait]
pub trait WorkloadModule: Send + Sync {
    /// Prepare the module for the round (account setup, data generation).
    async fn initialize(&mut self, context: WorkloadContext) -> Result<(), WorkerError>;

    /// Submit one transaction to the SUT and report its outcome. An `Err`
    /// aborts the round; a failed-but-submitted transaction is a successful
    /// call returning a failed [`TxStatus`].
    async fn submit_transaction(&self) -> Result<TxStatus, WorkerError>;

    /// Release round resources after the drain completes.
    async fn cleanup(&self) -> Result<(), WorkerError>;
}

/// Lifecycle hooks of a worker process, dispatched by the message handler.
/// `init` and `create_workload` are the mandatory core; the before/after
/// pairs default to no-ops.
#[async_trait]
pub trait WorkerHooks: Send {
    async fn before_init(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Build the connector/SUT session for this worker. Runs once, when the
    /// manager broadcasts `initialize`.
    async fn init(&mut self, worker_index: Option<u64>) -> Result<(), WorkerError>;

    async fn after_init(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Create the workload module named by the round specification.
    fn create_workload(&mut self, spec: &WorkloadSpec) -> Result<Box<dyn WorkloadModule>, WorkerError>;

    async fn before_test(&mut self, _spec: &TestSpec) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn after_test(&mut self, _spec: &TestSpec) -> Result<(), WorkerError> {
        Ok(())
    }
}
