//! Manager-side orchestration for drover
//!
//! The [`WorkerOrchestrator`] owns the set of known workers and drives them
//! through the lifecycle phases over a messenger: registration polling,
//! index assignment, readiness, and the per-round prepare/execute barriers.

pub mod error;
pub mod launcher;
pub mod orchestrator;
pub mod round;

pub use error::OrchestratorError;
pub use launcher::launch_workers;
pub use orchestrator::{ProgressUpdate, WorkerOrchestrator};
pub use round::{merge_worker_results, RoundResult};
