//! Orchestrator error types

use thiserror::Error;

/// Errors raised while orchestrating the worker pool.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Messaging failure
    #[error(transparent)]
    Messaging(#[from] drover_messaging::MessagingError),

    /// A worker reported an error during a lifecycle phase; fatal for the
    /// current run, with the worker's original message preserved.
    #[error("Worker failure during {phase}: {message}")]
    WorkerFailure { phase: String, message: String },

    /// A phase barrier was dropped without resolving
    #[error("Lifecycle barrier for {0} closed unexpectedly")]
    BarrierClosed(String),

    /// Worker process launching failed
    #[error("Failed to launch workers: {0}")]
    Launch(String),

    /// An operation was requested in the wrong lifecycle state
    #[error("Invalid orchestrator state: {0}")]
    InvalidState(String),
}

impl OrchestratorError {
    pub fn worker_failure(phase: &str, message: impl Into<String>) -> Self {
        OrchestratorError::WorkerFailure {
            phase: phase.to_string(),
            message: message.into(),
        }
    }
}
