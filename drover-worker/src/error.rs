//! Worker error types

use thiserror::Error;

/// Errors raised inside a worker process. Every phase handler converts them
/// into error-bearing protocol replies instead of crashing the process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Messaging failure
    #[error(transparent)]
    Messaging(#[from] drover_messaging::MessagingError),

    /// Rate controller failure
    #[error(transparent)]
    RateControl(#[from] drover_rate::RateControlError),

    /// Workload module failure
    #[error("Workload error: {0}")]
    Workload(String),

    /// A phase message arrived out of order
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

impl WorkerError {
    pub fn workload(message: impl Into<String>) -> Self {
        WorkerError::Workload(message.into())
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        WorkerError::Lifecycle(message.into())
    }
}
