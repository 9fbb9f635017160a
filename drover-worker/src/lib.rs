//! Worker-side runtime for drover
//!
//! A worker process consumes manager messages through a [`MessageHandler`],
//! executes workload rounds under a rate controller, and reports statistics
//! back through its messenger via the TX observer layer.

pub mod error;
pub mod handler;
pub mod observer;
pub mod runner;
pub mod workload;

pub use error::WorkerError;
pub use handler::MessageHandler;
pub use observer::{LoggingTxObserver, TxObserver, TxObserverDispatch, TxReporter};
pub use workload::{WorkerHooks, WorkloadContext, WorkloadModule};
