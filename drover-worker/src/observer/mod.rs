//! TX observer layer
//!
//! Observers watch the stream of submitted/finished transaction events
//! inside a worker. The internal observer is always present: it owns the
//! round's statistics collector and reports snapshots to the manager.
//! Additional observers (e.g. the logging observer) receive the same events
//! while a round is active.

mod internal;
mod logging;

use std::sync::Arc;

pub use internal::InternalTxObserver;
pub use logging::LoggingTxObserver;

use drover_stats::{locked, SharedCollector, TxStatus};

use crate::error::WorkerError;

/// A passive consumer of TX events. Event callbacks take `&self` because
/// submissions complete concurrently.
pub trait TxObserver: Send + Sync {
    fn on_activate(&self, _round_index: u64, _round_label: &str) {}

    fn tx_submitted(&self, count: u64);

    fn tx_finished(&self, status: &TxStatus);

    fn on_deactivate(&self) {}
}

/// Cloneable handle through which workload submissions feed TX events into
/// the active round's collector and the registered observers.
#[derive(Clone)]
pub struct TxReporter {
    collector: SharedCollector,
    observers: Arc<Vec<Arc<dyn TxObserver>>>,
}

impl TxReporter {
    pub fn submitted(&self, count: u64) {
        locked(&self.collector).tx_submitted(count);
        for observer in self.observers.iter() {
            observer.tx_submitted(count);
        }
    }

    pub fn finished(&self, status: &TxStatus) {
        locked(&self.collector).tx_finished(status);
        for observer in self.observers.iter() {
            observer.tx_finished(status);
        }
    }
}

/// Fans TX events out to the internal observer's collector and every
/// registered observer; forwards only while a round is active.
pub struct TxObserverDispatch {
    internal: InternalTxObserver,
    observers: Arc<Vec<Arc<dyn TxObserver>>>,
    active: bool,
}

impl TxObserverDispatch {
    pub fn new(internal: InternalTxObserver, observers: Vec<Arc<dyn TxObserver>>) -> Self {
        Self {
            internal,
            observers: Arc::new(observers),
            active: false,
        }
    }

    /// Start a round: a fresh collector begins accumulating and the
    /// periodic manager reporting starts.
    pub async fn activate(&mut self, round_index: u64, round_label: &str) -> Result<(), WorkerError> {
        self.internal.activate(round_index, round_label).await?;
        for observer in self.observers.iter() {
            observer.on_activate(round_index, round_label);
        }
        self.active = true;
        Ok(())
    }

    /// End the round: stop accumulation, flush the final statistics update
    /// and signal the manager-side reset.
    pub async fn deactivate(&mut self) -> Result<(), WorkerError> {
        self.active = false;
        for observer in self.observers.iter() {
            observer.on_deactivate();
        }
        self.internal.deactivate().await
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The active round's statistics collector.
    pub fn current_stats(&self) -> Result<SharedCollector, WorkerError> {
        self.internal
            .current_stats()
            .ok_or_else(|| WorkerError::lifecycle("no active round statistics"))
    }

    /// An event handle bound to the active round.
    pub fn reporter(&self) -> Result<TxReporter, WorkerError> {
        Ok(TxReporter {
            collector: self.current_stats()?,
            observers: Arc::clone(&self.observers),
        })
    }
}
