//! Internal TX observer: periodic statistics reporting to the manager

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use drover_messaging::{Message, MessagePayload, Messenger};
use drover_stats::{locked, SharedCollector, TransactionStatisticsCollector};

use crate::error::WorkerError;

/// Owns the round's statistics collector and drives `txUpdate`/`txReset`
/// reporting. Always instantiated, one per worker.
pub struct InternalTxObserver {
    messenger: Arc<dyn Messenger>,
    manager_uuid: String,
    worker_index: u64,
    update_interval: Duration,
    current: Option<SharedCollector>,
    ticker: Option<JoinHandle<()>>,
}

impl InternalTxObserver {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        manager_uuid: impl Into<String>,
        worker_index: u64,
        update_interval: Duration,
    ) -> Self {
        Self {
            messenger,
            manager_uuid: manager_uuid.into(),
            worker_index,
            update_interval,
            current: None,
            ticker: None,
        }
    }

    pub fn current_stats(&self) -> Option<SharedCollector> {
        self.current.clone()
    }

    async fn send_update(
        messenger: &Arc<dyn Messenger>,
        manager_uuid: &str,
        collector: &SharedCollector,
    ) -> Result<(), WorkerError> {
        let snapshot = locked(collector).snapshot();
        let message = Message::unicast(
            messenger.uuid().to_string(),
            manager_uuid,
            MessagePayload::TxUpdate(snapshot),
        );
        messenger.send(message).await?;
        Ok(())
    }

    /// Start a round: create and activate a fresh collector, then report
    /// snapshots on every interval tick.
    pub async fn activate(&mut self, round_index: u64, round_label: &str) -> Result<(), WorkerError> {
        let collector = TransactionStatisticsCollector::new_shared(
            self.worker_index as i64,
            round_index as i64,
            round_label,
        );
        locked(&collector).activate();
        self.current = Some(collector.clone());

        let messenger = Arc::clone(&self.messenger);
        let manager_uuid = self.manager_uuid.clone();
        let interval = self.update_interval;
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so updates are
            // spaced one interval from the round start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) =
                    Self::send_update(&messenger, &manager_uuid, &collector).await
                {
                    warn!(%err, "failed to send statistics update");
                }
            }
        }));

        debug!(worker = self.worker_index, round = round_index, "observer activated");
        Ok(())
    }

    /// End the round: stop the ticker, send one final update, wait one
    /// interval for in-flight accounting to settle, then signal the reset so
    /// the manager-side display starts the next round at zero.
    pub async fn deactivate(&mut self) -> Result<(), WorkerError> {
        let Some(collector) = self.current.take() else {
            return Ok(());
        };
        locked(&collector).deactivate();

        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }

        Self::send_update(&self.messenger, &self.manager_uuid, &collector).await?;
        tokio::time::sleep(self.update_interval).await;

        let reset = Message::unicast(
            self.messenger.uuid().to_string(),
            &self.manager_uuid,
            MessagePayload::TxReset,
        );
        self.messenger.send(reset).await?;

        debug!(worker = self.worker_index, "observer deactivated");
        Ok(())
    }
}
