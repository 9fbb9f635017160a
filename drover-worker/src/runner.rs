//! Round execution loops
//!
//! One loop per round-target kind: submit until the count is reached or the
//! duration elapses, awaiting the rate controller before every submission,
//! then drain until every in-flight transaction has finished.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use drover_messaging::RoundTarget;
use drover_rate::RateController;
use drover_stats::{locked, now_millis, SharedCollector};

use crate::error::WorkerError;
use crate::observer::TxReporter;
use crate::workload::WorkloadModule;

const DRAIN_POLL: Duration = Duration::from_millis(100);

type ErrorSlot = Arc<Mutex<Option<WorkerError>>>;

fn record_error(slot: &ErrorSlot, error: WorkerError) {
    let mut guard = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    // Keep the first error; later ones are usually fallout.
    if guard.is_none() {
        *guard = Some(error);
    }
}

fn take_error(slot: &ErrorSlot) -> Option<WorkerError> {
    slot.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take()
}

fn spawn_submission(workload: &Arc<dyn WorkloadModule>, reporter: &TxReporter, errors: &ErrorSlot) {
    reporter.submitted(1);
    let workload = Arc::clone(workload);
    let reporter = reporter.clone();
    let errors = Arc::clone(errors);
    tokio::spawn(async move {
        match workload.submit_transaction().await {
            Ok(status) => reporter.finished(&status),
            Err(err) => record_error(&errors, err),
        }
    });
}

/// Wait until every submitted TX is finished. Checking after each result
/// instead would hurt the submission rate, so this polls coarsely. An
/// errored submission never reports a finish, so the error slot ends the
/// drain too.
async fn wait_for_txs_to_finish(
    stats: &SharedCollector,
    errors: &ErrorSlot,
) -> Result<(), WorkerError> {
    loop {
        if let Some(err) = take_error(errors) {
            return Err(err);
        }
        let (submitted, finished) = {
            let stats = locked(stats);
            (stats.total_submitted(), stats.total_finished())
        };
        if finished >= submitted {
            return Ok(());
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

/// Run one round to completion. The statistics collector must already be
/// active; the caller ends the rate controller and deactivates observers.
pub async fn run_round(
    workload: Arc<dyn WorkloadModule>,
    rate: &mut dyn RateController,
    reporter: TxReporter,
    stats: SharedCollector,
    target: RoundTarget,
) -> Result<(), WorkerError> {
    let errors: ErrorSlot = Arc::new(Mutex::new(None));

    match target {
        RoundTarget::TxCount(count) => {
            let mut launched = 0u64;
            while launched < count {
                if let Some(err) = take_error(&errors) {
                    return Err(err);
                }
                rate.apply_rate_control().await?;
                spawn_submission(&workload, &reporter, &errors);
                launched += 1;
            }
        }
        RoundTarget::Duration(duration) => {
            let deadline = locked(&stats).round_start_time() + duration.as_millis() as u64;
            while now_millis() < deadline {
                if let Some(err) = take_error(&errors) {
                    return Err(err);
                }
                rate.apply_rate_control().await?;
                spawn_submission(&workload, &reporter, &errors);
            }
        }
    }

    if let Some(err) = take_error(&errors) {
        return Err(err);
    }

    debug!("round submissions complete, draining in-flight transactions");
    wait_for_txs_to_finish(&stats, &errors).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{InternalTxObserver, TxObserverDispatch};
    use crate::workload::WorkloadContext;
    use async_trait::async_trait;
    use drover_messaging::{InboundSender, Message, MessagingError, Messenger};
    use drover_stats::TxStatus;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Messenger that swallows everything; the runner tests only exercise
    /// the local event path.
    struct NullMessenger;

    #[async_trait]
    impl Messenger for NullMessenger {
        async fn initialize(&mut self) -> Result<(), MessagingError> {
            Ok(())
        }
        fn configure(&mut self, _consumer: InboundSender) -> Result<(), MessagingError> {
            Ok(())
        }
        async fn send(&self, _message: Message) -> Result<(), MessagingError> {
            Ok(())
        }
        fn uuid(&self) -> &str {
            "null"
        }
        async fn dispose(&self) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    struct CountingWorkload {
        submitted: AtomicU64,
        fail_at: Option<u64>,
    }

    #[async_trait]
    impl WorkloadModule for CountingWorkload {
        async fn initialize(&mut self, _context: WorkloadContext) -> Result<(), WorkerError> {
            Ok(())
        }

        async fn submit_transaction(&self) -> Result<TxStatus, WorkerError> {
            let index = self.submitted.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(index) {
                return Err(WorkerError::workload("injected failure"));
            }
            let mut status = TxStatus::new(None);
            status.finish(true);
            Ok(status)
        }

        async fn cleanup(&self) -> Result<(), WorkerError> {
            Ok(())
        }
    }

    struct NoopRate;

    #[async_trait]
    impl RateController for NoopRate {
        async fn apply_rate_control(&mut self) -> Result<(), drover_rate::RateControlError> {
            Ok(())
        }
        async fn end(&mut self) -> Result<(), drover_rate::RateControlError> {
            Ok(())
        }
    }

    async fn dispatch() -> TxObserverDispatch {
        let messenger: Arc<dyn Messenger> = Arc::new(NullMessenger);
        let internal =
            InternalTxObserver::new(messenger, "mgr", 0, Duration::from_millis(10));
        let mut dispatch = TxObserverDispatch::new(internal, Vec::new());
        dispatch.activate(0, "round").await.unwrap();
        dispatch
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_round_submits_exact_count() {
        let mut dispatch = dispatch().await;
        let stats = dispatch.current_stats().unwrap();
        let reporter = dispatch.reporter().unwrap();
        let workload: Arc<dyn WorkloadModule> = Arc::new(CountingWorkload {
            submitted: AtomicU64::new(0),
            fail_at: None,
        });

        let mut rate = NoopRate;
        run_round(workload, &mut rate, reporter, stats.clone(), RoundTarget::TxCount(10))
            .await
            .unwrap();
        dispatch.deactivate().await.unwrap();

        let stats = locked(&stats);
        assert_eq!(stats.total_submitted(), 10);
        assert_eq!(stats.total_finished(), 10);
        assert_eq!(stats.total_successful(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workload_error_aborts_round() {
        let dispatch = dispatch().await;
        let stats = dispatch.current_stats().unwrap();
        let reporter = dispatch.reporter().unwrap();
        let workload: Arc<dyn WorkloadModule> = Arc::new(CountingWorkload {
            submitted: AtomicU64::new(0),
            fail_at: Some(3),
        });

        let mut rate = NoopRate;
        let result = run_round(workload, &mut rate, reporter, stats, RoundTarget::TxCount(1_000))
            .await;
        assert!(matches!(result, Err(WorkerError::Workload(_))));
    }
}
