//! Worker lifecycle orchestration
//!
//! The lifecycle is a message-driven state machine:
//! `UNREGISTERED -> CONNECTED -> ASSIGNED -> READY -> (per round: PREPARED ->
//! TEST_COMPLETE)`, with no skipping and no going backward. Each transition
//! resolves a one-shot barrier created fresh for that phase, so duplicate or
//! late messages can never re-resolve a finished phase. Workers persist
//! across rounds; only the prepare/test phases repeat.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use drover_config::WorkersConfig;
use drover_messaging::{
    InboundReceiver, Message, MessageKind, MessagePayload, Messenger, TestSpec,
};
use drover_stats::StatsSnapshot;

use crate::error::OrchestratorError;
use crate::round::{merge_worker_results, RoundResult};

const EXIT_REAP_TIMEOUT: Duration = Duration::from_secs(5);

type PhaseSender = oneshot::Sender<Result<(), String>>;
type PhaseReceiver = oneshot::Receiver<Result<(), String>>;

/// A statistics event forwarded from a worker mid-round.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// Periodic `txUpdate` snapshot.
    Stats {
        worker: String,
        snapshot: StatsSnapshot,
    },
    /// `txReset`: the worker's statistics stream restarts at zero.
    Reset { worker: String },
}

struct WorkerRecord {
    worker_index: u64,
    assigned: bool,
    ready: bool,
    prepared: Option<PhaseSender>,
    test_result: Option<PhaseSender>,
}

struct SharedState {
    expected: usize,
    workers: HashMap<String, WorkerRecord>,
    connected: Option<PhaseSender>,
    assigned: Option<PhaseSender>,
    ready: Option<PhaseSender>,
    results: Vec<StatsSnapshot>,
    updates: Vec<ProgressUpdate>,
}

impl SharedState {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            workers: HashMap::new(),
            connected: None,
            assigned: None,
            ready: None,
            results: Vec::new(),
            updates: Vec::new(),
        }
    }

    fn record_mut(&mut self, worker: &str, phase: MessageKind) -> Option<&mut WorkerRecord> {
        let record = self.workers.get_mut(worker);
        if record.is_none() {
            warn!(%worker, %phase, "discarding phase message from unregistered worker");
        }
        record
    }

    /// Reject every outstanding barrier; used for out-of-phase worker errors.
    fn fail_all(&mut self, text: &str) {
        for barrier in [
            self.connected.take(),
            self.assigned.take(),
            self.ready.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = barrier.send(Err(text.to_string()));
        }
        for record in self.workers.values_mut() {
            if let Some(sender) = record.prepared.take() {
                let _ = sender.send(Err(text.to_string()));
            }
            if let Some(sender) = record.test_result.take() {
                let _ = sender.send(Err(text.to_string()));
            }
        }
    }
}

fn lock(state: &StdMutex<SharedState>) -> std::sync::MutexGuard<'_, SharedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply one inbound worker message to the registry. Runs only on the
/// dispatch task, so the registry needs no further synchronization.
fn process_message(state: &StdMutex<SharedState>, message: Message) {
    let sender = message.sender.clone();
    let error = message.error.clone();
    let mut state = lock(state);

    match message.payload {
        MessagePayload::Connected => {
            if let Some(error) = error {
                if let Some(barrier) = state.connected.take() {
                    let _ = barrier.send(Err(error));
                }
                return;
            }
            if state.workers.contains_key(&sender) {
                debug!(worker = %sender, "duplicate connected message ignored");
                return;
            }
            let worker_index = state.workers.len() as u64;
            state.workers.insert(
                sender.clone(),
                WorkerRecord {
                    worker_index,
                    assigned: false,
                    ready: false,
                    prepared: None,
                    test_result: None,
                },
            );
            info!(worker = %sender, "worker connected ({}/{})", state.workers.len(), state.expected);
            if state.workers.len() == state.expected {
                if let Some(barrier) = state.connected.take() {
                    let _ = barrier.send(Ok(()));
                }
            }
        }
        MessagePayload::Assigned => {
            if state.record_mut(&sender, MessageKind::Assigned).is_none() {
                return;
            }
            if let Some(error) = error {
                if let Some(barrier) = state.assigned.take() {
                    let _ = barrier.send(Err(error));
                }
                return;
            }
            if let Some(record) = state.workers.get_mut(&sender) {
                record.assigned = true;
            }
            if state.workers.values().all(|w| w.assigned) {
                if let Some(barrier) = state.assigned.take() {
                    let _ = barrier.send(Ok(()));
                }
            }
        }
        MessagePayload::Ready => {
            if state.record_mut(&sender, MessageKind::Ready).is_none() {
                return;
            }
            if let Some(error) = error {
                if let Some(barrier) = state.ready.take() {
                    let _ = barrier.send(Err(error));
                }
                return;
            }
            if let Some(record) = state.workers.get_mut(&sender) {
                record.ready = true;
            }
            if state.workers.values().all(|w| w.ready) {
                if let Some(barrier) = state.ready.take() {
                    let _ = barrier.send(Ok(()));
                }
            }
        }
        MessagePayload::Prepared => {
            let Some(record) = state.record_mut(&sender, MessageKind::Prepared) else {
                return;
            };
            match record.prepared.take() {
                Some(barrier) => {
                    let _ = barrier.send(match error {
                        Some(error) => Err(error),
                        None => Ok(()),
                    });
                }
                None => debug!(worker = %sender, "late prepared message ignored"),
            }
        }
        MessagePayload::TestResult(snapshot) => {
            let Some(record) = state.record_mut(&sender, MessageKind::TestResult) else {
                return;
            };
            match record.test_result.take() {
                Some(barrier) => {
                    if error.is_none() {
                        state.results.push(snapshot);
                    }
                    let _ = barrier.send(match error {
                        Some(error) => Err(error),
                        None => Ok(()),
                    });
                }
                None => debug!(worker = %sender, "late testResult message ignored"),
            }
        }
        MessagePayload::TxUpdate(snapshot) => {
            state.updates.push(ProgressUpdate::Stats {
                worker: sender,
                snapshot,
            });
        }
        MessagePayload::TxReset => {
            state.updates.push(ProgressUpdate::Reset { worker: sender });
        }
        MessagePayload::Error => {
            let text = error.unwrap_or_else(|| "worker reported an unspecified error".into());
            warn!(worker = %sender, %text, "worker error, rejecting outstanding barriers");
            state.fail_all(&text);
        }
        MessagePayload::Exit => {
            debug!(worker = %sender, "worker acknowledged exit");
        }
        other => {
            debug!(worker = %sender, kind = %other.kind(), "ignoring unexpected message");
        }
    }
}

async fn await_barrier(rx: PhaseReceiver, phase: &str) -> Result<(), OrchestratorError> {
    match rx.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(text)) => Err(OrchestratorError::worker_failure(phase, text)),
        Err(_) => Err(OrchestratorError::BarrierClosed(phase.to_string())),
    }
}

/// Drives the worker pool through its lifecycle over a messenger.
pub struct WorkerOrchestrator {
    messenger: Arc<dyn Messenger>,
    expected: usize,
    poll_interval: Duration,
    worker_args: Vec<serde_json::Value>,
    state: Arc<StdMutex<SharedState>>,
    dispatch: JoinHandle<()>,
    children: Vec<Child>,
    workers_connected: bool,
    workers_assigned: bool,
    workers_ready: bool,
}

impl WorkerOrchestrator {
    /// Build an orchestrator over an already configured and initialized
    /// messenger and its inbound channel.
    pub fn new(
        messenger: Arc<dyn Messenger>,
        mut inbound: InboundReceiver,
        config: &WorkersConfig,
    ) -> Self {
        let state = Arc::new(StdMutex::new(SharedState::new(config.number as usize)));
        let dispatch_state = Arc::clone(&state);
        let dispatch = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                process_message(&dispatch_state, message);
            }
            debug!("orchestrator inbound channel closed");
        });

        Self {
            messenger,
            expected: config.number as usize,
            poll_interval: config.poll_interval,
            worker_args: Vec::new(),
            state,
            dispatch,
            children: Vec::new(),
            workers_connected: false,
            workers_assigned: false,
            workers_ready: false,
        }
    }

    /// Adopt locally spawned worker processes for reaping at `stop`.
    pub fn with_children(mut self, children: Vec<Child>) -> Self {
        self.children = children;
        self
    }

    /// Connector-specific per-worker arguments, indexed by worker index.
    pub fn with_worker_args(mut self, worker_args: Vec<serde_json::Value>) -> Self {
        self.worker_args = worker_args;
        self
    }

    fn uuid(&self) -> String {
        self.messenger.uuid().to_string()
    }

    /// Drive registration, index assignment and initialization until every
    /// worker is ready. Safe to call again: completed phases are skipped.
    pub async fn prepare_worker_connections(&mut self) -> Result<(), OrchestratorError> {
        if !self.workers_connected {
            let rx = {
                let (tx, rx) = oneshot::channel();
                lock(&self.state).connected = Some(tx);
                rx
            };

            // Workers are not always spawned by this process, so poll with
            // register broadcasts until the expected count has answered.
            let messenger = Arc::clone(&self.messenger);
            let uuid = self.uuid();
            let interval = self.poll_interval;
            let poll = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let register = Message::broadcast(uuid.clone(), MessagePayload::Register);
                    if let Err(err) = messenger.send(register).await {
                        warn!(%err, "failed to broadcast register poll");
                    }
                }
            });

            info!("waiting for {} workers to connect", self.expected);
            let result = await_barrier(rx, "connect").await;
            poll.abort();
            result?;
            self.workers_connected = true;
            info!("{} workers connected, assigning indices", self.expected);
        }

        if !self.workers_assigned {
            let (rx, assignments) = {
                let mut state = lock(&self.state);
                let (tx, rx) = oneshot::channel();
                state.assigned = Some(tx);
                let assignments: Vec<(String, u64)> = state
                    .workers
                    .iter()
                    .map(|(id, record)| (id.clone(), record.worker_index))
                    .collect();
                (rx, assignments)
            };

            for (worker, worker_index) in assignments {
                let message = Message::unicast(
                    self.uuid(),
                    worker,
                    MessagePayload::AssignId {
                        worker_id: worker_index,
                    },
                );
                self.messenger.send(message).await?;
            }

            await_barrier(rx, "assign").await?;
            self.workers_assigned = true;
            info!("{} workers assigned, initializing", self.expected);
        }

        if !self.workers_ready {
            let rx = {
                let (tx, rx) = oneshot::channel();
                lock(&self.state).ready = Some(tx);
                rx
            };
            self.messenger
                .send(Message::broadcast(self.uuid(), MessagePayload::Initialize))
                .await?;

            await_barrier(rx, "initialize").await?;
            self.workers_ready = true;
            info!("{} workers ready", self.expected);
        }

        Ok(())
    }

    /// Collect per-worker one-shot barriers for a repeating phase and the
    /// worker shares needed to address them.
    fn install_round_barriers(
        &self,
        phase: MessageKind,
    ) -> (Vec<(String, u64)>, Vec<PhaseReceiver>) {
        let mut state = lock(&self.state);
        let mut targets = Vec::new();
        let mut receivers = Vec::new();
        for (id, record) in state.workers.iter_mut() {
            let (tx, rx) = oneshot::channel();
            match phase {
                MessageKind::Prepared => record.prepared = Some(tx),
                MessageKind::TestResult => record.test_result = Some(tx),
                _ => unreachable!("only round phases install per-worker barriers"),
            }
            targets.push((id.clone(), record.worker_index));
            receivers.push(rx);
        }
        (targets, receivers)
    }

    fn spec_for_worker(&self, spec: &TestSpec, worker_index: u64) -> TestSpec {
        let mut spec = spec.clone();
        spec.total_workers = self.expected as u64;
        let args = self
            .worker_args
            .get(worker_index as usize)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        spec.for_worker(worker_index, args)
    }

    /// Send the prepared round specification to every worker and wait for
    /// all `prepared` acknowledgements.
    pub async fn prepare_test_round(&mut self, spec: &TestSpec) -> Result<(), OrchestratorError> {
        self.require_ready()?;
        spec.validate()?;

        let (targets, receivers) = self.install_round_barriers(MessageKind::Prepared);
        for (worker, worker_index) in targets {
            let message = Message::unicast(
                self.uuid(),
                worker,
                MessagePayload::Prepare(self.spec_for_worker(spec, worker_index)),
            );
            self.messenger.send(message).await?;
        }

        futures::future::try_join_all(
            receivers.into_iter().map(|rx| await_barrier(rx, "prepare")),
        )
        .await?;
        info!(round = spec.round_index, "{} workers prepared", self.expected);
        Ok(())
    }

    /// Start the round on every worker, wait for all results, and merge
    /// them into one [`RoundResult`].
    pub async fn start_test_round(&mut self, spec: &TestSpec) -> Result<RoundResult, OrchestratorError> {
        self.require_ready()?;
        spec.validate()?;

        {
            let mut state = lock(&self.state);
            state.results.clear();
        }

        let (targets, receivers) = self.install_round_barriers(MessageKind::TestResult);
        for (worker, worker_index) in targets {
            let message = Message::unicast(
                self.uuid(),
                worker,
                MessagePayload::Test(self.spec_for_worker(spec, worker_index)),
            );
            self.messenger.send(message).await?;
        }

        futures::future::try_join_all(receivers.into_iter().map(|rx| await_barrier(rx, "test")))
            .await?;

        let results = {
            let mut state = lock(&self.state);
            std::mem::take(&mut state.results)
        };
        info!(
            round = spec.round_index,
            workers = results.len(),
            "round complete, merging results"
        );
        Ok(merge_worker_results(&results))
    }

    /// Mid-round statistics events received so far; draining resets the feed.
    pub fn drain_progress_updates(&self) -> Vec<ProgressUpdate> {
        std::mem::take(&mut lock(&self.state).updates)
    }

    /// Stop all workers and release the messenger.
    pub async fn stop(&mut self) -> Result<(), OrchestratorError> {
        info!("sending exit to connected workers");
        self.messenger
            .send(Message::broadcast(self.uuid(), MessagePayload::Exit))
            .await?;

        for child in &mut self.children {
            match tokio::time::timeout(EXIT_REAP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "worker process exited"),
                Ok(Err(err)) => warn!(%err, "error reaping worker process"),
                Err(_) => {
                    warn!("worker process ignored exit, killing");
                    if let Err(err) = child.start_kill() {
                        warn!(%err, "failed to kill worker process");
                    }
                }
            }
        }
        self.children.clear();

        self.messenger.dispose().await?;
        self.dispatch.abort();
        Ok(())
    }

    fn require_ready(&self) -> Result<(), OrchestratorError> {
        if !(self.workers_connected && self.workers_assigned && self.workers_ready) {
            return Err(OrchestratorError::InvalidState(
                "round requested before workers are ready".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_stats::TransactionStatisticsCollector;

    fn connected(sender: &str) -> Message {
        Message::unicast(sender, "mgr", MessagePayload::Connected)
    }

    fn state_with_connected(expected: usize, workers: &[&str]) -> Arc<StdMutex<SharedState>> {
        let state = Arc::new(StdMutex::new(SharedState::new(expected)));
        for worker in workers {
            process_message(&state, connected(worker));
        }
        state
    }

    #[tokio::test]
    async fn test_connected_barrier_requires_full_count() {
        let state = Arc::new(StdMutex::new(SharedState::new(2)));
        let (tx, mut rx) = oneshot::channel();
        lock(&state).connected = Some(tx);

        process_message(&state, connected("w-1"));
        assert!(rx.try_recv().is_err(), "barrier must not resolve early");

        // A duplicate does not count as a second worker.
        process_message(&state, connected("w-1"));
        assert!(rx.try_recv().is_err());

        process_message(&state, connected("w-2"));
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert_eq!(lock(&state).workers.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_error_rejects_run() {
        let state = Arc::new(StdMutex::new(SharedState::new(2)));
        let (tx, rx) = oneshot::channel();
        lock(&state).connected = Some(tx);

        process_message(
            &state,
            connected("w-1").with_error("no SUT connection"),
        );
        assert_eq!(rx.await.unwrap(), Err("no SUT connection".to_string()));
    }

    #[tokio::test]
    async fn test_unregistered_sender_discarded() {
        let state = state_with_connected(1, &["w-1"]);
        let (tx, mut rx) = oneshot::channel();
        lock(&state).assigned = Some(tx);

        // Unknown sender: logged and ignored, the barrier stays pending.
        process_message(&state, Message::unicast("ghost", "mgr", MessagePayload::Assigned));
        assert!(rx.try_recv().is_err());

        process_message(&state, Message::unicast("w-1", "mgr", MessagePayload::Assigned));
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_prepared_barrier_per_worker() {
        let state = state_with_connected(2, &["w-1", "w-2"]);
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        {
            let mut guard = lock(&state);
            guard.workers.get_mut("w-1").unwrap().prepared = Some(tx1);
            guard.workers.get_mut("w-2").unwrap().prepared = Some(tx2);
        }

        process_message(&state, Message::unicast("w-1", "mgr", MessagePayload::Prepared));
        assert_eq!(rx1.try_recv().unwrap(), Ok(()));
        assert!(rx2.try_recv().is_err());

        // Late duplicate is discarded without panicking.
        process_message(&state, Message::unicast("w-1", "mgr", MessagePayload::Prepared));

        process_message(
            &state,
            Message::unicast("w-2", "mgr", MessagePayload::Prepared).with_error("bad workload"),
        );
        assert_eq!(rx2.try_recv().unwrap(), Err("bad workload".to_string()));
    }

    #[tokio::test]
    async fn test_test_result_collects_snapshots() {
        let state = state_with_connected(1, &["w-1"]);
        let (tx, mut rx) = oneshot::channel();
        lock(&state).workers.get_mut("w-1").unwrap().test_result = Some(tx);

        let snapshot = TransactionStatisticsCollector::new(0, 0, "round").snapshot();
        process_message(
            &state,
            Message::unicast("w-1", "mgr", MessagePayload::TestResult(snapshot)),
        );
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert_eq!(lock(&state).results.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_error_fails_outstanding_barriers() {
        let state = state_with_connected(1, &["w-1"]);
        let (tx, rx) = oneshot::channel();
        lock(&state).workers.get_mut("w-1").unwrap().test_result = Some(tx);

        process_message(
            &state,
            Message::unicast("w-1", "mgr", MessagePayload::Error).with_error("worker crashed"),
        );
        assert_eq!(rx.await.unwrap(), Err("worker crashed".to_string()));
    }

    #[tokio::test]
    async fn test_progress_updates_feed() {
        let state = state_with_connected(1, &["w-1"]);
        let snapshot = TransactionStatisticsCollector::new(0, 0, "round").snapshot();
        process_message(
            &state,
            Message::unicast("w-1", "mgr", MessagePayload::TxUpdate(snapshot)),
        );
        process_message(&state, Message::unicast("w-1", "mgr", MessagePayload::TxReset));

        let updates = std::mem::take(&mut lock(&state).updates);
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[0], ProgressUpdate::Stats { .. }));
        assert!(matches!(updates[1], ProgressUpdate::Reset { .. }));
    }
}
