//! Worker-side message dispatch
//!
//! Consumes inbound manager messages and drives the worker lifecycle:
//! `register` -> `connected`, `assignId` -> `assigned`, `initialize` ->
//! `ready`, `prepare` -> `prepared`, `test` -> `testResult`, `exit` ->
//! shutdown. Every handler failure is converted into an error-bearing
//! protocol reply; nothing here crashes the worker process.

use std::sync::Arc;

use tracing::{debug, error, info};

use drover_config::ObserverConfig;
use drover_messaging::{
    InboundReceiver, Message, MessagePayload, Messenger, TestSpec,
};
use drover_rate::RateControllerRegistry;
use drover_stats::{locked, StatsSnapshot, TransactionStatisticsCollector};

use crate::error::WorkerError;
use crate::observer::{InternalTxObserver, TxObserver, TxObserverDispatch};
use crate::runner::run_round;
use crate::workload::{WorkerHooks, WorkloadContext, WorkloadModule};

enum Flow {
    Continue,
    Exit,
}

/// Dispatches inbound manager messages to the worker lifecycle hooks.
pub struct MessageHandler<H: WorkerHooks> {
    messenger: Arc<dyn Messenger>,
    hooks: H,
    registry: Arc<RateControllerRegistry>,
    observer_config: ObserverConfig,
    extra_observers: Vec<Arc<dyn TxObserver>>,
    manager_uuid: Option<String>,
    worker_index: Option<u64>,
    registered: bool,
    dispatch: Option<TxObserverDispatch>,
    workload: Option<Box<dyn WorkloadModule>>,
}

impl<H: WorkerHooks> MessageHandler<H> {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        hooks: H,
        registry: Arc<RateControllerRegistry>,
        observer_config: ObserverConfig,
    ) -> Self {
        Self {
            messenger,
            hooks,
            registry,
            observer_config,
            extra_observers: Vec::new(),
            manager_uuid: None,
            worker_index: None,
            registered: false,
            dispatch: None,
            workload: None,
        }
    }

    /// Attach an additional TX observer (e.g. the logging observer).
    pub fn with_observer(mut self, observer: Arc<dyn TxObserver>) -> Self {
        self.extra_observers.push(observer);
        self
    }

    pub fn worker_index(&self) -> Option<u64> {
        self.worker_index
    }

    /// Drain the inbound channel until the manager sends `exit` or the
    /// channel closes.
    pub async fn run(mut self, mut inbound: InboundReceiver) -> Result<(), WorkerError> {
        while let Some(message) = inbound.recv().await {
            match self.handle(message).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(err) => {
                    // Report instead of crashing; the manager decides what
                    // is fatal for the run.
                    error!(%err, "error while handling manager message");
                    self.send_error_report(err.to_string()).await;
                }
            }
        }
        Ok(())
    }

    async fn handle(&mut self, message: Message) -> Result<Flow, WorkerError> {
        let sender = message.sender.clone();
        debug!(kind = %message.kind(), %sender, "handling manager message");

        match message.payload {
            MessagePayload::Register => {
                self.manager_uuid.get_or_insert(sender.clone());
                // The manager polls; answer the first register only.
                if !self.registered {
                    self.reply(&sender, MessagePayload::Connected, None).await?;
                    self.registered = true;
                }
            }
            MessagePayload::AssignId { worker_id } => {
                self.manager_uuid.get_or_insert(sender.clone());
                self.worker_index = Some(worker_id);
                info!(worker = worker_id, "assigned worker index");
                self.reply(&sender, MessagePayload::Assigned, None).await?;
            }
            MessagePayload::Initialize => {
                self.manager_uuid.get_or_insert(sender.clone());
                let result = self.run_init().await;
                self.reply(&sender, MessagePayload::Ready, result.err().map(|e| e.to_string()))
                    .await?;
            }
            MessagePayload::Prepare(spec) => {
                self.manager_uuid.get_or_insert(sender.clone());
                let result = self.run_prepare(&spec).await;
                self.reply(&sender, MessagePayload::Prepared, result.err().map(|e| e.to_string()))
                    .await?;
            }
            MessagePayload::Test(spec) => {
                self.manager_uuid.get_or_insert(sender.clone());
                match self.run_test(&spec).await {
                    Ok(snapshot) => {
                        self.reply(&sender, MessagePayload::TestResult(snapshot), None)
                            .await?;
                    }
                    Err(err) => {
                        error!(%err, round = spec.round_index, "round execution failed");
                        let empty = self.empty_snapshot(&spec);
                        self.reply(
                            &sender,
                            MessagePayload::TestResult(empty),
                            Some(err.to_string()),
                        )
                        .await?;
                    }
                }
            }
            MessagePayload::Exit => {
                info!("received exit, shutting down worker");
                // Best-effort acknowledgement; the manager may already be
                // tearing the transport down.
                if let Err(err) = self.reply(&sender, MessagePayload::Exit, None).await {
                    debug!(%err, "could not acknowledge exit");
                }
                self.messenger.dispose().await?;
                return Ok(Flow::Exit);
            }
            other => {
                // A worker never receives worker-to-manager traffic; report
                // and carry on.
                let text = format!("unexpected message type \"{}\"", other.kind());
                self.send_error_report(text).await;
            }
        }
        Ok(Flow::Continue)
    }

    async fn run_init(&mut self) -> Result<(), WorkerError> {
        self.hooks.before_init().await?;
        self.hooks.init(self.worker_index).await?;
        self.hooks.after_init().await?;
        info!(worker = ?self.worker_index, "worker initialized");
        Ok(())
    }

    async fn run_prepare(&mut self, spec: &TestSpec) -> Result<(), WorkerError> {
        spec.validate()?;
        let worker_index = self
            .worker_index
            .ok_or_else(|| WorkerError::lifecycle("prepare received before index assignment"))?;

        let mut workload = self.hooks.create_workload(&spec.workload)?;
        workload
            .initialize(WorkloadContext {
                worker_index,
                total_workers: spec.total_workers,
                round_index: spec.round_index,
                arguments: spec.workload.arguments.clone(),
                worker_args: spec.worker_args.clone(),
            })
            .await?;
        self.workload = Some(workload);

        info!(worker = worker_index, round = spec.round_index, "round prepared");
        Ok(())
    }

    async fn run_test(&mut self, spec: &TestSpec) -> Result<StatsSnapshot, WorkerError> {
        spec.validate()?;
        let worker_index = self
            .worker_index
            .ok_or_else(|| WorkerError::lifecycle("test received before index assignment"))?;
        let workload = self
            .workload
            .take()
            .ok_or_else(|| WorkerError::lifecycle("test received before prepare"))?;
        let workload: Arc<dyn WorkloadModule> = Arc::from(workload);

        self.hooks.before_test(spec).await?;

        let dispatch = self.ensure_dispatch(worker_index);
        dispatch.activate(spec.round_index, &spec.label).await?;
        let stats = dispatch.current_stats()?;

        // Teardown always runs once the observers are active; the first
        // error wins, later ones are usually fallout.
        let run_result = self
            .execute_active_round(spec, worker_index, Arc::clone(&workload))
            .await;
        let deactivate_result = match self.dispatch.as_mut() {
            Some(dispatch) => dispatch.deactivate().await,
            None => Ok(()),
        };
        let cleanup_result = workload.cleanup().await;

        run_result?;
        deactivate_result?;
        cleanup_result?;
        self.hooks.after_test(spec).await?;

        info!(worker = worker_index, round = spec.round_index, "round complete");
        let snapshot = locked(&stats).snapshot();
        Ok(snapshot)
    }

    async fn execute_active_round(
        &mut self,
        spec: &TestSpec,
        worker_index: u64,
        workload: Arc<dyn WorkloadModule>,
    ) -> Result<(), WorkerError> {
        let dispatch = self
            .dispatch
            .as_mut()
            .ok_or_else(|| WorkerError::lifecycle("observer dispatch not active"))?;
        let stats = dispatch.current_stats()?;
        let reporter = dispatch.reporter()?;

        let mut rate = self.registry.create(spec, stats.clone(), worker_index)?;
        info!(worker = worker_index, round = spec.round_index, "starting workload loop");

        let run_result = run_round(workload, rate.as_mut(), reporter, stats, spec.target()?).await;
        let end_result = rate.end().await;
        run_result?;
        end_result?;
        Ok(())
    }

    fn ensure_dispatch(&mut self, worker_index: u64) -> &mut TxObserverDispatch {
        if self.dispatch.is_none() {
            let manager_uuid = self
                .manager_uuid
                .clone()
                .unwrap_or_else(|| "orchestrator".to_string());
            let internal = InternalTxObserver::new(
                Arc::clone(&self.messenger),
                manager_uuid,
                worker_index,
                self.observer_config.update_interval,
            );
            let observers = std::mem::take(&mut self.extra_observers);
            self.dispatch = Some(TxObserverDispatch::new(internal, observers));
        }
        self.dispatch
            .as_mut()
            .expect("dispatch was just initialized")
    }

    fn empty_snapshot(&self, spec: &TestSpec) -> StatsSnapshot {
        TransactionStatisticsCollector::new(
            self.worker_index.map(|i| i as i64).unwrap_or(-1),
            spec.round_index as i64,
            spec.label.clone(),
        )
        .snapshot()
    }

    async fn reply(
        &self,
        to: &str,
        payload: MessagePayload,
        error: Option<String>,
    ) -> Result<(), WorkerError> {
        let mut message = Message::unicast(self.messenger.uuid(), to, payload);
        if let Some(error) = error {
            message = message.with_error(error);
        }
        self.messenger.send(message).await?;
        Ok(())
    }

    /// Best-effort error report outside a phase reply.
    async fn send_error_report(&self, text: String) {
        let Some(manager) = &self.manager_uuid else {
            return;
        };
        let message = Message::unicast(self.messenger.uuid(), manager, MessagePayload::Error)
            .with_error(text);
        if let Err(err) = self.messenger.send(message).await {
            error!(%err, "failed to report error to manager");
        }
    }
}
