//! Shared test support: an in-process loopback transport and mock workloads
//!
//! The loopback bus models the two-topic topology of the real transports:
//! manager-side endpoints deliver to worker-side endpoints and vice versa,
//! with client-side recipient filtering, so the full lifecycle can run
//! inside one test process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use drover_messaging::{InboundSender, Message, MessagingError, Messenger};
use drover_stats::TxStatus;
use drover_worker::{WorkerError, WorkerHooks, WorkloadContext, WorkloadModule};

/// Which topic an endpoint listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Manager,
    Worker,
}

struct Endpoint {
    uuid: String,
    role: Role,
    consumer: Option<InboundSender>,
}

#[derive(Default)]
struct BusInner {
    endpoints: Vec<Endpoint>,
}

/// An in-process message bus connecting one manager with its workers.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    inner: Arc<Mutex<BusInner>>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint on the bus with the given identity and role.
    pub fn endpoint(&self, uuid: impl Into<String>, role: Role) -> LoopbackMessenger {
        let uuid = uuid.into();
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .endpoints
            .push(Endpoint {
                uuid: uuid.clone(),
                role,
                consumer: None,
            });
        LoopbackMessenger {
            uuid,
            role,
            bus: self.inner.clone(),
            disposed: AtomicBool::new(false),
        }
    }
}

/// Loopback implementation of the messenger contract.
pub struct LoopbackMessenger {
    uuid: String,
    role: Role,
    bus: Arc<Mutex<BusInner>>,
    disposed: AtomicBool,
}

#[async_trait]
impl Messenger for LoopbackMessenger {
    async fn initialize(&mut self) -> Result<(), MessagingError> {
        Ok(())
    }

    fn configure(&mut self, consumer: InboundSender) -> Result<(), MessagingError> {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        let endpoint = bus
            .endpoints
            .iter_mut()
            .find(|e| e.uuid == self.uuid)
            .ok_or_else(|| MessagingError::Io("endpoint vanished from bus".into()))?;
        endpoint.consumer = Some(consumer);
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<(), MessagingError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(MessagingError::ConnectionClosed);
        }
        // Serialize through the real wire format so the loopback exercises
        // the same envelope as the production transports.
        let wire = message.stringify()?;
        let bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        for endpoint in &bus.endpoints {
            if endpoint.role == self.role {
                continue;
            }
            let parsed = Message::parse(&wire)?;
            if !parsed.for_recipient(&endpoint.uuid) {
                continue;
            }
            if let Some(consumer) = &endpoint.consumer {
                let _ = consumer.send(parsed);
            }
        }
        Ok(())
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    async fn dispose(&self) -> Result<(), MessagingError> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Workload that completes every transaction locally and counts them.
pub struct CountingWorkload {
    submitted: Arc<AtomicU64>,
}

#[async_trait]
impl WorkloadModule for CountingWorkload {
    async fn initialize(&mut self, _context: WorkloadContext) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn submit_transaction(&self) -> Result<TxStatus, WorkerError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let mut status = TxStatus::new(None);
        status.finish(true);
        Ok(status)
    }

    async fn cleanup(&self) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Hooks whose workload counts submissions into a shared counter.
pub struct CountingHooks {
    pub submitted: Arc<AtomicU64>,
    pub fail_init: bool,
}

impl CountingHooks {
    pub fn new() -> (Self, Arc<AtomicU64>) {
        let submitted = Arc::new(AtomicU64::new(0));
        (
            Self {
                submitted: submitted.clone(),
                fail_init: false,
            },
            submitted,
        )
    }
}

#[async_trait]
impl WorkerHooks for CountingHooks {
    async fn init(&mut self, _worker_index: Option<u64>) -> Result<(), WorkerError> {
        if self.fail_init {
            return Err(WorkerError::workload("SUT connection refused"));
        }
        Ok(())
    }

    fn create_workload(
        &mut self,
        _spec: &drover_messaging::WorkloadSpec,
    ) -> Result<Box<dyn WorkloadModule>, WorkerError> {
        Ok(Box::new(CountingWorkload {
            submitted: self.submitted.clone(),
        }))
    }
}
