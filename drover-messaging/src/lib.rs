//! Message model and transports for drover
//!
//! This crate defines the addressed message envelope exchanged between the
//! manager and its workers, the typed payloads for every lifecycle phase,
//! and the [`Messenger`] abstraction with its two bindings: newline-delimited
//! JSON over process stdio pipes, and MQTT pub/sub topics.

pub mod error;
pub mod message;
pub mod messenger;
pub mod mqtt;
pub mod process;
pub mod spec;

// Re-export commonly used types
pub use error::MessagingError;
pub use message::{Message, MessageKind, MessagePayload, Recipients};
pub use messenger::{InboundReceiver, InboundSender, Messenger};
pub use mqtt::{MqttMessenger, MANAGER_TO_WORKERS_TOPIC, WORKERS_TO_MANAGER_TOPIC};
pub use process::{ProcessManagerMessenger, ProcessWorkerMessenger, WorkerChannel};
pub use spec::{worker_share, RateControlSpec, RoundTarget, TestSpec, WorkloadSpec};
