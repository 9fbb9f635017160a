//! Transport-agnostic messenger contract

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MessagingError;
use crate::message::Message;

/// Sender half of the inbound consumer channel a messenger is configured with.
pub type InboundSender = mpsc::UnboundedSender<Message>;
/// Receiver half drained by the single dispatch task of the owning process.
pub type InboundReceiver = mpsc::UnboundedReceiver<Message>;

/// A bidirectional, point-to-multipoint addressed channel.
///
/// Implementations deliver to the consumer only messages for which
/// `message.for_recipient(self.uuid())` holds; the transport performs the
/// filtering, since several recipients may be multiplexed on one medium.
///
/// Call order: `configure` first, then `initialize`, then `send`/receive,
/// then `dispose`. `dispose` must be safe to call more than once.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Establish the transport. A connection failure is reported here as
    /// [`MessagingError::ConnectFailed`]; it must never surface as a panic
    /// on a background task.
    async fn initialize(&mut self) -> Result<(), MessagingError>;

    /// Wire inbound traffic to the consumer channel.
    fn configure(&mut self, consumer: InboundSender) -> Result<(), MessagingError>;

    /// Serialize and deliver a message.
    async fn send(&self, message: Message) -> Result<(), MessagingError>;

    /// Stable transport identity of this process, used as the sender address
    /// and matched against recipient lists.
    fn uuid(&self) -> &str;

    /// Orderly shutdown. Takes `&self` so a shared messenger can be disposed
    /// through its handle; repeat calls are no-ops.
    async fn dispose(&self) -> Result<(), MessagingError>;
}
