//! Process-IPC messenger binding
//!
//! Manager and workers exchange newline-delimited JSON over the workers'
//! stdio pipes: the manager writes every outbound message to each child's
//! stdin and the receiving side filters by its own identity. The worker's
//! stdout is reserved for the protocol; worker logging goes to stderr.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::MessagingError;
use crate::message::Message;
use crate::messenger::{InboundSender, Messenger};

/// The stdio pipe pair of one spawned worker process.
pub struct WorkerChannel {
    stdin: Arc<Mutex<ChildStdin>>,
    stdout: Option<ChildStdout>,
}

impl WorkerChannel {
    /// Take the pipes from a freshly spawned child. Fails if the child was
    /// not spawned with piped stdio.
    pub fn from_child(child: &mut Child) -> Result<Self, MessagingError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MessagingError::Io("worker child has no piped stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MessagingError::Io("worker child has no piped stdout".into()))?;
        Ok(Self {
            stdin: Arc::new(Mutex::new(stdin)),
            stdout: Some(stdout),
        })
    }
}

/// Parse one wire line and forward it when addressed to `uuid`.
/// Malformed or unknown-typed lines are logged and dropped; they are
/// protocol errors, not session killers.
fn forward_if_addressed(line: &str, uuid: &str, consumer: &InboundSender) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }
    match Message::parse(trimmed) {
        Ok(message) => {
            if message.for_recipient(uuid) {
                if consumer.send(message).is_err() {
                    debug!("inbound consumer dropped, stopping reader");
                    return false;
                }
            } else {
                debug!(uuid, "ignored message for other recipients");
            }
            true
        }
        Err(err) => {
            warn!(%err, "discarding undecodable inbound line");
            true
        }
    }
}

fn spawn_reader<R>(source: R, uuid: String, consumer: InboundSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(source).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !forward_if_addressed(&line, &uuid, &consumer) {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(uuid, "inbound pipe closed");
                    break;
                }
                Err(err) => {
                    warn!(%err, "error reading inbound pipe");
                    break;
                }
            }
        }
    })
}

/// Manager-side process messenger: fans out over the spawned children's
/// stdin pipes and merges their stdout pipes into the consumer channel.
pub struct ProcessManagerMessenger {
    uuid: String,
    channels: Vec<WorkerChannel>,
    readers: StdMutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl ProcessManagerMessenger {
    pub fn new(channels: Vec<WorkerChannel>) -> Self {
        Self {
            uuid: std::process::id().to_string(),
            channels,
            readers: StdMutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Messenger for ProcessManagerMessenger {
    async fn initialize(&mut self) -> Result<(), MessagingError> {
        // The pipes already exist once the children are spawned.
        Ok(())
    }

    fn configure(&mut self, consumer: InboundSender) -> Result<(), MessagingError> {
        let mut readers = Vec::new();
        for channel in &mut self.channels {
            if let Some(stdout) = channel.stdout.take() {
                readers.push(spawn_reader(stdout, self.uuid.clone(), consumer.clone()));
            }
        }
        *self
            .readers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = readers;
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<(), MessagingError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(MessagingError::ConnectionClosed);
        }
        let mut line = message.stringify()?;
        line.push('\n');

        // Every child receives the line; workers filter by recipient.
        for channel in &self.channels {
            let mut stdin = channel.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
        }
        Ok(())
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    async fn dispose(&self) -> Result<(), MessagingError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let readers = std::mem::take(
            &mut *self
                .readers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for reader in readers {
            reader.abort();
        }
        Ok(())
    }
}

/// Worker-side process messenger over the process's own stdio.
pub struct ProcessWorkerMessenger {
    uuid: String,
    stdout: Arc<Mutex<tokio::io::Stdout>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl ProcessWorkerMessenger {
    pub fn new() -> Self {
        Self {
            uuid: std::process::id().to_string(),
            stdout: Arc::new(Mutex::new(tokio::io::stdout())),
            reader: StdMutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }
}

impl Default for ProcessWorkerMessenger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Messenger for ProcessWorkerMessenger {
    async fn initialize(&mut self) -> Result<(), MessagingError> {
        Ok(())
    }

    fn configure(&mut self, consumer: InboundSender) -> Result<(), MessagingError> {
        let reader = spawn_reader(tokio::io::stdin(), self.uuid.clone(), consumer);
        *self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(reader);
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<(), MessagingError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(MessagingError::ConnectionClosed);
        }
        let mut line = message.stringify()?;
        line.push('\n');

        let mut stdout = self.stdout.lock().await;
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    async fn dispose(&self) -> Result<(), MessagingError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessagePayload;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_forward_filters_by_recipient() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let for_me = Message::unicast("mgr", "42", MessagePayload::Initialize)
            .stringify()
            .unwrap();
        let for_other = Message::unicast("mgr", "43", MessagePayload::Initialize)
            .stringify()
            .unwrap();

        assert!(forward_if_addressed(&for_me, "42", &tx));
        assert!(forward_if_addressed(&for_other, "42", &tx));

        let received = rx.try_recv().unwrap();
        assert!(received.for_recipient("42"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_survives_garbage() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(forward_if_addressed("not json at all", "42", &tx));
        assert!(forward_if_addressed("", "42", &tx));
        assert!(forward_if_addressed(
            r#"{"sender":"x","recipients":["all"],"type":"bogus","date":"2024-01-01T00:00:00Z"}"#,
            "42",
            &tx
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reader_stops_when_consumer_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let broadcast = Message::broadcast("mgr", MessagePayload::Register)
            .stringify()
            .unwrap();
        assert!(!forward_if_addressed(&broadcast, "42", &tx));
    }

    #[tokio::test]
    async fn test_spawned_reader_forwards_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = Message::broadcast("mgr", MessagePayload::Register)
            .stringify()
            .unwrap();
        let second = Message::unicast("mgr", "7", MessagePayload::Initialize)
            .stringify()
            .unwrap();
        let data = format!("{first}\n{second}\nnoise\n");

        let reader = spawn_reader(std::io::Cursor::new(data.into_bytes()), "7".into(), tx);
        reader.await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind(), crate::MessageKind::Register);
        assert_eq!(
            rx.recv().await.unwrap().kind(),
            crate::MessageKind::Initialize
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let messenger = ProcessWorkerMessenger::new();
        messenger.dispose().await.unwrap();
        messenger.dispose().await.unwrap();
        let result = messenger
            .send(Message::broadcast("w", MessagePayload::Connected))
            .await;
        assert!(matches!(result, Err(MessagingError::ConnectionClosed)));
    }
}
