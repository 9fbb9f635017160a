//! MQTT pub/sub messenger binding
//!
//! Two well-known topics carry all traffic: one aimed at the workers, one
//! aimed at the manager. Every participant subscribes to the topic aimed at
//! it and filters client-side by the embedded recipient list, since multiple
//! recipients are multiplexed on one topic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::MessagingError;
use crate::message::Message;
use crate::messenger::{InboundSender, Messenger};

/// Topic for manager-to-worker traffic.
pub const MANAGER_TO_WORKERS_TOPIC: &str = "drover/manager-to-workers";
/// Topic for worker-to-manager traffic.
pub const WORKERS_TO_MANAGER_TOPIC: &str = "drover/workers-to-manager";

const EVENT_CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

type SharedConsumer = Arc<StdMutex<Option<InboundSender>>>;

/// MQTT-based messenger for either side of the protocol.
pub struct MqttMessenger {
    address: String,
    source_topic: &'static str,
    target_topic: &'static str,
    uuid: String,
    client: Option<AsyncClient>,
    event_task: StdMutex<Option<JoinHandle<()>>>,
    consumer: SharedConsumer,
    disposed: AtomicBool,
}

impl MqttMessenger {
    /// Messenger for the manager process: listens on the worker-to-manager
    /// topic, publishes toward the workers.
    pub fn for_manager(address: impl Into<String>) -> Self {
        Self::new(address, WORKERS_TO_MANAGER_TOPIC, MANAGER_TO_WORKERS_TOPIC)
    }

    /// Messenger for a worker process: listens on the manager-to-workers
    /// topic, publishes toward the manager.
    pub fn for_worker(address: impl Into<String>) -> Self {
        Self::new(address, MANAGER_TO_WORKERS_TOPIC, WORKERS_TO_MANAGER_TOPIC)
    }

    fn new(
        address: impl Into<String>,
        source_topic: &'static str,
        target_topic: &'static str,
    ) -> Self {
        Self {
            address: address.into(),
            source_topic,
            target_topic,
            uuid: format!("drover-{}", Uuid::new_v4()),
            client: None,
            event_task: StdMutex::new(None),
            consumer: Arc::new(StdMutex::new(None)),
            disposed: AtomicBool::new(false),
        }
    }

    /// The topic this messenger subscribes to.
    pub fn source_topic(&self) -> &str {
        self.source_topic
    }

    /// The topic this messenger publishes to.
    pub fn target_topic(&self) -> &str {
        self.target_topic
    }
}

/// Split a broker address of the form `mqtt://host:port`, `host:port` or
/// `host` into its parts. The default MQTT port is 1883.
fn parse_broker_address(address: &str) -> Result<(String, u16), MessagingError> {
    let stripped = address
        .strip_prefix("mqtt://")
        .or_else(|| address.strip_prefix("tcp://"))
        .unwrap_or(address);

    if stripped.is_empty() {
        return Err(MessagingError::ConnectFailed(format!(
            "empty broker address: \"{address}\""
        )));
    }

    match stripped.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                MessagingError::ConnectFailed(format!("invalid broker port in \"{address}\""))
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((stripped.to_string(), 1883)),
    }
}

fn run_event_loop(
    mut event_loop: rumqttc::EventLoop,
    uuid: String,
    source_topic: &'static str,
    consumer: SharedConsumer,
    handshake: oneshot::Sender<Result<(), MessagingError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut handshake = Some(handshake);
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    debug!(uuid, "connected to MQTT broker");
                    if let Some(tx) = handshake.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic != source_topic {
                        warn!(topic = %publish.topic, "message from unexpected MQTT topic");
                        continue;
                    }
                    let raw = String::from_utf8_lossy(&publish.payload);
                    match Message::parse(&raw) {
                        Ok(message) if message.for_recipient(&uuid) => {
                            let guard = consumer
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner);
                            match guard.as_ref() {
                                Some(sender) => {
                                    if sender.send(message).is_err() {
                                        debug!(uuid, "inbound consumer dropped");
                                        break;
                                    }
                                }
                                None => debug!(uuid, "dropping message, no consumer configured"),
                            }
                        }
                        Ok(_) => debug!(uuid, "ignored message for other recipients"),
                        Err(err) => warn!(%err, "discarding undecodable MQTT payload"),
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!(uuid, "MQTT disconnect requested");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    match handshake.take() {
                        // Errors before the handshake completes are fatal to
                        // this process's participation.
                        Some(tx) => {
                            error!(%err, "MQTT connect failed");
                            let _ = tx.send(Err(MessagingError::ConnectFailed(err.to_string())));
                            break;
                        }
                        // Mid-session errors are logged; polling reconnects.
                        None => {
                            warn!(%err, "MQTT session error, retrying");
                            tokio::time::sleep(ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    })
}

#[async_trait]
impl Messenger for MqttMessenger {
    async fn initialize(&mut self) -> Result<(), MessagingError> {
        let (host, port) = parse_broker_address(&self.address)?;
        let mut options = MqttOptions::new(self.uuid.clone(), host, port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, event_loop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);
        let (handshake_tx, handshake_rx) = oneshot::channel();

        let task = run_event_loop(
            event_loop,
            self.uuid.clone(),
            self.source_topic,
            Arc::clone(&self.consumer),
            handshake_tx,
        );
        *self
            .event_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(task);

        handshake_rx
            .await
            .map_err(|_| MessagingError::ConnectFailed("MQTT event loop ended early".into()))??;

        client
            .subscribe(self.source_topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MessagingError::ConnectFailed(e.to_string()))?;

        self.client = Some(client);
        Ok(())
    }

    fn configure(&mut self, consumer: InboundSender) -> Result<(), MessagingError> {
        *self
            .consumer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(consumer);
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<(), MessagingError> {
        let client = self.client.as_ref().ok_or(MessagingError::NotConfigured)?;
        let payload = message.stringify()?;
        client
            .publish(self.target_topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MessagingError::Io(e.to_string()))
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    async fn dispose(&self) -> Result<(), MessagingError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(client) = &self.client {
            // The event task exits on the outgoing disconnect.
            if let Err(err) = client.disconnect().await {
                debug!(%err, "MQTT disconnect while disposing");
            }
        }
        if let Some(task) = self
            .event_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_address() {
        assert_eq!(
            parse_broker_address("mqtt://broker:1884").unwrap(),
            ("broker".into(), 1884)
        );
        assert_eq!(
            parse_broker_address("localhost:1883").unwrap(),
            ("localhost".into(), 1883)
        );
        assert_eq!(
            parse_broker_address("localhost").unwrap(),
            ("localhost".into(), 1883)
        );
        assert!(parse_broker_address("mqtt://host:notaport").is_err());
        assert!(parse_broker_address("").is_err());
    }

    #[test]
    fn test_topic_orientation() {
        let manager = MqttMessenger::for_manager("localhost");
        assert_eq!(manager.source_topic(), WORKERS_TO_MANAGER_TOPIC);
        assert_eq!(manager.target_topic(), MANAGER_TO_WORKERS_TOPIC);

        let worker = MqttMessenger::for_worker("localhost");
        assert_eq!(worker.source_topic(), MANAGER_TO_WORKERS_TOPIC);
        assert_eq!(worker.target_topic(), WORKERS_TO_MANAGER_TOPIC);
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = MqttMessenger::for_worker("localhost");
        let b = MqttMessenger::for_worker("localhost");
        assert_ne!(a.uuid(), b.uuid());
        assert!(a.uuid().starts_with("drover-"));
    }
}
