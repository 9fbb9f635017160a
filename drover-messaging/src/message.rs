//! The addressed message envelope and its typed payloads
//!
//! Wire shape (JSON, one object per message):
//! `{"sender": "...", "recipients": ["..."], "type": "...", "content": {...},
//!   "date": "<RFC 3339>", "error": "..."}`.
//! A recipients list of exactly `["all"]` denotes a broadcast.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use drover_stats::StatsSnapshot;

use crate::error::MessagingError;
use crate::spec::TestSpec;

/// The wire marker for broadcast addressing.
pub const BROADCAST_TARGET: &str = "all";

/// Message addressing: either every participant, or an explicit id list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// Deliver to every participant on the channel.
    Broadcast,
    /// Deliver to the listed transport identities only.
    Ids(Vec<String>),
}

impl Recipients {
    /// Address a single participant.
    pub fn unicast(id: impl Into<String>) -> Self {
        Recipients::Ids(vec![id.into()])
    }

    /// True iff a message with this addressing is intended for `id`.
    pub fn contains(&self, id: &str) -> bool {
        match self {
            Recipients::Broadcast => true,
            Recipients::Ids(ids) => ids.iter().any(|r| r == id),
        }
    }
}

impl Serialize for Recipients {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Recipients::Broadcast => vec![BROADCAST_TARGET.to_string()].serialize(serializer),
            Recipients::Ids(ids) => ids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Recipients {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ids = Vec::<String>::deserialize(deserializer)?;
        if ids.is_empty() {
            return Err(D::Error::custom("recipients list must not be empty"));
        }
        if ids.iter().any(|id| id == BROADCAST_TARGET) {
            Ok(Recipients::Broadcast)
        } else {
            Ok(Recipients::Ids(ids))
        }
    }
}

/// Typed message payloads, adjacently tagged so the wire carries the
/// documented `type`/`content` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "content")]
pub enum MessagePayload {
    /// Manager polls for workers to announce themselves.
    #[serde(rename = "register")]
    Register,
    /// Worker announces itself to the manager.
    #[serde(rename = "connected")]
    Connected,
    /// Manager hands a worker its stable 0-based index.
    #[serde(rename = "assignId")]
    AssignId {
        #[serde(rename = "workerId")]
        worker_id: u64,
    },
    /// Worker acknowledges its index.
    #[serde(rename = "assigned")]
    Assigned,
    /// Manager asks workers to build their SUT context.
    #[serde(rename = "initialize")]
    Initialize,
    /// Worker finished initialization.
    #[serde(rename = "ready")]
    Ready,
    /// Manager ships the per-worker round specification.
    #[serde(rename = "prepare")]
    Prepare(TestSpec),
    /// Worker finished round preparation.
    #[serde(rename = "prepared")]
    Prepared,
    /// Manager starts the round.
    #[serde(rename = "test")]
    Test(TestSpec),
    /// Worker's periodic statistics snapshot.
    #[serde(rename = "txUpdate")]
    TxUpdate(StatsSnapshot),
    /// Worker signals the end of a round's statistics stream.
    #[serde(rename = "txReset")]
    TxReset,
    /// Worker's final statistics for the round.
    #[serde(rename = "testResult")]
    TestResult(StatsSnapshot),
    /// Manager tells workers to shut down.
    #[serde(rename = "exit")]
    Exit,
    /// Worker-side failure outside a specific phase reply.
    #[serde(rename = "error")]
    Error,
}

/// Discriminant of a payload, for dispatch and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Register,
    Connected,
    AssignId,
    Assigned,
    Initialize,
    Ready,
    Prepare,
    Prepared,
    Test,
    TxUpdate,
    TxReset,
    TestResult,
    Exit,
    Error,
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::Register => MessageKind::Register,
            MessagePayload::Connected => MessageKind::Connected,
            MessagePayload::AssignId { .. } => MessageKind::AssignId,
            MessagePayload::Assigned => MessageKind::Assigned,
            MessagePayload::Initialize => MessageKind::Initialize,
            MessagePayload::Ready => MessageKind::Ready,
            MessagePayload::Prepare(_) => MessageKind::Prepare,
            MessagePayload::Prepared => MessageKind::Prepared,
            MessagePayload::Test(_) => MessageKind::Test,
            MessagePayload::TxUpdate(_) => MessageKind::TxUpdate,
            MessagePayload::TxReset => MessageKind::TxReset,
            MessagePayload::TestResult(_) => MessageKind::TestResult,
            MessagePayload::Exit => MessageKind::Exit,
            MessagePayload::Error => MessageKind::Error,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Register => "register",
            MessageKind::Connected => "connected",
            MessageKind::AssignId => "assignId",
            MessageKind::Assigned => "assigned",
            MessageKind::Initialize => "initialize",
            MessageKind::Ready => "ready",
            MessageKind::Prepare => "prepare",
            MessageKind::Prepared => "prepared",
            MessageKind::Test => "test",
            MessageKind::TxUpdate => "txUpdate",
            MessageKind::TxReset => "txReset",
            MessageKind::TestResult => "testResult",
            MessageKind::Exit => "exit",
            MessageKind::Error => "error",
        };
        f.write_str(name)
    }
}

const KNOWN_TYPES: &[&str] = &[
    "register",
    "connected",
    "assignId",
    "assigned",
    "initialize",
    "ready",
    "prepare",
    "prepared",
    "test",
    "txUpdate",
    "txReset",
    "testResult",
    "exit",
    "error",
];

/// An immutable, addressed message. Constructed at send time, serialized to
/// one JSON line, and discarded after dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub sender: String,
    pub recipients: Recipients,
    #[serde(flatten)]
    pub payload: MessagePayload,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    pub fn new(sender: impl Into<String>, recipients: Recipients, payload: MessagePayload) -> Self {
        Self {
            sender: sender.into(),
            recipients,
            payload,
            date: Utc::now(),
            error: None,
        }
    }

    /// A message addressed to every participant.
    pub fn broadcast(sender: impl Into<String>, payload: MessagePayload) -> Self {
        Self::new(sender, Recipients::Broadcast, payload)
    }

    /// A message addressed to a single participant.
    pub fn unicast(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: MessagePayload,
    ) -> Self {
        Self::new(sender, Recipients::unicast(recipient), payload)
    }

    /// Attach an error to the message, marking the phase it answers as failed.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// True iff the message is intended for the given transport identity.
    pub fn for_recipient(&self, id: &str) -> bool {
        self.recipients.contains(id)
    }

    /// Serialize to the one-line JSON wire form.
    pub fn stringify(&self) -> Result<String, MessagingError> {
        serde_json::to_string(self).map_err(MessagingError::from)
    }

    /// Parse a wire message, distinguishing an unknown `type` (a protocol
    /// error the session survives) from structural garbage.
    pub fn parse(raw: &str) -> Result<Self, MessagingError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let message_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| MessagingError::Deserialization(format!("missing message type: {raw}")))?;

        if !KNOWN_TYPES.contains(&message_type) {
            return Err(MessagingError::UnknownMessageType(message_type.to_string()));
        }

        serde_json::from_value(value).map_err(MessagingError::from)
    }
}
