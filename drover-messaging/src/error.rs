//! Messaging error types

use thiserror::Error;

/// Errors raised by the message model and the transports.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Message with a type string no payload variant maps to
    #[error("Unknown message type \"{0}\"")]
    UnknownMessageType(String),

    /// IO error on the underlying pipe or socket
    #[error("IO error: {0}")]
    Io(String),

    /// The peer closed the channel
    #[error("Connection closed")]
    ConnectionClosed,

    /// The transport could not establish its initial connection
    #[error("Transport connect failed: {0}")]
    ConnectFailed(String),

    /// `configure` was not called before the operation
    #[error("Messenger is not configured with a consumer")]
    NotConfigured,

    /// The round specification is structurally invalid
    #[error("Invalid round specification: {0}")]
    InvalidRoundSpec(String),
}

impl MessagingError {
    /// Transient errors leave an established session usable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MessagingError::Io(_)
                | MessagingError::ConnectionClosed
                | MessagingError::UnknownMessageType(_)
                | MessagingError::Deserialization(_)
        )
    }

    /// Fatal errors end this process's participation in the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MessagingError::ConnectFailed(_) | MessagingError::InvalidRoundSpec(_)
        )
    }
}

impl From<std::io::Error> for MessagingError {
    fn from(err: std::io::Error) -> Self {
        MessagingError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            MessagingError::Io(err.to_string())
        } else if err.is_data() {
            MessagingError::Deserialization(err.to_string())
        } else {
            MessagingError::Serialization(err.to_string())
        }
    }
}
