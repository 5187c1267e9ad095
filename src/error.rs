//! Error types for the diff-sync distribution layer.
//!
//! Errors fall into two groups:
//! - **Logic errors** (bad entity references, unresolvable topics, unsupported
//!   message kinds) are returned synchronously so misuse surfaces immediately.
//! - **Transport errors** (broker publish/subscribe failures) are logged by the
//!   producer and subscription layers and only reach callers that explicitly
//!   await a [`PublishHandle`](crate::PublishHandle) or a registration future.

use thiserror::Error;

use crate::message::MessageKind;

/// Result type alias for distribution-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by external collaborators (sync engine, brokers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while distributing diff-sync messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration fault: a required piece of wiring is missing or the
    /// subscription is in a state that does not allow the requested call.
    #[error("configuration error: {0}")]
    Config(String),

    /// Entity reference cannot be turned into a topic name.
    #[error("invalid entity reference: {0}")]
    InvalidEntity(String),

    /// Origin identifier could not be parsed.
    #[error("invalid origin identifier: {0:?}")]
    InvalidOriginId(String),

    /// Failed to encode an envelope.
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// Failed to decode an envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(String),

    /// Encoded envelope exceeds the configured maximum size.
    #[error("envelope size ({size} bytes) exceeds maximum ({max_size} bytes)")]
    EnvelopeTooLarge {
        /// Size of the encoded envelope in bytes.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// The broker rejected a publish, subscribe or unsubscribe call.
    #[error("broker error on topic {topic}: {reason}")]
    Broker {
        /// Topic the operation targeted.
        topic: String,
        /// Underlying error message.
        reason: String,
    },

    /// A message kind reached a channel that cannot handle it.
    #[error("unsupported message kind: {0}")]
    UnsupportedMessage(MessageKind),

    /// The synchronization engine failed to apply a remote message.
    #[error("sync engine error: {0}")]
    Engine(#[source] BoxError),

    /// The producer has been shut down.
    #[error("producer has been shut down")]
    Shutdown,
}

impl Error {
    /// Build a broker error for the given topic.
    pub fn broker(topic: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Error::Broker {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error comes from the transport side (broker, codec) rather
    /// than from misuse of the API.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Broker { .. } | Error::Encode(_) | Error::Decode(_) | Error::Shutdown
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
