//! The unit of transport between servers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{EntityRef, OriginId, SyncMessage, Topic};
use crate::error::{Error, Result};

/// A protocol message tagged with the stack that produced it and the entity
/// it concerns.
///
/// Encoded as JSON:
///
/// ```text
/// {
///   "message": { "type": "PATCH" | "ACK", "body": ... },
///   "diffSyncIdentifier": "<origin id>",
///   "diffSyncEntity": { "entityType": "...", "entityId": "..." }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    message: SyncMessage,
    #[serde(rename = "diffSyncIdentifier")]
    origin: OriginId,
    #[serde(rename = "diffSyncEntity")]
    entity: EntityRef,
}

impl SyncEnvelope {
    /// Bind an outbound message to its origin and entity.
    pub fn new(message: impl Into<SyncMessage>, origin: OriginId, entity: EntityRef) -> Self {
        Self {
            message: message.into(),
            origin,
            entity,
        }
    }

    /// The wrapped protocol message.
    pub fn message(&self) -> &SyncMessage {
        &self.message
    }

    /// Identity of the stack that produced the message.
    pub fn origin(&self) -> OriginId {
        self.origin
    }

    /// The entity the message concerns.
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Topic this envelope is published on. Depends only on the entity.
    pub fn topic(&self) -> Topic {
        self.entity.topic()
    }

    /// Split the envelope into its parts.
    pub fn into_parts(self) -> (SyncMessage, OriginId, EntityRef) {
        (self.message, self.origin, self.entity)
    }

    /// Encode the envelope for the broker.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| Error::Encode(e.to_string()))
    }

    /// Encode the envelope, refusing results larger than `max_size` bytes.
    pub fn encode_bounded(&self, max_size: usize) -> Result<Bytes> {
        let encoded = self.encode()?;
        if encoded.len() > max_size {
            return Err(Error::EnvelopeTooLarge {
                size: encoded.len(),
                max_size,
            });
        }
        Ok(encoded)
    }

    /// Decode an envelope received from the broker.
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::Decode(e.to_string()))
    }
}
