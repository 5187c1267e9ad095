//! [`Channel`] implementation that routes a stack's traffic through the broker.
//!
//! Outbound messages are wrapped in a [`SyncEnvelope`] and handed to the
//! [`EventProducer`]; inbound messages (fanned out by a topic subscription)
//! are dispatched by kind into the local [`SyncEngine`].

use std::sync::Arc;

use crate::{
    channel::Channel,
    error::{BoxError, Error, Result},
    message::{Ack, Edit, EntityRef, OriginId, SyncEnvelope, SyncMessage},
    producer::{EventProducer, PublishHandle},
};

/// The synchronization engine that owns document state and shadow copies.
///
/// Both calls run on broker delivery tasks and must not block.
#[auto_impl::auto_impl(Box, Arc)]
pub trait SyncEngine: Send + Sync + 'static {
    /// Apply edits received from a remote peer to the stack `origin` of `entity`.
    fn apply_remote_patch(
        &self,
        entity: &EntityRef,
        edits: &[Edit],
        origin: OriginId,
    ) -> std::result::Result<(), BoxError>;

    /// Apply an acknowledgement received from a remote peer to the stack
    /// `origin` of `entity`.
    fn apply_remote_ack(
        &self,
        entity: &EntityRef,
        origin: OriginId,
        ack: &Ack,
    ) -> std::result::Result<(), BoxError>;
}

/// Channel of one local stack, backed by the cluster broker.
#[derive(Clone)]
pub struct BrokerChannel {
    entity: EntityRef,
    origin: OriginId,
    producer: EventProducer,
    engine: Arc<dyn SyncEngine>,
}

impl BrokerChannel {
    /// Create the channel for the stack `origin` tracking `entity`.
    pub fn new(
        entity: EntityRef,
        origin: OriginId,
        producer: EventProducer,
        engine: Arc<dyn SyncEngine>,
    ) -> Self {
        Self {
            entity,
            origin,
            producer,
            engine,
        }
    }

    /// Entity of the stack.
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Origin identifier of the stack.
    pub fn origin(&self) -> OriginId {
        self.origin
    }

    /// Publish `message` and return a handle to its outcome.
    pub fn publish(&self, message: impl Into<SyncMessage>) -> PublishHandle {
        let envelope = SyncEnvelope::new(message, self.origin, self.entity.clone());
        self.producer.publish(envelope)
    }
}

impl Channel for BrokerChannel {
    fn send(&self, message: SyncMessage) -> Result<()> {
        if self.producer.is_shutdown() {
            return Err(Error::Shutdown);
        }
        tracing::trace!(
            entity = %self.entity,
            origin = %self.origin,
            kind = %message.kind(),
            "sending sync message"
        );
        // Fire-and-forget; the producer logs the outcome.
        drop(self.publish(message));
        Ok(())
    }

    fn receive(&self, message: SyncMessage) -> Result<()> {
        match message {
            SyncMessage::Patch(patch) => self
                .engine
                .apply_remote_patch(&self.entity, &patch.edits, self.origin)
                .map_err(Error::Engine),
            SyncMessage::Ack(ack) => self
                .engine
                .apply_remote_ack(&self.entity, self.origin, &ack)
                .map_err(Error::Engine),
            other => {
                let kind = other.kind();
                tracing::debug!(
                    entity = %self.entity,
                    origin = %self.origin,
                    kind = %kind,
                    "cannot dispatch message kind"
                );
                Err(Error::UnsupportedMessage(kind))
            }
        }
    }
}

impl std::fmt::Debug for BrokerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerChannel")
            .field("entity", &self.entity)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
