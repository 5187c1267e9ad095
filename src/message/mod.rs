//! Message types carried between servers.
//!
//! This module contains:
//! - [`EntityRef`] and [`Topic`] - Entity references and topic naming
//! - [`OriginId`] - Per-stack origin identifiers
//! - [`SyncMessage`] - Protocol messages (patches and acks)
//! - [`SyncEnvelope`] - The serialized unit of transport

mod entity;
mod envelope;
mod id;
mod types;

pub use entity::{EntityRef, Topic, TOPIC_PREFIX, TOPIC_SEPARATOR};
pub use envelope::SyncEnvelope;
pub use id::OriginId;
pub use types::{Ack, Edit, MessageKind, Patch, SyncMessage, ACK_TAG, PATCH_TAG};
