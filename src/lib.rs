//! # diffsync-cluster
//!
//! Cross-server distribution layer for differential-synchronization ("diff
//! sync") stacks.
//!
//! Participants editing the same entity may be connected to different server
//! processes. Each server broadcasts the patches its local stacks produce over
//! a pub/sub broker, one topic per entity, and forwards what it receives from
//! other servers to its own stacks for that entity, never re-processing its
//! own broadcasts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Synchronization engine (external)                │
//! │                          (SyncEngine)                            │
//! └───────────────┬──────────────────────────────▲───────────────────┘
//!                 │ send()                       │ apply_remote_*()
//! ┌───────────────▼──────────────────────────────┴───────────────────┐
//! │                          BrokerChannel                           │
//! ├──────────────────────────────┬───────────────────────────────────┤
//! │        EventProducer         │   TopicSubscription (fan-out)     │
//! │   (queue + ProducerRunner)   │   echo filter, StackRegistry      │
//! ├──────────────────────────────┴───────────────────────────────────┤
//! │                    Broker  (diff:sync:{type}:{id})               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## API Entry Points
//!
//! | API | Use Case |
//! |-----|----------|
//! | [`SyncNode`] | One node per server: attach/detach local stacks, subscriptions handled for you |
//! | [`TopicSubscription`] + [`SubscriptionManager`] | Manual subscription management with your own registry |
//! | [`EventProducer`] | Publishing envelopes only |
//!
//! ## Example
//!
//! ```ignore
//! use diffsync_cluster::{ClusterConfig, EntityRef, MemoryBroker, Patch, SyncNode};
//!
//! let (node, runner) = SyncNode::new(MemoryBroker::new(), ClusterConfig::default());
//! tokio::spawn(runner.run());
//!
//! // One stack per (entity, participant)
//! let entity = EntityRef::new("document", "doc-1")?;
//! let stack = node.attach(entity, engine).await?;
//!
//! // Broadcast to every other stack of the entity, on every server
//! stack.send(Patch::new(edits))?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

mod broker_channel;
mod channel;
mod config;
mod error;
mod manager;
mod message;
mod node;
mod producer;
mod registry;
mod subscription;

pub mod broker;
pub mod testing;

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

// Re-export broker types
pub use broker::{Broker, ListenerId, MemoryBroker, MemoryBrokerError, TopicListener};

// Re-export channel types
pub use broker_channel::{BrokerChannel, SyncEngine};
pub use channel::Channel;

// Re-export config types
pub use config::ClusterConfig;

// Re-export error types
pub use error::{BoxError, Error, Result};

// Re-export message types
pub use message::{
    Ack, Edit, EntityRef, MessageKind, OriginId, Patch, SyncEnvelope, SyncMessage, Topic,
    ACK_TAG, PATCH_TAG, TOPIC_PREFIX, TOPIC_SEPARATOR,
};

// Re-export producer types
pub use producer::{EventProducer, ProducerRunner, ProducerStats, PublishHandle};

// Re-export registry types
pub use registry::{LocalStack, MemoryStackRegistry, StackRegistry};

// Re-export subscription types
pub use manager::SubscriptionManager;
pub use node::{AttachedStack, SyncNode};
pub use subscription::{SubscriptionState, SubscriptionStats, TopicSubscription};
