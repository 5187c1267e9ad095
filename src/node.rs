//! One server's view of the cluster.
//!
//! A [`SyncNode`] owns the producer, the local stack registry and one topic
//! subscription per entity that has at least one local stack. The
//! subscription is held under the node's own origin id, which no local stack
//! shares, so a broadcast reaches every local peer of the sender exactly once:
//!
//! ```text
//!            ┌──────────── server 1 ────────────┐      ┌──── server 2 ────┐
//!  stack A ──┤ BrokerChannel ─► EventProducer ──┼─────►│                  │
//!            │                                  │broker│                  │
//!  stack B ◄─┤ fan-out ◄─ TopicSubscription ◄───┼──────┼► TopicSubscription ─► stack C
//!            └──────────────────────────────────┘      └──────────────────┘
//! ```

use std::{collections::HashMap, sync::Arc};

use async_lock::Mutex;

use crate::{
    broker::Broker,
    broker_channel::{BrokerChannel, SyncEngine},
    channel::Channel,
    config::ClusterConfig,
    error::Result,
    manager::SubscriptionManager,
    message::{EntityRef, OriginId, SyncMessage},
    producer::{EventProducer, ProducerRunner, PublishHandle},
    registry::MemoryStackRegistry,
    subscription::{SubscriptionStats, TopicSubscription},
};

/// A local stack attached to a [`SyncNode`].
#[derive(Debug, Clone)]
pub struct AttachedStack {
    entity: EntityRef,
    origin: OriginId,
    channel: Arc<BrokerChannel>,
}

impl AttachedStack {
    /// Entity the stack tracks.
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Origin id minted for the stack.
    pub fn origin(&self) -> OriginId {
        self.origin
    }

    /// The stack's channel.
    pub fn channel(&self) -> &Arc<BrokerChannel> {
        &self.channel
    }

    /// Send a message to the stack's peers on every server.
    pub fn send(&self, message: impl Into<SyncMessage>) -> Result<()> {
        self.channel.send(message.into())
    }

    /// Send a message and return a handle to the broker's answer.
    pub fn publish(&self, message: impl Into<SyncMessage>) -> PublishHandle {
        self.channel.publish(message)
    }
}

struct EntitySubscription {
    subscription: TopicSubscription,
    stacks: usize,
}

/// Distribution layer of one server process.
pub struct SyncNode<B> {
    id: OriginId,
    config: ClusterConfig,
    producer: EventProducer,
    registry: Arc<MemoryStackRegistry>,
    manager: SubscriptionManager<B>,
    subscriptions: Mutex<HashMap<EntityRef, EntitySubscription>>,
}

impl<B: Broker> SyncNode<B> {
    /// Create a node on `broker`.
    ///
    /// The returned runner performs the node's publishes and must be spawned
    /// by the caller.
    pub fn new(broker: B, config: ClusterConfig) -> (Self, ProducerRunner<Arc<B>>) {
        let broker = Arc::new(broker);
        let (producer, runner) = EventProducer::new(broker.clone(), config.clone());
        let id = OriginId::new();

        tracing::debug!(node = %id, "created sync node");

        let node = Self {
            id,
            config,
            producer,
            registry: Arc::new(MemoryStackRegistry::new()),
            manager: SubscriptionManager::new(broker),
            subscriptions: Mutex::new(HashMap::new()),
        };
        (node, runner)
    }

    /// Origin id of the node's own subscriptions.
    pub fn id(&self) -> OriginId {
        self.id
    }

    /// Node configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The node's producer.
    pub fn producer(&self) -> &EventProducer {
        &self.producer
    }

    /// Registry of the node's local stacks.
    pub fn registry(&self) -> &Arc<MemoryStackRegistry> {
        &self.registry
    }

    /// Attach a new local stack for `entity`, backed by `engine`.
    ///
    /// Subscribes the node to the entity's topic if this is its first local
    /// stack. If that subscription fails, nothing is attached.
    pub async fn attach(
        &self,
        entity: EntityRef,
        engine: Arc<dyn SyncEngine>,
    ) -> Result<AttachedStack> {
        let origin = OriginId::new();
        let channel = Arc::new(BrokerChannel::new(
            entity.clone(),
            origin,
            self.producer.clone(),
            engine,
        ));

        let mut subscriptions = self.subscriptions.lock().await;

        if !subscriptions.contains_key(&entity) {
            let subscription = TopicSubscription::new(
                entity.clone(),
                self.id,
                self.registry.clone(),
                &self.config,
            );
            self.manager.add(&subscription).await?;
            subscriptions.insert(
                entity.clone(),
                EntitySubscription {
                    subscription,
                    stacks: 0,
                },
            );
        }

        self.registry
            .register(entity.clone(), origin, channel.clone());
        let stacks = subscriptions.get_mut(&entity).map_or(0, |entry| {
            entry.stacks += 1;
            entry.stacks
        });

        tracing::info!(
            node = %self.id,
            entity = %entity,
            origin = %origin,
            stacks,
            "attached local stack"
        );

        Ok(AttachedStack {
            entity,
            origin,
            channel,
        })
    }

    /// Detach a local stack.
    ///
    /// Unsubscribes from the entity's topic when its last local stack leaves.
    /// Returns `false` if the stack was not attached to this node.
    pub async fn detach(&self, stack: &AttachedStack) -> Result<bool> {
        let mut subscriptions = self.subscriptions.lock().await;

        if !self.registry.deregister(&stack.entity, &stack.origin) {
            return Ok(false);
        }

        let remaining = match subscriptions.get_mut(&stack.entity) {
            Some(entry) => {
                entry.stacks = entry.stacks.saturating_sub(1);
                entry.stacks
            }
            None => 0,
        };

        tracing::info!(
            node = %self.id,
            entity = %stack.entity,
            origin = %stack.origin,
            stacks = remaining,
            "detached local stack"
        );

        if remaining == 0 {
            if let Some(entry) = subscriptions.remove(&stack.entity) {
                self.manager.remove(&entry.subscription).await?;
            }
        }
        Ok(true)
    }

    /// Delivery counters of the node's subscription for `entity`, if any.
    pub async fn subscription_stats(&self, entity: &EntityRef) -> Option<SubscriptionStats> {
        self.subscriptions
            .lock()
            .await
            .get(entity)
            .map(|entry| entry.subscription.stats())
    }

    /// Entities the node is currently subscribed to.
    pub async fn subscribed_entities(&self) -> Vec<EntityRef> {
        self.subscriptions.lock().await.keys().cloned().collect()
    }

    /// Remove every subscription and stop the producer.
    ///
    /// Queued envelopes are still published by the runner before it exits.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.subscriptions.lock().await.drain().collect();

        let removals = entries.iter().map(|(entity, entry)| async move {
            if let Err(e) = self.manager.remove(&entry.subscription).await {
                tracing::warn!(node = %self.id, entity = %entity, error = %e, "failed to remove subscription");
            }
        });
        futures::future::join_all(removals).await;

        self.producer.shutdown();
        tracing::info!(node = %self.id, "sync node shut down");
    }
}

impl<B> std::fmt::Debug for SyncNode<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncNode")
            .field("id", &self.id)
            .field("stacks", &self.registry.len())
            .finish_non_exhaustive()
    }
}
