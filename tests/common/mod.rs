//! Shared test utilities for diffsync-cluster tests.
//!
//! [`TestServer`] simulates one server process the way deployments wire the
//! layer by hand: a registry of local stacks, one producer, and one topic
//! subscription per local stack.

#![allow(dead_code)]

use std::sync::Arc;

use diffsync_cluster::{
    testing::RecordingEngine, Broker, BrokerChannel, ClusterConfig, EntityRef, EventProducer,
    MemoryStackRegistry, OriginId, SubscriptionManager, TopicSubscription,
};

/// Install a tracing subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A local stack hosted by a [`TestServer`].
pub struct TestStack {
    pub origin: OriginId,
    pub channel: Arc<BrokerChannel>,
    pub engine: Arc<RecordingEngine>,
    pub subscription: TopicSubscription,
}

/// One simulated server process.
pub struct TestServer<B: Broker> {
    pub registry: Arc<MemoryStackRegistry>,
    pub producer: EventProducer,
    pub manager: SubscriptionManager<B>,
    pub config: ClusterConfig,
}

impl<B: Broker> TestServer<B> {
    /// Create a server on `broker` and spawn its producer runner.
    pub fn start(broker: Arc<B>, config: ClusterConfig) -> Self {
        let (producer, runner) = EventProducer::new(broker.clone(), config.clone());
        tokio::spawn(runner.run());

        Self {
            registry: Arc::new(MemoryStackRegistry::new()),
            producer,
            manager: SubscriptionManager::new(broker),
            config,
        }
    }

    /// Host a stack with a fixed origin and subscribe it to its entity's topic.
    pub async fn host(&self, entity: &EntityRef, origin: OriginId) -> TestStack {
        let engine = Arc::new(RecordingEngine::new());
        let channel = Arc::new(BrokerChannel::new(
            entity.clone(),
            origin,
            self.producer.clone(),
            engine.clone(),
        ));
        self.registry.register(entity.clone(), origin, channel.clone());

        let subscription =
            TopicSubscription::new(entity.clone(), origin, self.registry.clone(), &self.config);
        self.manager
            .add(&subscription)
            .await
            .expect("subscribe should succeed");

        TestStack {
            origin,
            channel,
            engine,
            subscription,
        }
    }
}

pub fn doc(id: &str) -> EntityRef {
    EntityRef::new("document", id).expect("valid entity")
}
