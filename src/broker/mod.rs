//! Broker abstraction for topic-based publish/subscribe.
//!
//! This module provides the `Broker` trait the distribution layer publishes
//! and subscribes through. The broker is an external collaborator: any
//! pub/sub system with named topics (Redis, NATS, a cluster bus) can sit
//! behind it.
//!
//! # Delivery
//!
//! Listeners are invoked on the broker's own delivery task. They must return
//! quickly; the distribution layer only performs local, synchronous forwarding
//! inside a listener.
//!
//! # Available Brokers
//!
//! - [`MemoryBroker`]: In-process broker, shared between simulated servers
//! - [`ChaosBroker`](crate::testing::ChaosBroker): Fault-injecting wrapper for tests

use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::message::Topic;

mod memory;

pub use memory::{MemoryBroker, MemoryBrokerError};

/// Handle assigned by a broker to a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Create a listener id from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value of the id.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Callback invoked by a broker for every payload published on a topic.
///
/// **Important**: This is called on the broker's delivery task. Do not
/// perform blocking operations here.
#[auto_impl::auto_impl(Box, Arc)]
pub trait TopicListener: Send + Sync + 'static {
    /// Called once per delivered payload.
    fn on_message(&self, topic: &Topic, payload: Bytes);
}

/// Asynchronous publish/subscribe on named topics.
///
/// # Example
///
/// ```ignore
/// use diffsync_cluster::{Broker, ListenerId, Topic, TopicListener};
///
/// struct RedisBroker {
///     client: redis::Client,
/// }
///
/// impl Broker for RedisBroker {
///     type Error = redis::RedisError;
///
///     async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<usize, Self::Error> {
///         let mut conn = self.client.get_multiplexed_async_connection().await?;
///         conn.publish(topic.as_str(), payload.as_ref()).await
///     }
///     // ...
/// }
/// ```
#[auto_impl::auto_impl(Box, Arc)]
pub trait Broker: Send + Sync + 'static {
    /// Error type for broker operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish a payload on a topic.
    ///
    /// Returns the number of listeners the broker delivered it to.
    fn publish(
        &self,
        topic: &Topic,
        payload: Bytes,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    /// Register a listener on a topic.
    ///
    /// The returned id is needed to unsubscribe.
    fn subscribe(
        &self,
        topic: &Topic,
        listener: Arc<dyn TopicListener>,
    ) -> impl Future<Output = Result<ListenerId, Self::Error>> + Send;

    /// Remove a previously registered listener.
    ///
    /// Returns `Ok(false)` if the listener was not registered.
    fn unsubscribe(
        &self,
        topic: &Topic,
        listener: ListenerId,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}
