//! In-process broker.
//!
//! Every clone of a [`MemoryBroker`] shares the same topic table, so several
//! simulated servers in one process can be wired to the same "cluster bus".
//! Useful for:
//!
//! - Development and testing
//! - Single-process deployments where every stack lives on one server

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use super::{Broker, ListenerId, TopicListener};
use crate::message::Topic;

/// Error type for the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryBrokerError {
    /// The broker was closed with [`MemoryBroker::close`].
    #[error("memory broker is closed")]
    Closed,
}

/// In-memory broker that delivers inline, on the publishing task.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<MemoryBrokerInner>,
}

#[derive(Default)]
struct MemoryBrokerInner {
    /// Topic -> registered listeners, in registration order.
    topics: RwLock<HashMap<Topic, Vec<(ListenerId, Arc<dyn TopicListener>)>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse all further operations, simulating an unreachable broker.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Accept operations again after [`close`](Self::close).
    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::Release);
    }

    /// Check if the broker is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of listeners registered on a topic.
    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Number of topics with at least one listener.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.read().len()
    }

    fn check_open(&self) -> Result<(), MemoryBrokerError> {
        if self.is_closed() {
            Err(MemoryBrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("topics", &self.topic_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Broker for MemoryBroker {
    type Error = MemoryBrokerError;

    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<usize, Self::Error> {
        self.check_open()?;

        // Snapshot so listeners can subscribe/unsubscribe from inside a callback.
        let listeners: Vec<Arc<dyn TopicListener>> = self
            .inner
            .topics
            .read()
            .get(topic)
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in &listeners {
            listener.on_message(topic, payload.clone());
        }

        Ok(listeners.len())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        listener: Arc<dyn TopicListener>,
    ) -> Result<ListenerId, Self::Error> {
        self.check_open()?;

        let id = ListenerId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .topics
            .write()
            .entry(topic.clone())
            .or_default()
            .push((id, listener));
        Ok(id)
    }

    async fn unsubscribe(&self, topic: &Topic, listener: ListenerId) -> Result<bool, Self::Error> {
        self.check_open()?;

        let mut topics = self.inner.topics.write();
        let Some(listeners) = topics.get_mut(topic) else {
            return Ok(false);
        };

        let before = listeners.len();
        listeners.retain(|(id, _)| *id != listener);
        let removed = listeners.len() != before;

        if listeners.is_empty() {
            topics.remove(topic);
        }
        Ok(removed)
    }
}
