//! Outbound side: turning envelopes into broker publishes.
//!
//! [`EventProducer::publish`] never waits on the broker. Envelopes are queued
//! and a [`ProducerRunner`] drains the queue in the background:
//!
//! ```ignore
//! use diffsync_cluster::{ClusterConfig, EventProducer, MemoryBroker};
//!
//! let (producer, runner) = EventProducer::new(MemoryBroker::new(), ClusterConfig::default());
//!
//! // Spawn the runner on any executor
//! tokio::spawn(runner.run());
//!
//! // Fire-and-forget
//! producer.publish(envelope);
//!
//! // Or wait for the broker's answer
//! let receivers = producer.publish(other_envelope).outcome().await?;
//! ```
//!
//! The layer adds no retry and no backpressure: a full queue or a broker
//! failure is logged and the envelope is dropped.

use async_channel::{Receiver, Sender, TrySendError};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    broker::Broker,
    config::ClusterConfig,
    error::{Error, Result},
    message::SyncEnvelope,
};

#[cfg(feature = "metrics")]
use crate::metrics;

/// Queued publish request.
struct PublishRequest {
    envelope: SyncEnvelope,
    reply: Sender<Result<usize>>,
}

/// Counters shared between a producer and its runner.
#[derive(Debug, Default)]
struct ProducerCounters {
    queued: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of producer activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Envelopes accepted into the queue.
    pub queued: u64,
    /// Envelopes the broker accepted.
    pub published: u64,
    /// Envelopes the codec or broker rejected.
    pub failed: u64,
    /// Envelopes dropped because the queue was full or closed.
    pub dropped: u64,
}

/// Outcome of a single publish.
///
/// Dropping the handle is the normal fire-and-forget path; the result is
/// still logged by the runner.
#[derive(Debug)]
pub struct PublishHandle {
    rx: Receiver<Result<usize>>,
}

impl PublishHandle {
    fn resolved(result: Result<usize>) -> Self {
        let (tx, rx) = async_channel::bounded(1);
        // Cannot fail: fresh channel with room for one value.
        let _ = tx.try_send(result);
        Self { rx }
    }

    /// Wait for the broker's answer: the number of receivers the envelope
    /// was delivered to, or the reason it was not published.
    pub async fn outcome(self) -> Result<usize> {
        self.rx.recv().await.unwrap_or(Err(Error::Shutdown))
    }
}

/// Publishes envelopes on their entity's topic without blocking the caller.
#[derive(Clone)]
pub struct EventProducer {
    tx: Sender<PublishRequest>,
    counters: Arc<ProducerCounters>,
}

impl EventProducer {
    /// Create a producer and the runner that performs its publishes.
    pub fn new<B: Broker>(broker: B, config: ClusterConfig) -> (Self, ProducerRunner<B>) {
        let (tx, rx) = async_channel::bounded(config.publish_queue_capacity.max(1));
        let counters = Arc::new(ProducerCounters::default());

        let producer = Self {
            tx,
            counters: counters.clone(),
        };
        let runner = ProducerRunner {
            broker,
            rx,
            counters,
            max_envelope_size: config.max_envelope_size,
        };
        (producer, runner)
    }

    /// Queue an envelope for publication on its topic.
    ///
    /// Returns immediately. Failures are logged; the returned handle can be
    /// awaited to observe them, or dropped.
    pub fn publish(&self, envelope: SyncEnvelope) -> PublishHandle {
        let (reply, rx) = async_channel::bounded(1);
        let request = PublishRequest { envelope, reply };

        match self.tx.try_send(request) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                PublishHandle { rx }
            }
            Err(TrySendError::Full(request)) => {
                let topic = request.envelope.topic();
                tracing::warn!(
                    topic = %topic,
                    origin = %request.envelope.origin(),
                    "publish queue full, dropping sync envelope"
                );
                self.record_dropped();
                PublishHandle::resolved(Err(Error::broker(topic, "publish queue full")))
            }
            Err(TrySendError::Closed(request)) => {
                tracing::warn!(
                    topic = %request.envelope.topic(),
                    origin = %request.envelope.origin(),
                    "producer shut down, dropping sync envelope"
                );
                self.record_dropped();
                PublishHandle::resolved(Err(Error::Shutdown))
            }
        }
    }

    /// Stop accepting envelopes. Already queued envelopes are still published
    /// before the runner exits.
    pub fn shutdown(&self) {
        self.tx.close();
    }

    /// Check if the producer has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of envelopes waiting for the runner.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    /// Current counters.
    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::record_publish_dropped();
    }
}

impl std::fmt::Debug for EventProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProducer")
            .field("pending", &self.pending())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Background task draining a producer's queue into the broker.
pub struct ProducerRunner<B> {
    broker: B,
    rx: Receiver<PublishRequest>,
    counters: Arc<ProducerCounters>,
    max_envelope_size: usize,
}

impl<B: Broker> ProducerRunner<B> {
    /// Publish queued envelopes until the producer is shut down and the queue
    /// is drained.
    ///
    /// This method should be spawned as a background task.
    pub async fn run(self) {
        while let Ok(request) = self.rx.recv().await {
            self.publish_one(request).await;
        }
        tracing::debug!("producer runner stopped");
    }

    /// Get a reference to the broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }

    async fn publish_one(&self, request: PublishRequest) {
        let PublishRequest { envelope, reply } = request;
        let topic = envelope.topic();
        let origin = envelope.origin();
        let kind = envelope.message().kind();

        let encoded = match envelope.encode_bounded(self.max_envelope_size) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(
                    topic = %topic,
                    origin = %origin,
                    kind = %kind,
                    error = %e,
                    "failed to encode sync envelope"
                );
                self.record_failure();
                let _ = reply.try_send(Err(e));
                return;
            }
        };

        #[cfg(feature = "metrics")]
        let size = encoded.len();

        let result = match self.broker.publish(&topic, encoded).await {
            Ok(receivers) => {
                tracing::debug!(
                    topic = %topic,
                    origin = %origin,
                    kind = %kind,
                    receivers,
                    "published sync envelope"
                );
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                metrics::record_published(size, receivers);
                Ok(receivers)
            }
            Err(e) => {
                tracing::warn!(
                    topic = %topic,
                    origin = %origin,
                    kind = %kind,
                    error = %e,
                    "publish failed"
                );
                self.record_failure();
                Err(Error::broker(&topic, e))
            }
        };

        // Handle may have been dropped (fire-and-forget).
        let _ = reply.try_send(result);
    }

    fn record_failure(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::record_publish_failure();
    }
}
