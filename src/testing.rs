//! Test utilities for the distribution layer.
//!
//! ## Features
//!
//! - **Recording fakes**: [`RecordingChannel`] and [`RecordingEngine`] capture
//!   every call for later assertions
//! - **Fault injection**: [`ChaosBroker`] wraps any broker and fails or drops
//!   operations according to a shared [`ChaosConfig`]
//!
//! ## Example
//!
//! ```ignore
//! use diffsync_cluster::testing::{ChaosBroker, ChaosConfig};
//!
//! let chaos = ChaosConfig::new().with_message_loss_rate(0.1); // 10% message loss
//! let broker = ChaosBroker::new(MemoryBroker::new(), chaos);
//!
//! // later, simulate an outage
//! broker.config().set_publish_failures(true);
//! ```

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;

use crate::{
    broker::{Broker, ListenerId, TopicListener},
    broker_channel::SyncEngine,
    channel::Channel,
    error::{BoxError, Error, Result},
    message::{Ack, Edit, EntityRef, OriginId, SyncMessage, Topic},
};

/// Channel that records every message passed through it.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<SyncMessage>>,
    received: Mutex<Vec<SyncMessage>>,
    fail_receives: AtomicBool,
}

impl RecordingChannel {
    /// Create an empty recording channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages passed to [`Channel::send`], oldest first.
    pub fn sent(&self) -> Vec<SyncMessage> {
        self.sent.lock().clone()
    }

    /// Messages passed to [`Channel::receive`], oldest first.
    ///
    /// Rejected messages are not recorded.
    pub fn received(&self) -> Vec<SyncMessage> {
        self.received.lock().clone()
    }

    /// Make subsequent `receive` calls fail.
    pub fn fail_receives(&self, fail: bool) {
        self.fail_receives.store(fail, Ordering::Relaxed);
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.sent.lock().clear();
        self.received.lock().clear();
    }
}

impl Channel for RecordingChannel {
    fn send(&self, message: SyncMessage) -> Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }

    fn receive(&self, message: SyncMessage) -> Result<()> {
        if self.fail_receives.load(Ordering::Relaxed) {
            return Err(Error::Engine("recording channel set to fail".into()));
        }
        self.received.lock().push(message);
        Ok(())
    }
}

/// A call observed by [`RecordingEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    /// `apply_remote_patch`
    Patch {
        /// Entity passed to the engine.
        entity: EntityRef,
        /// Origin passed to the engine.
        origin: OriginId,
        /// Edits passed to the engine.
        edits: Vec<Edit>,
    },
    /// `apply_remote_ack`
    Ack {
        /// Entity passed to the engine.
        entity: EntityRef,
        /// Origin passed to the engine.
        origin: OriginId,
        /// Ack passed to the engine.
        ack: Ack,
    },
}

/// Synchronization engine that records the remote messages it is asked to apply.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    fail: AtomicBool,
}

impl RecordingEngine {
    /// Create an empty recording engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, oldest first.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Number of patches applied.
    pub fn patch_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, EngineCall::Patch { .. }))
            .count()
    }

    /// Make subsequent calls fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    fn check(&self) -> std::result::Result<(), BoxError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err("recording engine set to fail".into());
        }
        Ok(())
    }
}

impl SyncEngine for RecordingEngine {
    fn apply_remote_patch(
        &self,
        entity: &EntityRef,
        edits: &[Edit],
        origin: OriginId,
    ) -> std::result::Result<(), BoxError> {
        self.check()?;
        self.calls.lock().push(EngineCall::Patch {
            entity: entity.clone(),
            origin,
            edits: edits.to_vec(),
        });
        Ok(())
    }

    fn apply_remote_ack(
        &self,
        entity: &EntityRef,
        origin: OriginId,
        ack: &Ack,
    ) -> std::result::Result<(), BoxError> {
        self.check()?;
        self.calls.lock().push(EngineCall::Ack {
            entity: entity.clone(),
            origin,
            ack: *ack,
        });
        Ok(())
    }
}

/// Fault injection settings for [`ChaosBroker`].
///
/// Settings can be changed while the broker is in use.
#[derive(Debug, Default)]
pub struct ChaosConfig {
    /// Probability of silently dropping a publish, stored as `f64` bits.
    message_loss_rate: AtomicU64,
    publish_failures: AtomicBool,
    subscribe_failures: AtomicBool,
}

impl ChaosConfig {
    /// Create a configuration that injects nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message loss rate (0.0 to 1.0).
    pub fn with_message_loss_rate(self, rate: f64) -> Self {
        self.set_message_loss_rate(rate);
        self
    }

    /// Fail every publish.
    pub fn with_publish_failures(self, fail: bool) -> Self {
        self.set_publish_failures(fail);
        self
    }

    /// Fail every subscribe.
    pub fn with_subscribe_failures(self, fail: bool) -> Self {
        self.set_subscribe_failures(fail);
        self
    }

    /// Change the message loss rate (0.0 to 1.0).
    pub fn set_message_loss_rate(&self, rate: f64) {
        self.message_loss_rate
            .store(rate.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Start or stop failing publishes.
    pub fn set_publish_failures(&self, fail: bool) {
        self.publish_failures.store(fail, Ordering::Relaxed);
    }

    /// Start or stop failing subscribes.
    pub fn set_subscribe_failures(&self, fail: bool) {
        self.subscribe_failures.store(fail, Ordering::Relaxed);
    }

    /// Current message loss rate.
    pub fn message_loss_rate(&self) -> f64 {
        f64::from_bits(self.message_loss_rate.load(Ordering::Relaxed))
    }

    /// Check if a message should be dropped based on the loss rate.
    pub fn should_drop(&self) -> bool {
        let rate = self.message_loss_rate();
        if rate == 0.0 {
            return false;
        }
        rand::rng().random::<f64>() < rate
    }
}

/// Counters kept by a [`ChaosBroker`].
#[derive(Debug, Default)]
pub struct ChaosStats {
    /// Publishes attempted.
    pub messages_total: AtomicU64,
    /// Publishes silently dropped.
    pub messages_dropped: AtomicU64,
    /// Operations failed on purpose.
    pub injected_failures: AtomicU64,
}

impl ChaosStats {
    /// Fraction of attempted publishes that were dropped.
    pub fn drop_rate(&self) -> f64 {
        let total = self.messages_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.messages_dropped.load(Ordering::Relaxed) as f64 / total as f64
    }
}

/// Error returned by a [`ChaosBroker`].
#[derive(Debug, thiserror::Error)]
pub enum ChaosBrokerError<E> {
    /// Failure injected by the chaos configuration.
    #[error("injected {0} failure")]
    Injected(&'static str),
    /// Failure from the wrapped broker.
    #[error(transparent)]
    Inner(E),
}

/// Broker wrapper that fails or drops operations on demand.
#[derive(Debug)]
pub struct ChaosBroker<B> {
    inner: B,
    config: Arc<ChaosConfig>,
    stats: Arc<ChaosStats>,
}

impl<B> ChaosBroker<B> {
    /// Wrap `inner` with the given fault settings.
    pub fn new(inner: B, config: ChaosConfig) -> Self {
        Self {
            inner,
            config: Arc::new(config),
            stats: Arc::new(ChaosStats::default()),
        }
    }

    /// Fault settings, shared by all clones of this broker.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Counters, shared by all clones of this broker.
    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    /// The wrapped broker.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn inject(&self, enabled: &AtomicBool, operation: &'static str) -> bool {
        if enabled.load(Ordering::Relaxed) {
            self.stats.injected_failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(operation, "chaos broker injecting failure");
            return true;
        }
        false
    }
}

impl<B: Clone> Clone for ChaosBroker<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<B: Broker> Broker for ChaosBroker<B> {
    type Error = ChaosBrokerError<B::Error>;

    async fn publish(
        &self,
        topic: &Topic,
        payload: Bytes,
    ) -> std::result::Result<usize, Self::Error> {
        self.stats.messages_total.fetch_add(1, Ordering::Relaxed);
        if self.inject(&self.config.publish_failures, "publish") {
            return Err(ChaosBrokerError::Injected("publish"));
        }
        if self.config.should_drop() {
            self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(topic = %topic, "chaos broker dropping message");
            return Ok(0);
        }
        self.inner
            .publish(topic, payload)
            .await
            .map_err(ChaosBrokerError::Inner)
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        listener: Arc<dyn TopicListener>,
    ) -> std::result::Result<ListenerId, Self::Error> {
        if self.inject(&self.config.subscribe_failures, "subscribe") {
            return Err(ChaosBrokerError::Injected("subscribe"));
        }
        self.inner
            .subscribe(topic, listener)
            .await
            .map_err(ChaosBrokerError::Inner)
    }

    async fn unsubscribe(
        &self,
        topic: &Topic,
        listener: ListenerId,
    ) -> std::result::Result<bool, Self::Error> {
        self.inner
            .unsubscribe(topic, listener)
            .await
            .map_err(ChaosBrokerError::Inner)
    }
}
