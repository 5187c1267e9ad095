//! Per-entity topic subscription: echo suppression and local fan-out.
//!
//! A [`TopicSubscription`] binds one `(entity, origin)` pair to one broker
//! registration. Every envelope the broker delivers on the entity's topic goes
//! through the same steps:
//!
//! ```text
//!   payload ──► decode ──► origin == ours? ──yes──► drop (own echo)
//!                                │ no
//!                                ▼
//!                         kind ── Patch ──► every local stack for the entity
//!                                │          except the sender's origin
//!                                ├─ Ack ────► same, only if `forward_acks`
//!                                └─ other ──► ignored
//! ```
//!
//! # State Machine
//!
//! `Unregistered -> Registering -> Active -> Unregistered`. Only an explicit
//! [`unsubscribe`](TopicSubscription::unsubscribe) leaves `Active`; a failed
//! registration returns to `Unregistered` and is not retried.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crate::{
    broker::{Broker, ListenerId, TopicListener},
    config::ClusterConfig,
    error::{Error, Result},
    message::{EntityRef, OriginId, SyncEnvelope, SyncMessage, Topic},
    registry::StackRegistry,
};

#[cfg(feature = "metrics")]
use crate::metrics;

/// Registration state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not registered with the broker.
    Unregistered,
    /// Registration sent, waiting for the broker.
    Registering,
    /// Registered; the broker assigned the contained listener id.
    Active(ListenerId),
}

/// Snapshot of a subscription's delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Envelopes decoded from the topic.
    pub delivered: u64,
    /// Envelopes dropped because they carried this subscription's origin.
    pub suppressed: u64,
    /// Messages handed to local stacks (one per receiving stack).
    pub forwarded: u64,
    /// Envelopes not forwarded because of their kind or entity.
    pub ignored: u64,
    /// Payloads that could not be decoded.
    pub decode_errors: u64,
    /// Local stacks that returned an error when handed a message.
    pub forward_errors: u64,
}

#[derive(Debug, Default)]
struct SubscriptionCounters {
    delivered: AtomicU64,
    suppressed: AtomicU64,
    forwarded: AtomicU64,
    ignored: AtomicU64,
    decode_errors: AtomicU64,
    forward_errors: AtomicU64,
}

/// Subscription of one diff-sync origin to one entity's topic.
pub struct TopicSubscription {
    topic: Topic,
    state: Mutex<SubscriptionState>,
    /// Set by an unsubscribe that arrives while registering; read under `state`.
    cancel_registration: AtomicBool,
    listener: Arc<SubscriptionListener>,
}

impl TopicSubscription {
    /// Create an unregistered subscription for `entity` on behalf of `origin`.
    ///
    /// `registry` is consulted on every delivery to find the local stacks
    /// that should receive the message.
    pub fn new(
        entity: EntityRef,
        origin: OriginId,
        registry: Arc<dyn StackRegistry>,
        config: &ClusterConfig,
    ) -> Self {
        let topic = entity.topic();
        let listener = Arc::new(SubscriptionListener {
            entity,
            origin,
            registry,
            forward_acks: config.forward_acks,
            max_envelope_size: config.max_envelope_size,
            accepting: AtomicBool::new(false),
            counters: SubscriptionCounters::default(),
        });

        Self {
            topic,
            state: Mutex::new(SubscriptionState::Unregistered),
            cancel_registration: AtomicBool::new(false),
            listener,
        }
    }

    /// The subscribed entity.
    pub fn entity(&self) -> &EntityRef {
        &self.listener.entity
    }

    /// Origin whose own broadcasts this subscription drops.
    pub fn origin(&self) -> OriginId {
        self.listener.origin
    }

    /// The topic name derived from the entity.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Check that the topic name maps back to the subscribed entity.
    ///
    /// Fails with [`Error::Config`] if it does not; such a subscription can
    /// never be registered or removed.
    pub fn resolve_topic(&self) -> Result<&Topic> {
        match self.topic.entity() {
            Ok(entity) if entity == self.listener.entity => Ok(&self.topic),
            Ok(entity) => Err(Error::Config(format!(
                "topic {} resolves to {}, expected {}",
                self.topic, entity, self.listener.entity
            ))),
            Err(e) => Err(Error::Config(format!(
                "topic {} cannot be resolved: {}",
                self.topic, e
            ))),
        }
    }

    /// Current registration state.
    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Broker-assigned listener id, present only while active.
    pub fn listener_id(&self) -> Option<ListenerId> {
        match self.state() {
            SubscriptionState::Active(id) => Some(id),
            _ => None,
        }
    }

    /// Check if the subscription is registered with the broker.
    pub fn is_active(&self) -> bool {
        self.listener_id().is_some()
    }

    /// The callback registered with the broker.
    pub fn listener(&self) -> Arc<dyn TopicListener> {
        self.listener.clone()
    }

    /// Current delivery counters.
    pub fn stats(&self) -> SubscriptionStats {
        self.listener.counters.snapshot()
    }

    /// Register the listener with the broker.
    ///
    /// Resolves to the broker's listener id once the subscription is active.
    /// Subscribing an already active subscription returns the existing id.
    /// A registration failure is logged, leaves the subscription
    /// `Unregistered` and is not retried. If [`unsubscribe`](Self::unsubscribe)
    /// was called while the broker was registering, the new listener is
    /// removed again and this returns [`Error::Config`].
    pub async fn subscribe<B: Broker>(&self, broker: &B) -> Result<ListenerId> {
        let topic = self.resolve_topic()?.clone();

        {
            let mut state = self.state.lock();
            match *state {
                SubscriptionState::Active(id) => {
                    tracing::debug!(topic = %topic, listener = %id, "subscription already active");
                    return Ok(id);
                }
                SubscriptionState::Registering => {
                    return Err(Error::Config(format!(
                        "registration for {} is already in progress",
                        topic
                    )));
                }
                SubscriptionState::Unregistered => {
                    self.cancel_registration.store(false, Ordering::Relaxed);
                    // Accept before the broker answers so nothing delivered
                    // right after registration is lost.
                    self.listener.accepting.store(true, Ordering::Release);
                    *state = SubscriptionState::Registering;
                }
            }
        }

        match broker.subscribe(&topic, self.listener()).await {
            Ok(id) => {
                let cancelled = {
                    let mut state = self.state.lock();
                    if self.cancel_registration.swap(false, Ordering::Relaxed) {
                        self.listener.accepting.store(false, Ordering::Release);
                        *state = SubscriptionState::Unregistered;
                        true
                    } else {
                        *state = SubscriptionState::Active(id);
                        false
                    }
                };

                if cancelled {
                    tracing::info!(
                        topic = %topic,
                        origin = %self.origin(),
                        listener = %id,
                        "subscription removed while registering, releasing listener"
                    );
                    if let Err(e) = broker.unsubscribe(&topic, id).await {
                        tracing::warn!(
                            topic = %topic,
                            listener = %id,
                            error = %e,
                            "unsubscribe failed"
                        );
                    }
                    return Err(Error::Config(format!(
                        "subscription for {} was removed while registering",
                        topic
                    )));
                }

                tracing::info!(
                    topic = %topic,
                    origin = %self.origin(),
                    listener = %id,
                    "subscription active"
                );
                #[cfg(feature = "metrics")]
                metrics::subscription_activated();
                Ok(id)
            }
            Err(e) => {
                self.listener.accepting.store(false, Ordering::Release);
                {
                    let mut state = self.state.lock();
                    self.cancel_registration.store(false, Ordering::Relaxed);
                    *state = SubscriptionState::Unregistered;
                }
                tracing::warn!(
                    topic = %topic,
                    origin = %self.origin(),
                    error = %e,
                    "subscribe failed"
                );
                Err(Error::broker(&topic, e))
            }
        }
    }

    /// Remove the listener from the broker.
    ///
    /// Deliveries stop being forwarded as soon as this is called, even before
    /// the broker confirms. Broker errors are logged, not returned; calling
    /// this on an inactive subscription is a no-op. Called while a
    /// registration is in progress, the pending [`subscribe`](Self::subscribe)
    /// releases its listener as soon as the broker answers. An in-flight
    /// callback that already passed the activity check still completes.
    pub async fn unsubscribe<B: Broker>(&self, broker: &B) -> Result<()> {
        let topic = self.resolve_topic()?.clone();

        self.listener.accepting.store(false, Ordering::Release);

        let id = {
            let mut state = self.state.lock();
            match *state {
                SubscriptionState::Active(id) => {
                    *state = SubscriptionState::Unregistered;
                    id
                }
                SubscriptionState::Unregistered => {
                    tracing::debug!(topic = %topic, "subscription not active, nothing to remove");
                    return Ok(());
                }
                SubscriptionState::Registering => {
                    self.cancel_registration.store(true, Ordering::Relaxed);
                    tracing::debug!(
                        topic = %topic,
                        "unsubscribe while registering, listener released once the broker answers"
                    );
                    return Ok(());
                }
            }
        };

        #[cfg(feature = "metrics")]
        metrics::subscription_deactivated();

        match broker.unsubscribe(&topic, id).await {
            Ok(true) => {
                tracing::info!(
                    topic = %topic,
                    origin = %self.origin(),
                    listener = %id,
                    "subscription removed"
                );
            }
            Ok(false) => {
                tracing::debug!(topic = %topic, listener = %id, "listener was already gone");
            }
            Err(e) => {
                tracing::warn!(
                    topic = %topic,
                    listener = %id,
                    error = %e,
                    "unsubscribe failed"
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TopicSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicSubscription")
            .field("topic", &self.topic)
            .field("origin", &self.origin())
            .field("state", &self.state())
            .finish()
    }
}

/// Broker callback owned by a [`TopicSubscription`].
struct SubscriptionListener {
    entity: EntityRef,
    origin: OriginId,
    registry: Arc<dyn StackRegistry>,
    forward_acks: bool,
    max_envelope_size: usize,
    accepting: AtomicBool,
    counters: SubscriptionCounters,
}

impl TopicListener for SubscriptionListener {
    fn on_message(&self, topic: &Topic, payload: Bytes) {
        if !self.accepting.load(Ordering::Acquire) {
            tracing::trace!(topic = %topic, "subscription inactive, ignoring delivery");
            return;
        }

        if payload.len() > self.max_envelope_size {
            tracing::warn!(
                topic = %topic,
                size = payload.len(),
                max_size = self.max_envelope_size,
                "ignoring oversized sync envelope"
            );
            self.record_decode_error();
            return;
        }

        let envelope = match SyncEnvelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "failed to decode sync envelope");
                self.record_decode_error();
                return;
            }
        };

        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::record_delivered();

        if envelope.entity() != &self.entity {
            tracing::warn!(
                topic = %topic,
                entity = %envelope.entity(),
                "envelope entity does not match its topic, ignoring"
            );
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.handle(envelope);
    }
}

impl SubscriptionListener {
    fn handle(&self, envelope: SyncEnvelope) {
        if envelope.origin() == self.origin {
            tracing::trace!(entity = %self.entity, origin = %self.origin, "dropping own echo");
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            metrics::record_echo_suppressed();
            return;
        }

        let (message, sender, _) = envelope.into_parts();
        match &message {
            SyncMessage::Patch(_) => self.fan_out(sender, message),
            SyncMessage::Ack(_) if self.forward_acks => self.fan_out(sender, message),
            SyncMessage::Ack(_) => {
                tracing::trace!(
                    entity = %self.entity,
                    sender = %sender,
                    "ack not forwarded across servers"
                );
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            }
            SyncMessage::Unsupported { kind, .. } => {
                tracing::debug!(
                    entity = %self.entity,
                    sender = %sender,
                    kind = %kind,
                    "ignoring unsupported message kind"
                );
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Hand `message` to every local stack of the entity except `sender`'s.
    fn fan_out(&self, sender: OriginId, message: SyncMessage) {
        let mut forwarded = 0usize;

        for stack in self.registry.stacks_for_entity(&self.entity) {
            if stack.origin == sender {
                continue;
            }
            match stack.channel.receive(message.clone()) {
                Ok(()) => forwarded += 1,
                Err(e) => {
                    self.counters.forward_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        entity = %self.entity,
                        stack = %stack.origin,
                        sender = %sender,
                        error = %e,
                        "local stack rejected forwarded message"
                    );
                }
            }
        }

        self.counters
            .forwarded
            .fetch_add(forwarded as u64, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::record_forwarded(forwarded);

        tracing::trace!(
            entity = %self.entity,
            sender = %sender,
            kind = %message.kind(),
            forwarded,
            "forwarded remote message to local stacks"
        );
    }

    fn record_decode_error(&self) {
        self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        metrics::record_decode_failure();
    }
}

impl SubscriptionCounters {
    fn snapshot(&self) -> SubscriptionStats {
        SubscriptionStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            forward_errors: self.forward_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::MemoryBroker,
        message::{Ack, Patch},
        registry::MemoryStackRegistry,
        testing::{ChaosBroker, ChaosConfig, RecordingChannel},
    };
    use serde_json::json;

    fn doc() -> EntityRef {
        EntityRef::new("document", "doc-1").unwrap()
    }

    struct Fixture {
        registry: Arc<MemoryStackRegistry>,
        broker: MemoryBroker,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: Arc::new(MemoryStackRegistry::new()),
                broker: MemoryBroker::new(),
            }
        }

        fn stack(&self, origin: OriginId) -> Arc<RecordingChannel> {
            let channel = Arc::new(RecordingChannel::new());
            self.registry.register(doc(), origin, channel.clone());
            channel
        }

        fn subscription(&self, origin: OriginId, config: &ClusterConfig) -> TopicSubscription {
            TopicSubscription::new(doc(), origin, self.registry.clone(), config)
        }

        async fn deliver(&self, envelope: SyncEnvelope) -> usize {
            self.broker
                .publish(&envelope.topic(), envelope.encode().unwrap())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let fx = Fixture::new();
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());
        assert_eq!(sub.state(), SubscriptionState::Unregistered);
        assert_eq!(sub.listener_id(), None);

        let id = sub.subscribe(&fx.broker).await.unwrap();
        assert_eq!(sub.state(), SubscriptionState::Active(id));
        assert_eq!(fx.broker.listener_count(sub.topic()), 1);

        // already active: same id, no second registration
        assert_eq!(sub.subscribe(&fx.broker).await.unwrap(), id);
        assert_eq!(fx.broker.listener_count(sub.topic()), 1);

        sub.unsubscribe(&fx.broker).await.unwrap();
        assert_eq!(sub.state(), SubscriptionState::Unregistered);
        assert_eq!(fx.broker.listener_count(sub.topic()), 0);
    }

    #[tokio::test]
    async fn test_self_origin_suppressed() {
        let fx = Fixture::new();
        let x = OriginId::new();
        let other = fx.stack(OriginId::new());
        let sub = fx.subscription(x, &ClusterConfig::default());
        sub.subscribe(&fx.broker).await.unwrap();

        fx.deliver(SyncEnvelope::new(Patch::default(), x, doc())).await;

        assert!(other.received().is_empty());
        assert_eq!(sub.stats().suppressed, 1);
        assert_eq!(sub.stats().forwarded, 0);
    }

    #[tokio::test]
    async fn test_patch_fans_out_to_peers_only() {
        let fx = Fixture::new();
        let (a, b, c) = (OriginId::new(), OriginId::new(), OriginId::new());
        let stack_a = fx.stack(a);
        let stack_b = fx.stack(b);
        let stack_c = fx.stack(c);

        // Subscription held by a different origin than the sender.
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());
        sub.subscribe(&fx.broker).await.unwrap();

        let patch = Patch::new(vec![crate::message::Edit {
            client_version: 0,
            server_version: 0,
            diff: json!("+x"),
        }]);
        fx.deliver(SyncEnvelope::new(patch.clone(), a, doc())).await;

        assert!(stack_a.received().is_empty());
        assert_eq!(stack_b.received(), vec![SyncMessage::Patch(patch.clone())]);
        assert_eq!(stack_c.received(), vec![SyncMessage::Patch(patch)]);
        assert_eq!(sub.stats().forwarded, 2);
    }

    #[tokio::test]
    async fn test_per_stack_subscriptions_duplicate_local_delivery() {
        // With one subscription per local stack, every subscription that is
        // not the sender's fans out independently: B and C each get the patch
        // once from B's subscription and once from C's.
        let fx = Fixture::new();
        let (a, b, c) = (OriginId::new(), OriginId::new(), OriginId::new());
        fx.stack(a);
        let stack_b = fx.stack(b);
        let stack_c = fx.stack(c);

        let config = ClusterConfig::default();
        let subs = [
            fx.subscription(a, &config),
            fx.subscription(b, &config),
            fx.subscription(c, &config),
        ];
        for sub in &subs {
            sub.subscribe(&fx.broker).await.unwrap();
        }

        fx.deliver(SyncEnvelope::new(Patch::default(), a, doc())).await;

        assert_eq!(subs[0].stats().suppressed, 1);
        assert_eq!(stack_b.received().len(), 2);
        assert_eq!(stack_c.received().len(), 2);
    }

    #[tokio::test]
    async fn test_ack_not_forwarded_by_default() {
        let fx = Fixture::new();
        let peer = fx.stack(OriginId::new());
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());
        sub.subscribe(&fx.broker).await.unwrap();

        let ack = Ack {
            client_version: 2,
            server_version: 3,
        };
        fx.deliver(SyncEnvelope::new(ack, OriginId::new(), doc())).await;

        assert!(peer.received().is_empty());
        assert_eq!(sub.stats().ignored, 1);
    }

    #[tokio::test]
    async fn test_ack_forwarded_when_enabled() {
        let fx = Fixture::new();
        let sender = OriginId::new();
        let sender_stack = fx.stack(sender);
        let peer = fx.stack(OriginId::new());
        let config = ClusterConfig::default().with_forward_acks(true);
        let sub = fx.subscription(OriginId::new(), &config);
        sub.subscribe(&fx.broker).await.unwrap();

        let ack = Ack {
            client_version: 2,
            server_version: 3,
        };
        fx.deliver(SyncEnvelope::new(ack, sender, doc())).await;

        assert_eq!(peer.received(), vec![SyncMessage::Ack(ack)]);
        assert!(sender_stack.received().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_kind_ignored() {
        let fx = Fixture::new();
        let peer = fx.stack(OriginId::new());
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());
        sub.subscribe(&fx.broker).await.unwrap();

        let message = SyncMessage::Unsupported {
            kind: "SNAPSHOT".into(),
            body: json!({"text": "hi"}),
        };
        fx.deliver(SyncEnvelope::new(message, OriginId::new(), doc()))
            .await;

        assert!(peer.received().is_empty());
        assert_eq!(sub.stats().ignored, 1);
    }

    #[tokio::test]
    async fn test_garbage_payload_counted() {
        let fx = Fixture::new();
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());
        sub.subscribe(&fx.broker).await.unwrap();

        fx.broker
            .publish(sub.topic(), Bytes::from_static(b"not json"))
            .await
            .unwrap();

        assert_eq!(sub.stats().decode_errors, 1);
        assert_eq!(sub.stats().delivered, 0);
    }

    #[tokio::test]
    async fn test_failing_stack_does_not_stop_fan_out() {
        let fx = Fixture::new();
        let failing = fx.stack(OriginId::new());
        failing.fail_receives(true);
        let healthy = fx.stack(OriginId::new());
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());
        sub.subscribe(&fx.broker).await.unwrap();

        fx.deliver(SyncEnvelope::new(Patch::default(), OriginId::new(), doc()))
            .await;

        assert_eq!(healthy.received().len(), 1);
        assert_eq!(sub.stats().forwarded, 1);
        assert_eq!(sub.stats().forward_errors, 1);
    }

    #[tokio::test]
    async fn test_no_forwarding_after_unsubscribe() {
        let fx = Fixture::new();
        let peer = fx.stack(OriginId::new());
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());
        sub.subscribe(&fx.broker).await.unwrap();
        let listener = sub.listener();

        sub.unsubscribe(&fx.broker).await.unwrap();
        sub.unsubscribe(&fx.broker).await.unwrap();

        // A delivery racing the unsubscribe still reaches the callback.
        let envelope = SyncEnvelope::new(Patch::default(), OriginId::new(), doc());
        listener.on_message(sub.topic(), envelope.encode().unwrap());

        assert!(peer.received().is_empty());
        assert_eq!(fx.deliver(envelope).await, 0);
    }

    #[tokio::test]
    async fn test_failed_registration_returns_to_unregistered() {
        let fx = Fixture::new();
        let broker = ChaosBroker::new(
            fx.broker.clone(),
            ChaosConfig::new().with_subscribe_failures(true),
        );
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());

        let result = sub.subscribe(&broker).await;
        assert!(matches!(result, Err(Error::Broker { .. })));
        assert_eq!(sub.state(), SubscriptionState::Unregistered);

        // no automatic retry; an explicit second attempt works once the broker recovers
        broker.config().set_subscribe_failures(false);
        assert!(sub.subscribe(&broker).await.is_ok());
    }

    /// Broker whose `subscribe` waits for a token on `gate` before registering.
    struct GatedBroker {
        inner: MemoryBroker,
        gate: async_channel::Receiver<()>,
    }

    impl Broker for GatedBroker {
        type Error = crate::broker::MemoryBrokerError;

        async fn publish(
            &self,
            topic: &Topic,
            payload: Bytes,
        ) -> std::result::Result<usize, Self::Error> {
            self.inner.publish(topic, payload).await
        }

        async fn subscribe(
            &self,
            topic: &Topic,
            listener: Arc<dyn TopicListener>,
        ) -> std::result::Result<ListenerId, Self::Error> {
            let _ = self.gate.recv().await;
            self.inner.subscribe(topic, listener).await
        }

        async fn unsubscribe(
            &self,
            topic: &Topic,
            listener: ListenerId,
        ) -> std::result::Result<bool, Self::Error> {
            self.inner.unsubscribe(topic, listener).await
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_during_registration_releases_listener() {
        let fx = Fixture::new();
        let peer = fx.stack(OriginId::new());
        let (open, gate) = async_channel::bounded(1);
        let broker = GatedBroker {
            inner: fx.broker.clone(),
            gate,
        };
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());

        // join! polls the subscribe first, so it is parked on the gate while
        // the unsubscribe runs.
        let (registered, ()) = tokio::join!(sub.subscribe(&broker), async {
            assert_eq!(sub.state(), SubscriptionState::Registering);
            sub.unsubscribe(&broker).await.unwrap();
            open.send(()).await.unwrap();
        });

        assert!(matches!(registered, Err(Error::Config(_))));
        assert_eq!(sub.state(), SubscriptionState::Unregistered);
        assert_eq!(fx.broker.listener_count(sub.topic()), 0);

        // an explicit re-subscribe afterwards forwards again
        open.try_send(()).unwrap();
        let id = sub.subscribe(&broker).await.unwrap();
        assert_eq!(sub.state(), SubscriptionState::Active(id));

        let receivers = fx
            .deliver(SyncEnvelope::new(Patch::default(), OriginId::new(), doc()))
            .await;
        assert_eq!(receivers, 1);
        assert_eq!(peer.received().len(), 1);
        assert_eq!(sub.stats().forwarded, 1);
    }

    #[tokio::test]
    async fn test_oversized_delivery_ignored() {
        let fx = Fixture::new();
        let peer = fx.stack(OriginId::new());
        let config = ClusterConfig::default().with_max_envelope_size(64);
        let sub = fx.subscription(OriginId::new(), &config);
        sub.subscribe(&fx.broker).await.unwrap();

        // a well-formed envelope that is simply too large
        let envelope = SyncEnvelope::new(Patch::default(), OriginId::new(), doc());
        let payload = envelope.encode().unwrap();
        assert!(payload.len() > 64);
        fx.broker.publish(sub.topic(), payload).await.unwrap();

        assert!(peer.received().is_empty());
        assert_eq!(sub.stats().decode_errors, 1);
        assert_eq!(sub.stats().delivered, 0);
        assert_eq!(sub.stats().forwarded, 0);
    }

    #[tokio::test]
    async fn test_envelope_for_other_entity_ignored() {
        let fx = Fixture::new();
        let peer = fx.stack(OriginId::new());
        let sub = fx.subscription(OriginId::new(), &ClusterConfig::default());
        sub.subscribe(&fx.broker).await.unwrap();

        let other = EntityRef::new("document", "doc-2").unwrap();
        let envelope = SyncEnvelope::new(Patch::default(), OriginId::new(), other);
        fx.broker
            .publish(sub.topic(), envelope.encode().unwrap())
            .await
            .unwrap();

        assert!(peer.received().is_empty());
        assert_eq!(sub.stats().delivered, 1);
        assert_eq!(sub.stats().ignored, 1);
        assert_eq!(sub.stats().forwarded, 0);
    }
}
