//! Subscription manager: the broker-facing entry point for subscriptions.

use std::sync::Arc;

use crate::{
    broker::{Broker, ListenerId},
    error::Result,
    subscription::TopicSubscription,
};

/// Registers and removes [`TopicSubscription`]s on a shared broker.
///
/// Both operations check that the subscription's topic resolves before
/// touching the broker; a subscription that fails that check is a
/// configuration fault and is reported as [`Error::Config`](crate::Error::Config).
pub struct SubscriptionManager<B> {
    broker: Arc<B>,
}

impl<B: Broker> SubscriptionManager<B> {
    /// Create a manager over `broker`.
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }

    /// The underlying broker.
    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Register `subscription` with the broker.
    ///
    /// Resolves to the broker-assigned listener id once registration
    /// completes. A broker failure is logged, returned, and leaves the
    /// subscription unregistered.
    pub async fn add(&self, subscription: &TopicSubscription) -> Result<ListenerId> {
        subscription.resolve_topic()?;
        subscription.subscribe(self.broker.as_ref()).await
    }

    /// Remove `subscription` from the broker.
    ///
    /// Broker failures are logged, not returned. Removing a subscription
    /// that is not active does nothing.
    pub async fn remove(&self, subscription: &TopicSubscription) -> Result<()> {
        subscription.resolve_topic()?;
        subscription.unsubscribe(self.broker.as_ref()).await
    }
}

impl<B> Clone for SubscriptionManager<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
        }
    }
}

impl<B> std::fmt::Debug for SubscriptionManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::MemoryBroker,
        config::ClusterConfig,
        message::{EntityRef, OriginId},
        registry::MemoryStackRegistry,
        subscription::SubscriptionState,
    };

    fn subscription() -> TopicSubscription {
        TopicSubscription::new(
            EntityRef::new("document", "abc").unwrap(),
            OriginId::new(),
            Arc::new(MemoryStackRegistry::new()),
            &ClusterConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_add_then_remove() {
        let broker = Arc::new(MemoryBroker::new());
        let manager = SubscriptionManager::new(broker.clone());
        let sub = subscription();

        let id = manager.add(&sub).await.unwrap();
        assert_eq!(sub.state(), SubscriptionState::Active(id));
        assert_eq!(broker.listener_count(sub.topic()), 1);

        manager.remove(&sub).await.unwrap();
        assert_eq!(broker.listener_count(sub.topic()), 0);
        assert_eq!(sub.state(), SubscriptionState::Unregistered);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let broker = Arc::new(MemoryBroker::new());
        let manager = SubscriptionManager::new(broker);
        let sub = subscription();

        manager.remove(&sub).await.unwrap();
        manager.add(&sub).await.unwrap();
        manager.remove(&sub).await.unwrap();
        manager.remove(&sub).await.unwrap();
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn test_remove_swallows_broker_errors() {
        let broker = Arc::new(MemoryBroker::new());
        let manager = SubscriptionManager::new(broker.clone());
        let sub = subscription();
        manager.add(&sub).await.unwrap();

        broker.close();
        assert!(manager.remove(&sub).await.is_ok());
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn test_add_reports_broker_errors() {
        let broker = Arc::new(MemoryBroker::new());
        broker.close();
        let manager = SubscriptionManager::new(broker);
        let sub = subscription();

        let err = manager.add(&sub).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(sub.state(), SubscriptionState::Unregistered);
    }
}
