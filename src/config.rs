//! Configuration for the distribution layer.

use serde::{Deserialize, Serialize};

/// Configuration options shared by the producer, subscriptions and node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Capacity of the producer's outbound queue.
    ///
    /// Publishing never waits for room in the queue: when it is full the
    /// envelope is logged and dropped.
    ///
    /// Default: 1024
    pub publish_queue_capacity: usize,

    /// Maximum encoded envelope size.
    ///
    /// Larger envelopes are refused by the producer and ignored when
    /// delivered by the broker.
    ///
    /// Default: 64KB
    pub max_envelope_size: usize,

    /// Whether acknowledgements received from other servers are forwarded
    /// to local stacks.
    ///
    /// Deployed peers only forward patches across servers; acks are handled
    /// where they enter a stack's own channel. Enable this only when every
    /// server in the cluster agrees on cross-server ack handling.
    ///
    /// Default: false
    pub forward_acks: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            publish_queue_capacity: 1024,
            max_envelope_size: 64 * 1024, // 64KB
            forward_acks: false,
        }
    }
}

impl ClusterConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the publish queue capacity (builder pattern).
    pub const fn with_publish_queue_capacity(mut self, capacity: usize) -> Self {
        self.publish_queue_capacity = capacity;
        self
    }

    /// Set the maximum envelope size (builder pattern).
    pub const fn with_max_envelope_size(mut self, size: usize) -> Self {
        self.max_envelope_size = size;
        self
    }

    /// Enable or disable cross-server ack forwarding (builder pattern).
    pub const fn with_forward_acks(mut self, enable: bool) -> Self {
        self.forward_acks = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.publish_queue_capacity, 1024);
        assert_eq!(config.max_envelope_size, 64 * 1024);
        assert!(!config.forward_acks);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ClusterConfig::new()
            .with_publish_queue_capacity(16)
            .with_max_envelope_size(4096)
            .with_forward_acks(true);

        assert_eq!(config.publish_queue_capacity, 16);
        assert_eq!(config.max_envelope_size, 4096);
        assert!(config.forward_acks);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ClusterConfig = serde_json::from_str(r#"{"forward_acks": true}"#).unwrap();
        assert!(config.forward_acks);
        assert_eq!(config.publish_queue_capacity, 1024);
    }
}
