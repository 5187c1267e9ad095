//! Metrics for the distribution layer.
//!
//! ## Available Metrics
//!
//! ### Counters
//! - `diffsync_envelopes_published_total` - Envelopes accepted by the broker
//! - `diffsync_publish_failures_total` - Publishes the broker or codec rejected
//! - `diffsync_publish_dropped_total` - Publishes dropped because the queue was full or closed
//! - `diffsync_envelopes_delivered_total` - Envelopes delivered to a subscription
//! - `diffsync_echoes_suppressed_total` - Envelopes dropped by the self-origin filter
//! - `diffsync_messages_forwarded_total` - Messages handed to local stacks
//! - `diffsync_decode_failures_total` - Delivered payloads that failed to decode
//!
//! ### Histograms
//! - `diffsync_envelope_size_bytes` - Encoded envelope size distribution
//! - `diffsync_publish_receivers` - Receivers reported by the broker per publish
//!
//! ### Gauges
//! - `diffsync_active_subscriptions` - Subscriptions currently registered with the broker

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initialize metric descriptions.
///
/// Call this once at application startup to register all metric descriptions.
pub fn init_metrics() {
    describe_counter!(
        "diffsync_envelopes_published_total",
        "Total number of envelopes accepted by the broker"
    );
    describe_counter!(
        "diffsync_publish_failures_total",
        "Total number of publishes rejected by the broker or the codec"
    );
    describe_counter!(
        "diffsync_publish_dropped_total",
        "Total number of publishes dropped before reaching the broker"
    );
    describe_counter!(
        "diffsync_envelopes_delivered_total",
        "Total number of envelopes delivered to subscriptions"
    );
    describe_counter!(
        "diffsync_echoes_suppressed_total",
        "Total number of self-originated envelopes dropped"
    );
    describe_counter!(
        "diffsync_messages_forwarded_total",
        "Total number of messages forwarded to local stacks"
    );
    describe_counter!(
        "diffsync_decode_failures_total",
        "Total number of delivered payloads that failed to decode"
    );
    describe_histogram!(
        "diffsync_envelope_size_bytes",
        "Encoded envelope size in bytes"
    );
    describe_histogram!(
        "diffsync_publish_receivers",
        "Number of receivers reported per publish"
    );
    describe_gauge!(
        "diffsync_active_subscriptions",
        "Number of subscriptions registered with the broker"
    );
}

/// Record an envelope accepted by the broker.
pub fn record_published(size: usize, receivers: usize) {
    counter!("diffsync_envelopes_published_total").increment(1);
    histogram!("diffsync_envelope_size_bytes").record(size as f64);
    histogram!("diffsync_publish_receivers").record(receivers as f64);
}

/// Record a publish failure.
pub fn record_publish_failure() {
    counter!("diffsync_publish_failures_total").increment(1);
}

/// Record a publish dropped before reaching the broker.
pub fn record_publish_dropped() {
    counter!("diffsync_publish_dropped_total").increment(1);
}

/// Record an envelope delivered to a subscription.
pub fn record_delivered() {
    counter!("diffsync_envelopes_delivered_total").increment(1);
}

/// Record a suppressed self-originated envelope.
pub fn record_echo_suppressed() {
    counter!("diffsync_echoes_suppressed_total").increment(1);
}

/// Record messages forwarded to local stacks.
pub fn record_forwarded(count: usize) {
    counter!("diffsync_messages_forwarded_total").increment(count as u64);
}

/// Record a payload that failed to decode.
pub fn record_decode_failure() {
    counter!("diffsync_decode_failures_total").increment(1);
}

/// A subscription became active.
pub fn subscription_activated() {
    gauge!("diffsync_active_subscriptions").increment(1.0);
}

/// A subscription was removed.
pub fn subscription_deactivated() {
    gauge!("diffsync_active_subscriptions").decrement(1.0);
}
