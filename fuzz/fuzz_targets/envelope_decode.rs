//! Fuzz target for SyncEnvelope decoding.
//!
//! Arbitrary bytes delivered on a topic must never panic the decoder, and
//! anything it accepts must encode again.

#![no_main]

use diffsync_cluster::SyncEnvelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = SyncEnvelope::decode(data) else {
        return;
    };

    let encoded = envelope.encode().expect("decoded envelope must encode");
    let again = SyncEnvelope::decode(&encoded).expect("re-encoded envelope must decode");
    assert_eq!(again.origin(), envelope.origin());
    assert_eq!(again.entity(), envelope.entity());
    assert_eq!(again.message().kind(), envelope.message().kind());
});
