//! Statistics capability injected into senders and reassemblers.
//!
//! Components never touch a global counter registry directly. They report
//! through a [`StatsSink`] handed to their constructor, using the counter
//! names defined here. [`MetricsStats`] forwards to the
//! [`metrics`](https://docs.rs/metrics) facade; [`NoopStats`] discards
//! everything.

/// Fragments handed to the transport.
pub const FRAGMENTS_TRANSMITTED: &str = "fragwire_fragments_transmitted_total";
/// Fragments sent again after their message completed a full round.
pub const FRAGMENTS_RETRANSMITTED: &str = "fragwire_fragments_retransmitted_total";
/// Rounds completed by the round-robin cursor.
pub const ROUND_WRAPS: &str = "fragwire_round_wraps_total";
/// Acknowledgements accepted by a sender.
pub const ACKS_RECEIVED: &str = "fragwire_acks_received_total";
/// Acknowledgement bits reporting fragments the sender no longer considers
/// pending.
pub const ACK_BITS_DISCARDED: &str = "fragwire_ack_bits_discarded_total";
/// Messages whose every fragment was acknowledged.
pub const TRANSMISSIONS_COMPLETED: &str = "fragwire_transmissions_completed_total";
/// Fragments accepted by a reassembler.
pub const FRAGMENTS_RECEIVED: &str = "fragwire_fragments_received_total";
/// Fragments whose bytes were already present.
pub const DUPLICATE_FRAGMENTS: &str = "fragwire_duplicate_fragments_total";
/// Messages reassembled and delivered.
pub const MESSAGES_DEFRAGMENTED: &str = "fragwire_messages_defragmented_total";
/// Acknowledgements emitted by a reassembler.
pub const ACKS_SENT: &str = "fragwire_acks_sent_total";
/// Reassembly streams dropped to make room for a new one.
pub const STREAMS_EVICTED: &str = "fragwire_reassembly_streams_evicted_total";
/// Per-peer reassembly contexts dropped to admit a new peer.
pub const PEERS_EVICTED: &str = "fragwire_peer_contexts_evicted_total";

/// Receiver of named counter increments.
pub trait StatsSink {
    /// Add `delta` to the counter called `name`.
    fn update(&self, name: &'static str, delta: u64);
}

/// Sink that ignores every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn update(&self, _name: &'static str, _delta: u64) {}
}

/// Sink forwarding every update to the installed `metrics` recorder.
#[cfg(feature = "metrics")]
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsStats;

#[cfg(feature = "metrics")]
impl StatsSink for MetricsStats {
    fn update(&self, name: &'static str, delta: u64) { metrics::counter!(name).increment(delta); }
}
