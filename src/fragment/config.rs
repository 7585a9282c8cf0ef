//! Configuration shared by fragment senders and reassembly registries.

use std::{num::NonZeroUsize, time::Duration};

use super::{DEFAULT_PEER_CAPACITY, FRAGMENT_HEADER_SIZE, MIN_MTU, SenderParams};

/// Default datagram budget.
pub const DEFAULT_MTU: usize = 1400;

/// Default number of concurrent reassembly streams per peer.
pub const DEFAULT_MAX_CONCURRENT_MESSAGES: usize = 4;

/// Settings that bound fragment sizes, initial timing and reassembly
/// resource usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentationConfig {
    /// Largest datagram the transport accepts, fragment header included.
    pub mtu: usize,
    /// Streams each peer's reassembler tracks before evicting the oldest.
    pub max_concurrent_messages: NonZeroUsize,
    /// Peers tracked by a registry before evicting the least recently active.
    pub peer_capacity: NonZeroUsize,
    /// Inter-fragment delay for senders with nothing learned yet.
    pub initial_msg_delay: Duration,
    /// Acknowledgement latency estimate for senders with nothing learned yet.
    pub initial_ack_delay: Duration,
}

impl FragmentationConfig {
    /// Default configuration for a transport with the given MTU.
    ///
    /// Returns `None` when `mtu` cannot carry the minimum fragment payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use fragwire::fragment::FragmentationConfig;
    /// let config = FragmentationConfig::for_mtu(1396).expect("large enough");
    /// assert_eq!(config.payload_per_fragment(), 1384);
    /// assert!(FragmentationConfig::for_mtu(576).is_none());
    /// ```
    #[must_use]
    pub fn for_mtu(mtu: usize) -> Option<Self> {
        if mtu < MIN_MTU {
            return None;
        }
        Some(Self {
            mtu,
            ..Self::default()
        })
    }

    /// Payload bytes carried by each full fragment.
    #[must_use]
    pub const fn payload_per_fragment(&self) -> usize {
        self.mtu.saturating_sub(FRAGMENT_HEADER_SIZE)
    }

    /// Sender parameters seeded with the initial delays.
    #[must_use]
    pub fn sender_params(&self) -> SenderParams {
        SenderParams::new(self.mtu, self.initial_msg_delay, self.initial_ack_delay)
    }
}

impl Default for FragmentationConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            max_concurrent_messages: NonZeroUsize::new(DEFAULT_MAX_CONCURRENT_MESSAGES)
                .unwrap_or(NonZeroUsize::MIN),
            peer_capacity: NonZeroUsize::new(DEFAULT_PEER_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            initial_msg_delay: Duration::from_millis(50),
            initial_ack_delay: Duration::from_millis(100),
        }
    }
}
