#![doc(html_root_url = "https://docs.rs/fragwire/latest")]
//! Public API for the `fragwire` library.
//!
//! This crate splits messages too large for a datagram transport into
//! MTU-sized fragments, retransmits them in rounds until the receiver
//! acknowledges every fragment, and reassembles them on the other side.
//! Time, rate limiting and statistics are injected collaborators, so the
//! engine runs on any single-threaded event loop.

pub mod bandwidth;
pub mod error;
pub mod fragment;
pub mod message;
pub mod metrics;
pub mod scheduler;

pub use bandwidth::{BandwidthTracker, RateTracker};
pub use error::WireError;
pub use fragment::{
    AckStatus,
    CallbackSink,
    FragmentAck,
    FragmentError,
    FragmentId,
    FragmentMask,
    FragmentSender,
    FragmentStatus,
    FragmentationConfig,
    FragmentationError,
    LearnedDelays,
    Reassembler,
    ReassemblyRegistry,
    ReassemblySink,
    SenderParams,
};
pub use message::{MessageType, encode_message};
#[cfg(feature = "metrics")]
pub use metrics::MetricsStats;
pub use metrics::{NoopStats, StatsSink};
pub use scheduler::{Clock, LocalTokioScheduler, ManualScheduler, Scheduler, TaskHandle};
