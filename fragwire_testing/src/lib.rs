//! Test doubles and harnesses for exercising `fragwire` end to end.
//!
//! The collaborators here record what the engine does instead of touching a
//! network or a metrics backend. [`Loopback`] wires a sender to a
//! reassembler through two lossy in-memory channels on a
//! [`ManualScheduler`](fragwire::ManualScheduler), so retransmission
//! behaviour can be asserted deterministically.
//!
//! ```rust
//! use fragwire::{FragmentationConfig, encode_message, MessageType};
//! use fragwire_testing::{LossyChannel, Loopback};
//!
//! let config = FragmentationConfig::default();
//! let message = encode_message(MessageType::new(600), &[1; 5000]).unwrap();
//! let mut link = Loopback::new(&config, &message, LossyChannel::perfect(), LossyChannel::perfect())
//!     .unwrap();
//! let outcome = link.run(1_000);
//! assert!(outcome.completed);
//! ```

pub mod link;
pub mod logging;
pub mod sink;
pub mod stats;
pub mod tracker;

pub use link::{Loopback, LoopbackOutcome, LossyChannel, fragments_of};
pub use logging::{LoggerHandle, logger};
pub use sink::{CollectingSink, SharedSink};
pub use stats::RecordingStats;
pub use tracker::ScriptedTracker;
