//! Fragmentation and reassembly of messages larger than the transport MTU.
//!
//! The outbound half is [`FragmentSender`], which owns one oversized message
//! and retransmits its fragments in rounds until a cumulative
//! [`FragmentAck`] reports that nothing is missing. The inbound half is
//! [`Reassembler`], which rebuilds messages from fragments arriving in any
//! order, and [`ReassemblyRegistry`], which keeps one reassembler per peer
//! address under a global bound.
//!
//! Both halves agree on fragment boundaries through [`FragmentLayout`]. The
//! acknowledgement bitmap is 64 bits wide, so a message never spans more
//! than [`MAX_FRAGMENTS`] fragments.

pub mod ack;
pub mod config;
pub mod error;
pub mod header;
pub mod id;
pub mod index;
pub mod layout;
pub mod reassembler;
pub mod registry;
pub mod sender;

pub use ack::{FRAGMENT_ACK_SIZE, FragmentAck};
pub use config::FragmentationConfig;
pub use error::{AckStatus, FragmentError, FragmentStatus, FragmentationError};
pub use header::{EncodedSize, FRAGMENT_HEADER_SIZE, Fragment, FragmentHeader};
pub use id::FragmentId;
pub use index::{FragmentIndex, FragmentMask, MAX_FRAGMENTS};
pub use layout::{FragmentLayout, MIN_FRAGMENT_PAYLOAD, MIN_MTU};
pub use reassembler::{CallbackSink, Reassembler, ReassemblySink};
pub use registry::{DEFAULT_PEER_CAPACITY, ReassemblyRegistry};
pub use sender::{FragmentSender, LearnedDelays, SenderParams, SharedTracker};
