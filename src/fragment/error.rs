//! Error and status types emitted by the fragmentation layer.
//!
//! Rejections never mutate sender or reassembler state; callers can log and
//! drop the offending datagram.

use thiserror::Error;

use super::FragmentId;
use crate::error::WireError;

/// Result of feeding an acknowledgement into a
/// [`FragmentSender`](crate::fragment::FragmentSender).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckStatus {
    /// Every fragment has been acknowledged; the owner may destroy the sender.
    Done,
    /// Fragments remain outstanding and retransmission continues.
    Pending,
    /// The acknowledgement belongs to another message.
    Foreign,
}

/// Result of feeding a fragment into a
/// [`Reassembler`](crate::fragment::Reassembler).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentStatus {
    /// New bytes were stored. `complete` is `true` when this fragment
    /// finished the message and it was delivered.
    Accepted { complete: bool },
    /// Every byte addressed by the fragment was already present.
    Duplicate,
}

/// Errors produced while creating a fragment sender.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FragmentationError {
    /// The MTU leaves less than the minimum payload per fragment.
    #[error("mtu {mtu} is below the minimum of {minimum}")]
    MtuTooSmall { mtu: usize, minimum: usize },
    /// The message is shorter than its own header.
    #[error("message of {len} bytes is shorter than a message header")]
    MessageTooShort { len: usize },
    /// Splitting the message would need more fragments than the ACK bitmap
    /// can describe.
    #[error("message needs {needed} fragments, at most {limit} are supported")]
    TooManyFragments { needed: usize, limit: usize },
    /// The message framing is inconsistent.
    #[error("invalid message: {0}")]
    Message(#[from] WireError),
}

/// Reasons a received fragment is rejected as malformed.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FragmentError {
    /// The datagram is not a well-formed fragment message.
    #[error("malformed fragment: {0}")]
    Wire(#[from] WireError),
    /// The datagram is larger than the configured MTU.
    #[error("fragment of {size} bytes exceeds mtu {mtu}")]
    ExceedsMtu { size: usize, mtu: usize },
    /// The declared total size cannot hold a message header.
    #[error("declared message size {total_size} is too small")]
    TotalSizeTooSmall { total_size: u16 },
    /// The offset points at or past the end of the message.
    #[error("offset {offset} lies outside a message of {total_size} bytes")]
    OffsetOutOfRange { offset: u16, total_size: u16 },
    /// The offset does not fall on a fragment boundary.
    #[error("offset {offset} is not a multiple of the fragment payload size {stride}")]
    MisalignedOffset { offset: u16, stride: usize },
    /// The offset implies a fragment index beyond the ACK bitmap.
    #[error("offset {offset} maps to fragment index {index}, beyond the bitmap")]
    IndexOutOfRange { offset: u16, index: usize },
    /// The payload runs past the declared end of the message.
    #[error("payload of {len} bytes at offset {offset} overruns a message of {total_size} bytes")]
    PayloadOverrun {
        offset: u16,
        len: usize,
        total_size: u16,
    },
    /// The payload does not have the length its position requires.
    #[error("fragment at offset {offset} carries {len} bytes, expected {expected}")]
    LengthMismatch {
        offset: u16,
        len: usize,
        expected: usize,
    },
    /// The fragment disagrees with earlier fragments about the message size.
    #[error("fragment {fragment_id} declares size {found}, stream expects {expected}")]
    InconsistentTotalSize {
        fragment_id: FragmentId,
        expected: u16,
        found: u16,
    },
}
