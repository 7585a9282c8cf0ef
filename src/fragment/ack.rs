//! Cumulative acknowledgement sent by the reassembler.
//!
//! Layout, all fields in network byte order:
//!
//! ```text
//! | size u16 = 16 | type u16 | fragment_id u32 | bits u64 |
//! ```
//!
//! Bit `i` of `bits` is set while fragment `i` is still missing.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{FragmentId, FragmentMask};
use crate::{
    error::WireError,
    message::{MESSAGE_HEADER_SIZE, MessageHeader, MessageType},
};

/// Encoded length of a [`FragmentAck`].
pub const FRAGMENT_ACK_SIZE: usize = MESSAGE_HEADER_SIZE + 12;

/// Cumulative "still missing" report for one fragmented message.
///
/// # Examples
///
/// ```
/// use fragwire::fragment::{FragmentAck, FragmentId, FragmentMask};
/// let ack = FragmentAck::new(FragmentId::new(7), FragmentMask::from_bits(0b101));
/// let decoded = FragmentAck::decode(&ack.encode()).expect("well formed");
/// assert_eq!(decoded, ack);
/// assert_eq!(ack.to_string(), "ack 00000007: 2 missing {0,2}");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FragmentAck {
    fragment_id: FragmentId,
    missing: FragmentMask,
}

impl FragmentAck {
    /// Create an acknowledgement for `fragment_id`.
    #[must_use]
    pub const fn new(fragment_id: FragmentId, missing: FragmentMask) -> Self {
        Self {
            fragment_id,
            missing,
        }
    }

    /// Message the acknowledgement refers to.
    #[must_use]
    pub const fn fragment_id(&self) -> FragmentId { self.fragment_id }

    /// Fragments the receiver is still missing.
    #[must_use]
    pub const fn missing(&self) -> FragmentMask { self.missing }

    /// Serialise the acknowledgement.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAGMENT_ACK_SIZE);
        #[expect(
            clippy::cast_possible_truncation,
            reason = "FRAGMENT_ACK_SIZE is a 16 byte constant"
        )]
        MessageHeader::new(FRAGMENT_ACK_SIZE as u16, MessageType::FRAGMENT_ACK).write(&mut buf);
        buf.put_u32(self.fragment_id.get());
        buf.put_u64(self.missing.bits());
        buf.freeze()
    }

    /// Parse an acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] unless `bytes` is exactly one
    /// [`FRAGMENT_ACK_SIZE`] byte message of type
    /// [`MessageType::FRAGMENT_ACK`].
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        MessageHeader::expect(bytes, MessageType::FRAGMENT_ACK)?;
        if bytes.len() != FRAGMENT_ACK_SIZE {
            return Err(WireError::UnexpectedSize {
                expected: FRAGMENT_ACK_SIZE,
                actual: bytes.len(),
            });
        }
        let mut fields = &bytes[MESSAGE_HEADER_SIZE..];
        let fragment_id = FragmentId::new(fields.get_u32());
        let missing = FragmentMask::from_bits(fields.get_u64());
        Ok(Self::new(fragment_id, missing))
    }
}

impl fmt::Display for FragmentAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ack {}: {} missing {}",
            self.fragment_id,
            self.missing.count(),
            self.missing
        )
    }
}
