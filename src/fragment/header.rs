//! Wire representation of a single fragment.
//!
//! Layout, all fields in network byte order:
//!
//! ```text
//! | size u16 | type u16 | fragment_id u32 | total_size u16 | offset u16 | payload ... |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::FragmentId;
use crate::{
    error::WireError,
    message::{MESSAGE_HEADER_SIZE, MessageHeader, MessageType},
};

/// Encoded length of a fragment header, message header included.
pub const FRAGMENT_HEADER_SIZE: usize = MESSAGE_HEADER_SIZE + 8;

/// The original message's size field, kept as the two bytes that appeared
/// on the wire.
///
/// The sender never re-derives this value: it lifts the bytes out of the
/// original message and writes them back unchanged into every fragment.
///
/// # Examples
///
/// ```
/// use fragwire::fragment::EncodedSize;
/// let size = EncodedSize::copy_from_message(&[0x0b, 0xb8, 0, 1]).expect("header present");
/// assert_eq!(size.as_bytes(), [0x0b, 0xb8]);
/// assert_eq!(size.get(), 3000);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EncodedSize([u8; 2]);

impl EncodedSize {
    /// Copy the size field out of an encoded message.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] when `message` is shorter than the
    /// size field.
    pub fn copy_from_message(message: &[u8]) -> Result<Self, WireError> {
        match message {
            [hi, lo, ..] => Ok(Self([*hi, *lo])),
            _ => Err(WireError::Truncated {
                needed: 2,
                available: message.len(),
            }),
        }
    }

    /// Wrap two bytes read from a fragment header.
    #[must_use]
    pub const fn from_wire(bytes: [u8; 2]) -> Self { Self(bytes) }

    /// The raw network-order bytes.
    #[must_use]
    pub const fn as_bytes(self) -> [u8; 2] { self.0 }

    /// Decode the size for validation.
    #[must_use]
    pub const fn get(self) -> u16 { u16::from_be_bytes(self.0) }
}

/// Fixed fields of a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FragmentHeader {
    fragment_id: FragmentId,
    total_size: EncodedSize,
    offset: u16,
}

impl FragmentHeader {
    /// Create a header for the fragment at byte `offset` of a message whose
    /// encoded size field is `total_size`.
    #[must_use]
    pub const fn new(fragment_id: FragmentId, total_size: EncodedSize, offset: u16) -> Self {
        Self {
            fragment_id,
            total_size,
            offset,
        }
    }

    /// Identifier shared by all fragments of the message.
    #[must_use]
    pub const fn fragment_id(&self) -> FragmentId { self.fragment_id }

    /// The original message's size field.
    #[must_use]
    pub const fn total_size(&self) -> EncodedSize { self.total_size }

    /// Byte offset of the payload within the reassembled message.
    #[must_use]
    pub const fn offset(&self) -> u16 { self.offset }
}

/// A fragment header together with its slice of the original message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    header: FragmentHeader,
    payload: Bytes,
    size: u16,
}

impl Fragment {
    /// Pair `header` with `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::TooLarge`] when the encoded fragment would not fit
    /// the 16-bit size field.
    pub fn new(header: FragmentHeader, payload: Bytes) -> Result<Self, WireError> {
        let encoded = FRAGMENT_HEADER_SIZE + payload.len();
        let size = u16::try_from(encoded).map_err(|_| WireError::TooLarge { size: encoded })?;
        Ok(Self {
            header,
            payload,
            size,
        })
    }

    /// Return the header.
    #[must_use]
    pub const fn header(&self) -> &FragmentHeader { &self.header }

    /// Return the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Encoded size, header included.
    #[must_use]
    pub const fn encoded_len(&self) -> usize { self.size as usize }

    /// Serialise the fragment for the transport.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        MessageHeader::new(self.size, MessageType::FRAGMENT).write(&mut buf);
        buf.put_u32(self.header.fragment_id.get());
        buf.put_slice(&self.header.total_size.as_bytes());
        buf.put_u16(self.header.offset);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a fragment datagram. The payload shares `frame`'s allocation.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] when the datagram is shorter than a fragment
    /// header, is not of type [`MessageType::FRAGMENT`], or its size field
    /// disagrees with its length.
    pub fn decode(frame: Bytes) -> Result<Self, WireError> {
        if frame.len() < FRAGMENT_HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: FRAGMENT_HEADER_SIZE,
                available: frame.len(),
            });
        }
        let message = MessageHeader::expect(&frame, MessageType::FRAGMENT)?;
        let mut fields = &frame[MESSAGE_HEADER_SIZE..FRAGMENT_HEADER_SIZE];
        let fragment_id = FragmentId::new(fields.get_u32());
        let total_size = EncodedSize::from_wire([fields.get_u8(), fields.get_u8()]);
        let offset = fields.get_u16();
        Ok(Self {
            header: FragmentHeader::new(fragment_id, total_size, offset),
            payload: frame.slice(FRAGMENT_HEADER_SIZE..),
            size: message.size(),
        })
    }
}
