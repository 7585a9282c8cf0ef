//! Generic message framing shared by every wire type in the crate.
//!
//! Each message starts with a four byte header carrying its total size and
//! its type, both in network byte order. Application messages handed to the
//! fragment sender use the same framing, which is why the fragment header can
//! copy the original size field verbatim.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_more::{Display, From, Into};

use crate::error::WireError;

/// Encoded length of a [`MessageHeader`].
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// Numeric message type carried in every [`MessageHeader`].
///
/// # Examples
///
/// ```
/// use fragwire::message::MessageType;
/// assert_eq!(MessageType::FRAGMENT.get(), 18);
/// assert_eq!(MessageType::from(19), MessageType::FRAGMENT_ACK);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, From, Into)]
#[display("{_0}")]
pub struct MessageType(u16);

impl MessageType {
    /// A single fragment of an oversized message.
    pub const FRAGMENT: Self = Self(18);
    /// Cumulative acknowledgement for a fragmented message.
    pub const FRAGMENT_ACK: Self = Self(19);

    /// Create a message type from its numeric value.
    #[must_use]
    pub const fn new(value: u16) -> Self { Self(value) }

    /// Return the numeric value.
    #[must_use]
    pub const fn get(self) -> u16 { self.0 }
}

/// Size and type prefix of every message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    size: u16,
    kind: MessageType,
}

impl MessageHeader {
    /// Create a header announcing `size` total bytes of type `kind`.
    #[must_use]
    pub const fn new(size: u16, kind: MessageType) -> Self { Self { size, kind } }

    /// Total size of the message, header included.
    #[must_use]
    pub const fn size(&self) -> u16 { self.size }

    /// Message type.
    #[must_use]
    pub const fn kind(&self) -> MessageType { self.kind }

    /// Parse the header at the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] when fewer than
    /// [`MESSAGE_HEADER_SIZE`] bytes are available.
    pub fn parse(mut bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < MESSAGE_HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: MESSAGE_HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let size = bytes.get_u16();
        let kind = MessageType::new(bytes.get_u16());
        Ok(Self { size, kind })
    }

    /// Append the encoded header to `buf`.
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.size);
        buf.put_u16(self.kind.get());
    }

    /// Parse the header of `bytes` and check it against the expected type and
    /// the actual slice length.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnexpectedType`] or [`WireError::SizeMismatch`]
    /// when the header disagrees with the caller's expectations.
    pub fn expect(bytes: &[u8], kind: MessageType) -> Result<Self, WireError> {
        let header = validate_message(bytes)?;
        if header.kind != kind {
            return Err(WireError::UnexpectedType {
                expected: kind,
                found: header.kind,
            });
        }
        Ok(header)
    }
}

/// Check that `bytes` holds exactly one message whose size field matches the
/// slice length.
///
/// # Errors
///
/// Returns [`WireError::Truncated`] for slices shorter than a header and
/// [`WireError::SizeMismatch`] when the declared size differs from the slice
/// length.
pub fn validate_message(bytes: &[u8]) -> Result<MessageHeader, WireError> {
    let header = MessageHeader::parse(bytes)?;
    if usize::from(header.size) != bytes.len() {
        return Err(WireError::SizeMismatch {
            declared: usize::from(header.size),
            actual: bytes.len(),
        });
    }
    Ok(header)
}

/// Build a framed message of type `kind` around `body`.
///
/// # Errors
///
/// Returns [`WireError::TooLarge`] when header and body together exceed
/// `u16::MAX` bytes.
///
/// # Examples
///
/// ```
/// use fragwire::message::{MessageType, encode_message};
/// let message = encode_message(MessageType::new(600), b"hello").expect("fits");
/// assert_eq!(&message[..4], &[0, 9, 2, 88]);
/// ```
pub fn encode_message(kind: MessageType, body: &[u8]) -> Result<Bytes, WireError> {
    let total = MESSAGE_HEADER_SIZE + body.len();
    let size = u16::try_from(total).map_err(|_| WireError::TooLarge { size: total })?;
    let mut buf = BytesMut::with_capacity(total);
    MessageHeader::new(size, kind).write(&mut buf);
    buf.put_slice(body);
    Ok(buf.freeze())
}
