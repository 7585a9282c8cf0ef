//! Arithmetic describing how a message maps onto fragments.
//!
//! Sender and reassembler share [`FragmentLayout`] so both sides agree on
//! fragment boundaries without exchanging anything but the MTU out of band.

use std::ops::Range;

use super::{FRAGMENT_HEADER_SIZE, FragmentIndex, FragmentMask, FragmentationError, MAX_FRAGMENTS};
use crate::message::MESSAGE_HEADER_SIZE;

/// Smallest payload a single fragment must be able to carry.
pub const MIN_FRAGMENT_PAYLOAD: usize = 1024;

/// Smallest MTU accepted by the fragment sender.
pub const MIN_MTU: usize = MIN_FRAGMENT_PAYLOAD + FRAGMENT_HEADER_SIZE;

/// Fragment boundaries of one message.
///
/// # Examples
///
/// ```
/// use fragwire::fragment::{FragmentIndex, FragmentLayout};
/// let layout = FragmentLayout::new(1396, 3000).expect("valid layout");
/// assert_eq!(layout.stride(), 1384);
/// assert_eq!(layout.fragment_count(), 3);
/// let last = FragmentIndex::new(2).expect("in range");
/// assert_eq!(layout.offset(last), 2768);
/// assert_eq!(layout.payload_len(last), 232);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentLayout {
    stride: usize,
    message_len: usize,
    count: usize,
}

impl FragmentLayout {
    /// Compute the layout of a `message_len` byte message sent with `mtu`.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::MtuTooSmall`] when `mtu` is below
    /// [`MIN_MTU`], [`FragmentationError::MessageTooShort`] when the message
    /// cannot hold its own header, and
    /// [`FragmentationError::TooManyFragments`] when more than
    /// [`MAX_FRAGMENTS`] fragments would be needed.
    pub fn new(mtu: usize, message_len: usize) -> Result<Self, FragmentationError> {
        if mtu < MIN_MTU {
            return Err(FragmentationError::MtuTooSmall {
                mtu,
                minimum: MIN_MTU,
            });
        }
        if message_len < MESSAGE_HEADER_SIZE {
            return Err(FragmentationError::MessageTooShort { len: message_len });
        }
        let stride = mtu - FRAGMENT_HEADER_SIZE;
        Self::with_stride(stride, message_len).ok_or(FragmentationError::TooManyFragments {
            needed: message_len.div_ceil(stride),
            limit: MAX_FRAGMENTS,
        })
    }

    /// Layout for a given per-fragment payload size, without the sender's MTU
    /// floor. Returns `None` when the message needs more than
    /// [`MAX_FRAGMENTS`] fragments or `stride` is zero.
    pub(crate) fn with_stride(stride: usize, message_len: usize) -> Option<Self> {
        if stride == 0 {
            return None;
        }
        let count = message_len.div_ceil(stride);
        (count <= MAX_FRAGMENTS).then_some(Self {
            stride,
            message_len,
            count,
        })
    }

    /// Payload bytes carried by every fragment except possibly the last.
    #[must_use]
    pub const fn stride(&self) -> usize { self.stride }

    /// Length of the whole message.
    #[must_use]
    pub const fn message_len(&self) -> usize { self.message_len }

    /// Number of fragments the message is split into.
    #[must_use]
    pub const fn fragment_count(&self) -> usize { self.count }

    /// Mask with one bit per fragment.
    #[must_use]
    pub fn acks_mask(&self) -> FragmentMask {
        FragmentMask::for_count(self.count).unwrap_or(FragmentMask::EMPTY)
    }

    /// Byte offset of fragment `index` within the message.
    #[must_use]
    pub const fn offset(&self, index: FragmentIndex) -> usize { index.get() * self.stride }

    /// Byte range of the message carried by fragment `index`.
    #[must_use]
    pub fn payload_range(&self, index: FragmentIndex) -> Range<usize> {
        let start = self.offset(index).min(self.message_len);
        let end = (start + self.stride).min(self.message_len);
        start..end
    }

    /// Payload length of fragment `index`; the last fragment carries the
    /// remainder.
    #[must_use]
    pub fn payload_len(&self, index: FragmentIndex) -> usize { self.payload_range(index).len() }

    /// Encoded size of fragment `index`, header included.
    #[must_use]
    pub fn encoded_len(&self, index: FragmentIndex) -> usize {
        self.payload_len(index) + FRAGMENT_HEADER_SIZE
    }
}
