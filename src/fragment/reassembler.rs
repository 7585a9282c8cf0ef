//! Inbound side: stitches fragments back into complete messages.
//!
//! A [`Reassembler`] tracks up to `num_msgs` streams keyed by
//! [`FragmentId`]. Fragments may arrive in any order and any number of
//! times. Every valid fragment, duplicates included, is answered with a
//! cumulative [`FragmentAck`] listing the fragments still missing, so a lost
//! acknowledgement is repaired by the next retransmission.
//!
//! Acknowledgements are handed to the sink as soon as each fragment is
//! processed; they are neither delayed nor coalesced. Hosts that want fewer
//! acknowledgements on the wire can buffer them in their [`ReassemblySink`]
//! and send only the latest per [`FragmentId`], since each one supersedes
//! the last.
//!
//! Finished streams release their buffer but keep their slot as a tombstone.
//! Late copies of a delivered message are then recognised as duplicates and
//! acknowledged as complete rather than opening a new stream.

use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
    num::NonZeroUsize,
    rc::Rc,
    time::Instant,
};

use bytes::Bytes;
use log::{debug, trace, warn};

use super::{
    FRAGMENT_HEADER_SIZE,
    Fragment,
    FragmentAck,
    FragmentError,
    FragmentId,
    FragmentIndex,
    FragmentLayout,
    FragmentMask,
    FragmentStatus,
    FragmentationError,
    MIN_MTU,
};
use crate::{
    message::MESSAGE_HEADER_SIZE,
    metrics::{
        ACKS_SENT,
        DUPLICATE_FRAGMENTS,
        FRAGMENTS_RECEIVED,
        MESSAGES_DEFRAGMENTED,
        STREAMS_EVICTED,
        StatsSink,
    },
};

/// Owner-side consumer of reassembled messages and acknowledgements.
pub trait ReassemblySink {
    /// Called exactly once per message with its complete bytes.
    fn deliver(&mut self, message: Bytes);

    /// Called after every accepted or duplicate fragment with the current
    /// "still missing" report, to be sent back to the peer.
    fn acknowledge(&mut self, ack: FragmentAck);
}

/// [`ReassemblySink`] built from two closures.
pub struct CallbackSink<D, A> {
    deliver: D,
    acknowledge: A,
}

impl<D, A> CallbackSink<D, A>
where
    D: FnMut(Bytes),
    A: FnMut(FragmentAck),
{
    /// Pair a delivery callback with an acknowledgement callback.
    pub fn new(deliver: D, acknowledge: A) -> Self {
        Self {
            deliver,
            acknowledge,
        }
    }
}

impl<D, A> ReassemblySink for CallbackSink<D, A>
where
    D: FnMut(Bytes),
    A: FnMut(FragmentAck),
{
    fn deliver(&mut self, message: Bytes) { (self.deliver)(message); }

    fn acknowledge(&mut self, ack: FragmentAck) { (self.acknowledge)(ack); }
}

impl<D, A> fmt::Debug for CallbackSink<D, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSink").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Stream {
    total_size: u16,
    missing: FragmentMask,
    buffer: Option<Vec<u8>>,
    last_update: Instant,
}

impl Stream {
    fn new(layout: &FragmentLayout, total_size: u16, now: Instant) -> Self {
        Self {
            total_size,
            missing: layout.acks_mask(),
            buffer: Some(vec![0; usize::from(total_size)]),
            last_update: now,
        }
    }

    fn is_complete(&self) -> bool { self.buffer.is_none() }
}

/// Fragment position and payload that passed validation.
struct Located {
    fragment_id: FragmentId,
    total_size: u16,
    index: FragmentIndex,
    layout: FragmentLayout,
    fragment: Fragment,
}

/// Bounded set of in-progress inbound streams.
pub struct Reassembler<S> {
    mtu: usize,
    stride: usize,
    capacity: NonZeroUsize,
    streams: HashMap<FragmentId, Stream>,
    stats: Rc<dyn StatsSink>,
    sink: S,
}

impl<S: ReassemblySink> Reassembler<S> {
    /// Create a reassembler for fragments of at most `mtu` bytes, holding at
    /// most `num_msgs` streams.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::MtuTooSmall`] when `mtu` is below
    /// [`MIN_MTU`].
    pub fn new(
        mtu: usize,
        num_msgs: NonZeroUsize,
        stats: Rc<dyn StatsSink>,
        sink: S,
    ) -> Result<Self, FragmentationError> {
        check_mtu(mtu)?;
        Ok(Self::with_checked_mtu(mtu, num_msgs, stats, sink))
    }

    /// Construct without re-validating an MTU already passed through
    /// [`check_mtu`].
    pub(crate) fn with_checked_mtu(
        mtu: usize,
        num_msgs: NonZeroUsize,
        stats: Rc<dyn StatsSink>,
        sink: S,
    ) -> Self {
        Self {
            mtu,
            stride: mtu - FRAGMENT_HEADER_SIZE,
            capacity: num_msgs,
            streams: HashMap::new(),
            stats,
            sink,
        }
    }

    /// Process a fragment datagram using the current time.
    ///
    /// # Errors
    ///
    /// See [`Reassembler::process_fragment_at`].
    pub fn process_fragment(&mut self, frame: Bytes) -> Result<FragmentStatus, FragmentError> {
        self.process_fragment_at(frame, Instant::now())
    }

    /// Process a fragment datagram using an explicit clock reading.
    ///
    /// Rejected fragments leave every stream untouched.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentError`] when the datagram is malformed, does not fit
    /// the fragment grid for this MTU, or disagrees with an existing stream
    /// about the message size.
    pub fn process_fragment_at(
        &mut self,
        frame: Bytes,
        now: Instant,
    ) -> Result<FragmentStatus, FragmentError> {
        let located = self
            .locate(frame)
            .inspect_err(|err| warn!("dropping malformed fragment: {err}"))?;
        self.stats.update(FRAGMENTS_RECEIVED, 1);

        let Located {
            fragment_id,
            total_size,
            index,
            layout,
            fragment,
        } = located;

        if !self.streams.contains_key(&fragment_id) && self.streams.len() >= self.capacity.get() {
            self.evict_oldest();
        }
        let stream = match self.streams.entry(fragment_id) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => vacant.insert(Stream::new(&layout, total_size, now)),
        };
        stream.last_update = now;

        let status = match stream.buffer.as_mut() {
            Some(buffer) if stream.missing.contains(index) => {
                buffer[layout.payload_range(index)].copy_from_slice(fragment.payload());
                stream.missing.remove(index);
                let complete = stream.missing.is_empty();
                if complete {
                    let message = stream.buffer.take().map(Bytes::from).unwrap_or_default();
                    self.stats.update(MESSAGES_DEFRAGMENTED, 1);
                    debug!("message {fragment_id} reassembled ({total_size} bytes)");
                    self.sink.deliver(message);
                }
                FragmentStatus::Accepted { complete }
            }
            _ => {
                self.stats.update(DUPLICATE_FRAGMENTS, 1);
                trace!("duplicate fragment {index} of message {fragment_id}");
                FragmentStatus::Duplicate
            }
        };

        let missing = self
            .streams
            .get(&fragment_id)
            .map_or(FragmentMask::EMPTY, |stream| stream.missing);
        self.stats.update(ACKS_SENT, 1);
        self.sink.acknowledge(FragmentAck::new(fragment_id, missing));
        Ok(status)
    }

    /// Fragments still missing for `fragment_id`, or `None` when no stream
    /// with that id is held. Completed streams report the empty set.
    #[must_use]
    pub fn missing(&self, fragment_id: FragmentId) -> Option<FragmentMask> {
        self.streams.get(&fragment_id).map(|stream| stream.missing)
    }

    /// Number of streams still waiting for fragments.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.streams
            .values()
            .filter(|stream| !stream.is_complete())
            .count()
    }

    /// Number of occupied slots, completed streams included.
    #[must_use]
    pub fn stream_count(&self) -> usize { self.streams.len() }

    /// Largest datagram accepted.
    #[must_use]
    pub const fn mtu(&self) -> usize { self.mtu }

    /// Borrow the sink.
    #[must_use]
    pub const fn sink(&self) -> &S { &self.sink }

    /// Mutably borrow the sink.
    pub fn sink_mut(&mut self) -> &mut S { &mut self.sink }

    /// Consume the reassembler, returning its sink.
    pub fn into_sink(self) -> S { self.sink }

    fn locate(&self, frame: Bytes) -> Result<Located, FragmentError> {
        if frame.len() > self.mtu {
            return Err(FragmentError::ExceedsMtu {
                size: frame.len(),
                mtu: self.mtu,
            });
        }
        let fragment = Fragment::decode(frame)?;
        let header = *fragment.header();
        let total_size = header.total_size().get();
        let offset = header.offset();
        if usize::from(total_size) < MESSAGE_HEADER_SIZE {
            return Err(FragmentError::TotalSizeTooSmall { total_size });
        }
        if offset >= total_size {
            return Err(FragmentError::OffsetOutOfRange { offset, total_size });
        }
        if usize::from(offset) % self.stride != 0 {
            return Err(FragmentError::MisalignedOffset {
                offset,
                stride: self.stride,
            });
        }
        let position = usize::from(offset) / self.stride;
        let index = FragmentIndex::new(position).ok_or(FragmentError::IndexOutOfRange {
            offset,
            index: position,
        })?;
        let len = fragment.payload().len();
        if usize::from(offset) + len > usize::from(total_size) {
            return Err(FragmentError::PayloadOverrun {
                offset,
                len,
                total_size,
            });
        }
        let layout = FragmentLayout::with_stride(self.stride, usize::from(total_size)).ok_or(
            FragmentError::IndexOutOfRange {
                offset,
                index: position,
            },
        )?;
        let expected = layout.payload_len(index);
        if len != expected {
            return Err(FragmentError::LengthMismatch {
                offset,
                len,
                expected,
            });
        }
        let fragment_id = header.fragment_id();
        if let Some(expected) = self
            .streams
            .get(&fragment_id)
            .map(|stream| stream.total_size)
            .filter(|expected| *expected != total_size)
        {
            return Err(FragmentError::InconsistentTotalSize {
                fragment_id,
                expected,
                found: total_size,
            });
        }
        Ok(Located {
            fragment_id,
            total_size,
            index,
            layout,
            fragment,
        })
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .streams
            .iter()
            .min_by_key(|(_, stream)| stream.last_update)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            self.streams.remove(&id);
            self.stats.update(STREAMS_EVICTED, 1);
            debug!("evicted reassembly stream {id} to make room");
        }
    }
}

/// Reject MTUs too small to carry the minimum fragment payload.
pub(crate) fn check_mtu(mtu: usize) -> Result<(), FragmentationError> {
    if mtu < MIN_MTU {
        return Err(FragmentationError::MtuTooSmall {
            mtu,
            minimum: MIN_MTU,
        });
    }
    Ok(())
}

impl<S> fmt::Debug for Reassembler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reassembler")
            .field("mtu", &self.mtu)
            .field("capacity", &self.capacity)
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}
