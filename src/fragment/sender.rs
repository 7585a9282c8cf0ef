//! Outbound side: splits one oversized message and drives its fragments
//! through a round-robin retransmission loop.
//!
//! A [`FragmentSender`] offers at most one fragment at a time to the
//! transport. The transport reports completion through
//! [`FragmentSender::transmission_done`], after which the sender re-arms
//! itself on the [`Scheduler`] for the next fragment. Once every pending
//! fragment has been offered, the sender pauses for roughly two
//! acknowledgement delays before starting the next round, giving the
//! receiver's cumulative acknowledgement time to arrive.
//!
//! Acknowledgements retire fragments and tune two delays: `msg_delay`, the
//! gap between fragments of one round, and `ack_delay`, the expected
//! acknowledgement latency. Owners persist both per peer through
//! [`FragmentSender::destroy`] and seed the next sender with them.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    time::{Duration, Instant},
};

use bytes::Bytes;
use log::{debug, trace, warn};

use super::{
    AckStatus,
    EncodedSize,
    Fragment,
    FragmentAck,
    FragmentHeader,
    FragmentId,
    FragmentIndex,
    FragmentLayout,
    FragmentMask,
    FragmentationError,
};
use crate::{
    bandwidth::BandwidthTracker,
    error::WireError,
    message::validate_message,
    metrics::{
        ACK_BITS_DISCARDED,
        ACKS_RECEIVED,
        FRAGMENTS_RETRANSMITTED,
        FRAGMENTS_TRANSMITTED,
        ROUND_WRAPS,
        StatsSink,
        TRANSMISSIONS_COMPLETED,
    },
    scheduler::{Scheduler, TaskHandle, deadline_after},
};

/// Shortest pause after a round, leaving the receiver time to acknowledge.
pub const MIN_ACK_DELAY: Duration = Duration::from_millis(1);

/// Upper bound on the learned inter-fragment delay.
pub const MAX_MSG_DELAY: Duration = Duration::from_secs(1);

/// Amount `msg_delay` shrinks by after a loss-free round.
pub const MSG_DELAY_STEP: Duration = Duration::from_micros(100);

/// Rounds after which the per-round backoff no longer fits in a `u64`.
const MAX_BACKOFF_ROUNDS: u32 = 64;

/// Callback handing an encoded fragment to the transport.
pub type TransmitFn = Box<dyn FnMut(Bytes)>;

/// Bandwidth tracker shared by all senders towards one peer.
pub type SharedTracker = Rc<RefCell<dyn BandwidthTracker>>;

/// Construction parameters for a [`FragmentSender`].
#[derive(Clone)]
pub struct SenderParams {
    /// Largest datagram the transport accepts, fragment header included.
    pub mtu: usize,
    /// Initial gap between two fragments of one round.
    pub msg_delay: Duration,
    /// Initial estimate of the acknowledgement latency.
    pub ack_delay: Duration,
    /// Optional rate limiter consulted before every send.
    pub tracker: Option<SharedTracker>,
}

impl SenderParams {
    /// Parameters without a bandwidth tracker.
    #[must_use]
    pub fn new(mtu: usize, msg_delay: Duration, ack_delay: Duration) -> Self {
        Self {
            mtu,
            msg_delay,
            ack_delay,
            tracker: None,
        }
    }

    /// Attach a bandwidth tracker.
    #[must_use]
    pub fn with_tracker(mut self, tracker: SharedTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

impl fmt::Debug for SenderParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderParams")
            .field("mtu", &self.mtu)
            .field("msg_delay", &self.msg_delay)
            .field("ack_delay", &self.ack_delay)
            .field("tracker", &self.tracker.is_some())
            .finish()
    }
}

/// Delays learned by a sender, returned by [`FragmentSender::destroy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LearnedDelays {
    /// Inter-fragment delay scaled by the number of rounds that ran.
    pub msg_delay: Duration,
    /// Acknowledgement latency estimate.
    pub ack_delay: Duration,
}

struct SenderState {
    payload: Bytes,
    layout: FragmentLayout,
    total_size: EncodedSize,
    fragment_id: FragmentId,
    acks: FragmentMask,
    acks_mask: FragmentMask,
    next_transmission: FragmentIndex,
    num_rounds: u32,
    num_transmissions: u32,
    msg_delay: Duration,
    ack_delay: Duration,
    wack: bool,
    proc_busy: bool,
    pending_wrap: bool,
    last_round: Option<Instant>,
    delay_until: Instant,
    task: Option<TaskHandle>,
}

struct SenderShared {
    state: RefCell<SenderState>,
    scheduler: Rc<dyn Scheduler>,
    tracker: Option<SharedTracker>,
    stats: Rc<dyn StatsSink>,
    transmit: RefCell<TransmitFn>,
}

/// Sender for one oversized message.
///
/// Dropping the sender, or calling [`FragmentSender::destroy`], cancels any
/// scheduled transmission.
///
/// # Examples
///
/// ```
/// use std::{cell::RefCell, rc::Rc, time::Duration};
///
/// use fragwire::{
///     fragment::{AckStatus, FragmentAck, FragmentMask, FragmentSender, SenderParams},
///     message::{MessageType, encode_message},
///     metrics::NoopStats,
///     scheduler::ManualScheduler,
/// };
///
/// let scheduler = Rc::new(ManualScheduler::new());
/// let sent = Rc::new(RefCell::new(Vec::new()));
/// let wire = Rc::clone(&sent);
/// let message = encode_message(MessageType::new(600), &[7; 2000]).expect("fits");
/// let params = SenderParams::new(1400, Duration::from_millis(5), Duration::from_millis(20));
/// let sender = FragmentSender::new(
///     params,
///     &message,
///     scheduler.clone(),
///     Rc::new(NoopStats),
///     move |frame| wire.borrow_mut().push(frame),
/// )
/// .expect("valid message");
///
/// scheduler.run_due();
/// assert_eq!(sent.borrow().len(), 1);
/// sender.transmission_done();
///
/// let ack = FragmentAck::new(sender.fragment_id(), FragmentMask::EMPTY);
/// assert_eq!(sender.process_ack(&ack.encode()), Ok(AckStatus::Done));
/// ```
pub struct FragmentSender {
    shared: Rc<SenderShared>,
}

impl FragmentSender {
    /// Split `message` and schedule its first fragment immediately.
    ///
    /// `message` must be a complete framed message whose size field matches
    /// its length. The bytes are copied, so the caller may reuse its buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError`] when the MTU is below
    /// [`MIN_MTU`](super::MIN_MTU), the message is malformed or shorter than
    /// its header, or it needs more than
    /// [`MAX_FRAGMENTS`](super::MAX_FRAGMENTS) fragments.
    pub fn new(
        params: SenderParams,
        message: &[u8],
        scheduler: Rc<dyn Scheduler>,
        stats: Rc<dyn StatsSink>,
        transmit: impl FnMut(Bytes) + 'static,
    ) -> Result<Self, FragmentationError> {
        let layout = FragmentLayout::new(params.mtu, message.len())?;
        validate_message(message)?;
        let total_size = EncodedSize::copy_from_message(message)?;
        let acks_mask = layout.acks_mask();
        let fragment_id = FragmentId::random();
        let now = scheduler.now();

        let state = SenderState {
            payload: Bytes::copy_from_slice(message),
            layout,
            total_size,
            fragment_id,
            acks: acks_mask,
            acks_mask,
            next_transmission: FragmentIndex::zero(),
            num_rounds: 0,
            num_transmissions: 0,
            msg_delay: params.msg_delay,
            ack_delay: params.ack_delay,
            wack: false,
            proc_busy: false,
            pending_wrap: false,
            last_round: None,
            delay_until: now,
            task: None,
        };
        let shared = Rc::new(SenderShared {
            state: RefCell::new(state),
            scheduler,
            tracker: params.tracker,
            stats,
            transmit: RefCell::new(Box::new(transmit)),
        });
        {
            let mut state = shared.state.borrow_mut();
            shared.schedule_at(&mut state, now);
        }
        debug!(
            "fragmenting message {fragment_id}: {} bytes in {} fragments",
            message.len(),
            layout.fragment_count()
        );
        Ok(Self { shared })
    }

    /// Report that the transport finished with the last fragment handed to
    /// it. The next fragment is scheduled for the deadline chosen when that
    /// fragment was sent.
    ///
    /// # Panics
    ///
    /// Panics if no fragment is in flight or a transmission task is already
    /// scheduled; both indicate a transport bug.
    pub fn transmission_done(&self) {
        let mut state = self.shared.state.borrow_mut();
        assert!(
            state.proc_busy,
            "transmission_done called without a fragment in flight"
        );
        assert!(
            state.task.is_none(),
            "transmission_done called while a transmission is scheduled"
        );
        state.proc_busy = false;
        let deadline = state.delay_until;
        self.shared.schedule_at(&mut state, deadline);
    }

    /// Decode and apply an acknowledgement message.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when `message` is not a well-formed
    /// acknowledgement. The sender is left untouched.
    ///
    /// # Panics
    ///
    /// See [`FragmentSender::apply_ack`].
    pub fn process_ack(&self, message: &[u8]) -> Result<AckStatus, WireError> {
        let ack = FragmentAck::decode(message)
            .inspect_err(|err| warn!("dropping malformed acknowledgement: {err}"))?;
        Ok(self.apply_ack(ack))
    }

    /// Apply a decoded acknowledgement.
    ///
    /// The acknowledgement replaces the pending set: fragments it reports
    /// missing are sent again even if an earlier acknowledgement covered
    /// them, since the receiver may have lost its stream to eviction. Bits
    /// beyond the message's fragment count are ignored. Once the message is
    /// complete, further acknowledgements are ignored and report
    /// [`AckStatus::Done`].
    ///
    /// # Panics
    ///
    /// Panics if fragments remain pending while neither a transmission is
    /// scheduled nor a fragment is in flight.
    pub fn apply_ack(&self, ack: FragmentAck) -> AckStatus {
        let shared = &self.shared;
        let mut state = shared.state.borrow_mut();
        if ack.fragment_id() != state.fragment_id {
            debug!(
                "ignoring {ack} while sending message {}",
                state.fragment_id
            );
            return AckStatus::Foreign;
        }
        if state.acks.is_empty() {
            trace!("ignoring {ack} for a completed message");
            return AckStatus::Done;
        }

        let missing = ack.missing();
        if state.wack && state.num_transmissions != 0 {
            shared.learn_delays(&mut state, missing);
        }
        shared.stats.update(ACKS_RECEIVED, 1);
        if !missing.without(state.acks_mask).is_empty() {
            shared.stats.update(ACK_BITS_DISCARDED, 1);
        }
        state.acks = missing.intersection(state.acks_mask);

        if !state.acks.is_empty() {
            if state.task.is_some() {
                let now = shared.scheduler.now();
                shared.schedule_at(&mut state, now);
            } else {
                assert!(
                    state.proc_busy,
                    "fragments pending without a scheduled or in-flight transmission"
                );
            }
            return AckStatus::Pending;
        }

        state.task = None;
        shared.stats.update(TRANSMISSIONS_COMPLETED, 1);
        debug!(
            "message {} fully acknowledged after {} rounds",
            state.fragment_id, state.num_rounds
        );
        AckStatus::Done
    }

    /// Cancel any scheduled transmission and return the learned delays.
    #[must_use]
    pub fn destroy(self) -> LearnedDelays {
        let mut state = self.shared.state.borrow_mut();
        state.task = None;
        LearnedDelays {
            msg_delay: saturating_scale(state.msg_delay, u64::from(state.num_rounds)),
            ack_delay: state.ack_delay,
        }
    }

    /// Identifier carried by every fragment of this message.
    #[must_use]
    pub fn fragment_id(&self) -> FragmentId { self.shared.state.borrow().fragment_id }

    /// Number of fragments the message was split into.
    #[must_use]
    pub fn fragment_count(&self) -> usize { self.shared.state.borrow().layout.fragment_count() }

    /// Fragments not yet acknowledged.
    #[must_use]
    pub fn pending(&self) -> FragmentMask { self.shared.state.borrow().acks }

    /// Current inter-fragment delay.
    #[must_use]
    pub fn msg_delay(&self) -> Duration { self.shared.state.borrow().msg_delay }

    /// Current acknowledgement latency estimate.
    #[must_use]
    pub fn ack_delay(&self) -> Duration { self.shared.state.borrow().ack_delay }

    /// Completed rounds.
    #[must_use]
    pub fn rounds(&self) -> u32 { self.shared.state.borrow().num_rounds }

    /// Whether a fragment is with the transport.
    #[must_use]
    pub fn is_busy(&self) -> bool { self.shared.state.borrow().proc_busy }

    /// Whether a transmission task is waiting on the scheduler.
    #[must_use]
    pub fn has_scheduled_task(&self) -> bool {
        self.shared
            .state
            .borrow()
            .task
            .as_ref()
            .is_some_and(TaskHandle::is_pending)
    }
}

impl fmt::Debug for FragmentSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("FragmentSender")
            .field("fragment_id", &state.fragment_id)
            .field("pending", &state.acks)
            .field("rounds", &state.num_rounds)
            .field("busy", &state.proc_busy)
            .finish_non_exhaustive()
    }
}

impl SenderShared {
    /// Replace the scheduled task (if any) with one running at `deadline`.
    fn schedule_at(self: &Rc<Self>, state: &mut SenderState, deadline: Instant) {
        let weak: Weak<Self> = Rc::downgrade(self);
        let handle = self.scheduler.add_at(
            deadline,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.transmit_next();
                }
            }),
        );
        state.task = Some(handle);
    }

    fn transmit_next(self: &Rc<Self>) {
        let frame = {
            let mut state = self.state.borrow_mut();
            state.task = None;
            self.next_fragment(&mut state)
        };
        if let Some(frame) = frame {
            let mut transmit = self.transmit.borrow_mut();
            (*transmit)(frame);
        }
    }

    /// Select, build and account for the next fragment. Returns `None` when
    /// nothing is pending or the tracker asked to wait, in which case the
    /// retry has already been scheduled.
    fn next_fragment(self: &Rc<Self>, state: &mut SenderState) -> Option<Bytes> {
        debug_assert!(!state.proc_busy, "transmission scheduled while busy");
        if state.acks.is_empty() {
            return None;
        }
        let now = self.scheduler.now();
        let mut wrapped = state.pending_wrap;
        wrapped |= seek_pending(state.acks, &mut state.next_transmission);
        let index = state.next_transmission;

        let delay = self.tracker_delay(state.layout.encoded_len(index));
        if !delay.is_zero() {
            state.pending_wrap = wrapped;
            self.schedule_at(state, deadline_after(now, delay));
            return None;
        }
        state.pending_wrap = false;

        let (after, wrapped_past) = index.next_wrapping();
        state.next_transmission = after;
        wrapped |= wrapped_past;
        wrapped |= seek_pending(state.acks, &mut state.next_transmission);

        let fragment = match build_fragment(state, index) {
            Ok(fragment) => fragment,
            Err(err) => {
                warn!(
                    "cannot build fragment {index} of message {}: {err}",
                    state.fragment_id
                );
                return None;
            }
        };
        if let Some(tracker) = &self.tracker {
            tracker.borrow_mut().consume(fragment.encoded_len());
        }
        self.stats.update(FRAGMENTS_TRANSMITTED, 1);
        if state.last_round.is_some() {
            self.stats.update(FRAGMENTS_RETRANSMITTED, 1);
        }

        let lookahead = self.tracker_delay(state.layout.encoded_len(state.next_transmission));
        let mut delay = if state.num_rounds < MAX_BACKOFF_ROUNDS {
            lookahead.max(saturating_scale(state.msg_delay, 1_u64 << state.num_rounds))
        } else {
            Duration::MAX
        };
        if wrapped {
            state.num_rounds += 1;
            delay = MIN_ACK_DELAY.max(state.ack_delay.saturating_mul(2));
            state.wack = true;
            state.last_round = Some(now);
            self.stats.update(ROUND_WRAPS, 1);
        }

        state.proc_busy = true;
        state.delay_until = deadline_after(now, delay);
        state.num_transmissions = state.num_transmissions.saturating_add(1);
        trace!(
            "sending fragment {index} of message {} ({} bytes), next in {delay:?}",
            state.fragment_id,
            fragment.encoded_len()
        );
        Some(fragment.encode())
    }

    /// Update both delays from the first acknowledgement after a round.
    fn learn_delays(&self, state: &mut SenderState, missing: FragmentMask) {
        state.wack = false;
        let now = self.scheduler.now();
        let round = state
            .last_round
            .map_or(Duration::ZERO, |start| now.saturating_duration_since(start));
        let per_fragment = round / state.num_transmissions;
        state.ack_delay = per_fragment
            .saturating_add(state.ack_delay.saturating_mul(3))
            / 4;
        state.num_transmissions = 0;

        let snd_cnt = state.acks_mask.count();
        let ack_cnt = state.acks_mask.without(missing).count();
        if ack_cnt == 0 {
            state.msg_delay = saturating_scale(state.msg_delay, u64::from(snd_cnt));
        } else if snd_cnt > ack_cnt {
            state.msg_delay = saturating_ratio(state.msg_delay, snd_cnt, ack_cnt);
        } else if state.msg_delay > MSG_DELAY_STEP {
            state.msg_delay -= MSG_DELAY_STEP;
        }
        state.msg_delay = state.msg_delay.min(MAX_MSG_DELAY);
    }

    fn tracker_delay(&self, bytes: usize) -> Duration {
        self.tracker
            .as_ref()
            .map_or(Duration::ZERO, |tracker| tracker.borrow().get_delay(bytes))
    }
}

/// Move `cursor` forward until it rests on a pending fragment. Returns
/// whether it wrapped from the last index back to zero.
fn seek_pending(acks: FragmentMask, cursor: &mut FragmentIndex) -> bool {
    let mut wrapped = false;
    while !acks.contains(*cursor) {
        let (next, wrap) = cursor.next_wrapping();
        *cursor = next;
        wrapped |= wrap;
    }
    wrapped
}

fn build_fragment(state: &SenderState, index: FragmentIndex) -> Result<Fragment, WireError> {
    let offset = state.layout.offset(index);
    let offset = u16::try_from(offset).map_err(|_| WireError::TooLarge { size: offset })?;
    let header = FragmentHeader::new(state.fragment_id, state.total_size, offset);
    let payload = state.payload.slice(state.layout.payload_range(index));
    Fragment::new(header, payload)
}

fn duration_from_nanos(nanos: u128) -> Duration {
    u64::try_from(nanos).map_or(Duration::MAX, Duration::from_nanos)
}

/// `delay × factor`, saturating at [`Duration::MAX`].
fn saturating_scale(delay: Duration, factor: u64) -> Duration {
    duration_from_nanos(delay.as_nanos().saturating_mul(u128::from(factor)))
}

/// `delay × numerator / denominator`, saturating at [`Duration::MAX`].
fn saturating_ratio(delay: Duration, numerator: u32, denominator: u32) -> Duration {
    let scaled = delay.as_nanos().saturating_mul(u128::from(numerator));
    duration_from_nanos(scaled / u128::from(denominator.max(1)))
}
