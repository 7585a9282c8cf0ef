//! In-memory datagram link between a sender and a reassembler.

use std::{
    cell::RefCell,
    collections::{HashSet, VecDeque},
    num::NonZeroUsize,
    rc::Rc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use fragwire::{
    AckStatus,
    Clock,
    FragmentError,
    FragmentSender,
    FragmentStatus,
    FragmentationConfig,
    FragmentationError,
    LearnedDelays,
    ManualScheduler,
    NoopStats,
    Reassembler,
    SenderParams,
};
use log::trace;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{CollectingSink, RecordingStats};

enum Loss {
    None,
    Random { rng: StdRng, probability: f64 },
    Scripted(HashSet<usize>),
}

/// One direction of a datagram link that may drop packets.
pub struct LossyChannel {
    loss: Loss,
    offered: usize,
    dropped: usize,
}

impl LossyChannel {
    /// Channel delivering everything.
    #[must_use]
    pub fn perfect() -> Self { Self::with_loss(Loss::None) }

    /// Channel dropping each packet with `probability`, reproducibly for a
    /// given `seed`. The probability is clamped to `0.0..=1.0`.
    #[must_use]
    pub fn random(probability: f64, seed: u64) -> Self {
        Self::with_loss(Loss::Random {
            rng: StdRng::seed_from_u64(seed),
            probability: probability.clamp(0.0, 1.0),
        })
    }

    /// Channel dropping the packets at the given zero-based positions.
    #[must_use]
    pub fn dropping(positions: impl IntoIterator<Item = usize>) -> Self {
        Self::with_loss(Loss::Scripted(positions.into_iter().collect()))
    }

    fn with_loss(loss: Loss) -> Self {
        Self {
            loss,
            offered: 0,
            dropped: 0,
        }
    }

    /// Offer one packet, returning whether it gets through.
    pub fn deliver(&mut self) -> bool {
        let position = self.offered;
        self.offered += 1;
        let lost = match &mut self.loss {
            Loss::None => false,
            Loss::Random { rng, probability } => rng.gen_bool(*probability),
            Loss::Scripted(positions) => positions.contains(&position),
        };
        if lost {
            self.dropped += 1;
        }
        !lost
    }

    /// Packets offered so far.
    #[must_use]
    pub const fn offered(&self) -> usize { self.offered }

    /// Packets dropped so far.
    #[must_use]
    pub const fn dropped(&self) -> usize { self.dropped }
}

/// What happened during [`Loopback::run`].
#[derive(Debug)]
pub struct LoopbackOutcome {
    /// Whether the sender saw the message fully acknowledged.
    pub completed: bool,
    /// Messages the receiver delivered.
    pub delivered: Vec<Bytes>,
    /// Fragments handed to the forward channel.
    pub fragments_sent: usize,
    /// Fragments the forward channel dropped.
    pub fragments_dropped: usize,
    /// Acknowledgements the backward channel dropped.
    pub acks_dropped: usize,
    /// Retransmission rounds the sender started.
    pub rounds: u32,
    /// Virtual time from start to the last processed event.
    pub elapsed: Duration,
}

/// A sender and a reassembler joined by two [`LossyChannel`]s on a
/// [`ManualScheduler`], with zero propagation delay.
pub struct Loopback {
    scheduler: Rc<ManualScheduler>,
    stats: Rc<RecordingStats>,
    outbound: Rc<RefCell<VecDeque<Bytes>>>,
    sender: FragmentSender,
    receiver: Reassembler<CollectingSink>,
    forward: LossyChannel,
    backward: LossyChannel,
    start: Instant,
    fragments_sent: usize,
}

impl Loopback {
    /// Build a link using the sender parameters and stream limit from
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError`] when `config` or `message` is rejected.
    pub fn new(
        config: &FragmentationConfig,
        message: &[u8],
        forward: LossyChannel,
        backward: LossyChannel,
    ) -> Result<Self, FragmentationError> {
        Self::with_params(
            config.sender_params(),
            config.max_concurrent_messages,
            message,
            forward,
            backward,
        )
    }

    /// Build a link from explicit sender parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError`] when the parameters or `message` are
    /// rejected.
    pub fn with_params(
        params: SenderParams,
        num_msgs: NonZeroUsize,
        message: &[u8],
        forward: LossyChannel,
        backward: LossyChannel,
    ) -> Result<Self, FragmentationError> {
        let scheduler = Rc::new(ManualScheduler::new());
        let stats = Rc::new(RecordingStats::new());
        let receiver = Reassembler::new(
            params.mtu,
            num_msgs,
            stats.clone(),
            CollectingSink::default(),
        )?;
        let outbound = Rc::new(RefCell::new(VecDeque::new()));
        let wire = Rc::clone(&outbound);
        let sender = FragmentSender::new(
            params,
            message,
            scheduler.clone(),
            stats.clone(),
            move |frame| wire.borrow_mut().push_back(frame),
        )?;
        let start = scheduler.now();
        Ok(Self {
            scheduler,
            stats,
            outbound,
            sender,
            receiver,
            forward,
            backward,
            start,
            fragments_sent: 0,
        })
    }

    /// Drive the link for at most `max_steps` scheduled transmissions or
    /// until the sender is fully acknowledged. The link may be run again
    /// afterwards; counts in the outcome cover every run so far.
    pub fn run(&mut self, max_steps: usize) -> LoopbackOutcome {
        let mut completed = self.sender.pending().is_empty();
        for _ in 0..max_steps {
            if completed {
                break;
            }
            if self.scheduler.run_until_idle(1) == 0 {
                break;
            }
            let frames: Vec<Bytes> = self.outbound.borrow_mut().drain(..).collect();
            for frame in frames {
                self.fragments_sent += 1;
                self.sender.transmission_done();
                completed |= self.carry(frame);
            }
        }
        LoopbackOutcome {
            completed,
            delivered: self.receiver.sink().delivered.clone(),
            fragments_sent: self.fragments_sent,
            fragments_dropped: self.forward.dropped(),
            acks_dropped: self.backward.dropped(),
            rounds: self.sender.rounds(),
            elapsed: self.scheduler.now().saturating_duration_since(self.start),
        }
    }

    fn carry(&mut self, frame: Bytes) -> bool {
        if !self.forward.deliver() {
            trace!("forward channel dropped a fragment");
            return false;
        }
        let now = self.scheduler.now();
        if let Err(err) = self.receiver.process_fragment_at(frame, now) {
            trace!("receiver rejected fragment: {err}");
            return false;
        }
        let mut done = false;
        for ack in self.receiver.sink_mut().take_acks() {
            if !self.backward.deliver() {
                trace!("backward channel dropped {ack}");
                continue;
            }
            done |= self.sender.apply_ack(ack) == AckStatus::Done;
        }
        done
    }

    /// Hand the receiver a datagram from outside the link, such as a
    /// fragment of another message competing for its stream slots.
    /// Acknowledgements it produces are discarded.
    ///
    /// # Errors
    ///
    /// Returns the receiver's [`FragmentError`] for a rejected datagram.
    pub fn inject(&mut self, frame: Bytes) -> Result<FragmentStatus, FragmentError> {
        let now = self.scheduler.now();
        let status = self.receiver.process_fragment_at(frame, now);
        self.receiver.sink_mut().take_acks();
        status
    }

    /// Statistics shared by both ends.
    #[must_use]
    pub fn stats(&self) -> &RecordingStats { &self.stats }

    /// The scheduler driving the link.
    #[must_use]
    pub fn scheduler(&self) -> &ManualScheduler { &self.scheduler }

    /// The sending side.
    #[must_use]
    pub const fn sender(&self) -> &FragmentSender { &self.sender }

    /// The receiving side.
    #[must_use]
    pub const fn receiver(&self) -> &Reassembler<CollectingSink> { &self.receiver }

    /// Tear down the sender, returning the delays it learned.
    #[must_use]
    pub fn into_learned(self) -> LearnedDelays { self.sender.destroy() }
}

/// Every fragment of `message` for `mtu`, in transmission order, produced by
/// a real sender running one round without delays.
///
/// # Errors
///
/// Returns [`FragmentationError`] when `mtu` or `message` is rejected.
pub fn fragments_of(message: &[u8], mtu: usize) -> Result<Vec<Bytes>, FragmentationError> {
    let scheduler = Rc::new(ManualScheduler::new());
    let sent = Rc::new(RefCell::new(Vec::new()));
    let wire = Rc::clone(&sent);
    let sender = FragmentSender::new(
        SenderParams::new(mtu, Duration::ZERO, Duration::ZERO),
        message,
        scheduler.clone(),
        Rc::new(NoopStats),
        move |frame| wire.borrow_mut().push(frame),
    )?;
    for _ in 0..sender.fragment_count() {
        scheduler.run_until_idle(1);
        sender.transmission_done();
    }
    Ok(sent.take())
}
