//! Sends one large message across a simulated link that drops packets.
//!
//! Fragments and acknowledgements are each lost with a fixed probability.
//! The sender runs on a virtual clock and is rate limited by a
//! `RateTracker`, so the demo finishes instantly while still reporting the
//! virtual time the transfer took and the delays the sender learned.

use std::{
    cell::RefCell,
    collections::VecDeque,
    num::{NonZeroU64, NonZeroUsize},
    rc::Rc,
    time::Duration,
};

use bytes::Bytes;
use fragwire::{
    AckStatus,
    Clock,
    FragmentAck,
    FragmentSender,
    FragmentationConfig,
    ManualScheduler,
    MessageType,
    MetricsStats,
    RateTracker,
    Reassembler,
    ReassemblySink,
    encode_message,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{info, warn};

const LOSS: f64 = 0.25;

#[derive(Default)]
struct Inbox {
    delivered: Vec<Bytes>,
    acks: VecDeque<FragmentAck>,
}

impl ReassemblySink for Inbox {
    fn deliver(&mut self, message: Bytes) { self.delivered.push(message); }

    fn acknowledge(&mut self, ack: FragmentAck) { self.acks.push_back(ack); }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = FragmentationConfig::default();
    let scheduler = Rc::new(ManualScheduler::new());
    let start = scheduler.now();
    let tracker = RateTracker::new(
        NonZeroU64::new(256 * 1024).ok_or("zero rate")?,
        Duration::from_millis(20),
        scheduler.clone(),
    );
    let params = config
        .sender_params()
        .with_tracker(Rc::new(RefCell::new(tracker)));

    let body: Vec<u8> = (0..60_000_u32).map(|i| i.to_le_bytes()[0]).collect();
    let message = encode_message(MessageType::new(600), &body)?;

    let outbound = Rc::new(RefCell::new(VecDeque::new()));
    let wire = Rc::clone(&outbound);
    let sender = FragmentSender::new(
        params,
        &message,
        scheduler.clone(),
        Rc::new(MetricsStats),
        move |frame| wire.borrow_mut().push_back(frame),
    )?;
    let mut receiver = Reassembler::new(
        config.mtu,
        NonZeroUsize::MIN,
        Rc::new(MetricsStats),
        Inbox::default(),
    )?;
    let mut rng = StdRng::seed_from_u64(2024);

    info!(fragments = sender.fragment_count(), "starting transfer");
    let mut status = AckStatus::Pending;
    let mut sent = 0_usize;
    while status != AckStatus::Done && scheduler.run_until_idle(1) > 0 {
        let frames: Vec<Bytes> = outbound.borrow_mut().drain(..).collect();
        for frame in frames {
            sent += 1;
            sender.transmission_done();
            if rng.gen_bool(LOSS) {
                continue;
            }
            if let Err(err) = receiver.process_fragment_at(frame, scheduler.now()) {
                warn!(%err, "fragment rejected");
                continue;
            }
            while let Some(ack) = receiver.sink_mut().acks.pop_front() {
                if !rng.gen_bool(LOSS) {
                    status = sender.apply_ack(ack);
                }
            }
        }
    }

    let elapsed = scheduler.now().saturating_duration_since(start);
    let rounds = sender.rounds();
    let learned = sender.destroy();
    let delivered = receiver.sink().delivered.first().is_some_and(|m| *m == message);
    info!(
        sent,
        rounds,
        delivered,
        ?elapsed,
        msg_delay = ?learned.msg_delay,
        ack_delay = ?learned.ack_delay,
        "transfer finished"
    );
    Ok(())
}
