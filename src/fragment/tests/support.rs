//! Recording collaborators and builders shared by the fragment unit tests.
//!
//! `RecordingStats`, `ScriptedTracker` and `CollectingSink` mirror the types
//! in `fragwire_testing`. That crate links against a separate build of
//! `fragwire`, so its trait impls do not apply to `crate::` traits here;
//! keep both copies in step.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::Rc,
    time::Duration,
};

use bytes::Bytes;
use proptest::test_runner::{Config as ProptestConfig, RngAlgorithm, TestRng, TestRunner};

use crate::{
    bandwidth::BandwidthTracker,
    fragment::{
        EncodedSize,
        Fragment,
        FragmentAck,
        FragmentHeader,
        FragmentId,
        FragmentSender,
        ReassemblySink,
        SenderParams,
    },
    message::{MessageType, encode_message},
    metrics::StatsSink,
    scheduler::ManualScheduler,
};

pub const TEST_KIND: MessageType = MessageType::new(600);

pub fn deterministic_runner(cases: u32) -> TestRunner {
    let config = ProptestConfig {
        cases,
        ..ProptestConfig::default()
    };
    let rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
    TestRunner::new_with_rng(config, rng)
}

#[derive(Default)]
pub struct RecordingStats {
    counters: RefCell<HashMap<&'static str, u64>>,
}

impl RecordingStats {
    pub fn get(&self, name: &str) -> u64 { self.counters.borrow().get(name).copied().unwrap_or(0) }
}

impl StatsSink for RecordingStats {
    fn update(&self, name: &'static str, delta: u64) {
        *self.counters.borrow_mut().entry(name).or_default() += delta;
    }
}

/// Tracker replaying a fixed list of delays, then allowing everything.
#[derive(Default)]
pub struct ScriptedTracker {
    delays: RefCell<VecDeque<Duration>>,
    consumed: Vec<usize>,
    queries: Cell<usize>,
}

impl ScriptedTracker {
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: RefCell::new(delays.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn consumed(&self) -> &[usize] { &self.consumed }

    pub fn queries(&self) -> usize { self.queries.get() }
}

impl BandwidthTracker for ScriptedTracker {
    fn get_delay(&self, _bytes: usize) -> Duration {
        self.queries.set(self.queries.get() + 1);
        self.delays.borrow_mut().pop_front().unwrap_or(Duration::ZERO)
    }

    fn consume(&mut self, bytes: usize) { self.consumed.push(bytes); }
}

#[derive(Debug, Default)]
pub struct CollectingSink {
    pub delivered: Vec<Bytes>,
    pub acks: Vec<FragmentAck>,
}

impl ReassemblySink for CollectingSink {
    fn deliver(&mut self, message: Bytes) { self.delivered.push(message); }

    fn acknowledge(&mut self, ack: FragmentAck) { self.acks.push(ack); }
}

/// A framed message whose body is `body_len` bytes of a counting pattern.
pub fn message(body_len: usize) -> Bytes {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "values are reduced modulo 251"
    )]
    let body: Vec<u8> = (0..body_len).map(|i| (i % 251) as u8).collect();
    encode_message(TEST_KIND, &body).expect("test message fits")
}

/// Sender wired to a manual scheduler, collecting what it transmits.
pub struct SenderHarness {
    pub scheduler: Rc<ManualScheduler>,
    pub stats: Rc<RecordingStats>,
    pub sent: Rc<RefCell<Vec<Bytes>>>,
    pub sender: FragmentSender,
}

impl SenderHarness {
    pub fn new(params: SenderParams, message: &[u8]) -> Self {
        let scheduler = Rc::new(ManualScheduler::new());
        let stats = Rc::new(RecordingStats::default());
        let sent = Rc::new(RefCell::new(Vec::new()));
        let wire = Rc::clone(&sent);
        let sender = FragmentSender::new(
            params,
            message,
            scheduler.clone(),
            stats.clone(),
            move |frame| wire.borrow_mut().push(frame),
        )
        .expect("valid sender");
        Self {
            scheduler,
            stats,
            sent,
            sender,
        }
    }

    pub fn sent_count(&self) -> usize { self.sent.borrow().len() }

    pub fn last_sent(&self) -> Fragment {
        let frame = self.sent.borrow().last().cloned().expect("a fragment was sent");
        Fragment::decode(frame).expect("sender emits well-formed fragments")
    }

    /// Move to the next scheduled transmission, run it and confirm it.
    pub fn send_next(&self) -> Fragment {
        let before = self.sent_count();
        self.scheduler.run_until_idle(1);
        assert_eq!(self.sent_count(), before + 1, "expected one fragment");
        self.sender.transmission_done();
        self.last_sent()
    }
}

/// All fragments of one round, produced by a real sender.
pub fn fragments_of(message: &[u8], mtu: usize) -> Vec<Bytes> {
    let params = SenderParams::new(mtu, Duration::ZERO, Duration::ZERO);
    let harness = SenderHarness::new(params, message);
    for _ in 0..harness.sender.fragment_count() {
        harness.send_next();
    }
    harness.sent.borrow().clone()
}

/// Hand-built fragment with arbitrary header fields.
pub fn raw_fragment(id: u32, total_size: u16, offset: u16, payload_len: usize) -> Bytes {
    let header = FragmentHeader::new(
        FragmentId::new(id),
        EncodedSize::from_wire(total_size.to_be_bytes()),
        offset,
    );
    Fragment::new(header, Bytes::from(vec![0xa5; payload_len]))
        .expect("fragment fits")
        .encode()
}
