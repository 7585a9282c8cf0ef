//! Tests for the outbound retransmission state machine.

use std::{cell::RefCell, rc::Rc, time::Duration};

use rstest::{fixture, rstest};

use super::support::{RecordingStats, ScriptedTracker, SenderHarness, message};
use crate::{
    error::WireError,
    fragment::{
        AckStatus,
        FragmentAck,
        FragmentId,
        FragmentMask,
        FragmentSender,
        FragmentationError,
        LearnedDelays,
        MIN_MTU,
        SenderParams,
    },
    message::{MessageType, encode_message},
    metrics::{
        ACK_BITS_DISCARDED,
        ACKS_RECEIVED,
        FRAGMENTS_RETRANSMITTED,
        FRAGMENTS_TRANSMITTED,
        ROUND_WRAPS,
        TRANSMISSIONS_COMPLETED,
    },
    scheduler::{Clock, ManualScheduler},
};

const MSG_DELAY: Duration = Duration::from_millis(50);
const ACK_DELAY: Duration = Duration::from_millis(100);

fn params(mtu: usize) -> SenderParams { SenderParams::new(mtu, MSG_DELAY, ACK_DELAY) }

/// Three-fragment sender: 3000 byte message over a 1396 byte MTU.
#[fixture]
fn three_fragments() -> SenderHarness { SenderHarness::new(params(1396), &message(2996)) }

/// Send a full first round and confirm each transmission.
fn complete_first_round(harness: &SenderHarness) {
    for _ in 0..3 {
        harness.send_next();
    }
}

fn ack(harness: &SenderHarness, missing: u64) -> AckStatus {
    let ack = FragmentAck::new(harness.sender.fragment_id(), FragmentMask::from_bits(missing));
    harness
        .sender
        .process_ack(&ack.encode())
        .expect("well-formed ack")
}

#[rstest]
fn fragments_follow_the_documented_layout(three_fragments: SenderHarness) {
    let original = message(2996);
    complete_first_round(&three_fragments);

    let sent = three_fragments.sent.borrow();
    let fragments: Vec<_> = sent
        .iter()
        .map(|frame| crate::fragment::Fragment::decode(frame.clone()).expect("well formed"))
        .collect();
    let sizes: Vec<_> = fragments.iter().map(|f| f.payload().len()).collect();
    let offsets: Vec<_> = fragments.iter().map(|f| f.header().offset()).collect();
    assert_eq!(sizes, vec![1384, 1384, 232]);
    assert_eq!(offsets, vec![0, 1384, 2768]);
    for fragment in &fragments {
        assert_eq!(
            fragment.header().total_size().as_bytes(),
            [original[0], original[1]]
        );
        assert_eq!(
            fragment.header().fragment_id(),
            three_fragments.sender.fragment_id()
        );
    }
    assert_eq!(&fragments[1].payload()[..], &original[1384..2768]);
    assert_eq!(three_fragments.stats.get(FRAGMENTS_TRANSMITTED), 3);
    assert_eq!(three_fragments.stats.get(FRAGMENTS_RETRANSMITTED), 0);
}

#[rstest]
fn only_one_fragment_is_in_flight(three_fragments: SenderHarness) {
    three_fragments.scheduler.run_due();
    assert!(three_fragments.sender.is_busy());
    assert!(!three_fragments.sender.has_scheduled_task());

    three_fragments.scheduler.advance(Duration::from_secs(10));
    assert_eq!(three_fragments.sent_count(), 1);

    three_fragments.sender.transmission_done();
    assert!(!three_fragments.sender.is_busy());
    assert!(three_fragments.sender.has_scheduled_task());
}

#[rstest]
fn fragments_of_a_round_are_spaced_by_msg_delay(three_fragments: SenderHarness) {
    let start = three_fragments.scheduler.now();
    three_fragments.send_next();
    assert_eq!(
        three_fragments.scheduler.next_deadline(),
        Some(start + MSG_DELAY)
    );
    three_fragments
        .scheduler
        .advance(MSG_DELAY - Duration::from_millis(1));
    assert_eq!(three_fragments.sent_count(), 1);
}

#[rstest]
fn completed_round_waits_twice_the_ack_delay(three_fragments: SenderHarness) {
    complete_first_round(&three_fragments);
    let round_end = three_fragments.scheduler.now();

    assert_eq!(three_fragments.sender.rounds(), 1);
    assert_eq!(three_fragments.stats.get(ROUND_WRAPS), 1);
    assert_eq!(
        three_fragments.scheduler.next_deadline(),
        Some(round_end + ACK_DELAY * 2)
    );

    three_fragments.scheduler.advance(ACK_DELAY * 2);
    assert_eq!(three_fragments.sent_count(), 4);
    assert_eq!(three_fragments.last_sent().header().offset(), 0);
    assert_eq!(three_fragments.stats.get(FRAGMENTS_RETRANSMITTED), 1);
}

#[rstest]
fn partial_loss_slows_down_and_retransmits_immediately(three_fragments: SenderHarness) {
    complete_first_round(&three_fragments);
    three_fragments.scheduler.advance(MSG_DELAY);

    assert_eq!(ack(&three_fragments, 0b010), AckStatus::Pending);
    assert_eq!(three_fragments.sender.pending(), FragmentMask::from_bits(0b010));
    assert_eq!(three_fragments.sender.msg_delay(), Duration::from_millis(75));
    assert_eq!(
        three_fragments.sender.ack_delay(),
        Duration::from_nanos(79_166_666)
    );

    three_fragments.scheduler.run_due();
    assert_eq!(three_fragments.sent_count(), 4);
    assert_eq!(three_fragments.last_sent().header().offset(), 1384);
    assert_eq!(three_fragments.sender.rounds(), 2);
}

#[rstest]
fn total_loss_multiplies_msg_delay(three_fragments: SenderHarness) {
    complete_first_round(&three_fragments);
    assert_eq!(ack(&three_fragments, 0b111), AckStatus::Pending);
    assert_eq!(three_fragments.sender.msg_delay(), MSG_DELAY * 3);
}

#[rstest]
fn loss_free_round_speeds_up_and_completes(three_fragments: SenderHarness) {
    complete_first_round(&three_fragments);
    assert_eq!(ack(&three_fragments, 0), AckStatus::Done);
    assert_eq!(
        three_fragments.sender.msg_delay(),
        MSG_DELAY - Duration::from_micros(100)
    );
    assert!(!three_fragments.sender.has_scheduled_task());
    assert_eq!(three_fragments.stats.get(TRANSMISSIONS_COMPLETED), 1);
}

#[test]
fn msg_delay_never_exceeds_one_second() {
    let harness = SenderHarness::new(
        SenderParams::new(1036, Duration::from_millis(400), ACK_DELAY),
        &message(3000),
    );
    complete_first_round(&harness);
    assert_eq!(harness.sender.rounds(), 1);
    assert_eq!(ack(&harness, 0b111), AckStatus::Pending);
    assert_eq!(harness.sender.msg_delay(), Duration::from_secs(1));
}

#[test]
fn single_fragment_message_completes_on_empty_ack() {
    let harness = SenderHarness::new(params(1400), &message(100));
    assert_eq!(harness.sender.fragment_count(), 1);
    harness.send_next();
    assert!(harness.sender.has_scheduled_task());

    assert_eq!(ack(&harness, 0), AckStatus::Done);
    assert!(!harness.sender.has_scheduled_task());
    assert!(harness.sender.pending().is_empty());
    assert_eq!(harness.scheduler.pending_tasks(), 0);
}

#[rstest]
fn foreign_ack_changes_nothing(three_fragments: SenderHarness) {
    complete_first_round(&three_fragments);
    let before = (
        three_fragments.sender.pending(),
        three_fragments.sender.msg_delay(),
        three_fragments.sender.ack_delay(),
    );
    let foreign = FragmentId::new(three_fragments.sender.fragment_id().get().wrapping_add(1));
    let ack = FragmentAck::new(foreign, FragmentMask::EMPTY);

    assert_eq!(
        three_fragments.sender.process_ack(&ack.encode()),
        Ok(AckStatus::Foreign)
    );
    assert_eq!(
        (
            three_fragments.sender.pending(),
            three_fragments.sender.msg_delay(),
            three_fragments.sender.ack_delay(),
        ),
        before
    );
    assert_eq!(three_fragments.stats.get(ACKS_RECEIVED), 0);
}

#[rstest]
fn malformed_ack_is_rejected_without_side_effects(three_fragments: SenderHarness) {
    let short = [0_u8, 8, 0, 19, 0, 0, 0, 1];
    assert_eq!(
        three_fragments.sender.process_ack(&short),
        Err(WireError::UnexpectedSize {
            expected: 16,
            actual: 8
        })
    );
    assert_eq!(three_fragments.sender.pending(), FragmentMask::from_bits(0b111));
}

#[rstest]
fn bits_outside_the_mask_never_keep_a_message_pending(three_fragments: SenderHarness) {
    complete_first_round(&three_fragments);
    assert_eq!(ack(&three_fragments, u64::MAX), AckStatus::Pending);
    assert_eq!(three_fragments.sender.pending(), FragmentMask::from_bits(0b111));
    assert_eq!(three_fragments.stats.get(ACK_BITS_DISCARDED), 1);

    assert_eq!(ack(&three_fragments, !0b111), AckStatus::Done);
    assert_eq!(three_fragments.stats.get(ACKS_RECEIVED), 2);
    assert_eq!(three_fragments.stats.get(ACK_BITS_DISCARDED), 2);
}

#[rstest]
fn fragments_reported_missing_again_are_resent(three_fragments: SenderHarness) {
    complete_first_round(&three_fragments);
    assert_eq!(ack(&three_fragments, 0b100), AckStatus::Pending);
    assert_eq!(ack(&three_fragments, 0b011), AckStatus::Pending);
    assert_eq!(three_fragments.sender.pending(), FragmentMask::from_bits(0b011));
    assert_eq!(three_fragments.stats.get(ACK_BITS_DISCARDED), 0);

    assert_eq!(three_fragments.send_next().header().offset(), 0);
    assert_eq!(three_fragments.send_next().header().offset(), 1384);
    assert_eq!(three_fragments.stats.get(TRANSMISSIONS_COMPLETED), 0);
}

#[rstest]
fn acks_after_completion_are_ignored(three_fragments: SenderHarness) {
    complete_first_round(&three_fragments);
    assert_eq!(ack(&three_fragments, 0), AckStatus::Done);

    assert_eq!(ack(&three_fragments, 0b111), AckStatus::Done);
    assert!(three_fragments.sender.pending().is_empty());
    assert!(!three_fragments.sender.has_scheduled_task());
    assert_eq!(three_fragments.stats.get(ACKS_RECEIVED), 1);
    assert_eq!(three_fragments.stats.get(TRANSMISSIONS_COMPLETED), 1);
}

#[rstest]
fn ack_while_busy_waits_for_transmission_done(three_fragments: SenderHarness) {
    three_fragments.scheduler.run_due();
    assert!(three_fragments.sender.is_busy());

    assert_eq!(ack(&three_fragments, 0b110), AckStatus::Pending);
    assert!(!three_fragments.sender.has_scheduled_task());
    three_fragments.sender.transmission_done();
    assert!(three_fragments.sender.has_scheduled_task());
}

#[test]
#[should_panic(expected = "without a fragment in flight")]
fn transmission_done_without_send_panics() {
    let harness = SenderHarness::new(params(1400), &message(100));
    harness.sender.transmission_done();
}

#[test]
fn tracker_delay_postpones_the_send() {
    let tracker = Rc::new(RefCell::new(ScriptedTracker::new([Duration::from_millis(10)])));
    let harness = SenderHarness::new(
        params(1396).with_tracker(tracker.clone()),
        &message(2996),
    );

    harness.scheduler.run_due();
    assert_eq!(harness.sent_count(), 0);
    assert!(harness.sender.has_scheduled_task());

    harness.scheduler.advance(Duration::from_millis(10));
    assert_eq!(harness.sent_count(), 1);
    assert_eq!(tracker.borrow().consumed(), &[1396]);
}

#[test]
fn lookahead_uses_the_larger_of_tracker_and_backoff() {
    let tracker = Rc::new(RefCell::new(ScriptedTracker::new([
        Duration::ZERO,
        Duration::from_millis(80),
    ])));
    let harness = SenderHarness::new(
        params(1396).with_tracker(tracker.clone()),
        &message(2996),
    );
    let start = harness.scheduler.now();

    harness.send_next();
    assert_eq!(tracker.borrow().queries(), 2);
    assert_eq!(
        harness.scheduler.next_deadline(),
        Some(start + Duration::from_millis(80))
    );
}

#[test]
fn wrap_seen_while_rate_limited_still_ends_the_round() {
    let tracker = Rc::new(RefCell::new(ScriptedTracker::new([
        Duration::ZERO,
        Duration::ZERO,
        Duration::ZERO,
        Duration::ZERO,
        Duration::from_millis(10),
    ])));
    let harness = SenderHarness::new(
        params(1396).with_tracker(tracker.clone()),
        &message(2996),
    );
    harness.send_next();
    harness.send_next();
    harness.scheduler.advance(Duration::from_millis(10));

    assert_eq!(ack(&harness, 0b011), AckStatus::Pending);
    harness.scheduler.run_due();
    assert_eq!(harness.sent_count(), 2);
    assert_eq!(harness.sender.rounds(), 0);

    harness.scheduler.advance(Duration::from_millis(10));
    assert_eq!(harness.sent_count(), 3);
    assert_eq!(harness.last_sent().header().offset(), 0);
    assert_eq!(harness.sender.rounds(), 1);
    assert_eq!(harness.stats.get(ROUND_WRAPS), 1);
}

#[rstest]
fn destroy_cancels_and_reports_scaled_delays(three_fragments: SenderHarness) {
    complete_first_round(&three_fragments);
    let SenderHarness {
        scheduler, sender, ..
    } = three_fragments;

    assert_eq!(
        sender.destroy(),
        LearnedDelays {
            msg_delay: MSG_DELAY,
            ack_delay: ACK_DELAY,
        }
    );
    assert_eq!(scheduler.pending_tasks(), 0);
}

#[test]
fn dropping_the_sender_cancels_its_task() {
    let harness = SenderHarness::new(params(1400), &message(100));
    let SenderHarness {
        scheduler, sender, ..
    } = harness;
    drop(sender);
    assert_eq!(scheduler.run_due(), 0);
}

fn create(mtu: usize, message: &[u8]) -> Result<FragmentSender, FragmentationError> {
    FragmentSender::new(
        params(mtu),
        message,
        Rc::new(ManualScheduler::new()),
        Rc::new(RecordingStats::default()),
        |_| {},
    )
}

#[rstest]
#[case::mtu_too_small(MIN_MTU - 1, message(10), FragmentationError::MtuTooSmall { mtu: MIN_MTU - 1, minimum: MIN_MTU })]
#[case::shorter_than_header(1400, bytes::Bytes::from_static(&[0, 3, 0]), FragmentationError::MessageTooShort { len: 3 })]
#[case::size_field_mismatch(1400, bytes::Bytes::from_static(&[0, 9, 0, 1, 0]), FragmentationError::Message(WireError::SizeMismatch { declared: 9, actual: 5 }))]
fn invalid_senders_are_rejected(
    #[case] mtu: usize,
    #[case] frame: bytes::Bytes,
    #[case] expected: FragmentationError,
) {
    assert_eq!(create(mtu, &frame).map(|_| ()), Err(expected));
}

#[test]
fn largest_message_fills_all_sixty_four_fragments() {
    let largest = message(usize::from(u16::MAX) - 4);
    let sender = create(MIN_MTU, &largest).expect("fits the bitmap");
    assert_eq!(sender.fragment_count(), 64);
    assert_eq!(sender.pending(), FragmentMask::from_bits(u64::MAX));
}

#[test]
fn fragment_ids_are_random_per_sender() {
    let msg = encode_message(MessageType::new(1), &[0; 2000]).expect("fits");
    let ids: Vec<_> = (0..8)
        .map(|_| create(1400, &msg).expect("valid").fragment_id())
        .collect();
    assert!(ids.windows(2).any(|pair| pair[0] != pair[1]));
}
