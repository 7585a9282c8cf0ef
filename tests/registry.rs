//! Many peers sharing one bounded reassembly registry.

use std::{cell::RefCell, collections::HashMap, net::SocketAddr, num::NonZeroUsize, rc::Rc};

use bytes::Bytes;
use fragwire::{
    FragmentStatus,
    FragmentationConfig,
    MessageType,
    ReassemblyRegistry,
    encode_message,
    metrics::PEERS_EVICTED,
};
use fragwire_testing::{RecordingStats, SharedSink, fragments_of};
use rstest::rstest;

fn peer(port: u16) -> SocketAddr { SocketAddr::from(([192, 0, 2, 1], port)) }

fn message(fill: u8) -> Bytes {
    encode_message(MessageType::new(600), &vec![fill; 3000]).expect("fits")
}

#[rstest]
fn interleaved_peers_each_receive_their_message() {
    let config = FragmentationConfig::default();
    let sinks: Rc<RefCell<HashMap<SocketAddr, SharedSink>>> = Rc::default();
    let registered = Rc::clone(&sinks);
    let mut registry = ReassemblyRegistry::new(
        config.mtu,
        config.max_concurrent_messages,
        config.peer_capacity,
        Rc::new(RecordingStats::new()),
        move |addr: &SocketAddr| {
            let sink = SharedSink::new();
            registered.borrow_mut().insert(*addr, sink.clone());
            sink
        },
    )
    .expect("valid mtu");
    let streams: Vec<(SocketAddr, Bytes, Vec<Bytes>)> = (1..=3)
        .map(|n| {
            let message = message(n);
            let frames = fragments_of(&message, config.mtu).expect("valid message");
            (peer(u16::from(n)), message, frames)
        })
        .collect();

    for position in 0..3 {
        for (addr, _, frames) in &streams {
            registry
                .process_fragment(addr, frames[position].clone())
                .expect("valid fragment");
        }
    }

    assert_eq!(registry.len(), 3);
    let sinks = sinks.borrow();
    for (addr, message, _) in &streams {
        assert_eq!(sinks[addr].delivered(), vec![message.clone()]);
        assert_eq!(sinks[addr].take_acks().len(), 3);
    }
}

#[rstest]
#[case::one_slot(1)]
#[case::two_slots(2)]
fn full_registry_evicts_least_recently_active(#[case] capacity: usize) {
    let stats = Rc::new(RecordingStats::new());
    let mut registry = ReassemblyRegistry::new(
        1400,
        NonZeroUsize::MIN,
        NonZeroUsize::new(capacity).expect("non-zero"),
        stats.clone(),
        |_: &SocketAddr| SharedSink::new(),
    )
    .expect("valid mtu");
    let frames = fragments_of(&message(7), 1400).expect("valid message");

    for port in 0..=u16::try_from(capacity).expect("small") {
        let status = registry
            .process_fragment(&peer(port), frames[0].clone())
            .expect("valid fragment");
        assert_eq!(status, FragmentStatus::Accepted { complete: false });
    }

    assert_eq!(registry.len(), capacity);
    assert!(!registry.contains(&peer(0)));
    assert_eq!(stats.get(PEERS_EVICTED), 1);
}
