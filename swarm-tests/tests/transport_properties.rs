//! Property-based tests for the transport state machines
//!
//! These tests use proptest to drive reassembly and congestion control with
//! arbitrary event sequences and check the invariants hold in every state.

use bytes::Bytes;
use proptest::prelude::*;
use std::time::Instant;
use swarm_protocol::congestion::{CongestionMode, MIN_SSTHRESH};
use swarm_protocol::{
    unit_count, unit_range, ChunkHash, CongestionController, Packet, PacketType, ReceiveSession,
    CHUNK_SIZE,
};

fn hash() -> ChunkHash {
    ChunkHash::new("9a3b2c1d00000000000000000000000000000000").unwrap()
}

fn chunk_bytes(len: usize, salt: u8) -> Bytes {
    Bytes::from(
        (0..len)
            .map(|i| (i % 251) as u8 ^ salt)
            .collect::<Vec<u8>>(),
    )
}

// Property test strategies

/// A chunk length and a delivery order of its units, with duplicates spliced in
fn delivery_strategy() -> impl Strategy<Value = (usize, Vec<u32>)> {
    (1usize..=20_000).prop_flat_map(|len| {
        let units = unit_count(len);
        (
            Just(len),
            Just((1..=units).collect::<Vec<u32>>()).prop_shuffle(),
            prop::collection::vec((1..=units, any::<prop::sample::Index>()), 0..16),
        )
            .prop_map(|(len, mut order, duplicates)| {
                for (seq, at) in duplicates {
                    let pos = at.index(order.len() + 1);
                    order.insert(pos, seq);
                }
                (len, order)
            })
    })
}

#[derive(Debug, Clone, Copy)]
enum AckEvent {
    New,
    Duplicate,
    Timeout,
}

fn ack_event_strategy() -> impl Strategy<Value = AckEvent> {
    prop_oneof![
        6 => Just(AckEvent::New),
        3 => Just(AckEvent::Duplicate),
        1 => Just(AckEvent::Timeout),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_reassembly_any_order((len, order) in delivery_strategy(), salt in any::<u8>()) {
        let now = Instant::now();
        let chunk = chunk_bytes(len, salt);
        let mut session = ReceiveSession::with_chunk_len(hash(), len, now);

        let mut last_ack = 0;
        for seq in order {
            let range = unit_range(seq, len).unwrap();
            let ack = session.on_data(seq, chunk.slice(range), now).unwrap();
            prop_assert!(ack >= last_ack);
            last_ack = ack;
        }

        prop_assert!(session.is_complete());
        prop_assert_eq!(session.ack(), unit_count(len));
        let assembled = session.into_chunk();
        prop_assert_eq!(assembled.len(), len);
        prop_assert_eq!(assembled, chunk);
    }

    #[test]
    fn prop_full_chunk_reassembly(order in Just((1..=unit_count(CHUNK_SIZE)).collect::<Vec<u32>>()).prop_shuffle()) {
        let now = Instant::now();
        let chunk = chunk_bytes(CHUNK_SIZE, 0x5a);
        let mut session = ReceiveSession::new(hash(), now);

        for seq in order {
            session.on_data(seq, chunk.slice(unit_range(seq, CHUNK_SIZE).unwrap()), now);
        }

        prop_assert!(session.is_complete());
        prop_assert_eq!(session.into_chunk(), chunk);
    }

    #[test]
    fn prop_congestion_bounds(
        initial_ssthresh in 0u32..128,
        events in prop::collection::vec(ack_event_strategy(), 0..400),
    ) {
        let mut cc = CongestionController::with_ssthresh(initial_ssthresh);

        for event in events {
            let previous = cc.cwnd();
            match event {
                AckEvent::New => cc.on_new_ack(),
                AckEvent::Duplicate => {
                    if cc.on_duplicate_ack() {
                        prop_assert_eq!(cc.cwnd(), 1.0);
                        let expected = ((previous / 2.0).floor() as u32).max(MIN_SSTHRESH);
                        prop_assert_eq!(cc.ssthresh(), expected);
                        prop_assert_eq!(cc.mode(), CongestionMode::SlowStart);
                    }
                }
                AckEvent::Timeout => {
                    cc.on_timeout();
                    prop_assert_eq!(cc.cwnd(), 1.0);
                }
            }

            prop_assert!(cc.cwnd() >= 1.0);
            prop_assert!(cc.ssthresh() >= MIN_SSTHRESH);
        }
    }

    #[test]
    fn prop_malformed_datagrams_rejected(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        // Anything not starting with the magic is foreign
        if bytes.len() < 2 || bytes[..2] != 52305u16.to_be_bytes() {
            prop_assert!(Packet::from_bytes(&bytes).is_err());
        }
    }

    #[test]
    fn prop_ack_header_roundtrip(seq in any::<u32>(), ack in any::<u32>(), team in any::<u8>()) {
        let encoded = Packet::ack(team, seq, ack).to_bytes();
        let decoded = Packet::from_bytes(&encoded).unwrap();

        prop_assert_eq!(decoded.packet_type(), PacketType::Ack);
        prop_assert_eq!(decoded.header.team_id, team);
        prop_assert_eq!(decoded.header.seq, seq);
        prop_assert_eq!(decoded.header.ack, ack);
    }
}

#[test]
fn test_mode_transition_at_threshold() {
    let mut cc = CongestionController::with_ssthresh(4);

    for _ in 0..3 {
        assert_eq!(cc.mode(), CongestionMode::SlowStart);
        cc.on_new_ack();
    }
    assert_eq!(cc.cwnd(), 4.0);
    assert_eq!(cc.mode(), CongestionMode::CongestionAvoidance);

    cc.on_new_ack();
    assert!((cc.cwnd() - 4.25).abs() < 1e-9);
    cc.on_new_ack();
    assert!((cc.cwnd() - (4.25 + 1.0 / 4.25)).abs() < 1e-9);
}
