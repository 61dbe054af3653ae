//! Per-connection ordering of inbound dispatch and outbound writes.

mod common;

use std::time::Duration;

use common::{Harness, Mode, TestPacket, frame, read_packet, recording, small_config, write_packet};
use rstest::rstest;
use tokio::io::AsyncWriteExt;
use wirelane::Origin;

#[rstest]
#[case(1)]
#[case(4)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sends_reach_the_transport_in_call_order(#[case] workers: usize) {
    let harness = Harness::build(Mode::Record, small_config().send_workers(workers));
    let (conn, mut peer) = harness.attach(Origin::Accepted);

    for i in 0..100 {
        assert!(conn.send(TestPacket::new(format!("s{i}"))));
    }
    for i in 0..100 {
        assert_eq!(read_packet(&mut peer).await.body, format!("s{i}"));
    }
    harness.ctx.shutdown().await;
}

#[rstest]
#[case(1)]
#[case(4)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inbound_packets_are_handled_in_arrival_order(#[case] workers: usize) {
    let harness = Harness::build(Mode::Record, small_config().decode_workers(workers));
    let (_conn, mut peer) = harness.attach(Origin::Accepted);

    for i in 0..100 {
        write_packet(&mut peer, &TestPacket::new(format!("r{i}"))).await;
    }
    common::eventually("all packets handled", || harness.observed.handled_count() == 100).await;

    let expected: Vec<_> = (0..100).map(|i| format!("r{i}")).collect();
    assert_eq!(harness.observed.bodies(), expected);
    harness.ctx.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn frames_split_across_reads_are_reassembled(recording: Harness) {
    let (_conn, mut peer) = recording.attach(Origin::Accepted);
    let bytes = frame(&TestPacket::new("split across three writes"));
    let (head, rest) = bytes.split_at(2);
    let (middle, tail) = rest.split_at(rest.len() / 2);

    for chunk in [head, middle, tail] {
        peer.write_all(chunk).await.expect("write chunk");
        peer.flush().await.expect("flush chunk");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    common::eventually("reassembled packet", || recording.observed.handled_count() == 1).await;
    assert_eq!(recording.observed.bodies(), vec!["split across three writes"]);

    // Two frames in one write are both decoded.
    let mut both = frame(&TestPacket::new("a"));
    both.extend(frame(&TestPacket::new("b")));
    peer.write_all(&both).await.expect("write pair");
    common::eventually("both packets", || recording.observed.handled_count() == 3).await;
    assert_eq!(recording.observed.bodies(), vec!["split across three writes", "a", "b"]);
    recording.ctx.shutdown().await;
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connections_do_not_block_each_other(recording: Harness) {
    let pairs: Vec<_> = (0..8).map(|_| recording.attach(Origin::Accepted)).collect();
    for (i, (conn, _)) in pairs.iter().enumerate() {
        for j in 0..20 {
            conn.send(TestPacket::new(format!("{i}-{j}")));
        }
    }
    for (i, (_conn, mut peer)) in pairs.into_iter().enumerate() {
        for j in 0..20 {
            assert_eq!(read_packet(&mut peer).await.body, format!("{i}-{j}"));
        }
    }
    recording.ctx.shutdown().await;
}
