//! Synchronous request/response over linked contexts.

mod common;

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use common::{Harness, Mode, TestPacket, link, read_packet, small_config, write_packet};
use rstest::{fixture, rstest};
use wirelane::{EngineError, Origin, SyncReply};

/// A client context linked to an echoing server context.
#[fixture]
fn pair() -> (Harness, Harness) {
    (
        Harness::build(Mode::Record, small_config().name("client")),
        Harness::build(Mode::Echo, small_config().name("server")),
    )
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reply_with_matching_sequence_is_returned(pair: (Harness, Harness)) {
    let (client, server) = pair;
    let (outbound, _inbound) = link(&client, &server);

    let reply = client
        .ctx
        .synchronous_send(&outbound, TestPacket::request(42, "ping"), Duration::from_secs(5))
        .await
        .expect("valid request");

    assert_eq!(reply, SyncReply::Reply(TestPacket::request(42, "ping")));
    assert!(!client.ctx.pending().contains(42));
    // The matched reply bypasses the client's handler.
    assert_eq!(client.observed.handled_count(), 0);
    assert_eq!(server.observed.handled_count(), 1);

    client.ctx.shutdown().await;
    server.ctx.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn silent_peer_times_out_and_clears_the_entry() {
    let client = Harness::build(Mode::Record, small_config());
    let (conn, mut peer) = client.attach(Origin::Connected);

    let reply = client
        .ctx
        .synchronous_send(&conn, TestPacket::request(42, "ping"), Duration::from_millis(100))
        .await
        .expect("valid request");

    assert_eq!(reply, SyncReply::TimedOut);
    assert!(!client.ctx.pending().contains(42));
    // The request still went out.
    assert_eq!(read_packet(&mut peer).await.seq, 42);

    // A late reply is handed to the handler instead.
    write_packet(&mut peer, &TestPacket::request(42, "late")).await;
    common::eventually("late reply handled", || client.observed.handled_count() == 1).await;
    assert_eq!(client.observed.bodies(), vec!["late"]);
    client.ctx.shutdown().await;
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_are_matched_by_sequence(pair: (Harness, Harness)) {
    let (client, server) = pair;
    let (outbound, _inbound) = link(&client, &server);

    let calls: Vec<_> = (1..=20_u64)
        .map(|seq| {
            let ctx = Arc::clone(&client.ctx);
            let conn = Arc::clone(&outbound);
            tokio::spawn(async move {
                ctx.synchronous_send(&conn, TestPacket::request(seq, format!("m{seq}")), Duration::from_secs(5))
                    .await
            })
        })
        .collect();

    for (seq, call) in (1..=20_u64).zip(calls) {
        let reply = call.await.expect("call task").expect("valid request");
        assert_eq!(reply.into_reply().map(|p| p.body), Some(format!("m{seq}")));
    }
    assert!(client.ctx.pending().is_empty());

    client.ctx.shutdown().await;
    server.ctx.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn usage_errors_fail_fast() {
    let client = Harness::build(Mode::Record, small_config());
    let (conn, _peer) = client.attach(Origin::Connected);

    let err = client
        .ctx
        .synchronous_send(&conn, TestPacket::new("no seq"), Duration::from_millis(10))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::InvalidSequence);

    let _held = client.ctx.pending().register(7).expect("register 7");
    let err = client
        .ctx
        .synchronous_send(&conn, TestPacket::request(7, "dup"), Duration::from_millis(10))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::DuplicateSequence(7));
    client.ctx.shutdown().await;
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reply_is_matched_even_if_the_decode_hook_panics(pair: (Harness, Harness)) {
    let (client, server) = pair;
    client.listener.panic_on_decoded.store(true, Ordering::SeqCst);
    let (outbound, _inbound) = link(&client, &server);

    let reply = client
        .ctx
        .synchronous_send(&outbound, TestPacket::request(9, "ping"), Duration::from_secs(5))
        .await
        .expect("valid request");

    assert_eq!(reply.into_reply().map(|p| p.seq), Some(9));
    assert_eq!(client.listener.decoded.load(Ordering::SeqCst), 1);

    client.ctx.shutdown().await;
    server.ctx.shutdown().await;
}
