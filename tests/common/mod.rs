//! Shared utilities for integration tests.
//!
//! Provides a length-prefixed `bincode` packet codec, a handler that records
//! or echoes what it receives, a listener that records lifecycle events, and
//! helpers for driving the peer side of an in-memory pipe.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use rstest::fixture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use wirelane::{
    BoxError,
    Connection,
    ConnectionId,
    EngineConfig,
    EngineContext,
    Handler,
    Listener,
    Origin,
    Packet,
};

/// Test packet: a sequence number (0 for fire-and-forget) and a body.
#[derive(bincode::Encode, bincode::Decode, PartialEq, Eq, Debug, Clone)]
pub struct TestPacket {
    pub seq: u64,
    pub body: String,
}

impl TestPacket {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            seq: 0,
            body: body.into(),
        }
    }

    pub fn request(seq: u64, body: impl Into<String>) -> Self {
        Self {
            seq,
            body: body.into(),
        }
    }
}

impl Packet for TestPacket {
    fn sync_seq(&self) -> Option<u64> { Some(self.seq) }
}

/// Encode `packet` as a 4-byte big-endian length followed by the payload.
pub fn frame(packet: &TestPacket) -> Vec<u8> {
    let payload =
        bincode::encode_to_vec(packet, bincode::config::standard()).expect("encode test packet");
    let len = u32::try_from(payload.len()).expect("test payload fits u32");
    let mut out = len.to_be_bytes().to_vec();
    out.extend_from_slice(&payload);
    out
}

/// What the handler does with each packet it receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Record only.
    Record,
    /// Record and send the packet straight back.
    Echo,
}

/// Everything a [`TestHandler`] observed.
#[derive(Default)]
pub struct Observed {
    pub handled: Mutex<Vec<(ConnectionId, TestPacket)>>,
    pub encodes: AtomicUsize,
}

impl Observed {
    pub fn bodies(&self) -> Vec<String> {
        self.handled
            .lock()
            .expect("handled lock")
            .iter()
            .map(|(_, p)| p.body.clone())
            .collect()
    }

    pub fn handled_count(&self) -> usize { self.handled.lock().expect("handled lock").len() }
}

pub struct TestHandler {
    pub mode: Mode,
    pub observed: Arc<Observed>,
}

impl TestHandler {
    pub fn new(mode: Mode) -> (Self, Arc<Observed>) {
        let observed = Arc::new(Observed::default());
        (
            Self {
                mode,
                observed: Arc::clone(&observed),
            },
            observed,
        )
    }
}

#[async_trait]
impl Handler for TestHandler {
    type Packet = TestPacket;
    type Session = Mutex<Option<String>>;

    fn encode(
        &self,
        packet: &TestPacket,
        _ctx: &EngineContext<Self>,
        _conn: Option<&Connection<Self>>,
    ) -> Result<Bytes, BoxError> {
        self.observed.encodes.fetch_add(1, Ordering::SeqCst);
        Ok(frame(packet).into())
    }

    fn decode(
        &self,
        buf: &mut BytesMut,
        _ctx: &EngineContext<Self>,
        _conn: &Connection<Self>,
    ) -> Result<Option<TestPacket>, BoxError> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > 64 * 1024 {
            return Err(format!("frame of {len} bytes exceeds limit").into());
        }
        if buf.len() < 4 + len {
            return Ok(None);
        }
        buf.advance(4);
        let payload = buf.split_to(len);
        let (packet, _) = bincode::decode_from_slice(&payload, bincode::config::standard())?;
        Ok(Some(packet))
    }

    async fn handle(&self, packet: TestPacket, conn: &Arc<Connection<Self>>) -> Result<(), BoxError> {
        self.observed
            .handled
            .lock()
            .expect("handled lock")
            .push((conn.id(), packet.clone()));
        if self.mode == Mode::Echo {
            conn.send(packet);
        }
        Ok(())
    }
}

/// One `on_closed` notification.
#[derive(Clone, Debug)]
pub struct ClosedEvent {
    pub conn: ConnectionId,
    pub remark: String,
    pub removed: bool,
    pub had_cause: bool,
}

/// Listener recording lifecycle events; clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingListener {
    pub connected: Arc<AtomicUsize>,
    pub connect_failures: Arc<AtomicUsize>,
    pub sent_ok: Arc<AtomicUsize>,
    pub sent_failed: Arc<AtomicUsize>,
    pub decoded: Arc<AtomicUsize>,
    pub closed: Arc<Mutex<Vec<ClosedEvent>>>,
    /// Makes `on_decoded` panic after counting.
    pub panic_on_decoded: Arc<AtomicBool>,
}

impl RecordingListener {
    pub fn closed_events(&self) -> Vec<ClosedEvent> {
        self.closed.lock().expect("closed lock").clone()
    }
}

impl Listener<TestHandler> for RecordingListener {
    fn on_connected(&self, _conn: &Arc<Connection<TestHandler>>) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connect_failed(&self, _addr: SocketAddr, _error: &std::io::Error) {
        self.connect_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_decoded(&self, _conn: &Arc<Connection<TestHandler>>, _packet: &TestPacket) {
        self.decoded.fetch_add(1, Ordering::SeqCst);
        assert!(
            !self.panic_on_decoded.load(Ordering::SeqCst),
            "listener rejects decoded packet"
        );
    }

    fn on_sent(&self, _conn: &Arc<Connection<TestHandler>>, _packet: &TestPacket, success: bool) {
        if success {
            self.sent_ok.fetch_add(1, Ordering::SeqCst);
        } else {
            self.sent_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_closed(
        &self,
        conn: &Arc<Connection<TestHandler>>,
        cause: Option<&BoxError>,
        remark: &str,
        removed: bool,
    ) {
        self.closed.lock().expect("closed lock").push(ClosedEvent {
            conn: conn.id(),
            remark: remark.to_owned(),
            removed,
            had_cause: cause.is_some(),
        });
    }
}

/// A context plus the handles tests inspect.
pub struct Harness {
    pub ctx: Arc<EngineContext<TestHandler>>,
    pub observed: Arc<Observed>,
    pub listener: RecordingListener,
}

impl Harness {
    pub fn build(mode: Mode, config: EngineConfig) -> Self {
        let (handler, observed) = TestHandler::new(mode);
        let listener = RecordingListener::default();
        let ctx = EngineContext::builder(handler)
            .config(config)
            .listener(listener.clone())
            .build()
            .expect("build engine context");
        Self {
            ctx,
            observed,
            listener,
        }
    }

    /// Attach one end of an in-memory pipe; the returned end plays the peer.
    pub fn attach(&self, origin: Origin) -> (Arc<Connection<TestHandler>>, DuplexStream) {
        self.attach_with_capacity(origin, 64 * 1024)
    }

    /// Attach a pipe buffering at most `capacity` bytes in each direction.
    pub fn attach_with_capacity(
        &self,
        origin: Origin,
        capacity: usize,
    ) -> (Arc<Connection<TestHandler>>, DuplexStream) {
        let (ours, peer) = tokio::io::duplex(capacity);
        let conn = self.ctx.attach(ours, next_addr(), local_addr(), origin);
        (conn, peer)
    }
}

pub fn small_config() -> EngineConfig {
    EngineConfig::default()
        .name("test")
        .decode_workers(2)
        .send_workers(2)
        .close_workers(1)
}

#[fixture]
pub fn recording() -> Harness { Harness::build(Mode::Record, small_config()) }

#[fixture]
pub fn echoing() -> Harness { Harness::build(Mode::Echo, small_config()) }

static NEXT_PORT: AtomicU16 = AtomicU16::new(30_000);

pub fn next_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], NEXT_PORT.fetch_add(1, Ordering::Relaxed)))
}

pub fn local_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 7000)) }

/// Connect two contexts with an in-memory pipe.
pub fn link(
    client: &Harness,
    server: &Harness,
) -> (Arc<Connection<TestHandler>>, Arc<Connection<TestHandler>>) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client_addr = next_addr();
    let server_addr = next_addr();
    let outbound = client
        .ctx
        .attach(a, server_addr, client_addr, Origin::Connected);
    let inbound = server
        .ctx
        .attach(b, client_addr, server_addr, Origin::Accepted);
    (outbound, inbound)
}

/// Read one frame written by the engine.
pub async fn read_packet(peer: &mut DuplexStream) -> TestPacket {
    tokio::time::timeout(Duration::from_secs(5), async {
        let len = peer.read_u32().await.expect("read frame length") as usize;
        let mut payload = vec![0; len];
        peer.read_exact(&mut payload).await.expect("read frame payload");
        let (packet, _) = bincode::decode_from_slice(&payload, bincode::config::standard())
            .expect("decode frame");
        packet
    })
    .await
    .expect("frame should arrive")
}

/// Returns `true` if nothing arrives on `peer` within `wait`.
pub async fn stays_silent(peer: &mut DuplexStream, wait: Duration) -> bool {
    let mut byte = [0_u8; 1];
    tokio::time::timeout(wait, peer.read(&mut byte)).await.is_err()
}

/// Write one frame as the peer.
pub async fn write_packet(peer: &mut DuplexStream, packet: &TestPacket) {
    peer.write_all(&frame(packet)).await.expect("write frame");
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
