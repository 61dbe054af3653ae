//! Fixtures shared by unit tests.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU16, Ordering},
    },
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::DuplexStream;

use crate::{
    BoxError,
    Connection,
    EngineConfig,
    EngineContext,
    Handler,
    Origin,
};

static NEXT_PORT: AtomicU16 = AtomicU16::new(20_000);

/// Passes bytes through unchanged; every read is one packet.
pub(crate) struct Raw;

#[async_trait]
impl Handler for Raw {
    type Packet = Vec<u8>;
    type Session = ();

    fn encode(
        &self,
        packet: &Vec<u8>,
        _ctx: &EngineContext<Self>,
        _conn: Option<&Connection<Self>>,
    ) -> Result<Bytes, BoxError> {
        Ok(Bytes::copy_from_slice(packet))
    }

    fn decode(
        &self,
        buf: &mut BytesMut,
        _ctx: &EngineContext<Self>,
        _conn: &Connection<Self>,
    ) -> Result<Option<Vec<u8>>, BoxError> {
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(buf.split().to_vec()))
    }

    async fn handle(&self, _packet: Vec<u8>, _conn: &Arc<Connection<Self>>) -> Result<(), BoxError> {
        Ok(())
    }
}

pub(crate) fn context() -> Arc<EngineContext<Raw>> {
    EngineContext::builder(Raw)
        .config(
            EngineConfig::default()
                .name("unit")
                .decode_workers(2)
                .send_workers(2)
                .close_workers(1),
        )
        .build()
        .expect("build test context")
}

/// Attach one end of an in-memory pipe; the other end plays the peer.
pub(crate) fn attach(ctx: &Arc<EngineContext<Raw>>, origin: Origin) -> (Arc<Connection<Raw>>, DuplexStream) {
    let (ours, peer) = tokio::io::duplex(4096);
    let remote = SocketAddr::from(([127, 0, 0, 1], NEXT_PORT.fetch_add(1, Ordering::Relaxed)));
    let local = SocketAddr::from(([127, 0, 0, 1], 9000));
    (ctx.attach(ours, remote, local, origin), peer)
}
