//! Decode lane: turn raw reads into packets and dispatch them.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use log::warn;
use tracing::trace;

use super::Connection;
use crate::{
    context::EngineContext,
    error::{BoxError, EngineError},
    handler::Handler,
    lane::LaneProcessor,
    metrics::{self, Direction},
    packet::synchronous_seq,
};

pub(super) struct DecodeProcessor<H: Handler> {
    conn: Weak<Connection<H>>,
}

impl<H: Handler> DecodeProcessor<H> {
    pub(super) fn new(conn: Weak<Connection<H>>) -> Self { Self { conn } }
}

#[async_trait]
impl<H: Handler> LaneProcessor<Bytes> for DecodeProcessor<H> {
    async fn process(&self, bytes: Bytes) -> Result<(), BoxError> {
        let Some(conn) = self.conn.upgrade() else {
            return Ok(());
        };
        let ctx = conn.context().ok_or(EngineError::ContextDropped)?;

        let (packets, failure) = conn.decode_available(&ctx, &bytes);
        for packet in packets {
            dispatch(&ctx, &conn, packet).await;
        }
        if let Some(e) = failure {
            conn.close(Some(e), "decode failed");
        }
        Ok(())
    }
}

impl<H: Handler> Connection<H> {
    /// Append `bytes` to the read accumulator and decode every complete packet.
    ///
    /// A decode error discards the accumulator; packets decoded before the
    /// error are still returned.
    fn decode_available(
        &self,
        ctx: &EngineContext<H>,
        bytes: &[u8],
    ) -> (Vec<H::Packet>, Option<BoxError>) {
        let mut buf = self.read_buf();
        buf.extend_from_slice(bytes);
        let mut packets = Vec::new();
        loop {
            match ctx.handler().decode(&mut buf, ctx, self) {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => return (packets, None),
                Err(e) => {
                    buf.clear();
                    return (packets, Some(e));
                }
            }
        }
    }
}

/// Complete a pending synchronous call or hand the packet to the handler.
async fn dispatch<H: Handler>(ctx: &EngineContext<H>, conn: &Arc<Connection<H>>, packet: H::Packet) {
    metrics::inc_packets(Direction::Inbound);
    ctx.notify("on_decoded", |l| l.on_decoded(conn, &packet));

    let packet = match synchronous_seq(&packet) {
        Some(seq) => match ctx.pending().complete(seq, packet) {
            Ok(()) => {
                trace!(conn = %conn.id(), seq, "reply matched pending request");
                return;
            }
            Err(unmatched) => unmatched,
        },
        None => packet,
    };

    if let Err(e) = ctx.handler().handle(packet, conn).await {
        metrics::inc_errors();
        warn!(
            "handler failed: conn={}, remote={}, error={e}",
            conn.id(),
            conn.remote_addr()
        );
    }
}
