//! Send lane: encode queued packets and write them to the transport.

use std::{io, sync::Weak};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, select};
use tracing::debug;

use super::Connection;
use crate::{
    error::{BoxError, EngineError},
    handler::Handler,
    lane::LaneProcessor,
    metrics::{self, Direction},
    packet::Outbound,
};

pub(super) struct SendProcessor<H: Handler> {
    conn: Weak<Connection<H>>,
}

impl<H: Handler> SendProcessor<H> {
    pub(super) fn new(conn: Weak<Connection<H>>) -> Self { Self { conn } }
}

#[async_trait]
impl<H: Handler> LaneProcessor<Outbound<H::Packet>> for SendProcessor<H> {
    async fn process(&self, outbound: Outbound<H::Packet>) -> Result<(), BoxError> {
        let Some(conn) = self.conn.upgrade() else {
            return Ok(());
        };
        if !conn.is_open() {
            debug!(conn = %conn.id(), state = ?conn.state(), "send skipped; connection closing");
            return Ok(());
        }
        let ctx = conn.context().ok_or(EngineError::ContextDropped)?;

        let bytes = match outbound.encoded() {
            Some(bytes) => bytes.clone(),
            None => match ctx.handler().encode(outbound.packet(), &ctx, Some(conn.as_ref())) {
                Ok(bytes) => bytes,
                Err(e) => {
                    ctx.notify("on_sent", |l| l.on_sent(&conn, outbound.packet(), false));
                    return Err(e);
                }
            },
        };

        match conn.write_frame(&bytes).await {
            Ok(()) => {
                metrics::inc_packets(Direction::Outbound);
                ctx.notify("on_sent", |l| l.on_sent(&conn, outbound.packet(), true));
            }
            Err(e) => {
                ctx.notify("on_sent", |l| l.on_sent(&conn, outbound.packet(), false));
                if conn.is_open() {
                    conn.close(Some(Box::new(e)), "write failed");
                } else {
                    debug!(conn = %conn.id(), error = %e, "write abandoned; connection closing");
                }
            }
        }
        Ok(())
    }
}

impl<H: Handler> Connection<H> {
    /// Write and flush `bytes`, giving up as soon as the connection begins
    /// closing so a peer that stops reading cannot pin the writer or a send
    /// worker.
    async fn write_frame(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport already released",
            ));
        };
        select! {
            biased;

            () = self.closing.cancelled() => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closing",
            )),
            res = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => res,
        }
    }
}
