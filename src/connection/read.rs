//! Per-connection read task.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    runtime::Handle,
    select,
};
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::Connection;
use crate::handler::Handler;

/// Spawn the task that feeds `reader` into `conn`'s decode lane.
///
/// The task keeps exactly one read outstanding and stops once the
/// connection begins closing.
pub(crate) fn spawn_reader<H, R>(
    conn: Arc<Connection<H>>,
    reader: R,
    buffer_size: usize,
    tracker: &TaskTracker,
    runtime: &Handle,
) where
    H: Handler,
    R: AsyncRead + Send + Unpin + 'static,
{
    tracker.spawn_on(read_loop(conn, reader, buffer_size), runtime);
}

async fn read_loop<H, R>(conn: Arc<Connection<H>>, mut reader: R, buffer_size: usize)
where
    H: Handler,
    R: AsyncRead + Send + Unpin,
{
    let mut buf = BytesMut::with_capacity(buffer_size);
    while conn.is_open() {
        buf.reserve(buffer_size);
        let res = select! {
            biased;

            () = conn.closing.cancelled() => break,
            res = reader.read_buf(&mut buf) => res,
        };
        match res {
            Ok(0) => {
                conn.close(None, "peer closed the connection");
                break;
            }
            Ok(n) => {
                debug!(conn = %conn.id(), bytes = n, "read");
                if !conn.decode_lane.submit(buf.split().freeze()) {
                    break;
                }
            }
            Err(e) => {
                conn.close(Some(Box::new(e)), "read failed");
                break;
            }
        }
    }
    debug!(conn = %conn.id(), "read task finished");
}
