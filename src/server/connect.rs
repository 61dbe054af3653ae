//! Outbound connections.

use std::{net::SocketAddr, sync::Arc};

use log::warn;
use tokio::net::TcpStream;
use tracing::debug;

use super::ServerError;
use crate::{
    connection::{Connection, Origin},
    context::EngineContext,
    handler::Handler,
};

/// Connect to `addr` and attach the stream to `ctx` as [`Origin::Connected`].
///
/// A failed attempt is reported to [`crate::Listener::on_connect_failed`].
/// Closing the resulting connection parks it with its bindings intact, so a
/// reconnect policy can find it in [`EngineContext::closed_connections`].
///
/// # Errors
///
/// Returns [`ServerError::Connect`] when the connection cannot be
/// established.
pub async fn connect<H: Handler>(
    ctx: &Arc<EngineContext<H>>,
    addr: SocketAddr,
) -> Result<Arc<Connection<H>>, ServerError> {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(source) => {
            warn!("connect failed: addr={addr}, error={source}");
            ctx.notify("on_connect_failed", |l| l.on_connect_failed(addr, &source));
            return Err(ServerError::Connect { addr, source });
        }
    };
    let local = stream
        .local_addr()
        .map_err(|source| ServerError::Connect { addr, source })?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%addr, error = %e, "failed to disable Nagle");
    }
    Ok(ctx.attach(stream, addr, local, Origin::Connected))
}
