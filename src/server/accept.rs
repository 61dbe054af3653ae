//! Accept loop feeding connections into an engine context.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::{info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tracing::debug;

use super::{BackoffConfig, ServerError};
use crate::{connection::Origin, context::EngineContext, handler::Handler};

/// Source of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(crate) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Bind a listening socket on `addr`.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the socket cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Accept connections from `listener` until `ctx` shuts down.
///
/// Every accepted stream is attached to `ctx` as [`Origin::Accepted`]. Accept
/// failures are logged and retried after an exponential back-off.
///
/// # Errors
///
/// Returns [`ServerError::LocalAddr`] if the listener's address cannot be
/// read before the loop starts.
pub async fn serve<H: Handler>(
    ctx: Arc<EngineContext<H>>,
    listener: TcpListener,
    backoff: BackoffConfig,
) -> Result<(), ServerError> {
    let local = listener.local_addr().map_err(ServerError::LocalAddr)?;
    info!("listening: name={}, addr={local}", ctx.config().name);
    accept_loop(&ctx, &listener, backoff).await;
    info!("listener stopped: name={}, addr={local}", ctx.config().name);
    Ok(())
}

/// Run [`serve`] on a task tracked by `ctx` and return the bound address.
///
/// [`EngineContext::shutdown`] stops the loop and waits for it.
///
/// # Errors
///
/// Returns [`ServerError::LocalAddr`] if the listener's address cannot be
/// read.
pub fn spawn<H: Handler>(
    ctx: &Arc<EngineContext<H>>,
    listener: TcpListener,
    backoff: BackoffConfig,
) -> Result<SocketAddr, ServerError> {
    let local = listener.local_addr().map_err(ServerError::LocalAddr)?;
    let task = serve(Arc::clone(ctx), listener, backoff);
    ctx.io_tasks().spawn_on(
        async move {
            if let Err(e) = task.await {
                warn!("accept loop failed: error={e}");
            }
        },
        ctx.runtime(),
    );
    Ok(local)
}

pub(crate) async fn accept_loop<H, L>(ctx: &Arc<EngineContext<H>>, listener: &L, backoff: BackoffConfig)
where
    H: Handler,
    L: AcceptListener,
{
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        let res = select! {
            biased;

            () = ctx.shutdown_token().cancelled() => return,
            res = listener.accept() => res,
        };
        match res {
            Ok((stream, remote)) => {
                admit(ctx, listener, stream, remote);
                delay = backoff.initial_delay;
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                select! {
                    biased;

                    () = ctx.shutdown_token().cancelled() => return,
                    () = sleep(delay) => {}
                }
                delay = backoff.next_delay(delay);
            }
        }
    }
}

fn admit<H, L>(ctx: &Arc<EngineContext<H>>, listener: &L, stream: TcpStream, remote: SocketAddr)
where
    H: Handler,
    L: AcceptListener,
{
    let local = match stream.local_addr().or_else(|_| listener.local_addr()) {
        Ok(local) => local,
        Err(e) => {
            warn!("accepted stream dropped: remote={remote}, error={e}");
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%remote, error = %e, "failed to disable Nagle");
    }
    ctx.attach(stream, remote, local, Origin::Accepted);
}
