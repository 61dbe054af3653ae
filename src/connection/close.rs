//! Close state machine.
//!
//! `close` and `remove` claim the transition, cancel both lanes, the read
//! task and any blocked write, then schedule the close task on the close pool. The close task
//! releases the transport, updates the directories and runs the `on_closed`
//! hook exactly once.

use std::{sync::Arc, time::Duration};

use log::{info, warn};
use tokio::io::AsyncWriteExt;

use super::{Connection, Origin};
use crate::{context::EngineContext, error::BoxError, handler::Handler};

/// How long the close task waits for an in-flight write before giving up on
/// a clean transport shutdown.
const WRITER_RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

impl<H: Handler> Connection<H> {
    /// Close the connection.
    ///
    /// Accepted connections are purged from every directory. Connections
    /// initiated by this process keep their group and user bindings and are
    /// parked in [`EngineContext::closed_connections`]. Repeated calls are
    /// no-ops.
    pub fn close(self: &Arc<Self>, cause: Option<BoxError>, remark: impl Into<String>) {
        self.begin_close(cause, remark.into(), false);
    }

    /// Close the connection and purge it from every directory.
    ///
    /// Repeated calls, and calls after [`close`](Self::close), are no-ops.
    pub fn remove(self: &Arc<Self>, cause: Option<BoxError>, remark: impl Into<String>) {
        self.begin_close(cause, remark.into(), true);
    }

    fn begin_close(self: &Arc<Self>, cause: Option<BoxError>, remark: String, remove: bool) {
        if !self.flags.begin_close() {
            info!(
                "close ignored: conn={}, state={:?}, remark={remark}",
                self.id,
                self.state()
            );
            return;
        }
        self.decode_lane.cancel();
        self.send_lane.cancel();
        self.closing.cancel();

        let Some(ctx) = self.context() else {
            // Nothing left to notify or purge.
            self.flags.finish(true);
            self.release_counter();
            info!("connection abandoned: conn={}, remark={remark}", self.id);
            return;
        };
        let conn = Arc::clone(self);
        let pool = ctx.close_pool().clone();
        pool.execute(async move { conn.run_close(&ctx, cause, remark, remove).await });
    }

    async fn run_close(
        self: Arc<Self>,
        ctx: &EngineContext<H>,
        cause: Option<BoxError>,
        remark: String,
        remove: bool,
    ) {
        self.release_writer().await;

        // Nothing is parked once the context is stopping.
        let removed = remove || self.origin == Origin::Accepted || ctx.is_shutting_down();
        if removed {
            ctx.purge(&self);
        } else {
            ctx.park(&self);
        }
        self.flags.finish(removed);
        self.release_counter();

        match &cause {
            Some(e) => warn!(
                "connection closed: conn={}, remote={}, removed={removed}, remark={remark}, \
                 cause={e}",
                self.id, self.remote
            ),
            None => info!(
                "connection closed: conn={}, remote={}, removed={removed}, remark={remark}",
                self.id, self.remote
            ),
        }

        ctx.notify("on_closed", |l| l.on_closed(&self, cause.as_ref(), &remark, removed));
    }

    async fn release_writer(&self) {
        let Ok(mut slot) = tokio::time::timeout(WRITER_RELEASE_TIMEOUT, self.writer.lock()).await
        else {
            warn!("writer busy at close; transport left to drop: conn={}", self.id);
            return;
        };
        let Some(mut writer) = slot.take() else {
            return;
        };
        drop(slot);
        match tokio::time::timeout(WRITER_RELEASE_TIMEOUT, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => info!("transport shutdown failed: conn={}, error={e}", self.id),
            Err(_) => info!("transport shutdown timed out: conn={}", self.id),
        }
    }
}
