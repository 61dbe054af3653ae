//! The shared engine context and its facade.
//!
//! One [`EngineContext`] exists per listening or connecting endpoint. It owns
//! every directory, the pending-request table, the decode, send and close
//! worker pools, and the injected [`Handler`] and [`Listener`]. Connections
//! only hold a weak reference back to it.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use log::{error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    runtime::Handle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

use crate::{
    config::{ConfigError, EngineConfig},
    connection::{Connection, Origin, spawn_reader},
    correlation::{PendingRequests, SyncReply},
    directory::{ConnectionSet, Groups, PeerNodes, Users},
    error::{BoxError, EngineError},
    handler::{Handler, Listener, NoopListener},
    metrics,
    packet::{Outbound, synchronous_seq},
    panic::format_panic,
    pool::WorkerPool,
};

/// Builder for [`EngineContext`].
///
/// # Examples
///
/// ```no_run
/// # use wirelane::{EngineConfig, EngineContext, Handler};
/// # async fn demo<H: Handler>(handler: H) -> Result<(), wirelane::ConfigError> {
/// let ctx = EngineContext::builder(handler)
///     .config(EngineConfig::default().name("chat").shared_encoding(true))
///     .build()?;
/// ctx.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct EngineContextBuilder<H: Handler> {
    handler: H,
    config: EngineConfig,
    listener: Arc<dyn Listener<H>>,
    runtime: Option<Handle>,
}

impl<H: Handler> EngineContextBuilder<H> {
    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a lifecycle listener.
    #[must_use]
    pub fn listener(mut self, listener: impl Listener<H>) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    /// Bind the worker pools to `runtime` instead of the current one.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate the configuration and create the context.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an invalid configuration, or
    /// [`ConfigError::NoRuntime`] when no runtime was given and none is
    /// current.
    pub fn build(self) -> Result<Arc<EngineContext<H>>, ConfigError> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };
        let pool = |kind: &str, size| {
            WorkerPool::new(format!("{}-{kind}", self.config.name), size, runtime.clone())
        };
        let decode_pool = pool("decode", self.config.decode_workers);
        let send_pool = pool("send", self.config.send_workers);
        let close_pool = pool("close", self.config.close_workers);
        info!(
            "engine context built: name={}, decode_workers={}, send_workers={}, \
             close_workers={}",
            self.config.name,
            decode_pool.size(),
            send_pool.size(),
            close_pool.size()
        );
        Ok(Arc::new(EngineContext {
            config: self.config,
            handler: self.handler,
            listener: self.listener,
            connections: ConnectionSet::default(),
            closed: ConnectionSet::default(),
            groups: Groups::default(),
            users: Users::default(),
            peer_nodes: PeerNodes::default(),
            pending: PendingRequests::default(),
            decode_pool,
            send_pool,
            close_pool,
            io_tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            runtime,
        }))
    }
}

/// Process-wide state shared by every connection of one endpoint.
pub struct EngineContext<H: Handler> {
    config: EngineConfig,
    handler: H,
    listener: Arc<dyn Listener<H>>,
    connections: ConnectionSet<H>,
    closed: ConnectionSet<H>,
    groups: Groups<H>,
    users: Users<H>,
    peer_nodes: PeerNodes<H>,
    pending: PendingRequests<H::Packet>,
    decode_pool: WorkerPool,
    send_pool: WorkerPool,
    close_pool: WorkerPool,
    io_tasks: TaskTracker,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl<H: Handler> fmt::Debug for EngineContext<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("name", &self.config.name)
            .field("connections", &self.connections.read().len())
            .field("closed", &self.closed.read().len())
            .field("groups", &self.groups)
            .field("users", &self.users)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<H: Handler> EngineContext<H> {
    /// Start building a context around `handler`.
    #[must_use]
    pub fn builder(handler: H) -> EngineContextBuilder<H> {
        EngineContextBuilder {
            handler,
            config: EngineConfig::default(),
            listener: Arc::new(NoopListener),
            runtime: None,
        }
    }

    /// Configuration the context was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig { &self.config }

    /// Injected handler.
    #[must_use]
    pub fn handler(&self) -> &H { &self.handler }

    /// Injected lifecycle listener.
    #[must_use]
    pub fn listener(&self) -> &dyn Listener<H> { self.listener.as_ref() }

    /// Every connection that has not been closed.
    #[must_use]
    pub fn connections(&self) -> &ConnectionSet<H> { &self.connections }

    /// Closed client connections parked for a reconnect policy.
    #[must_use]
    pub fn closed_connections(&self) -> &ConnectionSet<H> { &self.closed }

    /// Group directory.
    #[must_use]
    pub fn groups(&self) -> &Groups<H> { &self.groups }

    /// User directory.
    #[must_use]
    pub fn users(&self) -> &Users<H> { &self.users }

    /// Peer address directory.
    #[must_use]
    pub fn peer_nodes(&self) -> &PeerNodes<H> { &self.peer_nodes }

    /// Synchronous calls awaiting a reply.
    #[must_use]
    pub fn pending(&self) -> &PendingRequests<H::Packet> { &self.pending }

    /// Returns `true` once [`shutdown`](Self::shutdown) has started.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool { self.shutdown.is_cancelled() }

    pub(crate) fn decode_pool(&self) -> &WorkerPool { &self.decode_pool }

    pub(crate) fn send_pool(&self) -> &WorkerPool { &self.send_pool }

    pub(crate) fn close_pool(&self) -> &WorkerPool { &self.close_pool }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken { &self.shutdown }

    pub(crate) fn io_tasks(&self) -> &TaskTracker { &self.io_tasks }

    pub(crate) fn runtime(&self) -> &Handle { &self.runtime }

    /// Run a listener hook, logging instead of propagating a panic.
    pub(crate) fn notify(&self, hook: &str, f: impl FnOnce(&dyn Listener<H>)) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(self.listener()))) {
            metrics::inc_lane_panics();
            error!("listener panicked: hook={hook}, panic={}", format_panic(&*panic));
        }
    }

    /// Register a connected stream and start reading from it.
    ///
    /// The stream is split; the read half is driven by a task tracked by the
    /// context and the write half is owned by the connection's send lane.
    pub fn attach<S>(
        self: &Arc<Self>,
        stream: S,
        remote: SocketAddr,
        local: SocketAddr,
        origin: Origin,
    ) -> Arc<Connection<H>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.attach_with_session(stream, remote, local, origin, H::Session::default())
    }

    /// Like [`attach`](Self::attach), starting the connection with `session`
    /// instead of a default session.
    pub fn attach_with_session<S>(
        self: &Arc<Self>,
        stream: S,
        remote: SocketAddr,
        local: SocketAddr,
        origin: Origin,
        session: H::Session,
    ) -> Arc<Connection<H>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let conn = Connection::open(self, Box::new(writer), remote, local, origin, session);
        self.connections.write().insert(Arc::clone(&conn));
        if let Some(previous) = self.peer_nodes.register(&conn) {
            debug!(addr = %remote, from = %previous.id(), to = %conn.id(), "peer node replaced");
        }
        info!(
            "connection opened: conn={}, remote={remote}, local={local}, origin={origin:?}",
            conn.id()
        );

        if self.is_shutting_down() {
            conn.remove(None, "context shutting down");
            return conn;
        }
        self.notify("on_connected", |l| l.on_connected(&conn));
        spawn_reader(
            Arc::clone(&conn),
            reader,
            self.config.read_buffer_size,
            &self.io_tasks,
            &self.runtime,
        );
        conn
    }

    /// Send `packet` to the connection registered for `ip:port`.
    pub fn send_to_address(&self, ip: IpAddr, port: u16, packet: H::Packet) -> bool {
        let addr = SocketAddr::new(ip, port);
        match self.peer_nodes.find(addr) {
            Some(conn) => conn.send(packet),
            None => {
                warn!("peer node not found: addr={addr}");
                false
            }
        }
    }

    /// Send `packet` to the connection bound to `user`.
    pub fn send_to_user(&self, user: &str, packet: H::Packet) -> bool {
        match self.users.find(user) {
            Some(conn) => conn.send(packet),
            None => {
                warn!("user not found: user={user}");
                false
            }
        }
    }

    /// Broadcast `packet` to every member of `group`.
    pub fn send_to_group(&self, group: &str, packet: H::Packet) -> usize {
        self.send_to_group_filtered(group, packet, |_| true)
    }

    /// Broadcast `packet` to the members of `group` accepted by `filter`.
    pub fn send_to_group_filtered(
        &self,
        group: &str,
        packet: H::Packet,
        filter: impl Fn(&Connection<H>) -> bool,
    ) -> usize {
        match self.groups.members(group) {
            Some(set) => self.send_to_set(&set, packet, filter),
            None => {
                warn!("group not found: group={group}");
                0
            }
        }
    }

    /// Broadcast `packet` to every open connection.
    pub fn send_to_all(&self, packet: H::Packet) -> usize {
        self.send_to_set(&self.connections, packet, |_| true)
    }

    /// Broadcast `packet` to the open connections accepted by `filter`.
    pub fn send_to_all_filtered(
        &self,
        packet: H::Packet,
        filter: impl Fn(&Connection<H>) -> bool,
    ) -> usize {
        self.send_to_set(&self.connections, packet, filter)
    }

    /// Broadcast `packet` to the members of `set` accepted by `filter`.
    ///
    /// The set's read lock is held until every send has been queued, so the
    /// broadcast sees one consistent membership. With
    /// [`EngineConfig::shared_encoding`] the packet is encoded once and the
    /// bytes are shared. Returns the number of sends queued.
    pub fn send_to_set(
        &self,
        set: &ConnectionSet<H>,
        packet: H::Packet,
        filter: impl Fn(&Connection<H>) -> bool,
    ) -> usize {
        let members = set.read();
        if members.is_empty() {
            debug!("broadcast skipped; no recipients");
            return 0;
        }
        let packet = Arc::new(packet);
        let outbound = if self.config.shared_encoding {
            match self.handler.encode(&packet, self, None) {
                Ok(bytes) => Outbound::pre_encoded(packet, bytes),
                Err(e) => {
                    metrics::inc_errors();
                    error!("broadcast encode failed: error={e}");
                    return 0;
                }
            }
        } else {
            Outbound::new(packet)
        };

        let queued = members
            .iter()
            .filter(|conn| filter(conn.as_ref()))
            .filter(|conn| conn.send_outbound(outbound.clone()))
            .count();
        debug!(recipients = members.len(), queued, "broadcast queued");
        queued
    }

    /// Send `packet` and wait up to `timeout` for the reply carrying the same
    /// sequence number.
    ///
    /// Do not call this from [`Handler::handle`] for the same connection: the
    /// reply is decoded on the lane that would be waiting for it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidSequence`] if `packet` has no positive
    ///   sequence number.
    /// - [`EngineError::DuplicateSequence`] if that number is already in
    ///   flight.
    /// - [`EngineError::NotWritable`] if `conn` is closing or closed.
    pub async fn synchronous_send(
        &self,
        conn: &Arc<Connection<H>>,
        packet: H::Packet,
        timeout: Duration,
    ) -> Result<SyncReply<H::Packet>, EngineError> {
        let seq = synchronous_seq(&packet).ok_or(EngineError::InvalidSequence)?;
        let waiter = self.pending.register(seq)?;
        if !conn.send(packet) {
            return Err(EngineError::NotWritable(conn.id()));
        }
        let reply = waiter.wait(timeout).await;
        if reply.is_timed_out() {
            warn!(
                "synchronous send timed out: conn={}, seq={seq}, timeout={timeout:?}",
                conn.id()
            );
        }
        Ok(reply)
    }

    /// Connection bound to `user`.
    #[must_use]
    pub fn find_by_user(&self, user: &str) -> Option<Arc<Connection<H>>> { self.users.find(user) }

    /// Connection registered for `ip:port`.
    #[must_use]
    pub fn find_by_address(&self, ip: IpAddr, port: u16) -> Option<Arc<Connection<H>>> {
        self.peer_nodes.find(SocketAddr::new(ip, port))
    }

    /// Live member set of `group`.
    #[must_use]
    pub fn find_group_members(&self, group: &str) -> Option<ConnectionSet<H>> {
        self.groups.members(group)
    }

    /// Close the connection registered for `ip:port`.
    pub fn close_address(
        &self,
        ip: IpAddr,
        port: u16,
        cause: Option<BoxError>,
        remark: impl Into<String>,
    ) -> bool {
        self.with_address(ip, port, |conn| conn.close(cause, remark))
    }

    /// Remove the connection registered for `ip:port`.
    pub fn remove_address(
        &self,
        ip: IpAddr,
        port: u16,
        cause: Option<BoxError>,
        remark: impl Into<String>,
    ) -> bool {
        self.with_address(ip, port, |conn| conn.remove(cause, remark))
    }

    fn with_address(&self, ip: IpAddr, port: u16, f: impl FnOnce(&Arc<Connection<H>>)) -> bool {
        if let Some(conn) = self.find_by_address(ip, port) {
            f(&conn);
            true
        } else {
            warn!("peer node not found: addr={}", SocketAddr::new(ip, port));
            false
        }
    }

    /// Drop `conn` from every directory.
    ///
    /// Used for parked client connections that will not be re-established.
    /// An open connection is removed through [`Connection::remove`] instead.
    pub fn purge(&self, conn: &Arc<Connection<H>>) {
        if conn.is_open() {
            conn.remove(None, "purged");
            return;
        }
        self.connections.write().remove(conn);
        self.closed.write().remove(conn);
        self.groups.unbind_all(conn);
        self.users.unbind(conn);
        self.peer_nodes.unregister(conn);
        if conn.is_closed() {
            conn.mark_removed();
        }
    }

    /// Move a closing client connection to the closed set, keeping its
    /// bindings.
    pub(crate) fn park(&self, conn: &Arc<Connection<H>>) {
        self.connections.write().remove(conn);
        self.closed.write().insert(Arc::clone(conn));
    }

    /// Stop the context.
    ///
    /// Cancels accept loops, removes every connection, purges parked ones,
    /// then waits for the close, decode and send pools and the read tasks to
    /// drain. Every `on_closed` notification has run when this returns,
    /// including those for connections attached while it was in progress.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            debug!(name = %self.config.name, "shutdown already in progress");
        }
        self.shutdown.cancel();

        let live = snapshot(&self.connections);
        for conn in &live {
            conn.remove(None, "context shutting down");
        }
        for conn in &snapshot(&self.closed) {
            self.purge(conn);
        }

        self.close_pool.shutdown().await;
        self.decode_pool.shutdown().await;
        self.send_pool.shutdown().await;
        self.io_tasks.close();
        self.io_tasks.wait().await;
        // Handlers and read tasks still draining above may have attached or
        // closed connections after the first wait.
        self.close_pool.shutdown().await;
        info!(
            "engine context stopped: name={}, removed={}",
            self.config.name,
            live.len()
        );
    }
}

fn snapshot<H: Handler>(set: &ConnectionSet<H>) -> Vec<Arc<Connection<H>>> {
    set.read().iter().cloned().collect()
}
