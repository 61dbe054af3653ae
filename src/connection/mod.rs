//! Connections and their lifecycle.
//!
//! A [`Connection`] owns one transport endpoint. Inbound bytes flow from the
//! read task into the connection's decode lane; outbound packets flow through
//! its send lane. Both lanes drain onto the context's shared worker pools, so
//! a connection costs a task only while it has work queued.
//!
//! Closing is a one-way transition claimed with a single compare-exchange.
//! The winner schedules the close task on the close pool; every other caller
//! is a logged no-op.

mod close;
mod counter;
mod dispatch;
mod output;
mod read;
mod state;

use std::{
    fmt,
    hash::{Hash, Hasher},
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use log::warn;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use self::{
    counter::ActiveConnection,
    dispatch::DecodeProcessor,
    output::SendProcessor,
    state::LifecycleFlags,
};
pub use self::{counter::active_connection_count, state::ConnectionState};
pub(crate) use self::read::spawn_reader;
use crate::{
    context::EngineContext,
    handler::Handler,
    lane::{Lane, LaneKind, LaneProcessor},
    packet::Outbound,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier assigned to each connection, unique within the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new identifier wrapping `id`.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(self) -> u64 { self.0 }

    fn next() -> Self { Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)) }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// How a connection came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Accepted by a listening server. Closing always removes it.
    Accepted,
    /// Initiated by this process. Closing parks it for a reconnect policy.
    Connected,
}

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One transport endpoint managed by an [`EngineContext`].
///
/// Connections are always handled through `Arc`. Equality and hashing use
/// the [`ConnectionId`] only.
pub struct Connection<H: Handler> {
    id: ConnectionId,
    remote: SocketAddr,
    local: SocketAddr,
    origin: Origin,
    session: H::Session,
    context: Weak<EngineContext<H>>,
    read_buf: Mutex<BytesMut>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    closing: CancellationToken,
    flags: LifecycleFlags,
    active: Mutex<Option<ActiveConnection>>,
    decode_lane: Arc<Lane<Bytes>>,
    send_lane: Arc<Lane<Outbound<H::Packet>>>,
}

impl<H: Handler> Connection<H> {
    /// Build a connection whose lanes drain onto `ctx`'s pools.
    pub(crate) fn open(
        ctx: &Arc<EngineContext<H>>,
        writer: BoxedWriter,
        remote: SocketAddr,
        local: SocketAddr,
        origin: Origin,
        session: H::Session,
    ) -> Arc<Self> {
        let id = ConnectionId::next();
        let label: Arc<str> = format!("{id} {remote}").into();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let decode: Arc<dyn LaneProcessor<Bytes>> = Arc::new(DecodeProcessor::new(me.clone()));
            let send: Arc<dyn LaneProcessor<Outbound<H::Packet>>> =
                Arc::new(SendProcessor::new(me.clone()));
            Self {
                id,
                remote,
                local,
                origin,
                session,
                context: Arc::downgrade(ctx),
                read_buf: Mutex::new(BytesMut::new()),
                writer: tokio::sync::Mutex::new(Some(writer)),
                closing: CancellationToken::new(),
                flags: LifecycleFlags::default(),
                active: Mutex::new(Some(ActiveConnection::new())),
                decode_lane: Lane::new(
                    Arc::clone(&label),
                    LaneKind::Decode,
                    ctx.decode_pool().clone(),
                    decode,
                ),
                send_lane: Lane::new(label, LaneKind::Send, ctx.send_pool().clone(), send),
            }
        })
    }

    /// Identifier of this connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId { self.id }

    /// Address of the peer.
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr { self.remote }

    /// Local address of the transport.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr { self.local }

    /// Whether the connection was accepted or initiated.
    #[must_use]
    pub const fn origin(&self) -> Origin { self.origin }

    /// Application session state.
    #[must_use]
    pub const fn session(&self) -> &H::Session { &self.session }

    /// Owning context, unless it has already been dropped.
    #[must_use]
    pub fn context(&self) -> Option<Arc<EngineContext<H>>> { self.context.upgrade() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.flags.state() }

    /// Returns `true` until a close or remove has been requested.
    #[must_use]
    pub fn is_open(&self) -> bool { !self.flags.is_waiting_close() }

    /// Returns `true` once a close or remove has been requested.
    #[must_use]
    pub fn is_waiting_close(&self) -> bool { self.flags.is_waiting_close() }

    /// Returns `true` once the close task has released the transport.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.flags.is_closed() }

    /// Returns `true` once the connection has been purged from every directory.
    #[must_use]
    pub fn is_removed(&self) -> bool { self.flags.is_removed() }

    /// Queue `packet` for sending.
    ///
    /// Returns `false`, and logs, when the connection is no longer open.
    pub fn send(&self, packet: H::Packet) -> bool { self.send_outbound(Outbound::from(packet)) }

    /// Queue an already wrapped packet, possibly carrying shared encoded bytes.
    pub fn send_outbound(&self, outbound: Outbound<H::Packet>) -> bool {
        if !self.is_open() {
            warn!(
                "send refused: conn={}, remote={}, state={:?}",
                self.id,
                self.remote,
                self.state()
            );
            return false;
        }
        self.send_lane.submit(outbound)
    }

    /// Number of packets waiting in the send lane.
    #[must_use]
    pub fn pending_sends(&self) -> usize { self.send_lane.pending() }

    /// Add this connection to `group`. Returns `false` if it was already a member.
    ///
    /// Closing connections cannot join groups; the call returns `false`.
    pub fn bind_group(self: &Arc<Self>, group: &str) -> bool {
        if !self.is_open() {
            warn!("bind refused: conn={}, group={group}, state={:?}", self.id, self.state());
            return false;
        }
        self.with_context("bind_group", |ctx| ctx.groups().bind(group, self))
            .unwrap_or(false)
    }

    /// Remove this connection from `group`. Unknown groups are a no-op.
    pub fn unbind_group(self: &Arc<Self>, group: &str) -> bool {
        self.with_context("unbind_group", |ctx| ctx.groups().unbind(group, self))
            .unwrap_or(false)
    }

    /// Remove this connection from every group; returns how many it left.
    pub fn unbind_all_groups(self: &Arc<Self>) -> usize {
        self.with_context("unbind_all_groups", |ctx| ctx.groups().unbind_all(self))
            .unwrap_or(0)
    }

    /// Groups this connection currently belongs to.
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        self.with_context("groups", |ctx| ctx.groups().groups_of(self.id))
            .unwrap_or_default()
    }

    /// Bind `user` to this connection, replacing any previous holder of `user`.
    ///
    /// Returns `false`, binding nothing, once the connection is closing.
    pub fn bind_user(self: &Arc<Self>, user: &str) -> bool {
        if !self.is_open() {
            warn!("bind refused: conn={}, user={user}, state={:?}", self.id, self.state());
            return false;
        }
        self.with_context("bind_user", |ctx| ctx.users().bind(user, self))
            .unwrap_or(false)
    }

    /// Release this connection's user id. Returns `false` if it held none.
    pub fn unbind_user(self: &Arc<Self>) -> bool {
        self.with_context("unbind_user", |ctx| ctx.users().unbind(self))
            .unwrap_or(false)
    }

    /// User id currently bound to this connection.
    #[must_use]
    pub fn user(&self) -> Option<String> {
        self.with_context("user", |ctx| ctx.users().user_of(self.id))
            .flatten()
    }

    pub(crate) fn mark_removed(&self) { self.flags.mark_removed(); }

    fn with_context<R>(&self, op: &str, f: impl FnOnce(&EngineContext<H>) -> R) -> Option<R> {
        if let Some(ctx) = self.context() {
            Some(f(ctx.as_ref()))
        } else {
            warn!("context dropped: conn={}, op={op}", self.id);
            None
        }
    }

    fn read_buf(&self) -> std::sync::MutexGuard<'_, BytesMut> {
        self.read_buf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_counter(&self) {
        drop(
            self.active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
    }
}

impl<H: Handler> PartialEq for Connection<H> {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl<H: Handler> Eq for Connection<H> {}

impl<H: Handler> Hash for Connection<H> {
    fn hash<S: Hasher>(&self, state: &mut S) { self.id.hash(state); }
}

impl<H: Handler> fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("local", &self.local)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
