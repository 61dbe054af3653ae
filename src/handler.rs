//! Collaborators injected into an [`EngineContext`].
//!
//! [`Handler`] owns the wire format and the business logic: it turns packets
//! into bytes, bytes into packets, and receives every decoded packet.
//! [`Listener`] observes connection lifecycle events; all of its methods have
//! no-op defaults so implementations override only what they need.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::{connection::Connection, context::EngineContext, error::BoxError, packet::Packet};

/// Codec and business logic for one engine context.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use async_trait::async_trait;
/// use bytes::{Bytes, BytesMut};
/// use wirelane::{BoxError, Connection, EngineContext, Handler};
///
/// /// Newline-delimited text frames.
/// struct Lines;
///
/// #[async_trait]
/// impl Handler for Lines {
///     type Packet = Vec<u8>;
///     type Session = ();
///
///     fn encode(
///         &self,
///         packet: &Vec<u8>,
///         _ctx: &EngineContext<Self>,
///         _conn: Option<&Connection<Self>>,
///     ) -> Result<Bytes, BoxError> {
///         let mut out = packet.clone();
///         out.push(b'\n');
///         Ok(out.into())
///     }
///
///     fn decode(
///         &self,
///         buf: &mut BytesMut,
///         _ctx: &EngineContext<Self>,
///         _conn: &Connection<Self>,
///     ) -> Result<Option<Vec<u8>>, BoxError> {
///         let Some(end) = buf.iter().position(|b| *b == b'\n') else {
///             return Ok(None);
///         };
///         let line = buf.split_to(end + 1);
///         Ok(Some(line[..end].to_vec()))
///     }
///
///     async fn handle(&self, packet: Vec<u8>, conn: &Arc<Connection<Self>>) -> Result<(), BoxError> {
///         conn.send(packet);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + Sized + 'static {
    /// Application message type.
    type Packet: Packet;
    /// Per-connection state owned by the application.
    type Session: Default + Send + Sync + 'static;

    /// Encode `packet` into the bytes written to the transport.
    ///
    /// `conn` is `None` when a broadcast encodes once for every recipient
    /// (see [`crate::config::EngineConfig::shared_encoding`]).
    ///
    /// # Errors
    ///
    /// An error aborts this send; the connection stays open.
    fn encode(
        &self,
        packet: &Self::Packet,
        ctx: &EngineContext<Self>,
        conn: Option<&Connection<Self>>,
    ) -> Result<Bytes, BoxError>;

    /// Decode the next packet from `buf`.
    ///
    /// Called repeatedly while it returns `Ok(Some(_))`. Consume the bytes of
    /// every packet returned and leave partial frames in `buf`; they are
    /// completed by later reads.
    ///
    /// # Errors
    ///
    /// An error closes the connection with the error as cause.
    fn decode(
        &self,
        buf: &mut BytesMut,
        ctx: &EngineContext<Self>,
        conn: &Connection<Self>,
    ) -> Result<Option<Self::Packet>, BoxError>;

    /// Handle a decoded packet.
    ///
    /// Runs on the connection's decode lane: packets from one connection are
    /// handled one at a time in arrival order. Never await
    /// [`EngineContext::synchronous_send`] on the same connection from here;
    /// its reply would queue behind this call.
    ///
    /// # Errors
    ///
    /// Errors are logged; the connection stays open.
    async fn handle(&self, packet: Self::Packet, conn: &Arc<Connection<Self>>)
    -> Result<(), BoxError>;
}

/// Observer of connection lifecycle events.
///
/// Callbacks run on engine tasks and should return quickly. Panics are caught
/// and logged.
pub trait Listener<H: Handler>: Send + Sync + 'static {
    /// A connection was accepted, connected or attached.
    fn on_connected(&self, _conn: &Arc<Connection<H>>) {}

    /// An outbound connection attempt failed.
    fn on_connect_failed(&self, _addr: SocketAddr, _error: &io::Error) {}

    /// A packet was decoded, before it is matched or handled.
    fn on_decoded(&self, _conn: &Arc<Connection<H>>, _packet: &H::Packet) {}

    /// A write finished; `success` is `false` if encoding or writing failed.
    fn on_sent(&self, _conn: &Arc<Connection<H>>, _packet: &H::Packet, _success: bool) {}

    /// The close task finished. Runs exactly once per connection.
    ///
    /// `removed` reports whether the connection was purged from every
    /// directory or parked for reconnection.
    fn on_closed(
        &self,
        _conn: &Arc<Connection<H>>,
        _cause: Option<&BoxError>,
        _remark: &str,
        _removed: bool,
    ) {
    }
}

/// Listener that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl<H: Handler> Listener<H> for NoopListener {}
