//! Application packets and the unit queued on a send lane.
//!
//! [`Packet`] is implemented by the application's message type. The engine
//! only needs to read the optional synchronous sequence number; everything
//! else is opaque and handled by the injected [`crate::Handler`].

use std::sync::Arc;

use bytes::Bytes;

/// Message type carried over a connection.
pub trait Packet: Send + Sync + 'static {
    /// Sequence number correlating a synchronous request with its reply.
    ///
    /// `None` or `Some(0)` marks an ordinary, fire-and-forget packet.
    fn sync_seq(&self) -> Option<u64> { None }
}

impl Packet for Vec<u8> {}

impl Packet for Bytes {}

/// Return the positive sequence number of `packet`, if any.
#[must_use]
pub fn synchronous_seq<P: Packet + ?Sized>(packet: &P) -> Option<u64> {
    packet.sync_seq().filter(|seq| *seq > 0)
}

/// A packet waiting in a send lane.
///
/// Broadcasts share one `Arc<P>` and, when the context allows it, one
/// pre-encoded byte buffer across every recipient.
#[derive(Debug)]
pub struct Outbound<P> {
    packet: Arc<P>,
    pre_encoded: Option<Bytes>,
}

impl<P> Clone for Outbound<P> {
    fn clone(&self) -> Self {
        Self {
            packet: Arc::clone(&self.packet),
            pre_encoded: self.pre_encoded.clone(),
        }
    }
}

impl<P> Outbound<P> {
    /// Wrap a packet that still needs encoding.
    #[must_use]
    pub fn new(packet: Arc<P>) -> Self {
        Self {
            packet,
            pre_encoded: None,
        }
    }

    /// Wrap a packet together with bytes already produced for it.
    #[must_use]
    pub fn pre_encoded(packet: Arc<P>, bytes: Bytes) -> Self {
        Self {
            packet,
            pre_encoded: Some(bytes),
        }
    }

    /// The packet being sent.
    #[must_use]
    pub fn packet(&self) -> &Arc<P> { &self.packet }

    /// Cached encoding, if one was shared by a broadcast.
    #[must_use]
    pub fn encoded(&self) -> Option<&Bytes> { self.pre_encoded.as_ref() }
}

impl<P> From<P> for Outbound<P> {
    fn from(packet: P) -> Self { Self::new(Arc::new(packet)) }
}
