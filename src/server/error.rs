//! Errors raised by the TCP transport glue.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors that may occur while binding, serving or connecting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listening socket failed.
    #[error("bind error on {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The listener's local address could not be read.
    #[error("listener address unavailable: {0}")]
    LocalAddr(#[source] io::Error),
    /// An outbound connection attempt failed.
    #[error("connect error to {addr}: {source}")]
    Connect {
        /// Address that could not be reached.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}
