#![doc(html_root_url = "https://docs.rs/wirelane/latest")]
//! Public API for the `wirelane` library.
//!
//! This crate multiplexes many connections over a few bounded worker pools
//! while keeping every connection's inbound dispatch and outbound writes in
//! order. It also provides directories for addressing groups of connections,
//! broadcasts, and request/response correlation over asynchronous transports.
//!
//! The wire format and business logic are supplied through [`Handler`];
//! lifecycle events are observed through [`Listener`].

pub mod collection;
pub mod config;
pub mod connection;
pub mod context;
pub mod correlation;
pub mod directory;
pub mod error;
pub mod handler;
pub mod lane;
pub mod metrics;
pub mod packet;
pub mod panic;
pub mod pool;
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

pub use collection::SharedCollection;
pub use config::{ConfigError, EngineConfig};
pub use connection::{Connection, ConnectionId, ConnectionState, Origin, active_connection_count};
pub use context::{EngineContext, EngineContextBuilder};
pub use correlation::{PendingRequests, SyncReply};
pub use directory::{ConnectionSet, Groups, PeerNodes, Users};
pub use error::{BoxError, EngineError, Result};
pub use handler::{Handler, Listener, NoopListener};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, LANE_PANICS_TOTAL, PACKETS_TOTAL};
pub use packet::{Outbound, Packet};
