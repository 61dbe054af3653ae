//! Error types shared across the engine.
//!
//! Usage errors surface as [`EngineError`]. Transport failures never reach
//! unrelated callers: they are routed through the close path as a [`BoxError`]
//! cause attached to the connection's `on_closed` notification.

use thiserror::Error;

use crate::connection::ConnectionId;

/// Boxed error produced by injected collaborators and transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned to callers that misuse the facade.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    /// A synchronous send was attempted without a positive sequence number.
    #[error("synchronous send requires a positive sequence number")]
    InvalidSequence,
    /// Another synchronous call with the same sequence number is in flight.
    #[error("sequence number {0} is already awaiting a reply")]
    DuplicateSequence(u64),
    /// The connection refused the packet because it is closing or closed.
    #[error("{0} is not writable")]
    NotWritable(ConnectionId),
    /// The owning context has already been dropped.
    #[error("engine context has been dropped")]
    ContextDropped,
}

/// Result alias for facade operations.
pub type Result<T> = std::result::Result<T, EngineError>;
