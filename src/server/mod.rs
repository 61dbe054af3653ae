//! TCP transport glue.
//!
//! [`serve`] and [`spawn`] run an accept loop that attaches every accepted
//! stream to an [`crate::EngineContext`]; [`connect`] opens an outbound
//! connection on the same context. Any other `AsyncRead + AsyncWrite` stream
//! can be attached directly with [`crate::EngineContext::attach`].

mod accept;
mod backoff;
mod connect;
mod error;

pub use accept::{bind, serve, spawn};
pub use backoff::BackoffConfig;
pub use connect::connect;
pub use error::ServerError;
