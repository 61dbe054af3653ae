//! Engine configuration.
//!
//! [`EngineConfig`] carries the tunables of one [`crate::EngineContext`]:
//! worker pool sizes, the per-read buffer size and whether broadcast encoding
//! may be shared across recipients.

use std::num::NonZeroUsize;

use thiserror::Error;

/// Default number of bytes requested from the transport per read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Errors returned when validating an [`EngineConfig`] or building a context.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A worker pool was configured with no workers.
    #[error("pool `{pool}` must have at least one worker")]
    EmptyPool {
        /// Name of the offending pool.
        pool: &'static str,
    },
    /// The read buffer size was zero.
    #[error("read buffer size must be at least one byte")]
    EmptyReadBuffer,
    /// The context was built outside a tokio runtime.
    #[error("engine context must be built inside a tokio runtime")]
    NoRuntime,
}

/// Tunables for an engine context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Name used in log lines and worker pool names.
    pub name: String,
    /// Number of bytes requested per transport read.
    pub read_buffer_size: usize,
    /// Concurrency bound of the decode pool.
    pub decode_workers: usize,
    /// Concurrency bound of the send pool.
    pub send_workers: usize,
    /// Concurrency bound of the close pool.
    pub close_workers: usize,
    /// Encode a broadcast packet once and share the bytes with every
    /// recipient.
    ///
    /// Only enable this when [`crate::Handler::encode`] ignores its connection
    /// argument; otherwise every recipient would receive bytes produced for
    /// no connection at all.
    pub shared_encoding: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            name: String::from("wirelane"),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            decode_workers: parallelism,
            send_workers: parallelism,
            close_workers: (parallelism / 2).max(1),
            shared_encoding: false,
        }
    }
}

impl EngineConfig {
    /// Set the context name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of bytes requested per read.
    #[must_use]
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the decode pool size.
    #[must_use]
    pub fn decode_workers(mut self, count: usize) -> Self {
        self.decode_workers = count;
        self
    }

    /// Set the send pool size.
    #[must_use]
    pub fn send_workers(mut self, count: usize) -> Self {
        self.send_workers = count;
        self
    }

    /// Set the close pool size.
    #[must_use]
    pub fn close_workers(mut self, count: usize) -> Self {
        self.close_workers = count;
        self
    }

    /// Enable or disable shared broadcast encoding.
    #[must_use]
    pub fn shared_encoding(mut self, enabled: bool) -> Self {
        self.shared_encoding = enabled;
        self
    }

    /// Check the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyPool`] when any pool size is zero and
    /// [`ConfigError::EmptyReadBuffer`] when the read buffer size is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use wirelane::config::{ConfigError, EngineConfig};
    ///
    /// let cfg = EngineConfig::default().send_workers(0);
    /// assert_eq!(cfg.validate(), Err(ConfigError::EmptyPool { pool: "send" }));
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 {
            return Err(ConfigError::EmptyReadBuffer);
        }
        for (pool, size) in [
            ("decode", self.decode_workers),
            ("send", self.send_workers),
            ("close", self.close_workers),
        ] {
            if size == 0 {
                return Err(ConfigError::EmptyPool { pool });
            }
        }
        Ok(())
    }
}
