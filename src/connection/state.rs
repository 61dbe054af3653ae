//! Connection lifecycle flags.

use std::sync::atomic::{AtomicBool, Ordering};

/// Observable lifecycle state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Reads and sends are accepted.
    Open,
    /// A close was requested and is queued on the close pool.
    WaitingClose,
    /// Transport released; directory bindings kept for a reconnect policy.
    Closed,
    /// Transport released and purged from every directory.
    Removed,
}

/// Atomic flags backing [`ConnectionState`].
///
/// `waiting_close` only ever goes from `false` to `true`, and only through
/// [`begin_close`](Self::begin_close), which makes the close request
/// idempotent for any number of concurrent callers.
#[derive(Debug, Default)]
pub(super) struct LifecycleFlags {
    waiting_close: AtomicBool,
    closed: AtomicBool,
    removed: AtomicBool,
}

impl LifecycleFlags {
    /// Claim the close transition. Returns `true` for exactly one caller.
    pub(super) fn begin_close(&self) -> bool {
        self.waiting_close
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Record the terminal state reached by the close task.
    pub(super) fn finish(&self, removed: bool) {
        if removed {
            self.removed.store(true, Ordering::SeqCst);
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Mark a closed connection as purged from the directories.
    pub(super) fn mark_removed(&self) { self.removed.store(true, Ordering::SeqCst); }

    pub(super) fn is_waiting_close(&self) -> bool { self.waiting_close.load(Ordering::SeqCst) }

    pub(super) fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

    pub(super) fn is_removed(&self) -> bool { self.removed.load(Ordering::SeqCst) }

    pub(super) fn state(&self) -> ConnectionState {
        if self.is_removed() {
            ConnectionState::Removed
        } else if self.is_closed() {
            ConnectionState::Closed
        } else if self.is_waiting_close() {
            ConnectionState::WaitingClose
        } else {
            ConnectionState::Open
        }
    }
}
