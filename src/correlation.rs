//! Request/response correlation for synchronous sends.
//!
//! [`PendingRequests`] maps a positive sequence number to the waiter of a
//! synchronous call. Whoever removes the entry first owns the outcome: the
//! decode lane when a reply arrives, or the waiter when its deadline passes.
//! Removal is a single `DashMap` take, so a late reply and an expiring waiter
//! can never both claim the same entry.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::oneshot;

use crate::error::EngineError;

/// Outcome of a synchronous send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReply<P> {
    /// The correlated reply arrived within the deadline.
    Reply(P),
    /// No reply arrived within the deadline.
    TimedOut,
}

impl<P> SyncReply<P> {
    /// Return the reply, if one arrived.
    #[must_use]
    pub fn into_reply(self) -> Option<P> {
        match self {
            SyncReply::Reply(p) => Some(p),
            SyncReply::TimedOut => None,
        }
    }

    /// Returns `true` when the deadline passed without a reply.
    #[must_use]
    pub fn is_timed_out(&self) -> bool { matches!(self, SyncReply::TimedOut) }
}

struct Pending<P> {
    token: u64,
    tx: oneshot::Sender<P>,
}

/// Table of synchronous calls awaiting a reply, keyed by sequence number.
pub struct PendingRequests<P> {
    waiters: DashMap<u64, Pending<P>>,
    next_token: AtomicU64,
}

impl<P> Default for PendingRequests<P> {
    fn default() -> Self {
        Self {
            waiters: DashMap::new(),
            next_token: AtomicU64::new(0),
        }
    }
}

impl<P> fmt::Debug for PendingRequests<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequests")
            .field("in_flight", &self.waiters.len())
            .finish()
    }
}

impl<P: Send + 'static> PendingRequests<P> {
    /// Register a waiter for `seq`.
    ///
    /// The entry is removed when the returned [`Waiter`] is consumed or
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSequence`] for `0` and
    /// [`EngineError::DuplicateSequence`] when `seq` is already in flight.
    pub fn register(&self, seq: u64) -> Result<Waiter<'_, P>, EngineError> {
        if seq == 0 {
            return Err(EngineError::InvalidSequence);
        }
        match self.waiters.entry(seq) {
            Entry::Occupied(_) => Err(EngineError::DuplicateSequence(seq)),
            Entry::Vacant(slot) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                slot.insert(Pending { token, tx });
                Ok(Waiter {
                    table: self,
                    seq,
                    token,
                    rx,
                })
            }
        }
    }

    /// Deliver `reply` to the waiter registered for `seq`.
    ///
    /// # Errors
    ///
    /// Hands `reply` back when nobody is waiting for `seq` (never registered,
    /// already answered, or timed out).
    pub fn complete(&self, seq: u64, reply: P) -> Result<(), P> {
        match self.waiters.remove(&seq) {
            Some((_, pending)) => pending.tx.send(reply),
            None => Err(reply),
        }
    }

    /// Returns `true` while a waiter is registered for `seq`.
    #[must_use]
    pub fn contains(&self, seq: u64) -> bool { self.waiters.contains_key(&seq) }

    /// Number of synchronous calls in flight.
    #[must_use]
    pub fn len(&self) -> usize { self.waiters.len() }

    /// Returns `true` when no synchronous call is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.waiters.is_empty() }

    fn withdraw(&self, seq: u64, token: u64) -> bool {
        self.waiters
            .remove_if(&seq, |_, pending| pending.token == token)
            .is_some()
    }
}

/// Registration of one synchronous call.
///
/// Dropping the waiter removes its table entry, so a cancelled caller never
/// leaves a stale sequence number behind.
#[must_use = "dropping a waiter withdraws the pending request"]
pub struct Waiter<'a, P: Send + 'static> {
    table: &'a PendingRequests<P>,
    seq: u64,
    token: u64,
    rx: oneshot::Receiver<P>,
}

impl<P: Send + 'static> fmt::Debug for Waiter<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter").field("seq", &self.seq).finish_non_exhaustive()
    }
}

impl<P: Send + 'static> Waiter<'_, P> {
    /// Sequence number this waiter is registered under.
    #[must_use]
    pub fn seq(&self) -> u64 { self.seq }

    /// Wait up to `timeout` for the reply.
    pub async fn wait(mut self, timeout: Duration) -> SyncReply<P> {
        if let Ok(Ok(reply)) = tokio::time::timeout(timeout, &mut self.rx).await {
            return SyncReply::Reply(reply);
        }
        if self.table.withdraw(self.seq, self.token) {
            return SyncReply::TimedOut;
        }
        // A reply took the entry while the deadline expired; it is already in
        // the channel.
        self.rx
            .try_recv()
            .map_or(SyncReply::TimedOut, SyncReply::Reply)
    }
}

impl<P: Send + 'static> Drop for Waiter<'_, P> {
    fn drop(&mut self) { self.table.withdraw(self.seq, self.token); }
}
