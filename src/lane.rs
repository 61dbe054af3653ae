//! Per-connection serial lanes over a shared worker pool.
//!
//! A [`Lane`] is a FIFO queue plus a `running` flag. Submitting a payload
//! appends it to the queue; whoever flips `running` from `false` to `true`
//! schedules a single drain task on the lane's [`WorkerPool`]. The drain task
//! processes payloads one at a time until the queue is empty, so for one lane
//! at most one payload is in flight and payloads run in submission order.
//! Idle lanes hold no task and no pool slot.
//!
//! Clearing `running` races with concurrent submitters. The drain task
//! re-checks the queue after clearing the flag and takes the flag back if work
//! arrived in between; a submitter that observes the flag still set relies on
//! that re-check. Either side schedules, never both, and no payload is lost.

use std::{
    collections::VecDeque,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::{error::BoxError, panic::format_panic, pool::WorkerPool};

/// Direction served by a lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LaneKind {
    /// Raw inbound bytes to decode and dispatch.
    Decode,
    /// Outbound packets to encode and write.
    Send,
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LaneKind::Decode => "decode",
            LaneKind::Send => "send",
        })
    }
}

/// Work executed for every payload drained from a lane.
///
/// Errors are logged at the lane boundary; they never stop the lane.
#[async_trait]
pub trait LaneProcessor<T>: Send + Sync + 'static {
    /// Process one payload.
    async fn process(&self, item: T) -> Result<(), BoxError>;
}

/// Serial execution lane scheduled onto a [`WorkerPool`].
pub struct Lane<T> {
    label: Arc<str>,
    kind: LaneKind,
    queue: Mutex<VecDeque<T>>,
    running: AtomicBool,
    cancelled: AtomicBool,
    pool: WorkerPool,
    processor: Arc<dyn LaneProcessor<T>>,
}

impl<T: Send + 'static> fmt::Debug for Lane<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lane")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("pending", &self.queue().len())
            .field("running", &self.is_running())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Lane<T> {
    /// Create an idle lane that drains onto `pool` through `processor`.
    ///
    /// `label` identifies the owner (usually a connection) in log lines.
    #[must_use]
    pub fn new(
        label: impl Into<Arc<str>>,
        kind: LaneKind,
        pool: WorkerPool,
        processor: Arc<dyn LaneProcessor<T>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            kind,
            queue: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            pool,
            processor,
        })
    }

    /// Append `item` and make sure a drain task is scheduled.
    ///
    /// Returns `false` and drops the payload if the lane has been cancelled.
    pub fn submit(self: &Arc<Self>, item: T) -> bool {
        if self.is_cancelled() {
            debug!(lane = %self.label, kind = %self.kind, "lane cancelled; payload dropped");
            return false;
        }
        self.queue().push_back(item);
        self.schedule();
        true
    }

    /// Cancel the lane: pending payloads are discarded and later submissions
    /// are dropped. A payload already being processed runs to completion.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            let discarded = std::mem::take(&mut *self.queue()).len();
            if discarded > 0 {
                debug!(lane = %self.label, kind = %self.kind, discarded, "lane cancelled");
            }
        }
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::SeqCst) }

    /// Returns `true` while a drain task owns the lane.
    #[must_use]
    pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    /// Number of payloads waiting to be processed.
    #[must_use]
    pub fn pending(&self) -> usize { self.queue().len() }

    /// Which direction this lane serves.
    #[must_use]
    pub const fn kind(&self) -> LaneKind { self.kind }

    fn queue(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn schedule(self: &Arc<Self>) {
        if self.try_acquire() {
            let lane = Arc::clone(self);
            self.pool.execute(lane.drain());
        }
    }

    fn next(&self) -> Option<T> {
        if self.is_cancelled() {
            return None;
        }
        self.queue().pop_front()
    }

    async fn drain(self: Arc<Self>) {
        loop {
            while let Some(item) = self.next() {
                self.run(item).await;
            }
            self.running.store(false, Ordering::SeqCst);
            // A submitter may have pushed after the last pop but seen the flag
            // still set; reclaim the lane for it.
            if self.is_cancelled() || self.queue().is_empty() || !self.try_acquire() {
                return;
            }
        }
    }

    async fn run(&self, item: T) {
        let outcome = AssertUnwindSafe(self.processor.process(item))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                crate::metrics::inc_errors();
                warn!(lane = %self.label, kind = %self.kind, error = %e, "lane task failed");
            }
            Err(panic) => {
                crate::metrics::inc_lane_panics();
                error!(
                    lane = %self.label,
                    kind = %self.kind,
                    panic = %format_panic(&*panic),
                    "lane task panicked"
                );
            }
        }
    }
}
