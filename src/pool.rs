//! Bounded worker pools.
//!
//! A [`WorkerPool`] runs futures on the tokio runtime it was created on while
//! never letting more than `size` of them make progress at once. Lanes use a
//! pool to drain their queues; the close state machine uses a dedicated pool so
//! shutdown hooks never run on a read task.

use std::{fmt, future::Future, sync::Arc};

use tokio::{runtime::Handle, sync::Semaphore};
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Named, size-bounded executor over a tokio runtime.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    name: Arc<str>,
    size: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    runtime: Handle,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("available", &self.permits.available_permits())
            .field("tasks", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create a pool of `size` workers bound to `runtime`.
    ///
    /// A `size` of zero is raised to one.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, size: usize, runtime: Handle) -> Self {
        let size = size.max(1);
        Self {
            name: name.into(),
            size,
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            runtime,
        }
    }

    /// Name given to this pool.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Maximum number of tasks allowed to run concurrently.
    #[must_use]
    pub const fn size(&self) -> usize { self.size }

    /// Returns `true` once [`close`](Self::close) or [`shutdown`](Self::shutdown)
    /// has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.tracker.is_closed() }

    /// Run `task` once a worker slot is free.
    ///
    /// Safe to call from threads outside the runtime. Tasks submitted after
    /// the pool was closed still run; closing only lets
    /// [`shutdown`](Self::shutdown) know when to stop waiting.
    pub fn execute<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let name = Arc::clone(&self.name);
        self.tracker.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    debug!(pool = %name, "pool permits closed; task dropped");
                    return;
                };
                task.await;
            },
            &self.runtime,
        );
    }

    /// Mark the pool closed without waiting for its tasks.
    pub fn close(&self) { self.tracker.close(); }

    /// Close the pool and wait for every task it has spawned to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        debug!(pool = %self.name, "worker pool drained");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_size(#[case] size: usize) {
        let pool = WorkerPool::new("test", size, Handle::current());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..32 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.execute(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        pool.shutdown().await;

        assert!(peak.load(Ordering::SeqCst) <= size);
        assert!(pool.is_closed());
    }

    #[test]
    fn zero_size_is_raised_to_one() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("build runtime");
        let pool = WorkerPool::new("tiny", 0, rt.handle().clone());
        assert_eq!(pool.size(), 1);
    }
}
