//! Lock-guarded collection shared between connections.
//!
//! [`SharedCollection`] pairs a value with a reader/writer lock. Point
//! operations take the lock briefly; bulk operations such as broadcasts hold a
//! single read guard for the whole iteration, so they observe one consistent
//! snapshot while writers wait.
//!
//! Every directory in [`crate::directory`] is built from this primitive.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Cloneable handle to a value guarded by a reader/writer lock.
///
/// Clones share the same value and lock.
///
/// # Examples
///
/// ```
/// use std::collections::HashSet;
///
/// use wirelane::collection::SharedCollection;
///
/// let set = SharedCollection::new(HashSet::new());
/// set.write().insert(7_u32);
/// assert!(set.read().contains(&7));
/// assert_eq!(set.with_read(HashSet::len), 1);
/// ```
#[derive(Debug, Default)]
pub struct SharedCollection<T>(Arc<RwLock<T>>);

impl<T> Clone for SharedCollection<T> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

impl<T> SharedCollection<T> {
    /// Wrap `value` in a new collection.
    #[must_use]
    pub fn new(value: T) -> Self { Self(Arc::new(RwLock::new(value))) }

    /// Acquire the read lock.
    ///
    /// The guard is a consistent snapshot: writers wait until it is dropped.
    /// A poisoned lock is recovered because every mutation in this crate leaves
    /// the value consistent before it can panic.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the write lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with shared access to the value.
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R { f(&self.read()) }

    /// Run `f` with exclusive access to the value.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R { f(&mut self.write()) }

    /// Returns `true` if both handles refer to the same collection.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::mpsc, thread, time::Duration};

    use super::*;

    #[test]
    fn clones_share_state() {
        let a = SharedCollection::new(HashSet::<u8>::new());
        let b = a.clone();
        b.write().insert(1);
        assert!(a.read().contains(&1));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn writer_waits_for_read_snapshot() {
        let set = SharedCollection::new(vec![1_u8]);
        let snapshot = set.read();

        let (tx, rx) = mpsc::channel();
        let writer = {
            let set = set.clone();
            thread::spawn(move || {
                set.write().push(2);
                tx.send(()).expect("signal write");
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(snapshot.as_slice(), &[1]);
        drop(snapshot);

        rx.recv_timeout(Duration::from_secs(5))
            .expect("writer should finish once the snapshot is released");
        writer.join().expect("join writer");
        assert_eq!(set.read().as_slice(), &[1, 2]);
    }
}
