//! An atomically replaceable snapshot.
//!
//! Generator coordination state lives in immutable snapshots. Updaters read
//! the current snapshot, build the next one off to the side, and install it
//! only if the snapshot they read is still current; otherwise they recompute
//! from whatever won. The lock below guards the pointer swap alone and is
//! never held while generator or checker code runs.

use std::sync::Arc;

use parking_lot::Mutex;

pub struct AtomicCell<T> {
    current: Mutex<Arc<T>>,
}

impl<T> AtomicCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: Mutex::new(Arc::new(value)),
        }
    }

    /// The current snapshot.
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.lock())
    }

    /// Install `next` if `expected` is still the current snapshot.
    ///
    /// Snapshots are compared by identity, not by value. Returns `false`, and
    /// drops `next`, when another updater got there first.
    pub fn compare_and_set(&self, expected: &Arc<T>, next: T) -> bool {
        let next = Arc::new(next);
        let mut current = self.current.lock();
        if Arc::ptr_eq(&current, expected) {
            *current = next;
            true
        } else {
            false
        }
    }
}

impl<T: Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
