//! Positional access to a lazily realised key sequence.
//!
//! Generator snapshots record *how far* into the key sequence they are, not
//! the keys themselves. Keys are pulled from the caller's iterator on demand
//! and buffered, so a snapshot that loses a compare-and-set can be
//! recomputed without consuming a key twice or dropping one. Once a cursor
//! has moved past a position for good, the generator releases it and the
//! buffer forgets the key.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// A key together with the sub-generator built for it.
pub struct Active<K, G> {
    pub key: K,
    pub gen: G,
}

/// What sits at a position of the key sequence.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    Key(T),
    /// The sequence ended before this position.
    End,
    /// The position was already released. The caller's snapshot is stale.
    Released,
}

impl<T> Lookup<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Key(t) => Lookup::Key(f(t)),
            Lookup::End => Lookup::End,
            Lookup::Released => Lookup::Released,
        }
    }
}

type KeyIter<K> = Box<dyn Iterator<Item = K> + Send>;

pub struct KeySource<K> {
    inner: Mutex<Buffer<K>>,
    iter_returned: Condvar,
}

struct Buffer<K> {
    /// `None` while some caller is pulling from it.
    iter: Option<KeyIter<K>>,
    /// Position of `pending[0]`.
    base: usize,
    pending: VecDeque<K>,
    done: bool,
}

impl<K: Clone> KeySource<K> {
    pub fn new<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Mutex::new(Buffer {
                iter: Some(Box::new(keys.into_iter())),
                base: 0,
                pending: VecDeque::new(),
                done: false,
            }),
            iter_returned: Condvar::new(),
        }
    }

    /// The key at position `index`.
    ///
    /// The caller's iterator runs with the lock released. Concurrent callers
    /// that need a key not yet pulled wait for the puller to finish.
    pub fn get(&self, index: usize) -> Lookup<K> {
        let mut inner = self.inner.lock();
        loop {
            if index < inner.base {
                return Lookup::Released;
            }
            if let Some(key) = inner.pending.get(index - inner.base) {
                return Lookup::Key(key.clone());
            }
            if inner.done {
                return Lookup::End;
            }
            let Some(mut iter) = inner.iter.take() else {
                self.iter_returned.wait(&mut inner);
                continue;
            };

            let pulled = MutexGuard::unlocked(&mut inner, || {
                let mut guard = PullGuard {
                    source: self,
                    armed: true,
                };
                let key = iter.next();
                guard.armed = false;
                key
            });
            inner.iter = Some(iter);
            match pulled {
                Some(key) => inner.pending.push_back(key),
                None => inner.done = true,
            }
            self.iter_returned.notify_all();
        }
    }

    /// Build the sub-generator for the key at `index`, if there is one.
    pub fn activate<G>(&self, index: usize, factory: impl Fn(&K) -> G) -> Lookup<Active<K, G>> {
        self.get(index).map(|key| Active {
            gen: factory(&key),
            key,
        })
    }

    /// Forget every key before position `index`. Later lookups of those
    /// positions report [`Lookup::Released`].
    pub fn release_below(&self, index: usize) {
        let mut inner = self.inner.lock();
        while inner.base < index && inner.pending.pop_front().is_some() {
            inner.base += 1;
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

/// Ends the sequence if the caller's iterator unwinds, so waiters wake up.
struct PullGuard<'a, K> {
    source: &'a KeySource<K>,
    armed: bool,
}

impl<K> Drop for PullGuard<'_, K> {
    fn drop(&mut self) {
        if self.armed {
            self.source.inner.lock().done = true;
            self.source.iter_returned.notify_all();
        }
    }
}
