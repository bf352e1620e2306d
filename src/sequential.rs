//! One key at a time.
//!
//! [`SequentialGenerator`] runs a key's sub-generator to exhaustion before
//! moving on to the next key. Every caller shares the same position in the
//! key sequence, so at any moment all workers are working on the same key.

use std::fmt::Debug;
use std::sync::Arc;

use tracing::debug;

use crate::cell::AtomicCell;
use crate::context::Context;
use crate::error::GeneratorError;
use crate::generator::{Generator, Invocation};
use crate::history::ProcessId;
use crate::keys::{Active, KeySource, Lookup};
use crate::tuple::Tagged;

struct Cursor<K, G> {
    /// Position of the next key to activate.
    next_key: usize,
    current: Option<Arc<Active<K, G>>>,
}

pub struct SequentialGenerator<K, G, F> {
    keys: KeySource<K>,
    factory: F,
    cursor: AtomicCell<Cursor<K, G>>,
}

impl<K, G, F> SequentialGenerator<K, G, F>
where
    K: Clone,
    F: Fn(&K) -> G,
{
    /// Run `factory(key)` for each key in turn.
    ///
    /// Nothing is built until the first request.
    pub fn new<I>(keys: I, factory: F) -> Self
    where
        I: IntoIterator<Item = K>,
        I::IntoIter: Send + 'static,
    {
        Self {
            keys: KeySource::new(keys),
            factory,
            cursor: AtomicCell::new(Cursor {
                next_key: 0,
                current: None,
            }),
        }
    }
}

impl<K, T, G, F> Generator<Tagged<K, T>> for SequentialGenerator<K, G, F>
where
    K: Clone + Debug + Send + Sync,
    G: Generator<T>,
    F: Fn(&K) -> G + Send + Sync,
{
    fn op(
        &self,
        ctx: &Context,
        process: ProcessId,
    ) -> Result<Option<Invocation<Tagged<K, T>>>, GeneratorError> {
        loop {
            let cursor = self.cursor.load();

            if let Some(active) = &cursor.current {
                if let Some(inv) = active.gen.op(ctx, process)? {
                    return Ok(Some(inv.map(|v| Tagged::keyed(active.key.clone(), v))));
                }
            }

            let next = match self.keys.activate(cursor.next_key, &self.factory) {
                Lookup::Key(active) => Cursor {
                    next_key: cursor.next_key + 1,
                    current: Some(Arc::new(active)),
                },
                // Someone else already moved past this snapshot.
                Lookup::Released => continue,
                Lookup::End if cursor.current.is_none() => return Ok(None),
                Lookup::End => Cursor {
                    next_key: cursor.next_key,
                    current: None,
                },
            };

            let key = next.current.as_ref().map(|a| a.key.clone());
            let next_key = next.next_key;
            if self.cursor.compare_and_set(&cursor, next) {
                self.keys.release_below(next_key);
                match key {
                    Some(key) => debug!(?key, "sequential generator advanced to next key"),
                    None => debug!("sequential generator exhausted all keys"),
                }
            }
        }
    }
}
