//! Many keys at once.
//!
//! [`ConcurrentGenerator`] splits the worker threads into `n` equally sized,
//! contiguous groups and runs one key per group. Groups are whole multiples
//! of a *chunk*: a run of threads as long as the cluster has nodes. Because
//! the harness stripes threads across nodes, every group then touches every
//! node, which keeps fault injection balanced across keys.
//!
//! When a group's sub-generator runs dry, the group claims the next
//! unclaimed key. Once keys run out the group is finished for good, while
//! other groups may still be busy with their last key.
//!
//! The thread layout depends on the test's concurrency and node count, so it
//! is computed on the first request rather than at construction.

use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cell::AtomicCell;
use crate::context::Context;
use crate::error::{ConfigError, GeneratorError};
use crate::generator::{Generator, Invocation};
use crate::history::ProcessId;
use crate::keys::{Active, KeySource, Lookup};
use crate::tuple::Tagged;

/// How worker threads are divided into key groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLayout {
    thread_count: usize,
    chunk_size: usize,
    group_size: usize,
    groups: Vec<Arc<[usize]>>,
}

impl GroupLayout {
    /// Divide the threads of `ctx` into `n` groups.
    ///
    /// `ctx` must expose the full worker pool `0..concurrency`, and that pool
    /// must split into exactly `n` groups of whole chunks.
    pub fn new(ctx: &Context, n: usize) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(ConfigError::ZeroConcurrentKeys { n });
        }

        let mut threads = ctx.threads().to_vec();
        threads.sort_unstable();
        if !threads.iter().copied().eq(0..ctx.concurrency()) {
            return Err(ConfigError::SparseThreads {
                concurrency: ctx.concurrency(),
                threads,
            });
        }

        let thread_count = threads.len();
        let chunk_size = ctx.node_count();
        if chunk_size == 0 {
            return Err(ConfigError::NoNodes { thread_count });
        }

        let chunk_count = thread_count / chunk_size;
        if n > chunk_count {
            return Err(ConfigError::NotEnoughChunks {
                n,
                thread_count,
                chunk_size,
                chunk_count,
            });
        }

        let group_size = chunk_size * (chunk_count / n);
        if thread_count != group_size * n {
            return Err(ConfigError::UnevenGroups {
                thread_count,
                n,
                group_size,
            });
        }

        let groups = threads.chunks(group_size).map(Arc::from).collect();
        Ok(Self {
            thread_count,
            chunk_size,
            group_size,
            groups,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Threads per chunk, i.e. the number of nodes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Threads belonging to `group`.
    pub fn threads(&self, group: usize) -> Option<&[usize]> {
        self.groups.get(group).map(|g| &g[..])
    }

    /// The group that owns `thread`.
    pub fn group_of(&self, thread: usize) -> Result<usize, ConfigError> {
        let group = thread / self.group_size;
        match self.groups.get(group) {
            Some(threads) if threads.binary_search(&thread).is_ok() => Ok(group),
            _ => Err(ConfigError::UnknownThread {
                thread,
                group_count: self.groups.len(),
            }),
        }
    }
}

/// Per-group key assignments plus the position of the next unclaimed key.
struct Assignments<K, G> {
    slots: Vec<Option<Arc<Active<K, G>>>>,
    next_key: usize,
}

impl<K, G> Clone for Assignments<K, G> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            next_key: self.next_key,
        }
    }
}

struct Groups<K, G> {
    layout: GroupLayout,
    assignments: AtomicCell<Assignments<K, G>>,
}

pub struct ConcurrentGenerator<K, G, F> {
    n: usize,
    keys: KeySource<K>,
    factory: F,
    groups: AtomicCell<Option<Arc<Groups<K, G>>>>,
}

impl<K, G, F> ConcurrentGenerator<K, G, F>
where
    K: Clone + Debug,
    F: Fn(&K) -> G,
{
    /// Run `n` keys at a time, building each key's sub-generator with
    /// `factory`.
    ///
    /// `factory` may be called more than once for the same key when
    /// concurrent claims race; extra generators are discarded unused.
    pub fn new<I>(n: usize, keys: I, factory: F) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = K>,
        I::IntoIter: Send + 'static,
    {
        if n == 0 {
            return Err(ConfigError::ZeroConcurrentKeys { n });
        }
        Ok(Self {
            n,
            keys: KeySource::new(keys),
            factory,
            groups: AtomicCell::new(None),
        })
    }

    /// The thread layout, once the first request has computed it.
    pub fn layout(&self) -> Option<GroupLayout> {
        (*self.groups.load()).as_ref().map(|g| g.layout.clone())
    }

    fn groups(&self, ctx: &Context) -> Result<Arc<Groups<K, G>>, ConfigError> {
        loop {
            let installed = self.groups.load();
            if let Some(groups) = installed.as_ref() {
                return Ok(Arc::clone(groups));
            }

            let layout = GroupLayout::new(ctx, self.n)?;
            let group_count = layout.group_count();
            // Nothing is released before the groups are installed.
            let slots = (0..group_count)
                .map(|i| match self.keys.activate(i, &self.factory) {
                    Lookup::Key(active) => Some(Arc::new(active)),
                    Lookup::End | Lookup::Released => None,
                })
                .collect();
            let groups = Arc::new(Groups {
                layout,
                assignments: AtomicCell::new(Assignments {
                    slots,
                    next_key: group_count,
                }),
            });

            if self
                .groups
                .compare_and_set(&installed, Some(Arc::clone(&groups)))
            {
                self.keys.release_below(group_count);
                let layout = &groups.layout;
                info!(
                    n = self.n,
                    thread_count = layout.thread_count(),
                    chunk_size = layout.chunk_size(),
                    group_size = layout.group_size(),
                    group_count,
                    "partitioned worker threads into key groups"
                );
                return Ok(groups);
            }
        }
    }

    /// Replace `group`'s exhausted assignment with the next unclaimed key.
    ///
    /// Does nothing if another thread already moved the group on.
    fn advance(&self, groups: &Groups<K, G>, group: usize, exhausted: &Arc<Active<K, G>>) {
        loop {
            let snapshot = groups.assignments.load();
            match snapshot.slots.get(group) {
                Some(Some(current)) if Arc::ptr_eq(current, exhausted) => {}
                _ => return,
            }

            let mut next = (*snapshot).clone();
            let replacement = match self.keys.activate(next.next_key, &self.factory) {
                Lookup::Key(active) => {
                    next.next_key += 1;
                    Some(Arc::new(active))
                }
                Lookup::End => None,
                Lookup::Released => continue,
            };
            let key = replacement.as_ref().map(|a| a.key.clone());
            next.slots[group] = replacement;
            let next_key = next.next_key;

            if groups.assignments.compare_and_set(&snapshot, next) {
                self.keys.release_below(next_key);
                match key {
                    Some(key) => debug!(group, ?key, "group advanced to next key"),
                    None => debug!(group, "group exhausted all keys"),
                }
                return;
            }
        }
    }
}

impl<K, T, G, F> Generator<Tagged<K, T>> for ConcurrentGenerator<K, G, F>
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
        let thread = ctx
            .process_to_thread(process)
            .ok_or_else(|| ConfigError::NoThread {
                process: process.to_string(),
            })?;
        let groups = self.groups(ctx)?;
        let group = groups.layout.group_of(thread)?;
        let group_ctx = ctx.with_threads(Arc::clone(&groups.layout.groups[group]));

        loop {
            let snapshot = groups.assignments.load();
            let Some(active) = snapshot.slots.get(group).cloned().flatten() else {
                return Ok(None);
            };

            if let Some(inv) = active.gen.op(&group_ctx, process)? {
                return Ok(Some(inv.map(|v| Tagged::keyed(active.key.clone(), v))));
            }
            self.advance(&groups, group, &active);
        }
    }
}
