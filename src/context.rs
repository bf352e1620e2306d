//! Test context handed to generators.
//!
//! A [`Context`] carries the topology a generator needs: how many worker
//! threads the test runs, which nodes make up the cluster, and which threads
//! the caller may coordinate with. The concurrent generator hands each
//! sub-generator a context restricted to its own group.

use std::sync::Arc;

use crate::history::ProcessId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    concurrency: usize,
    nodes: Arc<[String]>,
    threads: Arc<[usize]>,
}

impl Context {
    /// A context with `concurrency` worker threads `0..concurrency`.
    pub fn new<I, S>(concurrency: usize, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            concurrency,
            nodes: nodes.into_iter().map(Into::into).collect(),
            threads: (0..concurrency).collect(),
        }
    }

    /// Declared number of worker threads for the whole test.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Worker threads visible to the current caller.
    pub fn threads(&self) -> &[usize] {
        &self.threads
    }

    /// Map a process to its worker thread.
    ///
    /// When a worker crashes the harness replaces its process with
    /// `process + concurrency`, so the thread is the process modulo the
    /// declared concurrency. The nemesis has no thread.
    pub fn process_to_thread(&self, process: ProcessId) -> Option<usize> {
        match process {
            ProcessId::Worker(p) if self.concurrency > 0 => {
                Some((p % self.concurrency as u64) as usize)
            }
            _ => None,
        }
    }

    /// A copy of this context whose visible threads are `threads`.
    #[must_use]
    pub fn with_threads(&self, threads: Arc<[usize]>) -> Self {
        Self {
            concurrency: self.concurrency,
            nodes: Arc::clone(&self.nodes),
            threads,
        }
    }
}
