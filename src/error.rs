//! Error types for generators, checkers and artifact storage.

use std::io;

use thiserror::Error;

/// Boxed error raised by an upstream generator or checker.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A test configuration the key partitioning cannot honour.
///
/// These are fatal: the harness should abort the run rather than retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Zero keys were requested to run concurrently.
    #[error("concurrent key count must be positive, got {n}")]
    ZeroConcurrentKeys { n: usize },

    /// The test declares no nodes, so chunks cannot be formed.
    #[error("cannot partition {thread_count} threads across a cluster with no nodes")]
    NoNodes { thread_count: usize },

    /// The worker pool is not `0..concurrency`.
    #[error("thread ids must be the dense range 0..{concurrency}, got {threads:?}")]
    SparseThreads {
        concurrency: usize,
        threads: Vec<usize>,
    },

    /// More concurrent keys were requested than there are node-aligned chunks.
    #[error(
        "{n} concurrent keys requested, but {thread_count} threads over {chunk_size} nodes \
         only form {chunk_count} chunks"
    )]
    NotEnoughChunks {
        n: usize,
        thread_count: usize,
        chunk_size: usize,
        chunk_count: usize,
    },

    /// Threads do not divide evenly into `n` groups of `group_size`.
    #[error(
        "{thread_count} threads do not divide into {n} groups of {group_size} threads \
         ({group_size} x {n} != {thread_count})"
    )]
    UnevenGroups {
        thread_count: usize,
        n: usize,
        group_size: usize,
    },

    /// A worker thread fell outside every configured group.
    #[error("thread {thread} is not in any of the {group_count} groups")]
    UnknownThread { thread: usize, group_count: usize },

    /// A process with no worker thread asked for a keyed operation.
    #[error("process {process} has no worker thread and cannot be assigned a group")]
    NoThread { process: String },
}

/// Errors surfaced by [`Generator::op`](crate::Generator::op).
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Raised by a sub-generator; passed through untouched.
    #[error(transparent)]
    Upstream(BoxError),
}

impl GeneratorError {
    pub fn upstream(err: impl Into<BoxError>) -> Self {
        Self::Upstream(err.into())
    }
}

/// Errors surfaced by [`Checker::check`](crate::Checker::check).
#[derive(Debug, Error)]
pub enum CheckError {
    /// The checker could not reach a verdict.
    #[error("checker failed: {0}")]
    Failed(String),

    /// Raised by an underlying checker; passed through untouched.
    #[error(transparent)]
    Upstream(BoxError),

    /// The worker pool for per-key checks could not be started.
    #[error("failed to start checker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl CheckError {
    pub fn upstream(err: impl Into<BoxError>) -> Self {
        Self::Upstream(err.into())
    }
}

/// Errors from persisting check artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A path segment would escape its parent directory.
    #[error("invalid path segment: {0:?}")]
    InvalidSegment(String),
}
