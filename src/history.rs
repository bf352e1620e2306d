//! History representation for independent checking.
//!
//! Operations in a history follow a request/response model:
//! - `Invoke` marks the start of an operation
//! - `Ok` marks successful completion
//! - `Fail` marks a definite failure
//! - `Info` marks an indeterminate result (crash, timeout, etc.)

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Process identifier.
///
/// Worker processes are numbered by the harness. The nemesis is the fault
/// injector and never runs on a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessId {
    Worker(u64),
    Nemesis,
}

impl From<u64> for ProcessId {
    fn from(v: u64) -> Self {
        Self::Worker(v)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Worker(p) => write!(f, "{p}"),
            ProcessId::Nemesis => f.write_str("nemesis"),
        }
    }
}

/// A timestamp for operation ordering, relative to an arbitrary epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Timestamp(Duration);

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

/// The type/phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// Operation was invoked but hasn't completed yet.
    Invoke,
    /// Operation completed successfully.
    Ok,
    /// Operation definitely failed.
    Fail,
    /// Operation result is indeterminate (e.g., timeout, crash).
    Info,
}

/// The function being performed by an operation, e.g. `read` or `cas`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OpFn(Cow<'static, str>);

impl OpFn {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for OpFn {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for OpFn {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for OpFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single operation in a history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Op<T> {
    /// Unique index of this operation in the history.
    pub index: usize,
    /// The type/phase of this operation.
    #[serde(rename = "type")]
    pub op_type: OpType,
    /// The function being performed.
    pub f: OpFn,
    /// The value associated with this operation.
    pub value: T,
    /// Timestamp (optional).
    pub time: Option<Timestamp>,
    /// Process that performed this operation.
    pub process: ProcessId,
}

impl<T> Op<T> {
    fn with_type(
        op_type: OpType,
        index: usize,
        process: impl Into<ProcessId>,
        f: impl Into<OpFn>,
        value: T,
    ) -> Self {
        Self {
            index,
            op_type,
            f: f.into(),
            value,
            time: None,
            process: process.into(),
        }
    }

    /// Create an invocation.
    pub fn invoke(index: usize, process: impl Into<ProcessId>, f: impl Into<OpFn>, value: T) -> Self {
        Self::with_type(OpType::Invoke, index, process, f, value)
    }

    /// Create a successful completion.
    pub fn ok(index: usize, process: impl Into<ProcessId>, f: impl Into<OpFn>, value: T) -> Self {
        Self::with_type(OpType::Ok, index, process, f, value)
    }

    /// Create a completion that definitely failed.
    pub fn fail(index: usize, process: impl Into<ProcessId>, f: impl Into<OpFn>, value: T) -> Self {
        Self::with_type(OpType::Fail, index, process, f, value)
    }

    /// Create a completion with indeterminate outcome (timeout, crash).
    pub fn info(index: usize, process: impl Into<ProcessId>, f: impl Into<OpFn>, value: T) -> Self {
        Self::with_type(OpType::Info, index, process, f, value)
    }

    /// Set the timestamp for this operation.
    #[must_use]
    pub fn at(mut self, time: impl Into<Timestamp>) -> Self {
        self.time = Some(time.into());
        self
    }

    /// A copy of this op's metadata carrying `value` instead.
    pub fn with_value<U>(&self, value: U) -> Op<U> {
        Op {
            index: self.index,
            op_type: self.op_type,
            f: self.f.clone(),
            value,
            time: self.time,
            process: self.process,
        }
    }
}

/// A history of operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct History<T> {
    ops: Vec<Op<T>>,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> History<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    #[must_use]
    pub fn from_ops(ops: Vec<Op<T>>) -> Self {
        Self { ops }
    }

    pub fn push(&mut self, op: Op<T>) {
        self.ops.push(op);
    }

    #[must_use]
    pub fn ops(&self) -> &[Op<T>] {
        &self.ops
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Op<T>> {
        self.ops.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl<T> FromIterator<Op<T>> for History<T> {
    fn from_iter<I: IntoIterator<Item = Op<T>>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for History<T> {
    type Item = Op<T>;
    type IntoIter = std::vec::IntoIter<Op<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a History<T> {
    type Item = &'a Op<T>;
    type IntoIter = std::slice::Iter<'a, Op<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}
