//! The generator capability and a couple of small adapters.
//!
//! A generator is asked, on behalf of one worker process, for the next
//! operation to invoke. Returning `Ok(None)` means the generator is
//! exhausted for that caller. Generators are shared by every worker thread,
//! so implementations keep their own state behind interior mutability.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::GeneratorError;
use crate::history::{OpFn, ProcessId};

/// An operation a generator wants a worker to invoke.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation<T> {
    pub f: OpFn,
    pub value: T,
}

impl<T> Invocation<T> {
    pub fn new(f: impl Into<OpFn>, value: T) -> Self {
        Self { f: f.into(), value }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Invocation<U> {
        Invocation {
            f: self.f,
            value: f(self.value),
        }
    }
}

/// A source of operations for worker processes.
pub trait Generator<T>: Send + Sync {
    /// The next operation for `process`, or `None` once exhausted.
    fn op(&self, ctx: &Context, process: ProcessId)
        -> Result<Option<Invocation<T>>, GeneratorError>;
}

impl<T, G: Generator<T> + ?Sized> Generator<T> for Arc<G> {
    fn op(&self, ctx: &Context, process: ProcessId) -> Result<Option<Invocation<T>>, GeneratorError> {
        (**self).op(ctx, process)
    }
}

impl<T, G: Generator<T> + ?Sized> Generator<T> for Box<G> {
    fn op(&self, ctx: &Context, process: ProcessId) -> Result<Option<Invocation<T>>, GeneratorError> {
        (**self).op(ctx, process)
    }
}

/// Yields a fixed sequence of invocations, one per request, to any caller.
#[derive(Debug)]
pub struct Seq<T> {
    pending: Mutex<VecDeque<Invocation<T>>>,
}

impl<T> Seq<T> {
    pub fn new(invocations: impl IntoIterator<Item = Invocation<T>>) -> Self {
        Self {
            pending: Mutex::new(invocations.into_iter().collect()),
        }
    }

    /// Invocations not yet handed out.
    pub fn remaining(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<T: Send> Generator<T> for Seq<T> {
    fn op(&self, _ctx: &Context, _process: ProcessId) -> Result<Option<Invocation<T>>, GeneratorError> {
        Ok(self.pending.lock().pop_front())
    }
}

/// A generator backed by a closure.
pub struct FromFn<F>(F);

/// Build a generator from a closure.
pub fn from_fn<T, F>(f: F) -> FromFn<F>
where
    F: Fn(&Context, ProcessId) -> Result<Option<Invocation<T>>, GeneratorError> + Send + Sync,
{
    FromFn(f)
}

impl<T, F> Generator<T> for FromFn<F>
where
    F: Fn(&Context, ProcessId) -> Result<Option<Invocation<T>>, GeneratorError> + Send + Sync,
{
    fn op(&self, ctx: &Context, process: ProcessId) -> Result<Option<Invocation<T>>, GeneratorError> {
        (self.0)(ctx, process)
    }
}
