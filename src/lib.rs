//! Independent, key-partitioned workloads for distributed systems testing.
//!
//! Checkers like linearizability are exponential in history length, yet bugs
//! hide in long, highly concurrent runs. This crate squares the two by
//! running many small, independent workloads side by side, each tagged with
//! its own key, and checking each key's short history separately. It is
//! modelled on Jepsen's `jepsen.independent`.
//!
//! # Quick Start
//!
//! ```
//! use spectroscope_independent::{
//!     CheckError, CheckOptions, Checker, ConcurrentGenerator, Context, Generator,
//!     History, IndependentChecker, Invocation, Op, Seq, Validity,
//! };
//!
//! // 4 worker threads over 2 nodes, two registers at a time.
//! let ctx = Context::new(4, ["n1", "n2"]);
//! let gen = ConcurrentGenerator::new(2, 0u32..3, |_key: &u32| {
//!     Seq::new([Invocation::new("write", 1), Invocation::new("read", 1)])
//! })
//! .unwrap();
//!
//! let mut history = History::new();
//! for process in [0u64, 2, 1, 3, 0] {
//!     if let Some(inv) = gen.op(&ctx, process.into()).unwrap() {
//!         history.push(Op::ok(history.len(), process, inv.f, inv.value));
//!     }
//! }
//!
//! // Any checker over plain values can be lifted to check every key.
//! struct AlwaysValid;
//! impl Checker<i32> for AlwaysValid {
//!     type Output = Validity;
//!     fn check(&self, _: &History<i32>, _: &CheckOptions) -> Result<Validity, CheckError> {
//!         Ok(Validity::Valid)
//!     }
//! }
//!
//! let result = IndependentChecker::new(AlwaysValid)
//!     .check(&history, &CheckOptions::default())
//!     .unwrap();
//! assert_eq!(result.valid, Validity::Valid);
//! assert_eq!(result.results.len(), 3);
//! ```
//!
//! # Generators
//!
//! - [`SequentialGenerator`] runs one key at a time across every worker.
//! - [`ConcurrentGenerator`] runs `n` keys at once, each on its own group of
//!   worker threads. Groups span every node so fault injection stays
//!   balanced (see [`GroupLayout`]).
//!
//! Both wrap every value in a [`Tuple`] of `(key, value)`.
//!
//! # Checking
//!
//! [`keys_of`] and [`subhistory`] split a history by key. Ops with no key,
//! such as the nemesis's, appear in every subhistory. [`IndependentChecker`]
//! runs a [`Checker`] on each subhistory and merges the verdicts.

mod cell;
pub mod checker;
pub mod concurrent;
pub mod context;
pub mod error;
pub mod generator;
pub mod history;
mod keys;
pub mod partition;
pub mod sequential;
pub mod store;
pub mod tuple;

pub use checker::{
    CheckOptions, Checker, IndependentChecker, IndependentResult, Validity, Verdict,
    INDEPENDENT_DIR,
};
pub use concurrent::{ConcurrentGenerator, GroupLayout};
pub use context::Context;
pub use error::{BoxError, CheckError, ConfigError, GeneratorError, StoreError};
pub use generator::{from_fn, FromFn, Generator, Invocation, Seq};
pub use history::{History, Op, OpFn, OpType, ProcessId, Timestamp};
pub use partition::{keys_of, subhistory};
pub use sequential::SequentialGenerator;
pub use store::{ArtifactStore, FsStore};
pub use tuple::{Tagged, Tuple};
