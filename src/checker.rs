//! Checking each key's subhistory on its own.
//!
//! [`IndependentChecker`] lifts any [`Checker`] over plain values to one over
//! key-tagged histories. It splits the history by key, runs the wrapped
//! checker on every subhistory, and folds the verdicts together. Each key's
//! verdict and subhistory are also written to an optional
//! [`ArtifactStore`] under `independent/<key>/`.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::hash::Hash;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{CheckError, StoreError};
use crate::history::History;
use crate::partition::{keys_of, subhistory};
use crate::store::ArtifactStore;
use crate::tuple::Tagged;

/// Directory segment under which per-key artifacts are written.
pub const INDEPENDENT_DIR: &str = "independent";

/// Validity status of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Validity {
    Valid,
    Invalid,
    Unknown,
}

impl Validity {
    pub fn is_valid(self) -> bool {
        self == Validity::Valid
    }

    /// Combine two verdicts. `Invalid` beats `Unknown`, which beats `Valid`.
    #[must_use]
    pub fn merge(self, other: Validity) -> Validity {
        match (self, other) {
            (Validity::Invalid, _) | (_, Validity::Invalid) => Validity::Invalid,
            (Validity::Unknown, _) | (_, Validity::Unknown) => Validity::Unknown,
            _ => Validity::Valid,
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Validity::Valid => "valid",
            Validity::Invalid => "invalid",
            Validity::Unknown => "unknown",
        })
    }
}

// Serialized the way Jepsen writes `:valid?`: a boolean, or "unknown".
impl Serialize for Validity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Validity::Valid => serializer.serialize_bool(true),
            Validity::Invalid => serializer.serialize_bool(false),
            Validity::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// Anything a checker returns.
pub trait Verdict {
    fn validity(&self) -> Validity;
}

impl Verdict for Validity {
    fn validity(&self) -> Validity {
        *self
    }
}

/// Options passed down to a checker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Artifact path prefix for this check. Nested checkers extend it.
    pub subdirectory: Vec<String>,
}

impl CheckOptions {
    /// Options for a nested check, with `segments` appended to the prefix.
    #[must_use]
    pub fn nested<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut subdirectory = self.subdirectory.clone();
        subdirectory.extend(segments.into_iter().map(Into::into));
        Self { subdirectory }
    }

    /// Artifact path for a file directly under this check's prefix.
    pub fn path(&self, file: &str) -> Vec<String> {
        let mut path = self.subdirectory.clone();
        path.push(file.to_string());
        path
    }
}

/// Evaluates a history and reaches a verdict.
pub trait Checker<T>: Send + Sync {
    type Output: Verdict;

    fn check(&self, history: &History<T>, opts: &CheckOptions) -> Result<Self::Output, CheckError>;
}

impl<T, C: Checker<T> + ?Sized> Checker<T> for Arc<C> {
    type Output = C::Output;

    fn check(&self, history: &History<T>, opts: &CheckOptions) -> Result<Self::Output, CheckError> {
        (**self).check(history, opts)
    }
}

/// Result of an independent check.
#[derive(Debug, Clone, Serialize)]
pub struct IndependentResult<K, O> {
    /// Merge of every per-key verdict; `Valid` when there are no keys.
    pub valid: Validity,
    /// The wrapped checker's verdict for each key.
    pub results: BTreeMap<K, O>,
    /// Keys whose verdict was `Invalid`, in key order.
    pub failures: Vec<K>,
    /// Artifacts that could not be written. These never affect `valid`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifact_errors: Vec<String>,
}

impl<K, O> Verdict for IndependentResult<K, O> {
    fn validity(&self) -> Validity {
        self.valid
    }
}

/// Runs a checker on every key's subhistory.
pub struct IndependentChecker<C> {
    inner: C,
    store: Option<Arc<dyn ArtifactStore>>,
    parallelism: usize,
}

impl<C> IndependentChecker<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            store: None,
            parallelism: rayon::current_num_threads(),
        }
    }

    /// Persist per-key verdicts and subhistories to `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Check at most `parallelism` keys at once. Zero is treated as one.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }
}

struct KeyCheck<O> {
    verdict: O,
    artifact_errors: Vec<String>,
}

impl<C> IndependentChecker<C> {
    fn check_key<K, V>(
        &self,
        key: &K,
        history: &History<Tagged<K, V>>,
        opts: &CheckOptions,
    ) -> Result<KeyCheck<C::Output>, CheckError>
    where
        K: Eq + Display,
        V: Clone + Serialize,
        C: Checker<V>,
        C::Output: Serialize,
    {
        let sub = subhistory(key, history);
        let key_opts = opts.nested([INDEPENDENT_DIR.to_string(), key.to_string()]);
        let verdict = self.inner.check(&sub, &key_opts)?;

        let mut artifact_errors = Vec::new();
        if let Some(store) = &self.store {
            let results_path = key_opts.path("results.json");
            let history_path = key_opts.path("history.jsonl");
            let writes = [
                (&results_path, write_json(store.as_ref(), &results_path, &verdict)),
                (&history_path, write_history(store.as_ref(), &history_path, &sub)),
            ];
            for (path, outcome) in writes {
                if let Err(e) = outcome {
                    let path = path.join("/");
                    warn!(%key, %path, error = %e, "failed to persist independent check artifact");
                    artifact_errors.push(format!("{path}: {e}"));
                }
            }
        }

        Ok(KeyCheck {
            verdict,
            artifact_errors,
        })
    }

    fn check_keys<K, V>(
        &self,
        keys: &[K],
        history: &History<Tagged<K, V>>,
        opts: &CheckOptions,
    ) -> Result<Vec<(K, KeyCheck<C::Output>)>, CheckError>
    where
        K: Clone + Eq + Display + Send + Sync,
        V: Clone + Serialize + Sync,
        C: Checker<V>,
        C::Output: Serialize + Send,
    {
        let workers = self.parallelism.min(keys.len());
        let check = |key: &K| -> Result<_, CheckError> {
            Ok((key.clone(), self.check_key(key, history, opts)?))
        };
        if workers <= 1 {
            return keys.iter().map(check).collect();
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("independent-check-{i}"))
            .build()?;
        pool.install(|| keys.par_iter().map(check).collect())
    }
}

impl<K, V, C> Checker<Tagged<K, V>> for IndependentChecker<C>
where
    K: Clone + Ord + Hash + Display + Send + Sync,
    V: Clone + Serialize + Sync,
    C: Checker<V>,
    C::Output: Serialize + Send,
{
    type Output = IndependentResult<K, C::Output>;

    fn check(
        &self,
        history: &History<Tagged<K, V>>,
        opts: &CheckOptions,
    ) -> Result<Self::Output, CheckError> {
        let mut keys: Vec<K> = keys_of(history).into_iter().collect();
        keys.sort();
        debug!(keys = keys.len(), ops = history.len(), "checking independent subhistories");

        let mut results = BTreeMap::new();
        let mut artifact_errors = Vec::new();
        for (key, checked) in self.check_keys(&keys, history, opts)? {
            artifact_errors.extend(checked.artifact_errors);
            results.insert(key, checked.verdict);
        }

        let valid = results
            .values()
            .fold(Validity::Valid, |acc, r| acc.merge(r.validity()));
        let failures: Vec<K> = results
            .iter()
            .filter(|(_, r)| r.validity() == Validity::Invalid)
            .map(|(k, _)| k.clone())
            .collect();

        info!(
            keys = results.len(),
            failures = failures.len(),
            %valid,
            "independent check complete"
        );
        Ok(IndependentResult {
            valid,
            results,
            failures,
            artifact_errors,
        })
    }
}

fn write_json<T: Serialize>(
    store: &dyn ArtifactStore,
    path: &[String],
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.write(path, &bytes)
}

/// One op per line.
fn write_history<T: Serialize>(
    store: &dyn ArtifactStore,
    path: &[String],
    history: &History<T>,
) -> Result<(), StoreError> {
    let mut bytes = Vec::new();
    for op in history {
        serde_json::to_writer(&mut bytes, op)?;
        bytes.push(b'\n');
    }
    store.write(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Op, ProcessId};
    use parking_lot::Mutex;

    /// Invalid if any op carries "bad", unknown if any carries "?".
    struct Marker;

    impl Checker<&'static str> for Marker {
        type Output = Validity;

        fn check(
            &self,
            history: &History<&'static str>,
            _opts: &CheckOptions,
        ) -> Result<Validity, CheckError> {
            let values: Vec<&str> = history.iter().map(|op| op.value).collect();
            Ok(if values.contains(&"bad") {
                Validity::Invalid
            } else if values.contains(&"?") {
                Validity::Unknown
            } else {
                Validity::Valid
            })
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<(Vec<String>, Vec<u8>)>>,
    }

    impl ArtifactStore for RecordingStore {
        fn write(&self, path: &[String], content: &[u8]) -> Result<(), StoreError> {
            self.writes.lock().push((path.to_vec(), content.to_vec()));
            Ok(())
        }
    }

    struct BrokenStore;

    impl ArtifactStore for BrokenStore {
        fn write(&self, _path: &[String], _content: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
    }

    fn history(values: &[(u32, &'static str)]) -> History<Tagged<u32, &'static str>> {
        values
            .iter()
            .enumerate()
            .map(|(i, (k, v))| Op::ok(i, *k as u64, "write", Tagged::keyed(*k, *v)))
            .collect()
    }

    #[test]
    fn test_validity_merge() {
        use Validity::*;
        assert_eq!(Valid.merge(Valid), Valid);
        assert_eq!(Valid.merge(Unknown), Unknown);
        assert_eq!(Unknown.merge(Invalid), Invalid);
        assert_eq!(Invalid.merge(Valid), Invalid);
    }

    #[test]
    fn test_validity_serializes_like_jepsen() {
        assert_eq!(serde_json::to_string(&Validity::Valid).unwrap(), "true");
        assert_eq!(serde_json::to_string(&Validity::Invalid).unwrap(), "false");
        assert_eq!(serde_json::to_string(&Validity::Unknown).unwrap(), "\"unknown\"");
    }

    #[test]
    fn test_one_bad_key_fails_the_whole_check() {
        let h = history(&[(1, "ok"), (2, "bad"), (3, "ok"), (2, "ok")]);
        for parallelism in [1, 4] {
            let result = IndependentChecker::new(Marker)
                .with_parallelism(parallelism)
                .check(&h, &CheckOptions::default())
                .unwrap();

            assert_eq!(result.valid, Validity::Invalid, "parallelism {parallelism}");
            assert_eq!(result.failures, vec![2]);
            assert_eq!(
                result.results,
                BTreeMap::from([(1, Validity::Valid), (2, Validity::Invalid), (3, Validity::Valid)])
            );
        }
    }

    #[test]
    fn test_many_keys_merge_across_workers() {
        let pairs: Vec<(u32, &'static str)> = (0..40)
            .map(|k| (k, if k % 7 == 3 { "bad" } else if k == 20 { "?" } else { "ok" }))
            .collect();
        let h = history(&pairs);

        let serial = IndependentChecker::new(Marker)
            .with_parallelism(1)
            .check(&h, &CheckOptions::default())
            .unwrap();
        let parallel = IndependentChecker::new(Marker)
            .with_parallelism(4)
            .check(&h, &CheckOptions::default())
            .unwrap();

        assert_eq!(parallel.results.len(), 40);
        assert_eq!(parallel.results, serial.results);
        assert_eq!(parallel.failures, vec![3, 10, 17, 24, 31, 38]);
        assert_eq!(parallel.failures, serial.failures);
        assert_eq!(parallel.valid, Validity::Invalid);
    }

    #[test]
    fn test_unknown_is_not_a_failure() {
        let h = history(&[(1, "ok"), (2, "?")]);
        let result = IndependentChecker::new(Marker)
            .with_parallelism(1)
            .check(&h, &CheckOptions::default())
            .unwrap();

        assert_eq!(result.valid, Validity::Unknown);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_empty_history_is_valid() {
        let result: IndependentResult<u32, Validity> = IndependentChecker::new(Marker)
            .check(&History::new(), &CheckOptions::default())
            .unwrap();

        assert_eq!(result.valid, Validity::Valid);
        assert!(result.results.is_empty());
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_global_ops_reach_every_key() {
        let mut h = history(&[(1, "ok"), (2, "ok")]);
        h.push(Op::info(2, ProcessId::Nemesis, "start", Tagged::global("bad")));

        let result = IndependentChecker::new(Marker)
            .check(&h, &CheckOptions::default())
            .unwrap();
        assert_eq!(result.failures, vec![1, 2]);
    }

    #[test]
    fn test_artifacts_written_per_key() {
        let h = history(&[(1, "ok"), (2, "bad")]);
        for parallelism in [1, 4] {
            let store = Arc::new(RecordingStore::default());
            IndependentChecker::new(Marker)
                .with_store(store.clone())
                .with_parallelism(parallelism)
                .check(&h, &CheckOptions::default())
                .unwrap();

            let mut writes = store.writes.lock().clone();
            writes.sort();
            let paths: Vec<String> = writes.iter().map(|(p, _)| p.join("/")).collect();
            assert_eq!(
                paths,
                vec![
                    "independent/1/history.jsonl",
                    "independent/1/results.json",
                    "independent/2/history.jsonl",
                    "independent/2/results.json",
                ],
                "parallelism {parallelism}"
            );

            let (_, results) = &writes[3];
            assert_eq!(results, b"false");
            let (_, lines) = &writes[2];
            let line = std::str::from_utf8(lines).unwrap().trim_end();
            let op: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(op["value"], "bad");
            assert_eq!(op["index"], 1);
        }
    }

    #[test]
    fn test_subdirectory_prefix_is_extended() {
        let store = Arc::new(RecordingStore::default());
        let h = history(&[(4, "ok")]);
        let opts = CheckOptions::default().nested(["register"]);

        IndependentChecker::new(Marker)
            .with_store(store.clone())
            .check(&h, &opts)
            .unwrap();

        let writes = store.writes.lock();
        assert!(writes
            .iter()
            .all(|(p, _)| p[..3] == ["register", "independent", "4"]));
    }

    #[test]
    fn test_store_failure_does_not_change_validity() {
        let h = history(&[(1, "ok"), (2, "ok")]);
        let result = IndependentChecker::new(Marker)
            .with_store(Arc::new(BrokenStore))
            .check(&h, &CheckOptions::default())
            .unwrap();

        assert_eq!(result.valid, Validity::Valid);
        assert_eq!(result.artifact_errors.len(), 4);
        assert!(result.artifact_errors[0].contains("disk full"));
    }

    #[test]
    fn test_upstream_error_aborts_check() {
        struct Refuses;
        impl Checker<&'static str> for Refuses {
            type Output = Validity;
            fn check(&self, _: &History<&'static str>, _: &CheckOptions) -> Result<Validity, CheckError> {
                Err(CheckError::Failed("model exploded".into()))
            }
        }

        let h = history(&[(1, "ok"), (2, "ok"), (3, "ok")]);
        for parallelism in [1, 4] {
            let err = IndependentChecker::new(Refuses)
                .with_parallelism(parallelism)
                .check(&h, &CheckOptions::default())
                .unwrap_err();
            assert_eq!(err.to_string(), "checker failed: model exploded");
        }
    }

    #[test]
    fn test_checkers_nest() {
        // Outer key: table. Inner key: row.
        let mut h: History<Tagged<u32, Tagged<u32, &'static str>>> = History::new();
        h.push(Op::ok(0, 0u64, "write", Tagged::keyed(1, Tagged::keyed(10, "ok"))));
        h.push(Op::ok(1, 0u64, "write", Tagged::keyed(1, Tagged::keyed(11, "bad"))));
        h.push(Op::ok(2, 1u64, "write", Tagged::keyed(2, Tagged::keyed(10, "ok"))));

        for parallelism in [1, 4] {
            let store = Arc::new(RecordingStore::default());
            let inner = IndependentChecker::new(Marker)
                .with_store(store.clone())
                .with_parallelism(parallelism);
            let nested = IndependentChecker::new(inner).with_parallelism(parallelism);
            let result = nested.check(&h, &CheckOptions::default()).unwrap();

            assert_eq!(result.valid, Validity::Invalid, "parallelism {parallelism}");
            assert_eq!(result.failures, vec![1]);
            assert_eq!(result.results[&1].failures, vec![11]);

            let writes = store.writes.lock();
            assert!(writes
                .iter()
                .any(|(p, _)| p.join("/") == "independent/1/independent/11/results.json"));
        }
    }
}
