//! A register workload run over independent keys, end to end.
//!
//! Run with: cargo run --example basic

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use spectroscope_independent::{
    CheckError, CheckOptions, Checker, ConcurrentGenerator, Context, FsStore, Generator, History,
    IndependentChecker, Invocation, Op, OpType, ProcessId, Seq, Tagged, Validity,
};

/// Reads may only return values some write tried to store.
struct NoPhantomReads;

impl Checker<Option<i64>> for NoPhantomReads {
    type Output = Validity;

    fn check(&self, history: &History<Option<i64>>, _: &CheckOptions) -> Result<Validity, CheckError> {
        let unexpected = history.iter().find(|op| {
            op.process != ProcessId::Nemesis && !matches!(op.f.as_str(), "read" | "write")
        });
        if let Some(op) = unexpected {
            return Err(CheckError::Failed(format!("unexpected {} op at index {}", op.f, op.index)));
        }
        let written: BTreeSet<i64> = history
            .iter()
            .filter(|op| op.op_type == OpType::Invoke && op.f.as_str() == "write")
            .filter_map(|op| op.value)
            .collect();
        let phantom = history.iter().any(|op| {
            op.op_type == OpType::Ok
                && op.f.as_str() == "read"
                && op.value.is_some_and(|v| !written.contains(&v))
        });
        Ok(if phantom { Validity::Invalid } else { Validity::Valid })
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // 6 workers over 3 nodes: two groups of three threads, one per node.
    let ctx = Context::new(6, ["n1", "n2", "n3"]);
    let gen = Arc::new(
        ConcurrentGenerator::new(2, 0u32..8, |key: &u32| {
            let base = i64::from(*key) * 10;
            Seq::new([
                Invocation::new("write", Some(base + 1)),
                Invocation::new("read", None),
                Invocation::new("write", Some(base + 2)),
                Invocation::new("read", None),
            ])
        })
        .expect("2 keys at a time is a valid layout"),
    );
    if let Some(layout) = gen.layout() {
        println!("groups: {}", layout.group_count());
    }

    // An in-memory register per key stands in for the system under test.
    let registers: Arc<Mutex<HashMap<u32, i64>>> = Arc::default();
    let history: Arc<Mutex<History<Tagged<u32, Option<i64>>>>> = Arc::default();
    let started = Instant::now();

    let workers: Vec<_> = (0..ctx.concurrency() as u64)
        .map(|process| {
            let (gen, ctx) = (Arc::clone(&gen), ctx.clone());
            let (registers, history) = (Arc::clone(&registers), Arc::clone(&history));
            thread::spawn(move || {
                while let Some(inv) = gen.op(&ctx, process.into()).expect("generator failed") {
                    let Tagged::Keyed(tuple) = inv.value else { continue };
                    let (key, value) = tuple.into_parts();
                    let result = match (inv.f.as_str(), value) {
                        ("write", Some(v)) => {
                            registers.lock().insert(key, v);
                            Some(v)
                        }
                        _ => registers.lock().get(&key).copied(),
                    };

                    let mut history = history.lock();
                    let index = history.len();
                    history.push(
                        Op::invoke(index, process, inv.f.clone(), Tagged::keyed(key, value))
                            .at(started.elapsed()),
                    );
                    history.push(
                        Op::ok(index + 1, process, inv.f, Tagged::keyed(key, result))
                            .at(started.elapsed()),
                    );
                }
            })
        })
        .collect();

    // The nemesis acts on the whole cluster, so its ops carry no key.
    {
        let mut history = history.lock();
        let index = history.len();
        history.push(
            Op::info(index, ProcessId::Nemesis, "start-partition", Tagged::global(None))
                .at(started.elapsed()),
        );
    }

    for worker in workers {
        worker.join().expect("worker panicked");
    }
    let history = history.lock().clone();
    println!("recorded {} ops", history.len());

    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(FsStore::new(dir.path()));
    let checker = IndependentChecker::new(NoPhantomReads).with_store(store.clone());
    let result = checker
        .check(&history, &CheckOptions::default())
        .expect("check failed");

    println!("valid: {}", result.valid);
    for (key, verdict) in &result.results {
        println!("  key {key}: {verdict}");
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&result).expect("result serializes")
    );
    println!("artifacts under {}", store.root().join("independent").display());

    assert_eq!(result.valid, Validity::Valid);
    assert_eq!(result.results.len(), 8);
    assert!(result.failures.is_empty());
}
