use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use spectroscope_independent::{
    from_fn, ConcurrentGenerator, Context, Generator, GeneratorError, Invocation, ProcessId,
    Seq, SequentialGenerator, Tagged,
};

/// What a sub-generator saw when it handed out an op.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Seen {
    process: ProcessId,
    visible_threads: Vec<usize>,
    seq: usize,
}

/// A sub-generator that hands out `count` ops, recording the caller's view.
fn recording(count: usize) -> impl Generator<Seen> {
    let issued = Mutex::new(0usize);
    from_fn(move |ctx: &Context, process| {
        let mut issued = issued.lock();
        if *issued == count {
            return Ok(None);
        }
        *issued += 1;
        Ok(Some(Invocation::new(
            "write",
            Seen {
                process,
                visible_threads: ctx.threads().to_vec(),
                seq: *issued,
            },
        )))
    })
}

/// Drive `gen` from one OS thread per process until every process sees
/// exhaustion. Returns `(process, value)` in completion order.
fn run<G, T>(gen: Arc<G>, ctx: &Context) -> Vec<(u64, T)>
where
    G: Generator<T> + 'static,
    T: Send + 'static,
{
    let log = Arc::new(Mutex::new(Vec::new()));
    let workers: Vec<_> = (0..ctx.concurrency() as u64)
        .map(|process| {
            let gen = Arc::clone(&gen);
            let ctx = ctx.clone();
            let log = Arc::clone(&log);
            thread::spawn(move || {
                while let Some(inv) = gen.op(&ctx, process.into()).unwrap() {
                    log.lock().push((process, inv.value));
                    thread::yield_now();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    Arc::try_unwrap(log).ok().unwrap().into_inner()
}

fn keyed<K, V>(value: Tagged<K, V>) -> (K, V) {
    match value {
        Tagged::Keyed(t) => t.into_parts(),
        Tagged::Global(_) => panic!("generator produced an untagged value"),
    }
}

#[test]
fn test_concurrent_groups_stay_on_their_keys() {
    let ctx = Context::new(4, ["n1", "n2"]);
    let gen = Arc::new(ConcurrentGenerator::new(2, 0u32..6, |_: &u32| recording(3)).unwrap());

    let log: Vec<(u64, Tagged<u32, Seen>)> = run(gen, &ctx);

    let mut ops_per_key: BTreeMap<u32, Vec<Seen>> = BTreeMap::new();
    let mut threads_per_key: BTreeMap<u32, BTreeSet<u64>> = BTreeMap::new();
    for (process, value) in log {
        let (key, seen) = keyed(value);
        threads_per_key.entry(key).or_default().insert(process);
        ops_per_key.entry(key).or_default().push(seen);
    }

    // Every key ran exactly once, with all of its ops.
    assert_eq!(ops_per_key.keys().copied().collect::<Vec<_>>(), (0..6).collect::<Vec<_>>());
    for (key, seen) in &ops_per_key {
        assert_eq!(seen.len(), 3, "key {key}");
    }

    // A key's ops came only from one group, and that group is all it saw.
    for (key, seen) in &ops_per_key {
        let threads = &threads_per_key[key];
        let in_first = threads.iter().all(|p| *p < 2);
        let in_second = threads.iter().all(|p| *p >= 2);
        assert!(in_first || in_second, "key {key} spanned groups: {threads:?}");

        let expected = if in_first { vec![0, 1] } else { vec![2, 3] };
        assert!(seen.iter().all(|s| s.visible_threads == expected), "key {key}");
    }
}

#[test]
fn test_concurrent_claims_next_key_in_order() {
    let ctx = Context::new(4, ["n1", "n2"]);
    let gen = ConcurrentGenerator::new(2, 0u32.., |k: &u32| {
        Seq::new([Invocation::new("write", *k), Invocation::new("read", *k)])
    })
    .unwrap();

    let next = |process: u64| -> Option<(u32, u32)> {
        gen.op(&ctx, process.into()).unwrap().map(|inv| keyed(inv.value))
    };

    // Group 0 is threads {0, 1}; group 1 is threads {2, 3}.
    assert_eq!(next(0), Some((0, 0)));
    assert_eq!(next(2), Some((1, 1)));
    assert_eq!(next(1), Some((0, 0)));
    assert_eq!(next(3), Some((1, 1)));
    // Key 0 is exhausted; group 0 picks up the first pending key.
    assert_eq!(next(1), Some((2, 2)));
    assert_eq!(next(0), Some((2, 2)));
    assert_eq!(next(2), Some((3, 3)));
    // Replacement processes keep their thread's group.
    assert_eq!(next(6), Some((3, 3)));
}

#[test]
fn test_concurrent_groups_finish_independently() {
    let ctx = Context::new(4, ["n1", "n2"]);
    let gen = ConcurrentGenerator::new(2, vec![0u32, 1, 2], |k: &u32| {
        Seq::new([Invocation::new("write", *k)])
    })
    .unwrap();

    let next = |process: u64| -> Option<u32> {
        gen.op(&ctx, process.into()).unwrap().map(|inv| keyed(inv.value).0)
    };

    assert_eq!(next(0), Some(0));
    // Group 1 finishes key 1 and takes the last key.
    assert_eq!(next(2), Some(1));
    assert_eq!(next(3), Some(2));
    // Group 0 has nothing left to claim, permanently.
    assert_eq!(next(0), None);
    assert_eq!(next(1), None);
    assert_eq!(next(0), None);
    // Group 1 drains too.
    assert_eq!(next(2), None);
}

#[test]
fn test_concurrent_rejects_leftover_threads() {
    let ctx = Context::new(5, ["n1", "n2"]);
    let gen = ConcurrentGenerator::new(2, 0u32.., |_: &u32| recording(1)).unwrap();

    let result: Result<Option<Invocation<Tagged<u32, Seen>>>, _> = gen.op(&ctx, 0u64.into());
    let err = result.unwrap_err();
    assert!(matches!(err, GeneratorError::Config(_)));
    assert!(err.to_string().contains("5 threads"), "{err}");
}

#[test]
fn test_sequential_under_concurrent_callers() {
    let ctx = Context::new(4, ["n1"]);
    let gen = Arc::new(SequentialGenerator::new(0u32..10, |k: &u32| {
        Seq::new((0..5u32).map(|i| Invocation::new("write", (*k, i))))
    }));

    let log: Vec<(u64, Tagged<u32, (u32, u32)>)> = run(gen, &ctx);

    let mut per_key: HashMap<u32, Vec<u32>> = HashMap::new();
    for (_, value) in log {
        let (key, (inner_key, i)) = keyed(value);
        assert_eq!(key, inner_key);
        per_key.entry(key).or_default().push(i);
    }
    assert_eq!(per_key.len(), 10);
    for (key, mut ops) in per_key {
        ops.sort_unstable();
        assert_eq!(ops, vec![0, 1, 2, 3, 4], "key {key}");
    }
}

#[test]
fn test_sequential_two_keys_two_ops() {
    let ctx = Context::new(2, ["n1"]);
    let gen = SequentialGenerator::new(vec!["k1", "k2"], |_: &&str| {
        Seq::new([Invocation::new("write", 1), Invocation::new("write", 2)])
    });

    let produced: Vec<Tagged<&str, i32>> =
        std::iter::from_fn(|| gen.op(&ctx, 1u64.into()).unwrap().map(|inv| inv.value)).collect();
    assert_eq!(
        produced,
        vec![
            Tagged::keyed("k1", 1),
            Tagged::keyed("k1", 2),
            Tagged::keyed("k2", 1),
            Tagged::keyed("k2", 2),
        ]
    );
    let after: Option<Invocation<Tagged<&str, i32>>> = gen.op(&ctx, 0u64.into()).unwrap();
    assert!(after.is_none());
}

#[test]
fn test_factory_builds_independent_generators() {
    let factory = |k: &u32| Seq::new([Invocation::new("write", *k)]);
    let ctx = Context::new(1, ["n1"]);

    let first = factory(&7);
    let second = factory(&7);
    assert!(first.op(&ctx, 0u64.into()).unwrap().is_some());
    assert!(first.op(&ctx, 0u64.into()).unwrap().is_none());

    // Draining one does not drain its twin.
    assert_eq!(second.remaining(), 1);
    assert_eq!(second.op(&ctx, 0u64.into()).unwrap().map(|i| i.value), Some(7));
}
