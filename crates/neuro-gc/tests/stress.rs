//! Multi-threaded churn over the allocator, table and object model.

mod common;

use std::thread;

use neuro_gc::{Collector, Object, Value};

/// Four mutator threads allocate and link objects concurrently; everything
/// rooted must survive the cycles that follow, everything else must go.
#[test]
fn parallel_allocation_churn() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();

    const THREADS: usize = 4;
    const PER_THREAD: usize = 500;

    let mut workers = Vec::new();
    for t in 0..THREADS {
        workers.push(thread::spawn(move || {
            let mut kept = Vec::new();
            for i in 0..PER_THREAD {
                let obj = Object::create(2, 0).unwrap();
                obj.set("tag", (t * PER_THREAD + i) as u32).unwrap();
                if i % 4 == 0 {
                    obj.root().unwrap();
                    kept.push(obj);
                }
                // The other three quarters become garbage immediately.
            }
            kept
        }));
    }

    let survivors: Vec<_> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();

    // Enough registrations to push the table past its first page.
    assert!(THREADS * PER_THREAD > 1000);

    common::collect();
    common::collect();

    let stats = collector.last_cycle_stats();
    assert!(stats.cycle >= 2);

    for obj in &survivors {
        assert!(obj.is_resolvable());
        assert!(!obj.get("tag").is_undefined());
    }
    assert_eq!(survivors.len(), THREADS * (PER_THREAD / 4));
}

/// Property writes from several threads race against explicit collection
/// cycles; rooted state stays intact throughout.
#[test]
fn mutation_interleaved_with_cycles() {
    let _session = common::session();

    let shared = Object::create(8, 8).unwrap();
    shared.root().unwrap();

    let mut workers = Vec::new();
    for t in 0..3i32 {
        workers.push(thread::spawn(move || {
            for round in 0..50i32 {
                let key = format!("slot_{t}");
                shared.set(&key, t * 1000 + round).unwrap();

                // Garbage churn while cycles run on the main thread. A
                // cycle may reclaim the unrooted object before the write
                // lands; that is the expected fate of garbage.
                let junk = Object::create(2, 0).unwrap();
                let _ = junk.set("n", round);
            }
        }));
    }

    for _ in 0..10 {
        common::collect();
    }
    for worker in workers {
        worker.join().unwrap();
    }
    common::collect();

    assert!(shared.is_resolvable());
    for t in 0..3i32 {
        let value = shared.get(&format!("slot_{t}"));
        assert_eq!(value, Value::Int(t * 1000 + 49), "last write wins");
    }
}

/// Handle identity stays collision-free across removal, gap reuse and
/// reallocation at volume.
#[test]
fn identity_churn_over_gap_reuse() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();

    let mut seen = std::collections::HashSet::new();

    for round in 0..20 {
        let mut handles = Vec::new();
        for i in 0..100u64 {
            let handle = collector.allocate_value(round as u64 * 1000 + i).unwrap();
            assert!(
                seen.insert((handle.raw().index(), handle.raw().uid())),
                "identity reuse at round {round}"
            );
            handles.push(handle);
        }
        for handle in &handles {
            collector.remove_pointer(handle.raw()).unwrap();
        }
        // Rebuild gaps so the next round reuses the freed indices.
        common::collect();
    }
}
