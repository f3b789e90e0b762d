//! Handle identity, replacement and invalidation.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use neuro_gc::{Collector, Handle};

#[test]
fn buffer_reads_back_after_reallocate() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();

    let buf: Handle<i32> = collector.allocate_trivial_array::<i32>(4).unwrap();
    for i in 0..4 {
        assert!(buf.write_at(i, i as i32));
    }

    // Replace the backing in place, carrying the bytes over.
    collector.reallocate(buf.raw(), 4, 4, true).unwrap();
    for i in 0..4 {
        assert_eq!(buf.read_at(i), Some(i as i32));
    }

    for i in 0..4 {
        assert!(buf.write_at(i, i as i32 + 2));
    }
    for i in 0..4 {
        assert_eq!(buf.read_at(i), Some(i as i32 + 2));
    }
}

#[test]
fn removal_invalidates_handle() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();

    let handle = collector.allocate_value(7i32).unwrap();
    assert_eq!(handle.read(), Some(7));

    collector.remove_pointer(handle.raw()).unwrap();
    assert!(handle.resolve().is_none());
    assert!(!handle.is_resolvable());
}

#[test]
fn reclaimed_slot_gets_fresh_uid() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();

    let first = collector.allocate_value(1i32).unwrap();
    let first_raw = first.raw();
    collector.remove_pointer(first_raw).unwrap();

    // The cycle rebuilds the gap set, so the next allocation reuses the
    // freed index.
    common::collect();

    let second = collector.allocate_value(2i32).unwrap();
    let second_raw = second.raw();

    assert_eq!(second_raw.index(), first_raw.index());
    assert_ne!(second_raw.uid(), first_raw.uid());
    assert!(first.resolve().is_none());
    assert_eq!(second.read(), Some(2));
}

#[test]
fn distinct_allocations_have_distinct_identities() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();

    let mut seen = std::collections::HashSet::new();
    for i in 0..256i64 {
        let handle = collector.allocate_value(i).unwrap();
        let raw = handle.raw();
        assert!(
            seen.insert((raw.index(), raw.uid())),
            "duplicate identity at iteration {i}"
        );
    }
}

#[test]
fn rooted_buffers_survive_compaction_bit_for_bit() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();

    // Interleave rooted survivors with garbage so compaction has holes to
    // close and must relocate the survivors.
    let mut survivors = Vec::new();
    for i in 0..32u64 {
        let keep = collector.allocate_value(i * 0x0101_0101).unwrap();
        collector.root(keep.raw());
        survivors.push((keep, i * 0x0101_0101));

        let _garbage = collector.allocate_value(u64::MAX - i).unwrap();
    }

    common::collect();

    let stats = collector.last_cycle_stats();
    assert!(stats.reclaimed >= 32, "garbage was reclaimed");
    assert!(stats.relocated > 0, "compaction relocated survivors");

    for (handle, expected) in survivors {
        assert_eq!(handle.read(), Some(expected), "content survives relocation");
    }
}

#[test]
fn unrooted_buffer_is_collected() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();

    let kept = collector.allocate_value(123i32).unwrap();
    collector.root(kept.raw());
    let lost = collector.allocate_value(456i32).unwrap();

    common::collect();
    common::collect();

    assert_eq!(kept.read(), Some(123));
    assert!(lost.resolve().is_none());
}

#[test]
fn unroot_reexposes_to_collection() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();

    let handle = collector.allocate_value(5i64).unwrap();
    collector.root(handle.raw());

    common::collect();
    assert_eq!(handle.read(), Some(5));

    collector.unroot(handle.raw()).unwrap();
    common::collect();
    assert!(handle.resolve().is_none());
}

static DROPS: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone)]
struct Tracked(#[allow(dead_code)] u64);

impl Drop for Tracked {
    fn drop(&mut self) {
        DROPS.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn destroy_callback_fires_exactly_once() {
    let _session = common::session();
    let collector = Collector::instance().unwrap();
    DROPS.store(0, Ordering::SeqCst);

    let handle = collector.allocate_value(Tracked(9)).unwrap();
    assert!(handle.resolve().is_some());
    drop(handle);

    // Unrooted: the next cycle sweeps it and the destroy callback runs
    // before the cycle ends.
    common::collect();
    assert_eq!(DROPS.load(Ordering::SeqCst), 1);

    common::collect();
    assert_eq!(DROPS.load(Ordering::SeqCst), 1, "never finalized twice");
}

#[test]
fn null_handle_never_resolves() {
    let _session = common::session();

    let null: Handle<u32> = Handle::NULL;
    assert!(null.is_null());
    assert!(null.resolve().is_none());
    assert_eq!(null.read(), None);
}
