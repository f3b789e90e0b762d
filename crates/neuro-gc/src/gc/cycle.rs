//! The collection cycle: scan → sweep → compact.
//!
//! All three phases run single-threaded on the dedicated collector thread.
//! The scan enumerates every live table handle into a suspected set and
//! lets the registered scanners prune what they can prove reachable; the
//! remainder is unreachable by construction. Sweep finalizes, compact
//! evacuates and retargets table records — mutator handles never notice.

use std::collections::VecDeque;
use std::mem;
use std::ptr::NonNull;
use std::time::Instant;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::gc::{Collector, MarkedAllocation, RetiredSegment};
use crate::handle::RawHandle;
use crate::header::{AllocHeader, GarbageState};
use crate::metrics::CycleStats;
use crate::object::Object;
use crate::segment::{Arena, Segment};
use crate::value::Value;

/// Body of the background thread.
pub(crate) fn collector_main(collector: &Collector) {
    let interval = collector.config().scan_interval;
    let mut cycle: u64 = 0;

    loop {
        collector.signal().begin_cycle(interval);
        if collector.should_terminate() {
            collector.signal().shutdown();
            break;
        }

        cycle += 1;
        run_cycle(collector, cycle);
        collector.signal().end_cycle();
    }
}

fn run_cycle(collector: &Collector, cycle: u64) {
    let mut stats = CycleStats {
        cycle,
        ..CycleStats::default()
    };

    let scan_start = Instant::now();
    let garbage = scan(collector, &mut stats);
    stats.scan_time = scan_start.elapsed();

    if garbage > 0 {
        let sweep_start = Instant::now();
        sweep(collector, &mut stats);
        stats.sweep_time = sweep_start.elapsed();

        let compact_start = Instant::now();
        compact(collector, &mut stats);
        stats.compact_time = compact_start.elapsed();
    }

    if collector.table.wants_gap_scan() {
        collector.table.find_gaps(1);
    }

    debug!(
        cycle,
        scanned = stats.scanned,
        reclaimed = stats.reclaimed,
        reclaimed_bytes = stats.reclaimed_bytes,
        relocated = stats.relocated,
        "cycle complete"
    );
    collector.record_cycle_stats(stats);
}

// ============================================================================
// Scan phase
// ============================================================================

/// Enumerates live handles, runs the scanner multicast, and moves every
/// handle nobody claimed into the marked-for-sweep buffer. Returns the
/// number of allocations that became garbage.
fn scan(collector: &Collector, stats: &mut CycleStats) -> usize {
    let mut suspected: FxHashSet<RawHandle> = FxHashSet::default();
    collector.table.collect(&mut suspected);
    stats.scanned = suspected.len();

    collector.run_scanners(&mut suspected);

    let garbage = suspected.len();
    if garbage == 0 {
        return 0;
    }

    let mut marked = collector.marked.lock();
    for handle in suspected {
        let Some(header) = collector.table.get_header(handle) else {
            continue;
        };
        // SAFETY: table-resolved header; the slot removal below makes this
        // thread the only remaining path to it.
        unsafe { header.as_ref() }.set_state(GarbageState::Marked);
        let _ = collector.table.remove_pointer(handle);
        marked.push(MarkedAllocation(header));
    }
    trace!(garbage, "scan marked unreachable allocations");
    garbage
}

/// The default scanner: traces the object graph from the roots.
///
/// Every root is reachable by definition and leaves the suspected set;
/// roots fronting objects are traversed property by property, removing and
/// enqueueing every managed handle encountered, with a visited set against
/// cycles and an early exit once nothing is suspect anymore.
pub(crate) fn object_scanner(collector: &Collector, suspected: &mut FxHashSet<RawHandle>) {
    if suspected.is_empty() {
        return;
    }

    let roots = collector.roots.lock().clone();
    let mut visited: FxHashSet<RawHandle> = FxHashSet::default();
    let mut queue: VecDeque<RawHandle> = VecDeque::new();

    for root in roots {
        suspected.remove(&root);
        if visited.insert(root) && is_object(collector, root) {
            queue.push_back(root);
        }
    }

    while let Some(current) = queue.pop_front() {
        if suspected.is_empty() {
            return;
        }
        let Some(header) = collector.table.get_header(current) else {
            continue;
        };
        // SAFETY: header resolved this instant; objects are only reclaimed
        // by this same thread, later in the cycle.
        let object = unsafe { &*header.as_ref().payload_ptr().cast::<Object>() };
        for (_, value) in object.iter() {
            if let Value::Object(ptr) = value {
                let raw = ptr.raw();
                suspected.remove(&raw);
                if visited.insert(raw) && is_object(collector, raw) {
                    queue.push_back(raw);
                }
            }
        }
    }
}

fn is_object(collector: &Collector, handle: RawHandle) -> bool {
    collector
        .table
        .get_header(handle)
        // SAFETY: table-resolved header.
        .is_some_and(|header| unsafe { header.as_ref() }.is_object())
}

// ============================================================================
// Sweep phase
// ============================================================================

/// Drains the marked buffer, firing destroy callbacks. Does not reclaim
/// bytes — that is compact's job.
fn sweep(collector: &Collector, stats: &mut CycleStats) {
    let drained: Vec<MarkedAllocation> = mem::take(&mut *collector.marked.lock());

    for marked in drained {
        // SAFETY: the slot was removed during scan; only this thread still
        // reaches the header.
        let header = unsafe { marked.0.as_ref() };
        header.set_state(GarbageState::Dying);

        if header.is_object() {
            // SAFETY: object-kind headers front a live Object until swept.
            let object = unsafe { &*header.payload_ptr().cast::<Object>() };
            object.fire_on_destroy(object.self_ptr());
            object.clear_properties();
        }

        if !header.is_trivial() {
            if let Some(destroy) = header.destroy_fn() {
                // SAFETY: finalized exactly once, here.
                unsafe { destroy(header.payload_ptr()) };
            }
        }

        header.set_state(GarbageState::Swept);
        stats.reclaimed += 1;
        stats.reclaimed_bytes += header.total_bytes();
    }
}

// ============================================================================
// Compact phase
// ============================================================================

/// Evacuates every segment containing swept allocations and retargets the
/// table records of the survivors. Bytes of segments drained this cycle
/// are only reused from the next compact on, so a resolver that raced the
/// record update still reads valid data.
fn compact(collector: &Collector, stats: &mut CycleStats) {
    // Segments drained by the previous compact become allocatable again.
    let retired: Vec<RetiredSegment> = mem::take(&mut *collector.retired_segments.lock());
    for segment in retired {
        // SAFETY: retired segments hold only swept allocations and spent a
        // full cycle unreferenced.
        unsafe {
            segment.0.as_ref().reset_cursor();
            segment.0.as_ref().set_compacting(false);
        }
    }

    compact_arena(collector, &collector.trivial_arena, stats);
    compact_arena(collector, &collector.non_trivial_arena, stats);
}

fn compact_arena(collector: &Collector, arena: &Arena, stats: &mut CycleStats) {
    let segments: Vec<NonNull<Segment>> = arena.iter_segments().collect();

    for segment_ptr in segments {
        // SAFETY: segments stay mapped for the collector's lifetime.
        let segment = unsafe { segment_ptr.as_ref() };
        if segment.is_compacting() {
            continue;
        }

        segment.set_compacting(true);

        let mut has_swept = false;
        let mut has_live = false;
        // SAFETY: compacting flag excludes allocators; headers up to the
        // cursor are fully initialized.
        unsafe {
            Arena::walk_headers(segment, |header| match header.state() {
                GarbageState::Swept => has_swept = true,
                _ => has_live = true,
            });
        }

        if !has_swept {
            segment.set_compacting(false);
            continue;
        }

        let fully_evacuated = if has_live {
            evacuate_segment(collector, arena, segment, stats)
        } else {
            true
        };

        if fully_evacuated {
            // Keep the compacting flag up: the bytes stay untouchable until
            // the next compact recycles the segment.
            collector
                .retired_segments
                .lock()
                .push(RetiredSegment(segment_ptr));
        } else {
            segment.set_compacting(false);
        }
    }
}

/// Moves every live allocation out of `segment`. Returns whether the
/// segment ended up empty.
fn evacuate_segment(
    collector: &Collector,
    arena: &Arena,
    segment: &Segment,
    stats: &mut CycleStats,
) -> bool {
    let mut evacuated_all = true;

    let end = segment.cursor();
    let mut current = segment.data_start().cast::<AllocHeader>();

    while (current.cast::<u8>()) < end {
        // SAFETY: packed header sequence; allocators are excluded.
        let header = unsafe { &*current };
        let next = header.next_header();

        if header.state() == GarbageState::Live && !relocate(collector, arena, header, stats) {
            evacuated_all = false;
        }

        current = next;
    }

    evacuated_all
}

/// Copies one live allocation into fresh arena space and retargets its
/// table record. Returns `false` when the block has to stay put for the
/// next cycle (no space, or its handle is still being published).
fn relocate(
    collector: &Collector,
    arena: &Arena,
    header: &AllocHeader,
    stats: &mut CycleStats,
) -> bool {
    // Claim the block. A mutator that reallocated it concurrently already
    // owns its finalization; nothing left to move.
    if !header.try_claim() {
        return true;
    }

    let source = NonNull::from(header);
    let handle = header.table_slot();

    // Mid-registration: the block was bump-allocated but its handle is not
    // published yet. Leave it alone; the next cycle sees it registered.
    if handle.is_null() {
        header.set_state(GarbageState::Live);
        return false;
    }

    // Stale block: the record no longer points here (reallocate swapped it
    // before we claimed). The data lives on elsewhere; finalize in place.
    if collector.table.get_header(handle).map(NonNull::as_ptr) != Some(source.as_ptr()) {
        finalize_source(header);
        return true;
    }

    let total = header.total_bytes();
    let Some(dest) = arena.allocate(total, &mut |addr| {
        // Clone the header bytes under the destination's spinlock so any
        // later walk of that segment sees a coherent header.
        // SAFETY: destination is exclusively ours; headers are relocatable
        // bytewise.
        unsafe {
            std::ptr::copy_nonoverlapping(
                (header as *const AllocHeader).cast::<u8>(),
                addr.as_ptr(),
                std::mem::size_of::<AllocHeader>(),
            );
        }
    }) else {
        // No space: restore the claim and retry next cycle.
        header.set_state(GarbageState::Live);
        return false;
    };

    let dest_header = dest.cast::<AllocHeader>();
    // SAFETY: header bytes were cloned in the init callback above.
    let new = unsafe { dest_header.as_ref() };
    // The clone carried the claimed (`Dying`) state; the copy itself is a
    // live block once published.
    new.set_state(GarbageState::Live);

    // Objects carry a property lock inside the payload: hold it across the
    // copy so no slot claim lands half in the old and half in the new map.
    let object_guard = if header.is_object() {
        // SAFETY: object-kind blocks front a live Object.
        Some(unsafe { &*header.payload_ptr().cast::<Object>() }.lock_properties())
    } else {
        None
    };

    // SAFETY: source payload is live; destination payload is uninitialized
    // memory of identical shape.
    unsafe {
        if header.is_trivial() {
            std::ptr::copy_nonoverlapping(
                header.payload_ptr(),
                new.payload_ptr(),
                header.buffer_bytes(),
            );
        } else if let Some(copy) = header.copy_fn() {
            copy(new.payload_ptr(), header.payload_ptr());
        } else {
            std::ptr::copy_nonoverlapping(
                header.payload_ptr(),
                new.payload_ptr(),
                header.buffer_bytes(),
            );
        }
        if header.is_object() {
            // The cloned lock bytes read as held; give the copy its own.
            (*new.payload_ptr().cast::<Object>()).reset_property_lock();
        }
    }

    match collector.table.replace_pointer_if(handle, source, dest_header) {
        Ok(()) => {
            finalize_source(header);
            stats.relocated += 1;
        }
        Err(_) => {
            // A reallocation won the race after our stale check; its
            // replace proves its copy completed, so finalizing the source
            // here cannot race the mutator's reads. Our copy is an orphan.
            finalize_source(header);
            new.set_state(GarbageState::Swept);
        }
    }
    drop(object_guard);
    true
}

/// Runs the destroy callback (non-trivial blocks) and parks the claimed
/// source block as swept.
fn finalize_source(header: &AllocHeader) {
    debug_assert_eq!(header.state(), GarbageState::Dying);
    if !header.is_trivial() {
        if let Some(destroy) = header.destroy_fn() {
            // SAFETY: the payload was copied out (or superseded) and the
            // claim guarantees single finalization.
            unsafe { destroy(header.payload_ptr()) };
        }
    }
    header.set_state(GarbageState::Swept);
}
