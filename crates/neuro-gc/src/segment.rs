//! Bump-allocated arena segments.
//!
//! Managed memory lives in chains of large mapped segments, one chain per
//! triviality class. Allocation bumps a cursor under a per-segment spinlock;
//! exhausted chains grow by mapping a fresh segment and CAS-appending it.
//! Compaction excludes allocators from a segment via the `compacting` flag,
//! checked under the same spinlock.

use std::cell::UnsafeCell;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::header::{AllocHeader, ALLOC_ALIGN};

/// Minimum bytes mapped per segment.
pub const MIN_SEGMENT_SIZE: usize = 2 * 1024 * 1024;

/// Header at the base of one contiguous arena mapping.
///
/// The allocatable region starts right after this header (rounded to
/// [`ALLOC_ALIGN`]) and is a packed sequence of `(AllocHeader, payload)`
/// allocations.
#[repr(C)]
pub struct Segment {
    next: AtomicPtr<Segment>,
    /// Spinlock serializing cursor movement and the compacting check.
    lock: AtomicBool,
    /// Set while the collector evacuates this segment; allocators skip it.
    compacting: AtomicBool,
    /// Reserved for long-lived allocations; currently never set.
    dormant: bool,
    /// Next free byte. Guarded by `lock`.
    cursor: UnsafeCell<*mut u8>,
    /// Total mapped bytes including this header.
    size: usize,
}

// SAFETY: all cross-thread state is atomic or guarded by the spinlock.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    const fn data_offset() -> usize {
        size_of::<Self>().next_multiple_of(ALLOC_ALIGN)
    }

    /// Maps a fresh segment of at least `min_size` usable bytes.
    ///
    /// Returns `None` when the platform mapping fails.
    pub fn create(min_size: usize) -> Option<NonNull<Segment>> {
        let wanted = (Self::data_offset() + min_size).max(MIN_SEGMENT_SIZE);
        let size = seg_alloc::round_to_page(wanted);
        let base = seg_alloc::map_segment(size).ok()?;

        let segment = base.cast::<Segment>();
        // SAFETY: the mapping is fresh, exclusively owned and large enough.
        unsafe {
            segment.as_ptr().write(Segment {
                next: AtomicPtr::new(ptr::null_mut()),
                lock: AtomicBool::new(false),
                compacting: AtomicBool::new(false),
                dormant: false,
                cursor: UnsafeCell::new(base.as_ptr().add(Self::data_offset())),
                size,
            });
        }
        Some(segment)
    }

    /// Base address of the allocatable region.
    #[must_use]
    pub fn data_start(&self) -> *mut u8 {
        unsafe {
            (self as *const Self)
                .cast::<u8>()
                .cast_mut()
                .add(Self::data_offset())
        }
    }

    /// One past the last mapped byte.
    #[must_use]
    pub fn data_end(&self) -> *mut u8 {
        unsafe { (self as *const Self).cast::<u8>().cast_mut().add(self.size) }
    }

    /// Total mapped bytes including the segment header.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Next segment in the chain, if any.
    #[must_use]
    pub fn next(&self) -> *mut Segment {
        self.next.load(Ordering::Acquire)
    }

    /// Whether the collector currently evacuates this segment.
    #[must_use]
    pub fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::Acquire)
    }

    pub(crate) fn set_compacting(&self, flag: bool) {
        self.compacting.store(flag, Ordering::Release);
    }

    /// Current bump cursor. Only meaningful to the collector thread while
    /// the segment is excluded from allocation.
    pub(crate) fn cursor(&self) -> *mut u8 {
        let _lock = SegmentLock::acquire(self);
        unsafe { *self.cursor.get() }
    }

    /// Rewinds the cursor to the base, forgetting every allocation.
    ///
    /// # Safety
    ///
    /// All allocations in this segment must be dead and unreferenced from
    /// the indirection table.
    pub(crate) unsafe fn reset_cursor(&self) {
        let _lock = SegmentLock::acquire(self);
        // SAFETY: spinlock held.
        unsafe { *self.cursor.get() = self.data_start() };
    }

    /// Attempts to bump-allocate `bytes` from this segment.
    ///
    /// `init` runs while the spinlock is still held, so a later walker
    /// that reads the cursor under the lock finds every allocation up to
    /// the cursor with an initialized prefix (the header).
    fn try_allocate(&self, bytes: usize, init: &mut dyn FnMut(NonNull<u8>)) -> Option<NonNull<u8>> {
        let _lock = SegmentLock::acquire(self);

        if self.compacting.load(Ordering::Relaxed) {
            return None;
        }

        // SAFETY: cursor is guarded by the spinlock held above.
        unsafe {
            let cursor = *self.cursor.get();
            if cursor.add(bytes) > self.data_end() {
                return None;
            }
            *self.cursor.get() = cursor.add(bytes);
            let addr = NonNull::new(cursor)?;
            init(addr);
            Some(addr)
        }
    }
}

/// RAII spinlock over one segment; yields on contention.
struct SegmentLock<'a> {
    segment: &'a Segment,
}

impl<'a> SegmentLock<'a> {
    fn acquire(segment: &'a Segment) -> Self {
        while segment
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::thread::yield_now();
        }
        Self { segment }
    }
}

impl Drop for SegmentLock<'_> {
    fn drop(&mut self) {
        self.segment.lock.store(false, Ordering::Release);
    }
}

/// A singly-linked chain of segments serving one triviality class.
pub struct Arena {
    head: AtomicPtr<Segment>,
}

impl Arena {
    /// Creates an arena seeded with one segment of at least `initial_size`
    /// usable bytes.
    ///
    /// Returns `None` when the initial mapping fails.
    pub fn with_initial_size(initial_size: usize) -> Option<Self> {
        let head = Segment::create(initial_size)?;
        Some(Self {
            head: AtomicPtr::new(head.as_ptr()),
        })
    }

    /// Bump-allocates `bytes` (already including header overhead), walking
    /// the chain and growing it when every segment is busy or full.
    ///
    /// `init` runs under the owning segment's spinlock and must establish
    /// the allocation header at the returned address. The rest of the
    /// region is exclusively owned by the caller until a handle for it is
    /// published.
    pub fn allocate(
        &self,
        bytes: usize,
        init: &mut dyn FnMut(NonNull<u8>),
    ) -> Option<NonNull<u8>> {
        debug_assert!(bytes % ALLOC_ALIGN == 0, "unaligned arena request");

        let mut segment = self.head.load(Ordering::Acquire);
        while !segment.is_null() {
            // SAFETY: segments are only unmapped at arena teardown.
            let seg = unsafe { &*segment };
            if let Some(addr) = seg.try_allocate(bytes, init) {
                return Some(addr);
            }
            segment = seg.next();
        }

        // Chain exhausted: map a new segment and append it.
        let fresh = Segment::create(bytes)?;
        // SAFETY: freshly created, not yet shared.
        let addr = unsafe { fresh.as_ref() }.try_allocate(bytes, init)?;
        self.append(fresh);
        Some(addr)
    }

    /// CAS-appends `segment` at the tail of the chain.
    fn append(&self, segment: NonNull<Segment>) {
        let mut link = &self.head;
        loop {
            match link.compare_exchange(
                ptr::null_mut(),
                segment.as_ptr(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(existing) => {
                    // SAFETY: chain nodes stay mapped for the arena's life.
                    link = unsafe { &(*existing).next };
                }
            }
        }
    }

    /// Iterates the chain in order. Segments appended concurrently may or
    /// may not be observed.
    pub fn iter_segments(&self) -> SegmentIter {
        SegmentIter {
            next: self.head.load(Ordering::Acquire),
        }
    }

    /// Walks all allocations of one segment, assuming the caller excluded
    /// concurrent allocation (compacting flag or teardown).
    ///
    /// # Safety
    ///
    /// The segment's contents must be a valid packed header sequence and no
    /// concurrent allocation may move the cursor.
    pub unsafe fn walk_headers(segment: &Segment, mut f: impl FnMut(&AllocHeader)) {
        let end = segment.cursor();
        let mut current = segment.data_start().cast::<AllocHeader>();
        while (current.cast::<u8>()) < end {
            // SAFETY: packed sequence invariant, guaranteed by the caller.
            let header = unsafe { &*current };
            f(header);
            current = header.next_header();
        }
    }

    /// Unmaps every segment in the chain.
    ///
    /// # Safety
    ///
    /// No thread may allocate from or read through this arena afterwards.
    pub unsafe fn unmap_all(&self) {
        let mut segment = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        while !segment.is_null() {
            // SAFETY: teardown is exclusive per the caller's contract.
            unsafe {
                let next = (*segment).next();
                let size = (*segment).size();
                seg_alloc::unmap_segment(NonNull::new_unchecked(segment.cast::<u8>()), size);
                segment = next;
            }
        }
    }
}

// SAFETY: the arena only hands out raw addresses; synchronization is per
// segment.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

/// Iterator over the segments of an arena chain.
pub struct SegmentIter {
    next: *mut Segment,
}

impl Iterator for SegmentIter {
    type Item = NonNull<Segment>;

    fn next(&mut self) -> Option<NonNull<Segment>> {
        let current = NonNull::new(self.next)?;
        // SAFETY: segments stay mapped for the arena's life.
        self.next = unsafe { current.as_ref() }.next();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_disjoint_and_aligned() {
        let arena = Arena::with_initial_size(MIN_SEGMENT_SIZE).unwrap();
        let a = arena.allocate(64, &mut |_| {}).unwrap();
        let b = arena.allocate(64, &mut |_| {}).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_ptr() as usize % ALLOC_ALIGN, 0);
        assert_eq!(b.as_ptr() as usize % ALLOC_ALIGN, 0);
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 64);
        unsafe { arena.unmap_all() };
    }

    #[test]
    fn grows_past_first_segment() {
        let arena = Arena::with_initial_size(MIN_SEGMENT_SIZE).unwrap();
        // Request more than one segment can hold in total.
        let chunk = 512 * 1024;
        for _ in 0..8 {
            assert!(arena.allocate(chunk, &mut |_| {}).is_some());
        }
        assert!(arena.iter_segments().count() >= 2);
        unsafe { arena.unmap_all() };
    }

    #[test]
    fn oversize_request_gets_dedicated_segment() {
        let arena = Arena::with_initial_size(MIN_SEGMENT_SIZE).unwrap();
        let big = 8 * 1024 * 1024;
        assert!(arena.allocate(big, &mut |_| {}).is_some());
        let max = arena
            .iter_segments()
            .map(|s| unsafe { s.as_ref() }.size())
            .max()
            .unwrap();
        assert!(max >= big);
        unsafe { arena.unmap_all() };
    }

    #[test]
    fn compacting_segment_is_skipped() {
        let arena = Arena::with_initial_size(MIN_SEGMENT_SIZE).unwrap();
        let first = arena.iter_segments().next().unwrap();
        unsafe { first.as_ref() }.set_compacting(true);

        let addr = arena.allocate(64, &mut |_| {}).unwrap();
        let inside_first = unsafe {
            let seg = first.as_ref();
            addr.as_ptr() >= seg.data_start() && addr.as_ptr() < seg.data_end()
        };
        assert!(!inside_first);
        unsafe { arena.unmap_all() };
    }

    #[test]
    fn concurrent_allocation_yields_unique_addresses() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let arena = Arc::new(Arena::with_initial_size(MIN_SEGMENT_SIZE).unwrap());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let arena = Arc::clone(&arena);
            handles.push(std::thread::spawn(move || {
                (0..1000)
                    .map(|_| arena.allocate(32, &mut |_| {}).unwrap().as_ptr() as usize)
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for addr in handle.join().unwrap() {
                assert!(seen.insert(addr), "duplicate address {addr:#x}");
            }
        }
        unsafe { Arc::try_unwrap(arena).ok().unwrap().unmap_all() };
    }
}
