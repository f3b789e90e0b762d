//! Per-allocation overhead.
//!
//! Every managed allocation is prefixed by an [`AllocHeader`] carrying the
//! buffer shape, the collection state, and the relocation/destruction
//! callbacks for non-trivial memory. The payload follows the header
//! directly; segment walks step from header to header by the rounded total
//! size.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::handle::RawHandle;

/// Alignment of headers and payloads inside a segment.
pub const ALLOC_ALIGN: usize = 8;

/// Relocates a non-trivial payload from `src` to `dst`.
///
/// The destination is uninitialized memory of the same shape as the source.
pub type CopyFn = unsafe fn(dst: *mut u8, src: *const u8);

/// Finalizes a non-trivial payload in place before its bytes are reclaimed.
pub type DestroyFn = unsafe fn(ptr: *mut u8);

/// Collection state of one allocation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum GarbageState {
    /// Reachable or not yet examined.
    Live = 0,
    /// Determined unreachable by the last scan; awaiting sweep.
    Marked = 1,
    /// Destroy callback currently running.
    Dying = 2,
    /// Finalized; bytes reclaimable by the next compact.
    Swept = 3,
}

impl GarbageState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Live,
            1 => Self::Marked,
            2 => Self::Dying,
            _ => Self::Swept,
        }
    }
}

const KIND_TRIVIAL: u8 = 1 << 0;
const KIND_OBJECT: u8 = 1 << 1;

/// Header prefixed to every managed allocation.
///
/// Constructed in place by the collector at the address handed out by the
/// segment arena, before the allocation's handle is published.
#[repr(C)]
pub struct AllocHeader {
    element_size: u32,
    count: u32,
    state: AtomicU8,
    kind: u8,
    /// Table slot backing this allocation, patched in right after the
    /// handle is registered. Lets sweep and compact reach the record
    /// without a reverse table scan.
    table_index: AtomicU32,
    table_uid: AtomicU64,
    copy_fn: Option<CopyFn>,
    destroy_fn: Option<DestroyFn>,
}

impl AllocHeader {
    /// Bytes occupied by a header plus `payload` bytes, rounded so the next
    /// header stays aligned.
    #[must_use]
    pub const fn total_for(payload: usize) -> usize {
        (size_of::<Self>() + payload).next_multiple_of(ALLOC_ALIGN)
    }

    /// Writes a fresh `Live` header at `at`.
    ///
    /// # Safety
    ///
    /// `at` must point to at least [`AllocHeader::total_for`] bytes of
    /// exclusively owned, writable memory.
    pub unsafe fn init(
        at: *mut Self,
        element_size: u32,
        count: u32,
        trivial: bool,
        copy_fn: Option<CopyFn>,
        destroy_fn: Option<DestroyFn>,
    ) {
        let kind = if trivial { KIND_TRIVIAL } else { 0 };
        // SAFETY: caller guarantees exclusive ownership of the region.
        unsafe {
            at.write(Self {
                element_size,
                count,
                state: AtomicU8::new(GarbageState::Live as u8),
                kind,
                table_index: AtomicU32::new(u32::MAX),
                table_uid: AtomicU64::new(0),
                copy_fn,
                destroy_fn,
            });
        }
    }

    /// Size of one element in bytes.
    #[must_use]
    pub const fn element_size(&self) -> u32 {
        self.element_size
    }

    /// Number of elements in the payload.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Payload bytes (`element_size × count`).
    #[must_use]
    pub const fn buffer_bytes(&self) -> usize {
        self.element_size as usize * self.count as usize
    }

    /// Total footprint of this allocation inside its segment.
    #[must_use]
    pub const fn total_bytes(&self) -> usize {
        Self::total_for(self.buffer_bytes())
    }

    /// Whether the payload may be relocated with `memcpy` and reclaimed
    /// without finalization.
    #[must_use]
    pub const fn is_trivial(&self) -> bool {
        self.kind & KIND_TRIVIAL != 0
    }

    /// Whether the payload is a generic object the tracing scanner may
    /// descend into.
    #[must_use]
    pub const fn is_object(&self) -> bool {
        self.kind & KIND_OBJECT != 0
    }

    /// Flags the payload as a traceable generic object.
    pub fn mark_object(&mut self) {
        self.kind |= KIND_OBJECT;
    }

    /// Current collection state.
    #[must_use]
    pub fn state(&self) -> GarbageState {
        GarbageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transitions the collection state.
    pub fn set_state(&self, state: GarbageState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Claims a live allocation for finalization (`Live` → `Dying`).
    ///
    /// Exactly one of the racing parties — the compactor relocating the
    /// block, or a mutator reallocating it — wins the claim; only the
    /// winner may run the destroy callback, so it fires at most once.
    pub fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(
                GarbageState::Live as u8,
                GarbageState::Dying as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Relocation callback for non-trivial payloads.
    #[must_use]
    pub const fn copy_fn(&self) -> Option<CopyFn> {
        self.copy_fn
    }

    /// Finalization callback for non-trivial payloads.
    #[must_use]
    pub const fn destroy_fn(&self) -> Option<DestroyFn> {
        self.destroy_fn
    }

    /// Records the table slot this allocation was registered under.
    pub fn set_table_slot(&self, handle: RawHandle) {
        self.table_index.store(handle.index(), Ordering::Release);
        self.table_uid.store(handle.uid(), Ordering::Release);
    }

    /// The handle this allocation was registered under.
    #[must_use]
    pub fn table_slot(&self) -> RawHandle {
        RawHandle::from_parts(
            self.table_index.load(Ordering::Acquire),
            self.table_uid.load(Ordering::Acquire),
        )
    }

    /// Start of the payload.
    #[must_use]
    pub fn payload_ptr(&self) -> *mut u8 {
        // Payload follows the header directly.
        unsafe { (self as *const Self).add(1).cast::<u8>().cast_mut() }
    }

    /// Header following this allocation within the same segment walk.
    #[must_use]
    pub fn next_header(&self) -> *mut Self {
        unsafe {
            (self as *const Self)
                .cast::<u8>()
                .add(self.total_bytes())
                .cast::<Self>()
                .cast_mut()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_aligned() {
        assert_eq!(AllocHeader::total_for(0) % ALLOC_ALIGN, 0);
        assert_eq!(AllocHeader::total_for(1) % ALLOC_ALIGN, 0);
        assert_eq!(AllocHeader::total_for(13) % ALLOC_ALIGN, 0);
        assert!(AllocHeader::total_for(13) >= size_of::<AllocHeader>() + 13);
    }

    #[test]
    fn payload_follows_header() {
        let mut storage = vec![0u64; AllocHeader::total_for(16).div_ceil(8)];
        let header = storage.as_mut_ptr().cast::<AllocHeader>();
        unsafe {
            AllocHeader::init(header, 4, 4, true, None, None);
            let head = &*header;
            assert_eq!(head.buffer_bytes(), 16);
            assert_eq!(
                head.payload_ptr() as usize - header as usize,
                size_of::<AllocHeader>()
            );
            assert_eq!(head.state(), GarbageState::Live);
            assert!(head.is_trivial());
            assert!(!head.is_object());
        }
    }

    #[test]
    fn state_transitions() {
        let mut storage = vec![0u64; AllocHeader::total_for(0).div_ceil(8)];
        let header = storage.as_mut_ptr().cast::<AllocHeader>();
        unsafe {
            AllocHeader::init(header, 1, 0, false, None, None);
            let head = &*header;
            head.set_state(GarbageState::Marked);
            assert_eq!(head.state(), GarbageState::Marked);
            head.set_state(GarbageState::Swept);
            assert_eq!(head.state(), GarbageState::Swept);
        }
    }
}
