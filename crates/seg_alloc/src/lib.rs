//! Anonymous memory mappings for arena segments.
//!
//! The collector's arenas are built from large contiguous chunks whose
//! lifetime is managed manually: a segment is mapped once, linked into an
//! arena chain, and unmapped only when the collector tears down. This crate
//! provides exactly that surface — page-granular anonymous read/write
//! mappings with no RAII handle in the way of raw-pointer chains.

use std::io;
use std::ptr::NonNull;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Rounds `len` up to the next multiple of the system page size.
#[must_use]
pub fn round_to_page(len: usize) -> usize {
    let page = page_size();
    len.div_ceil(page) * page
}

/// Maps `len` bytes of zero-initialized anonymous read/write memory.
///
/// `len` is rounded up to page granularity; pass the result of
/// [`round_to_page`] to [`unmap_segment`] later, or remember the rounded
/// length yourself.
///
/// # Errors
///
/// Returns the underlying OS error when the mapping cannot be established
/// (typically address-space exhaustion).
pub fn map_segment(len: usize) -> io::Result<NonNull<u8>> {
    if len == 0 {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    os::map(round_to_page(len))
}

/// Releases a mapping previously returned by [`map_segment`].
///
/// # Safety
///
/// `ptr` must be the exact pointer returned by [`map_segment`] and `len`
/// the same length passed to it (before or after page rounding — both
/// resolve to the same region). The region must not be accessed afterwards.
pub unsafe fn unmap_segment(ptr: NonNull<u8>, len: usize) {
    // SAFETY: forwarded contract.
    unsafe { os::unmap(ptr, round_to_page(len)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_round_trip() {
        let len = 2 * 1024 * 1024;
        let ptr = map_segment(len).expect("mapping 2 MiB");
        // Fresh anonymous pages read as zero and are writable.
        unsafe {
            assert_eq!(*ptr.as_ptr(), 0);
            *ptr.as_ptr() = 0xAB;
            assert_eq!(*ptr.as_ptr(), 0xAB);
            unmap_segment(ptr, len);
        }
    }

    #[test]
    fn rounds_to_page() {
        let page = page_size();
        assert_eq!(round_to_page(1), page);
        assert_eq!(round_to_page(page), page);
        assert_eq!(round_to_page(page + 1), 2 * page);
    }

    #[test]
    fn zero_len_rejected() {
        assert!(map_segment(0).is_err());
    }
}
