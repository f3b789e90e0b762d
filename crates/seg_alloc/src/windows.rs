use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

/// Returns the system page size, cached atomically.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
            unsafe { GetSystemInfo(&mut info) };
            let page_size = info.dwPageSize as usize;
            PAGE_SIZE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

pub fn map(len: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: reserve + commit in one call; no address hint.
    let ptr = unsafe {
        VirtualAlloc(
            ptr::null_mut(),
            len,
            MEM_RESERVE | MEM_COMMIT,
            PAGE_READWRITE,
        )
    };

    NonNull::new(ptr.cast::<u8>()).ok_or_else(io::Error::last_os_error)
}

pub unsafe fn unmap(ptr: NonNull<u8>, _len: usize) {
    // SAFETY: caller guarantees ptr came from `map`. MEM_RELEASE requires
    // a zero length and the original base address.
    unsafe {
        VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE);
    }
}
