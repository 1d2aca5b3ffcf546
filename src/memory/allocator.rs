//! Platform allocator queries

use std::ffi::c_void;

#[cfg(windows)]
extern "C" {
    fn _msize(memblock: *mut c_void) -> usize;
}

/// Usable size of a heap block, 0 when unknown
///
/// # Safety
/// `ptr` must be null or a live block returned by the C allocator.
pub unsafe fn usable_size(ptr: *mut c_void) -> usize {
    if ptr.is_null() {
        return 0;
    }
    platform_usable_size(ptr)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn platform_usable_size(ptr: *mut c_void) -> usize {
    libc::malloc_usable_size(ptr)
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
unsafe fn platform_usable_size(ptr: *mut c_void) -> usize {
    libc::malloc_size(ptr as *const c_void)
}

#[cfg(windows)]
unsafe fn platform_usable_size(ptr: *mut c_void) -> usize {
    _msize(ptr)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    windows
)))]
unsafe fn platform_usable_size(_ptr: *mut c_void) -> usize {
    0
}
