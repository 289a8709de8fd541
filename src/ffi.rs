//! C-ABI exports, gated behind `features = ["ffi"]`, for embedding this
//! allocator in a non-Rust harness (benchmark driver, another language's
//! runtime) as a drop-in `malloc`/`free`-shaped function table.
//!
//! Unlike the [`crate::allocator`] free functions, every export here takes
//! an explicit `align`/`old_size` where the corresponding C API would: a
//! foreign caller has no `Layout` to carry alongside the pointer, so the
//! allocator's own per-span metadata is the only place that information can
//! come from, and `usable_size`/`deallocate` already recover it that way.

use core::ffi::c_void;

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_initialize() {
    crate::allocator::initialize();
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_finalize() {
    crate::allocator::finalize();
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_thread_initialize() {
    crate::allocator::thread_initialize();
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_thread_finalize() {
    crate::allocator::thread_finalize();
}

/// `align` must be a power of two; `0` is treated as the default (16-byte)
/// alignment every block already satisfies.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_allocate(size: usize, align: usize) -> *mut c_void {
    let align = if align == 0 { 16 } else { align };
    crate::allocator::allocate(size, align) as *mut c_void
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_deallocate(ptr: *mut c_void) {
    crate::allocator::deallocate(ptr as *mut u8);
}

/// `old_align` must match the alignment the original block at `ptr` was
/// allocated with. `ptr` may be null, in which case this behaves like
/// [`spanalloc_allocate`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_reallocate(
    ptr: *mut c_void,
    old_align: usize,
    new_size: usize,
) -> *mut c_void {
    let old_align = if old_align == 0 { 16 } else { old_align };
    crate::allocator::reallocate(ptr as *mut u8, old_align, new_size) as *mut c_void
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_usable_size(ptr: *mut c_void) -> usize {
    crate::allocator::usable_size(ptr as *mut u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffi_round_trip() {
        unsafe {
            spanalloc_thread_initialize();
            let p = spanalloc_allocate(128, 0);
            assert!(!p.is_null());
            assert!(spanalloc_usable_size(p) >= 128);
            let grown = spanalloc_reallocate(p, 0, 4096);
            assert!(!grown.is_null());
            spanalloc_deallocate(grown);
            spanalloc_thread_finalize();
        }
    }

    #[test]
    fn ffi_null_deallocate_is_noop() {
        unsafe { spanalloc_deallocate(core::ptr::null_mut()) };
    }
}
