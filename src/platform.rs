//! OS virtual memory abstraction.
//!
//! Provides `span_alloc`/`span_dealloc`, which map and unmap memory aligned
//! to [`crate::config::SPAN_SIZE`] (`G`) — the granularity every span base
//! address must respect so that a span's header can be recovered from any
//! pointer inside it by masking.

#[cfg(windows)]
mod windows;

#[cfg(unix)]
mod unix;

#[cfg(miri)]
mod miri;

/// Map `size` bytes of zero-initialized virtual memory, aligned to `G`.
/// Returns null on failure. `size` should already be a multiple of `G`.
///
/// # Safety
/// Caller must eventually call [`span_dealloc`] with the returned pointer
/// and the same `size`.
#[inline]
pub unsafe fn span_alloc(size: usize) -> *mut u8 {
    crate::stat_inc!(os_map_count);
    #[cfg(miri)]
    {
        unsafe { miri::page_alloc(size) }
    }
    #[cfg(all(windows, not(miri)))]
    {
        unsafe { windows::page_alloc(size) }
    }
    #[cfg(all(unix, not(miri)))]
    {
        unsafe { unix::page_alloc(size) }
    }
}

/// Unmap memory previously returned by [`span_alloc`].
///
/// # Safety
/// `ptr`/`size` must match a prior live [`span_alloc`] call exactly.
#[inline]
pub unsafe fn span_dealloc(ptr: *mut u8, size: usize) {
    crate::stat_inc!(os_unmap_count);
    #[cfg(miri)]
    {
        unsafe { miri::page_dealloc(ptr, size) };
    }
    #[cfg(all(windows, not(miri)))]
    {
        unsafe { windows::page_dealloc(ptr, size) };
    }
    #[cfg(all(unix, not(miri)))]
    {
        unsafe { unix::page_dealloc(ptr, size) };
    }
}

/// Decommit pages (return physical memory to the OS, keep the address range
/// reserved). Used when the global span cache trims itself back to its
/// high-water mark instead of trusting `madvise`/`VirtualFree` timing.
///
/// # Safety
/// `ptr`/`size` must refer to a range within a live [`span_alloc`] mapping.
#[inline]
pub unsafe fn span_decommit(ptr: *mut u8, size: usize) {
    #[cfg(miri)]
    {
        unsafe { miri::page_decommit(ptr, size) };
    }
    #[cfg(all(windows, not(miri)))]
    {
        unsafe { windows::page_decommit(ptr, size) };
    }
    #[cfg(all(unix, not(miri)))]
    {
        unsafe { unix::page_decommit(ptr, size) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SPAN_SIZE;

    #[test]
    fn test_alloc_and_dealloc() {
        unsafe {
            let ptr = span_alloc(SPAN_SIZE);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize & (SPAN_SIZE - 1), 0, "must be G-aligned");
            for i in 0..SPAN_SIZE {
                assert_eq!(*ptr.add(i), 0);
            }
            for i in 0..SPAN_SIZE {
                *ptr.add(i) = (i & 0xFF) as u8;
            }
            for i in 0..SPAN_SIZE {
                assert_eq!(*ptr.add(i), (i & 0xFF) as u8);
            }
            span_dealloc(ptr, SPAN_SIZE);
        }
    }

    #[test]
    fn test_alloc_multiple_spans() {
        unsafe {
            let size = SPAN_SIZE * 8;
            let ptr = span_alloc(size);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize & (SPAN_SIZE - 1), 0);
            *ptr = 0xAA;
            *ptr.add(size - 1) = 0xBB;
            assert_eq!(*ptr, 0xAA);
            assert_eq!(*ptr.add(size - 1), 0xBB);
            span_dealloc(ptr, size);
        }
    }

    #[test]
    fn test_alloc_large() {
        unsafe {
            let size = SPAN_SIZE * 16; // 1 MiB
            let ptr = span_alloc(size);
            assert!(!ptr.is_null());
            span_dealloc(ptr, size);
        }
    }
}
