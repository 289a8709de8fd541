//! Top-level allocator: ties every tier together and implements
//! `GlobalAlloc` over the Public API Shim defined below.
//!
//! Static state lives here and in the modules it composes — `SpanAlloc`
//! itself is zero-sized. TLS binding strategy (fastest to slowest):
//! - `nightly` feature: `#[thread_local]` with const-init (single TLS read, no branches)
//! - `std` feature: `std::thread_local!` with const-init (no lazy-init overhead
//!   on the fast path, donation on thread exit via `Drop`)
//! - neither: one process-wide heap behind a spinlock (slowest, but still correct)

use crate::heap::{self, Heap};
use crate::registry::REGISTRY;
use crate::span::OVERSIZE_CLASS;
use crate::{hist_record, oversize, stat_add, stat_inc};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use core::sync::atomic::Ordering;

cfg_if::cfg_if! {
    if #[cfg(feature = "nightly")] {
        #[derive(Clone, Copy, PartialEq)]
        #[repr(u8)]
        enum TlsState {
            Uninitialized = 0,
            Active = 1,
            Destroyed = 2,
        }

        struct TlsSlot {
            state: TlsState,
            heap: *mut Heap,
        }

        #[thread_local]
        static mut TH: TlsSlot = TlsSlot {
            state: TlsState::Uninitialized,
            heap: core::ptr::null_mut(),
        };

        #[cold]
        #[inline(never)]
        unsafe fn th_init() -> *mut Heap {
            let h = REGISTRY.acquire_for_thread();
            unsafe {
                TH.heap = h;
                // Set BEFORE cleanup registration: if register() itself
                // allocates, the reentrant call sees TH as Active already.
                TH.state = TlsState::Active;
            }
            th_cleanup::register();
            h
        }

        #[cold]
        unsafe fn th_destroy() {
            unsafe {
                if TH.state == TlsState::Active {
                    TH.state = TlsState::Destroyed;
                    if !TH.heap.is_null() {
                        REGISTRY.donate(TH.heap);
                        TH.heap = core::ptr::null_mut();
                    }
                }
            }
        }

        #[inline(always)]
        fn current_heap() -> *mut Heap {
            unsafe {
                match TH.state {
                    TlsState::Active => TH.heap,
                    TlsState::Uninitialized | TlsState::Destroyed => th_init(),
                }
            }
        }

        #[cfg(feature = "std")]
        mod th_cleanup {
            struct Guard;

            impl Drop for Guard {
                fn drop(&mut self) {
                    unsafe { super::th_destroy() };
                }
            }

            std::thread_local! {
                static GUARD: Guard = const { Guard };
            }

            pub(super) fn register() {
                // try_with: if std's own TLS is already torn down (rare,
                // during process shutdown), just leak this thread's heap.
                let _ = GUARD.try_with(|_| {});
            }
        }

        #[cfg(not(feature = "std"))]
        mod th_cleanup {
            pub(super) fn register() {}
        }
    } else if #[cfg(feature = "std")] {
        struct HeapCell(core::cell::Cell<*mut Heap>);

        impl Drop for HeapCell {
            fn drop(&mut self) {
                let h = self.0.get();
                if !h.is_null() {
                    REGISTRY.donate(h);
                }
            }
        }

        std::thread_local! {
            static HEAP_CELL: HeapCell = const { HeapCell(core::cell::Cell::new(core::ptr::null_mut())) };
        }

        fn current_heap() -> *mut Heap {
            HEAP_CELL
                .try_with(|cell| {
                    let mut h = cell.0.get();
                    if h.is_null() {
                        h = REGISTRY.acquire_for_thread();
                        cell.0.set(h);
                    }
                    h
                })
                .unwrap_or(core::ptr::null_mut())
        }
    } else {
        use crate::sync::SpinMutex;

        struct HeapPtr(*mut Heap);
        unsafe impl Send for HeapPtr {}

        static FALLBACK_HEAP: SpinMutex<HeapPtr> = SpinMutex::new(HeapPtr(core::ptr::null_mut()));

        fn current_heap() -> *mut Heap {
            let mut slot = FALLBACK_HEAP.lock();
            if slot.0.is_null() {
                slot.0 = REGISTRY.acquire_for_thread();
            }
            slot.0
        }
    }
}

/// Explicitly bind the calling thread to a heap, ahead of its first
/// allocation. Optional: every allocation path lazily acquires one anyway.
/// Idempotent.
pub fn thread_initialize() {
    let _ = current_heap();
}

/// Return the calling thread's heap for adoption by another thread, without
/// waiting for the thread to actually exit. Idempotent: calling it again (or
/// letting the thread exit normally afterwards) is a no-op once the heap has
/// already been donated. The next allocation on this thread transparently
/// acquires a (possibly different) heap again.
pub fn thread_finalize() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "nightly")] {
            unsafe { th_destroy() };
        } else if #[cfg(feature = "std")] {
            let _ = HEAP_CELL.try_with(|cell| {
                let h = cell.0.get();
                if !h.is_null() {
                    REGISTRY.donate(h);
                    cell.0.set(core::ptr::null_mut());
                }
            });
        }
        // Fallback tier: the single process-wide heap is never finalized
        // early; it lives for the process's lifetime regardless.
    }
}

/// Process-wide setup. All allocator state is `static` with const
/// initializers, so there is nothing that must run before the first
/// allocation; this exists so callers that expect an explicit lifecycle hook
/// have one, and as a place future global setup would go.
pub fn initialize() {}

/// Process-wide teardown. Spans and heaps are deliberately never returned to
/// the OS except through the global span cache's own high-water release (see
/// [`crate::global_cache`]), so there is nothing to tear down here either.
pub fn finalize() {}

/// Allocate `size` bytes aligned to `align`. Returns null on failure.
///
/// Any request with `align > 16` is routed through the oversize path: a
/// regular span only ever guarantees 16-byte block alignment, while
/// [`oversize::allocate`] carves out whatever alignment was actually asked
/// for, up to and including a full `SPAN_SIZE` granule.
///
/// A zero-byte request is rounded up to one byte rather than answered with a
/// dangling placeholder pointer: the result is a real block in the smallest
/// size class, so it is safe to pass back to [`deallocate`]/[`reallocate`]
/// exactly like any other allocation instead of requiring a special case
/// downstream.
pub fn allocate(size: usize, align: usize) -> *mut u8 {
    let size = size.max(1);

    stat_inc!(alloc_count);
    stat_add!(alloc_bytes, size as u64);
    hist_record!(size);

    let heap_ptr = current_heap();
    if heap_ptr.is_null() {
        return ptr::null_mut();
    }

    match heap::class_for(size, align) {
        Some(class) => unsafe { (*heap_ptr).allocate_small(class) },
        None => oversize::allocate(size, align, unsafe { (*heap_ptr).id }),
    }
}

/// Free a block previously returned by [`allocate`] (or grown in place by
/// [`reallocate`]). A null pointer is a no-op.
pub fn deallocate(ptr_in: *mut u8) {
    if ptr_in.is_null() {
        return;
    }
    stat_inc!(dealloc_count);

    let span = oversize::locate_header(ptr_in);
    let size_class = unsafe { (*span).size_class };
    if size_class == OVERSIZE_CLASS {
        oversize::deallocate(span);
        return;
    }

    let owner_id = unsafe { (*span).heap_id.load(Ordering::Acquire) };
    let heap_ptr = current_heap();
    let is_owner = !heap_ptr.is_null() && unsafe { (*heap_ptr).id } == owner_id;

    if is_owner {
        unsafe { (*heap_ptr).free_local(span, ptr_in) };
    } else if let Some(owner_heap) = REGISTRY.lookup(owner_id) {
        unsafe { (*owner_heap).defer_free(ptr_in) };
    } else {
        debug_assert!(
            false,
            "a span's owning heap must already be registered by the time its id is readable"
        );
    }
}

/// Usable size of the block at `ptr`, i.e. how many bytes may be written
/// through it without corrupting allocator metadata. Always `>=` the size
/// originally requested, since allocations are rounded up to a size class
/// (or, for oversize blocks, a whole page count).
pub fn usable_size(ptr_in: *mut u8) -> usize {
    if ptr_in.is_null() {
        return 0;
    }
    let span = oversize::locate_header(ptr_in);
    let size_class = unsafe { (*span).size_class };
    if size_class == OVERSIZE_CLASS {
        oversize::usable_size(span)
    } else {
        heap::class_block_size(size_class as usize)
    }
}

/// Resize the block at `ptr` (allocated with `old_align`) to `new_size`.
///
/// If `new_size` still fits the block's current size class (or, for an
/// oversize block, its mapped capacity), the same pointer is returned
/// unchanged — no copy, no new allocation. Otherwise a new block is
/// allocated, the old contents are copied over, and the old block is freed
/// through the ordinary [`deallocate`] path. That path already handles a
/// foreign-heap pointer by deferring to its owner, so growing a block this
/// thread doesn't own needs no special case: it is simply allocate, copy,
/// free, exactly like growing one it does own.
pub fn reallocate(ptr_in: *mut u8, old_align: usize, new_size: usize) -> *mut u8 {
    if ptr_in.is_null() {
        return allocate(new_size, old_align);
    }
    if new_size == 0 {
        deallocate(ptr_in);
        return allocate(0, old_align);
    }

    stat_inc!(realloc_count);

    let old_usable = usable_size(ptr_in);
    if new_size <= old_usable {
        return ptr_in;
    }

    let new_ptr = allocate(new_size, old_align);
    if !new_ptr.is_null() {
        unsafe { ptr::copy_nonoverlapping(ptr_in, new_ptr, old_usable.min(new_size)) };
        deallocate(ptr_in);
    }
    new_ptr
}

/// Span-cache allocator for Rust.
///
/// Register as the global allocator with:
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: spanalloc::SpanAlloc = spanalloc::SpanAlloc;
/// ```
pub struct SpanAlloc;

unsafe impl GlobalAlloc for SpanAlloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        allocate(layout.size(), layout.align())
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        deallocate(ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = allocate(layout.size(), layout.align());
        if !ptr.is_null() && layout.size() > 0 {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        reallocate(ptr, layout.align(), new_size)
    }
}

#[cfg(feature = "nightly")]
unsafe impl core::alloc::Allocator for SpanAlloc {
    fn allocate(
        &self,
        layout: Layout,
    ) -> Result<core::ptr::NonNull<[u8]>, core::alloc::AllocError> {
        let ptr = self::allocate(layout.size(), layout.align());
        if ptr.is_null() {
            Err(core::alloc::AllocError)
        } else {
            let slice = core::ptr::slice_from_raw_parts_mut(ptr, layout.size());
            Ok(unsafe { core::ptr::NonNull::new_unchecked(slice) })
        }
    }

    unsafe fn deallocate(&self, ptr: core::ptr::NonNull<u8>, _layout: Layout) {
        self::deallocate(ptr.as_ptr())
    }
}
