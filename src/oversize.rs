//! Oversize Path: allocations too big (or requests aligned too strictly)
//! for a regular span go straight to the VMM, bypassing thread heaps, the
//! global span cache, and size classes entirely.
//!
//! An oversize mapping still starts with a [`SpanHeader`], so
//! `deallocate`/`usable_size` can recover it the same way as any other
//! pointer; [`SpanHeader::size_class`] is set to [`OVERSIZE_CLASS`] so the
//! generic free path can tell it apart from a size-classed span without
//! consulting anything else.
//!
//! For a request whose alignment fits within one span's worth of slack
//! (`align < SPAN_SIZE`), the header sits at byte 0 of the mapping exactly
//! like a regular span, and the data pointer is nudged forward within the
//! same granule to [`SpanHeader::data_offset`] so it still lands under
//! [`crate::span::span_base`]'s masking. A caller asking for `align >=
//! SPAN_SIZE` wants a data pointer that is itself a span boundary, so the
//! header can no longer share that granule — [`allocate_granule_aligned`]
//! gives it a whole span of its own immediately before the data, and
//! [`locate_header`] knows to step back a span rather than mask when handed
//! a pointer that is already span-aligned.

use crate::config::{PAGE_SIZE, SPAN_SIZE};
use crate::span::{SpanHeader, SpanLink, HEADER_SIZE, NONE_U16, OVERSIZE_CLASS};
use core::sync::atomic::Ordering;
#[cfg(feature = "debug")]
use std::println;

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn pages_needed(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

fn mapped_bytes(page_count: usize) -> usize {
    // Every mapping stays G-aligned, so it covers a whole number of spans.
    (page_count * PAGE_SIZE).div_ceil(SPAN_SIZE) * SPAN_SIZE
}

/// Allocate `size` bytes aligned to `align` via a direct VMM mapping.
/// `heap_id` is whichever heap happened to field the request — oversize
/// spans still record an owner so a foreign free can be detected and
/// handled like any other cross-heap pointer (trivially here, since there's
/// no thread-owned freelist to touch: freeing just unmaps).
pub fn allocate(size: usize, align: usize, heap_id: u64) -> *mut u8 {
    crate::stat_inc!(oversize_allocs);
    if align >= SPAN_SIZE {
        return allocate_granule_aligned(size, align, heap_id);
    }

    let data_offset = align_up(HEADER_SIZE, align.max(1));
    let page_count = pages_needed(data_offset + size);
    let map_size = mapped_bytes(page_count);
    let base = unsafe { crate::platform::span_alloc(map_size) };
    if base.is_null() {
        return core::ptr::null_mut();
    }

    let span = base as *mut SpanHeader;
    unsafe { init_header(span, (map_size / PAGE_SIZE) as u32, data_offset as u32, 0, heap_id) };
    unsafe { base.add(data_offset) }
}

/// Allocate with `align >= SPAN_SIZE`: over-map by a full span plus `align`
/// bytes of slack, carve the header's span out of the front of that slack,
/// and trim what's left unused on either side back to the OS (decommit
/// only — the original `span_alloc` mapping is kept intact end to end, so
/// [`deallocate`] can still hand the platform layer back exactly the
/// pointer/size pair it gave out, the way [`crate::platform::span_dealloc`]
/// requires).
fn allocate_granule_aligned(size: usize, align: usize, heap_id: u64) -> *mut u8 {
    let slack = SPAN_SIZE + align;
    let page_count = pages_needed(slack + size);
    let map_size = mapped_bytes(page_count);
    let raw_base = unsafe { crate::platform::span_alloc(map_size) } as usize;
    if raw_base == 0 {
        return core::ptr::null_mut();
    }

    let data_ptr = align_up(raw_base + SPAN_SIZE, align);
    let header_base = data_ptr - SPAN_SIZE;
    let mapping_prefix = header_base - raw_base;
    let mapped_end = raw_base + map_size;

    if mapping_prefix > 0 {
        #[cfg(feature = "debug")]
        std::println!("[oversize] decommitting {mapping_prefix}-byte alignment prefix");
        unsafe { crate::platform::span_decommit(raw_base as *mut u8, mapping_prefix) };
    }
    let used_end = align_up(data_ptr + size, PAGE_SIZE);
    if used_end < mapped_end {
        unsafe { crate::platform::span_decommit(used_end as *mut u8, mapped_end - used_end) };
    }

    let span = header_base as *mut SpanHeader;
    unsafe {
        init_header(span, (map_size / PAGE_SIZE) as u32, SPAN_SIZE as u32, mapping_prefix as u32, heap_id);
    }
    data_ptr as *mut u8
}

unsafe fn init_header(span: *mut SpanHeader, page_count: u32, data_offset: u32, mapping_prefix: u32, heap_id: u64) {
    unsafe {
        (*span).size_class = OVERSIZE_CLASS;
        (*span).page_count = page_count;
        (*span).block_count = 1;
        (*span).free_count = 0;
        (*span).virgin_head = NONE_U16;
        (*span).free_head = NONE_U16;
        (*span).cache_len = 0;
        (*span).list_prev = SpanLink::NONE;
        (*span).list_next = SpanLink::NONE;
        (*span).gsc_next = core::ptr::null_mut();
        (*span).data_offset = data_offset;
        (*span).mapping_prefix = mapping_prefix;
        (*span).heap_id.store(heap_id, Ordering::Release);
    }
}

/// Recover the [`SpanHeader`] for a pointer returned by [`allocate`]. A
/// pointer that isn't itself span-aligned sits inside the header's own
/// masked granule, same as any regular span; one that is span-aligned can
/// only have come from [`allocate_granule_aligned`] (no other path in this
/// crate ever hands out a span-aligned pointer), so its header is one
/// whole span behind it instead.
pub fn locate_header(ptr_in: *mut u8) -> *mut SpanHeader {
    if (ptr_in as usize) & (SPAN_SIZE - 1) == 0 {
        unsafe { ptr_in.sub(SPAN_SIZE) as *mut SpanHeader }
    } else {
        crate::span::span_base(ptr_in)
    }
}

/// Unmap an oversize span. `span` must be the value [`locate_header`]
/// returned for a pointer previously handed out by [`allocate`].
pub fn deallocate(span: *mut SpanHeader) {
    crate::stat_inc!(oversize_deallocs);
    let prefix = unsafe { (*span).mapping_prefix as usize };
    let map_size = unsafe { (*span).page_count as usize * PAGE_SIZE };
    let base = unsafe { (span as *mut u8).sub(prefix) };
    unsafe { crate::platform::span_dealloc(base, map_size) };
}

/// Usable size of an oversize block: everything mapped past the header and
/// any alignment padding.
pub fn usable_size(span: *mut SpanHeader) -> usize {
    unsafe {
        (*span).page_count as usize * PAGE_SIZE
            - (*span).mapping_prefix as usize
            - (*span).data_offset as usize
    }
}
