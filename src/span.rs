//! Span metadata: the header embedded at byte 0 of every span.
//!
//! A span is a contiguous, `SPAN_SIZE`-aligned run of OS pages. Unlike a
//! page-heap design that keeps span metadata in an out-of-band slab, every
//! span here carries its own header in its first bytes, so the header for
//! any live pointer can be recovered by masking off the low `SPAN_SHIFT`
//! bits — no side table, no lookup. That recovery is the one invariant the
//! rest of the allocator leans on.

use crate::config::SPAN_SIZE;
use core::sync::atomic::AtomicU64;

/// Size-class sentinel marking a span as an oversize allocation rather than
/// a regular size-class span. See [`crate::oversize`].
pub const OVERSIZE_CLASS: u32 = u32::MAX;

/// Sentinel for "no block"/"no neighbour" in the `u16`-width freelist links.
pub const NONE_U16: u16 = u16::MAX;

/// An intrusive link to a neighbouring span, stored as a signed count of
/// `SPAN_SIZE` strides from this span's own address rather than a raw
/// pointer. Two spans linked this way are always reachable from one
/// another by pointer arithmetic alone, which keeps the header small and
/// keeps pointer construction encapsulated behind [`SpanLink::resolve`].
///
/// `0` denotes "no neighbour": a span is never linked to itself, so it is
/// a safe null sentinel that needs no extra tag bit.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SpanLink(i32);

impl SpanLink {
    pub const NONE: SpanLink = SpanLink(0);

    /// Build the link from `from` to `to` (pass `core::ptr::null_mut()` for
    /// `to` to produce [`SpanLink::NONE`]).
    pub fn of(from: *mut SpanHeader, to: *mut SpanHeader) -> SpanLink {
        if to.is_null() {
            return SpanLink::NONE;
        }
        let delta = (to as isize - from as isize) / SPAN_SIZE as isize;
        debug_assert_ne!(delta, 0, "a span cannot neighbour itself");
        debug_assert_eq!(
            (to as isize - from as isize) % SPAN_SIZE as isize,
            0,
            "spans must be SPAN_SIZE-separated to link by offset"
        );
        SpanLink(delta as i32)
    }

    /// Resolve this link to a pointer, given the span it is stored in.
    pub fn resolve(self, from: *mut SpanHeader) -> *mut SpanHeader {
        if self == SpanLink::NONE {
            return core::ptr::null_mut();
        }
        unsafe {
            (from as *mut u8).offset(self.0 as isize * SPAN_SIZE as isize) as *mut SpanHeader
        }
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == SpanLink::NONE
    }
}

/// Header sitting at byte 0 of every span.
///
/// `heap_id` is the only field mutated across thread boundaries; it is
/// published with `Release` when a span is handed to a size class and
/// loaded with `Acquire` by a foreign deallocator before it trusts any
/// other field. Every other field is written by the owning heap only
/// while the span is not parked in the global cache, and by the span's
/// allocating thread once (before publication) for the fields read by
/// the oversize fast-path check (`size_class`, `page_count`) — a foreign
/// thread reading those without further synchronization relies on the
/// same happens-before edge the caller already established by handing the
/// pointer to another thread in the first place (the same assumption any
/// `malloc`-family allocator makes).
#[repr(C)]
pub struct SpanHeader {
    pub heap_id: AtomicU64,
    /// Size-class index, or [`OVERSIZE_CLASS`].
    pub size_class: u32,
    /// Pages this span covers (regular spans: the class's page count;
    /// oversize spans: the total mapped page count).
    pub page_count: u32,
    /// Blocks this span holds (unused for oversize spans).
    pub block_count: u32,
    /// Free blocks remaining (unused for oversize spans).
    pub free_count: u32,
    /// Next never-touched block index (the "auto-link terminator" scheme:
    /// blocks below this index have not had their freelist word written
    /// yet, so handing one out costs nothing but incrementing this field).
    /// [`NONE_U16`] once every block has been touched at least once.
    pub virgin_head: u16,
    /// Head of the explicit (thread-written) freelist of blocks that have
    /// been allocated and freed at least once. [`NONE_U16`] if empty.
    pub free_head: u16,
    /// Length of the list this span currently sits in, when that list is
    /// a cache (heap span cache or global span cache); otherwise unused.
    pub cache_len: u32,
    /// Previous/next neighbour in the heap's partial list for this span's
    /// size class, or in the heap's per-page-count span cache.
    pub list_prev: SpanLink,
    pub list_next: SpanLink,
    /// Raw-pointer intrusive link used only while the span sits in the
    /// global span cache (see [`crate::global_cache`]), which threads
    /// spans through a lock-free [`crate::sync::TaggedStack`] — that
    /// structure links through a real pointer field, not an offset, so it
    /// can CAS the whole (pointer, tag) word in one step.
    pub gsc_next: *mut SpanHeader,
    /// Oversize spans only: byte offset from this header to the data
    /// pointer handed back to the caller. `0` for every regular span,
    /// which always uses [`HEADER_SIZE`] directly instead. See
    /// [`crate::oversize`].
    pub data_offset: u32,
    /// Oversize spans only: byte offset from the real `span_alloc` mapping
    /// base back from this header, for a granule-aligned oversize span
    /// whose header sits a full span ahead of where the mapping actually
    /// starts. `0` for every other span. See [`crate::oversize`].
    pub mapping_prefix: u32,
}

/// Recover a span's header from any pointer inside it.
#[inline]
pub fn span_base(ptr: *mut u8) -> *mut SpanHeader {
    ((ptr as usize) & !(SPAN_SIZE - 1)) as *mut SpanHeader
}

/// Byte offset of the first block in a span, rounded up to 16 bytes so
/// every block starts naturally aligned regardless of header size.
pub const HEADER_SIZE: usize = {
    let raw = core::mem::size_of::<SpanHeader>();
    (raw + 15) & !15
};

impl SpanHeader {
    /// Address of block `index` within this span, given its class's block size.
    #[inline]
    pub unsafe fn block_ptr(span: *mut SpanHeader, index: u16, block_size: usize) -> *mut u8 {
        unsafe { (span as *mut u8).add(HEADER_SIZE + index as usize * block_size) }
    }

    /// Recover the block index of `ptr` within `span`, given its class's block size.
    #[inline]
    pub unsafe fn block_index(span: *mut SpanHeader, ptr: *mut u8, block_size: usize) -> u16 {
        let rel = ptr as usize - span as usize - HEADER_SIZE;
        (rel / block_size) as u16
    }
}

unsafe impl crate::sync::StackNode for SpanHeader {
    unsafe fn next_slot(node: *mut Self) -> *mut *mut Self {
        unsafe { core::ptr::addr_of_mut!((*node).gsc_next) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fits_in_one_small_block_granule() {
        // The header must leave room for at least one 16-byte block in the
        // smallest page count, and must itself be 16-byte aligned so block 0
        // is naturally aligned too.
        assert_eq!(HEADER_SIZE % 16, 0);
        assert!(HEADER_SIZE < crate::config::PAGE_SIZE);
    }

    #[test]
    fn span_base_masks_to_alignment() {
        let fake = (4 * SPAN_SIZE + 1234) as *mut u8;
        let base = span_base(fake);
        assert_eq!(base as usize, 4 * SPAN_SIZE);
    }

    #[test]
    fn span_link_round_trips() {
        let a = (10 * SPAN_SIZE) as *mut SpanHeader;
        let b = (13 * SPAN_SIZE) as *mut SpanHeader;
        let link = SpanLink::of(a, b);
        assert!(!link.is_none());
        assert_eq!(link.resolve(a), b);

        let back = SpanLink::of(b, a);
        assert_eq!(back.resolve(b), a);
    }

    #[test]
    fn span_link_none_resolves_null() {
        let a = (SPAN_SIZE) as *mut SpanHeader;
        assert!(SpanLink::NONE.is_none());
        assert!(SpanLink::NONE.resolve(a).is_null());
        assert!(SpanLink::of(a, core::ptr::null_mut()).is_none());
    }

    #[test]
    fn block_ptr_and_index_round_trip() {
        // Use a fake in-bounds base; we only do arithmetic, never deref.
        let span = (7 * SPAN_SIZE) as *mut SpanHeader;
        let block_size = 32usize;
        for idx in [0u16, 1, 5, 100] {
            let p = unsafe { SpanHeader::block_ptr(span, idx, block_size) };
            let back = unsafe { SpanHeader::block_index(span, p, block_size) };
            assert_eq!(back, idx);
        }
    }
}
