//! Thread Heap (TH): one per thread, owning a set of partial spans per size
//! class plus a small per-thread cache of empty spans.
//!
//! Everything here runs on the heap's own thread except [`Heap::defer_free`]
//! (called by a foreign thread) and the registry/orphan plumbing in
//! [`crate::registry`]. Reads and writes of `partial`/`span_cache` are
//! therefore ordinary, non-atomic accesses — the one shared field is each
//! span's `heap_id`, published with `Release` the moment a span starts
//! serving this heap.

use crate::config::{MAX_SPAN_PAGES, PAGE_SIZE, SPAN_SIZE};
use crate::deferred::DeferredQueue;
use crate::global_cache::GLOBAL_SPAN_CACHE;
use crate::size_class::{self, NUM_SIZE_CLASSES, SIZE_CLASSES};
use crate::span::{SpanHeader, SpanLink, NONE_U16};
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
#[cfg(feature = "debug")]
use std::println;

#[repr(C)]
pub struct Heap {
    pub id: u64,
    /// Head of the partial-span list for each size class, doubly linked so
    /// a span anywhere in the list can be unlinked in O(1) once it fills.
    partial: [*mut SpanHeader; NUM_SIZE_CLASSES],
    /// Head of the empty-span cache for each page count, singly linked
    /// (push/pop only ever touch the head, so no prev pointer is needed —
    /// the same `list_prev`/`list_next` fields just go unused here).
    span_cache: [*mut SpanHeader; MAX_SPAN_PAGES],
    span_cache_len: [u32; MAX_SPAN_PAGES],
    pub deferred: DeferredQueue,
    /// A single just-retired span held back from the span cache / global
    /// cache, so the next refill of the *same* page count can reclaim it
    /// without a round trip through either. See [`Heap::retire_empty`].
    #[cfg(feature = "pending-span")]
    pending: *mut SpanHeader,
    #[cfg(feature = "pending-span")]
    pending_pages: u32,
    /// Hash-bucket chain link in the heap registry. Written once, before
    /// this heap is published into its bucket; read-only afterwards.
    pub registry_next: *mut Heap,
    /// Orphan-stack link, owned exclusively by whichever thread currently
    /// holds this heap off the orphan stack (or is about to push it back).
    pub orphan_next: *mut Heap,
}

unsafe impl crate::sync::StackNode for Heap {
    unsafe fn next_slot(node: *mut Self) -> *mut *mut Self {
        unsafe { ptr::addr_of_mut!((*node).orphan_next) }
    }
}

impl Heap {
    fn init(id: u64) -> Heap {
        Heap {
            id,
            partial: [ptr::null_mut(); NUM_SIZE_CLASSES],
            span_cache: [ptr::null_mut(); MAX_SPAN_PAGES],
            span_cache_len: [0; MAX_SPAN_PAGES],
            deferred: DeferredQueue::new(),
            #[cfg(feature = "pending-span")]
            pending: ptr::null_mut(),
            #[cfg(feature = "pending-span")]
            pending_pages: 0,
            registry_next: ptr::null_mut(),
            orphan_next: ptr::null_mut(),
        }
    }

    /// Service an allocation of `size` bytes for this heap, or `None` if it
    /// should be routed to the oversize path (too big for any size class,
    /// or over-aligned beyond what a regular span can offer).
    pub fn allocate_small(&mut self, class: usize) -> *mut u8 {
        if !self.deferred.is_empty() {
            self.drain_deferred();
        }
        if !self.partial[class].is_null() {
            crate::stat_inc!(heap_partial_hits);
        } else {
            self.refill(class);
        }
        let span = self.partial[class];
        if span.is_null() {
            return ptr::null_mut();
        }

        let entry = SIZE_CLASSES[class];
        let block_idx = unsafe {
            let virgin = (*span).virgin_head;
            if virgin != NONE_U16 {
                let next_virgin = virgin + 1;
                (*span).virgin_head = if (next_virgin as u32) < entry.block_count {
                    next_virgin
                } else {
                    NONE_U16
                };
                virgin
            } else {
                let head = (*span).free_head;
                debug_assert_ne!(head, NONE_U16, "partial span must have a free block");
                (*span).free_head = *(SpanHeader::block_ptr(span, head, entry.block_size) as *mut u16);
                head
            }
        };

        unsafe {
            (*span).free_count -= 1;
            if (*span).free_count == 0 {
                self.unlink_partial(span, class);
            }
        }

        unsafe { SpanHeader::block_ptr(span, block_idx, entry.block_size) }
    }

    /// Free a block known to belong to this heap.
    pub fn free_local(&mut self, span: *mut SpanHeader, ptr_in: *mut u8) {
        unsafe {
            let class = (*span).size_class as usize;
            let block_size = SIZE_CLASSES[class].block_size;
            let idx = SpanHeader::block_index(span, ptr_in, block_size);
            *(ptr_in as *mut u16) = (*span).free_head;
            (*span).free_head = idx;
            (*span).free_count += 1;

            let free_count = (*span).free_count;
            let block_count = (*span).block_count;
            if free_count == block_count {
                self.unlink_partial(span, class);
                self.retire_empty(span);
            } else if free_count == 1 {
                self.link_partial(span, class);
            }
        }
    }

    /// Queue a block for this heap owned by another thread.
    #[inline]
    pub fn defer_free(&self, ptr_in: *mut u8) {
        crate::stat_inc!(ddq_pushes);
        self.deferred.push(ptr_in);
    }

    /// Hand every span parked in this heap's per-page-count cache over to
    /// the global span cache. Called when a heap is about to be orphaned,
    /// so a donated heap's cached spans stay reachable by other threads
    /// instead of sitting idle until the heap is adopted again.
    pub(crate) fn drain_span_cache_to_global(&mut self) {
        #[cfg(feature = "pending-span")]
        if !self.pending.is_null() {
            GLOBAL_SPAN_CACHE.push(self.pending, self.pending_pages);
            self.pending = ptr::null_mut();
        }
        for idx in 0..MAX_SPAN_PAGES {
            let mut span = self.span_cache[idx];
            if span.is_null() {
                continue;
            }
            let page_count = idx as u32 + 1;
            while !span.is_null() {
                let next = unsafe { (*span).list_next.resolve(span) };
                GLOBAL_SPAN_CACHE.push(span, page_count);
                span = next;
            }
            self.span_cache[idx] = ptr::null_mut();
            self.span_cache_len[idx] = 0;
        }
    }

    fn drain_deferred(&mut self) {
        // `free_local` wants `&mut self`, and the closure below can't hold
        // a second one alongside `self.deferred`'s own borrow, so it goes
        // through a raw pointer instead — sound here because `drain` runs
        // the closure synchronously and nothing else touches `self` in the
        // meantime.
        let heap_ptr: *mut Heap = self;
        self.deferred.drain(|p| unsafe {
            crate::stat_inc!(ddq_drained);
            let span = crate::span::span_base(p);
            (*heap_ptr).free_local(span, p);
        });
    }

    fn link_partial(&mut self, span: *mut SpanHeader, class: usize) {
        unsafe {
            let old_head = self.partial[class];
            (*span).list_prev = SpanLink::NONE;
            (*span).list_next = SpanLink::of(span, old_head);
            if !old_head.is_null() {
                (*old_head).list_prev = SpanLink::of(old_head, span);
            }
            self.partial[class] = span;
        }
    }

    fn unlink_partial(&mut self, span: *mut SpanHeader, class: usize) {
        unsafe {
            let prev = (*span).list_prev.resolve(span);
            let next = (*span).list_next.resolve(span);
            if !prev.is_null() {
                (*prev).list_next = SpanLink::of(prev, next);
            } else {
                self.partial[class] = next;
            }
            if !next.is_null() {
                (*next).list_prev = SpanLink::of(next, prev);
            }
            (*span).list_prev = SpanLink::NONE;
            (*span).list_next = SpanLink::NONE;
        }
    }

    /// A span just became fully free: park it in this heap's own cache, or
    /// pass it on to the global cache if this heap already has enough.
    fn retire_empty(&mut self, span: *mut SpanHeader) {
        let page_count = unsafe { (*span).page_count };

        #[cfg(feature = "pending-span")]
        if self.pending.is_null() {
            self.pending = span;
            self.pending_pages = page_count;
            return;
        }

        let idx = page_count as usize - 1;

        if self.span_cache_len[idx] as usize >= crate::config::SPAN_CACHE_TRANSFER_BATCH * 2 {
            #[cfg(feature = "debug")]
            println!("[heap] span_cache[{idx}] full, handing span back to global cache");
            GLOBAL_SPAN_CACHE.push(span, page_count);
            return;
        }

        unsafe {
            (*span).list_next = SpanLink::of(span, self.span_cache[idx]);
        }
        self.span_cache[idx] = span;
        self.span_cache_len[idx] += 1;
    }

    /// Find (or create) a partial span for `class` and link it in.
    fn refill(&mut self, class: usize) {
        crate::stat_inc!(heap_refills);
        let entry = SIZE_CLASSES[class];
        let page_count = entry.page_count;
        let idx = page_count as usize - 1;

        #[cfg(feature = "pending-span")]
        if !self.pending.is_null() && self.pending_pages == page_count {
            let span = self.pending;
            self.pending = ptr::null_mut();
            self.install_span(span, class, &entry, page_count);
            return;
        }

        let span = if !self.span_cache[idx].is_null() {
            crate::stat_inc!(heap_span_cache_hits);
            let span = self.span_cache[idx];
            unsafe {
                self.span_cache[idx] = (*span).list_next.resolve(span);
            }
            self.span_cache_len[idx] -= 1;
            span
        } else if let Some(span) = GLOBAL_SPAN_CACHE.pop(page_count) {
            span
        } else {
            match Self::map_span(page_count) {
                Some(span) => span,
                None => return,
            }
        };

        self.install_span(span, class, &entry, page_count);
    }

    /// Initialize a fresh-to-this-class span's header and link it into the
    /// partial list for `class`.
    fn install_span(
        &mut self,
        span: *mut SpanHeader,
        class: usize,
        entry: &crate::size_class::SizeClassEntry,
        page_count: u32,
    ) {
        unsafe {
            (*span).size_class = class as u32;
            (*span).page_count = page_count;
            (*span).block_count = entry.block_count;
            (*span).free_count = entry.block_count;
            (*span).virgin_head = 0;
            (*span).free_head = NONE_U16;
            (*span).cache_len = 0;
            (*span).heap_id.store(self.id, Ordering::Release);
        }

        self.link_partial(span, class);
    }

    /// Map a fresh span backing `page_count` pages, decommitting the unused
    /// tail of the granule so the OS only keeps what this class needs
    /// resident.
    fn map_span(page_count: u32) -> Option<*mut SpanHeader> {
        let base = unsafe { crate::platform::span_alloc(SPAN_SIZE) };
        if base.is_null() {
            #[cfg(feature = "debug")]
            println!("[heap] map_span failed for page_count={page_count}");
            return None;
        }
        let used = page_count as usize * PAGE_SIZE;
        if used < SPAN_SIZE {
            #[cfg(feature = "debug")]
            println!("[heap] decommitting tail of fresh span ({} bytes)", SPAN_SIZE - used);
            unsafe { crate::platform::span_decommit(base.add(used), SPAN_SIZE - used) };
        }
        Some(base as *mut SpanHeader)
    }
}

/// Recover the size class for an allocation request, or `None` to signal
/// the oversize path.
#[inline]
pub fn class_for(size: usize, align: usize) -> Option<usize> {
    if align > 16 {
        return None;
    }
    size_class::class_for_size(size)
}

/// Largest usable size a `(class)` serves.
#[inline]
pub fn class_block_size(class: usize) -> usize {
    SIZE_CLASSES[class].block_size
}

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn allocate_heap_id() -> u64 {
    NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn new_heap(id: u64) -> Heap {
    Heap::init(id)
}

/// Used by the registry's hash bucket chain.
pub type HeapBucketSlot = AtomicPtr<Heap>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size_class::class_for_size;

    #[test]
    fn allocate_and_free_round_trip() {
        let mut heap = new_heap(allocate_heap_id());
        let class = class_for_size(64).unwrap();
        let a = heap.allocate_small(class);
        assert!(!a.is_null());
        let b = heap.allocate_small(class);
        assert!(!b.is_null());
        assert_ne!(a, b);

        unsafe {
            *a = 0xAB;
            *b = 0xCD;
        }

        let span = crate::span::span_base(a);
        heap.free_local(span, a);
        heap.free_local(span, b);

        let c = heap.allocate_small(class);
        assert!(!c.is_null());
    }

    #[test]
    fn many_allocations_exhaust_and_refill_spans() {
        let mut heap = new_heap(allocate_heap_id());
        let class = class_for_size(32).unwrap();
        let entry = SIZE_CLASSES[class];
        let mut ptrs = alloc::vec::Vec::new();
        for _ in 0..(entry.block_count as usize * 2 + 1) {
            let p = heap.allocate_small(class);
            assert!(!p.is_null());
            ptrs.push(p);
        }
        for p in ptrs {
            let span = crate::span::span_base(p);
            heap.free_local(span, p);
        }
    }

    #[test]
    fn cross_thread_defer_free_is_reclaimed_on_drain() {
        let mut heap = new_heap(allocate_heap_id());
        let class = class_for_size(48).unwrap();
        let a = heap.allocate_small(class);
        assert!(!a.is_null());

        // Simulate a foreign thread deferring the free instead of calling
        // free_local directly.
        heap.defer_free(a);
        assert!(!heap.deferred.is_empty());

        heap.drain_deferred();
        assert!(heap.deferred.is_empty());
    }

    #[cfg(feature = "pending-span")]
    #[test]
    fn retired_span_is_reused_via_pending_slot_before_span_cache() {
        let mut heap = new_heap(allocate_heap_id());
        let class = class_for_size(64).unwrap();
        let entry = SIZE_CLASSES[class];

        // Fill and fully drain one span so it retires into the pending slot
        // rather than `span_cache`.
        let mut ptrs = alloc::vec::Vec::new();
        for _ in 0..entry.block_count {
            ptrs.push(heap.allocate_small(class));
        }
        let span = crate::span::span_base(ptrs[0]);
        for p in ptrs {
            heap.free_local(span, p);
        }
        assert!(!heap.pending.is_null());
        assert_eq!(heap.span_cache_len[entry.page_count as usize - 1], 0);

        // The next refill for the same page count must reclaim exactly this
        // span out of the pending slot, not go through span_cache/GSC.
        let reused = heap.allocate_small(class);
        assert!(!reused.is_null());
        assert!(heap.pending.is_null());
        assert_eq!(crate::span::span_base(reused), span);
    }
}
