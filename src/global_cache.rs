//! Global Span Cache (GSC): one lock-free stack of empty spans per page
//! count, shared by every thread heap.
//!
//! A heap that can't serve an allocation from its own partial list or its
//! own per-thread empty-span cache checks here before paying for a fresh
//! `mmap`/`VirtualAlloc`. Spans move in and out a handful at a time (see
//! [`crate::config::SPAN_CACHE_TRANSFER_BATCH`]) so the cost of the
//! underlying CAS loop is amortized across several spans instead of paid
//! per allocation.

use crate::config::{MAX_SPAN_PAGES, SPAN_CACHE_RELEASE_THRESHOLD, SPAN_SIZE};
use crate::span::SpanHeader;
use crate::sync::TaggedStack;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct GlobalSpanCache {
    stacks: [TaggedStack<SpanHeader>; MAX_SPAN_PAGES],
    counts: [AtomicUsize; MAX_SPAN_PAGES],
}

impl GlobalSpanCache {
    pub const fn new() -> Self {
        Self {
            stacks: [const { TaggedStack::new() }; MAX_SPAN_PAGES],
            counts: [const { AtomicUsize::new(0) }; MAX_SPAN_PAGES],
        }
    }

    #[inline]
    fn index(page_count: u32) -> usize {
        debug_assert!(page_count >= 1 && page_count as usize <= MAX_SPAN_PAGES);
        page_count as usize - 1
    }

    /// Hand a now-empty span to the global cache.
    pub fn push(&self, span: *mut SpanHeader, page_count: u32) {
        crate::stat_inc!(gsc_pushes);
        let idx = Self::index(page_count);
        self.stacks[idx].push(span);
        let count = self.counts[idx].fetch_add(1, Ordering::Relaxed) + 1;
        if count > SPAN_CACHE_RELEASE_THRESHOLD {
            self.release_excess(page_count);
        }
    }

    /// Take an empty span for `page_count`, if one is cached.
    pub fn pop(&self, page_count: u32) -> Option<*mut SpanHeader> {
        let idx = Self::index(page_count);
        let span = self.stacks[idx].pop()?;
        self.counts[idx].fetch_sub(1, Ordering::Relaxed);
        crate::stat_inc!(gsc_hits);
        Some(span)
    }

    /// Release spans back to the VMM until this page count's cache is back
    /// under its high-water mark. Runs on whichever thread happened to push
    /// the cache over threshold; the unlucky caller eats the unmap cost so
    /// everyone else doesn't have to.
    #[cold]
    fn release_excess(&self, page_count: u32) {
        let idx = Self::index(page_count);
        while self.counts[idx].load(Ordering::Relaxed) > SPAN_CACHE_RELEASE_THRESHOLD {
            let Some(span) = self.stacks[idx].pop() else {
                return;
            };
            self.counts[idx].fetch_sub(1, Ordering::Relaxed);
            crate::stat_inc!(gsc_released);
            unsafe { crate::platform::span_dealloc(span as *mut u8, SPAN_SIZE) };
        }
    }
}

impl Default for GlobalSpanCache {
    fn default() -> Self {
        Self::new()
    }
}

pub static GLOBAL_SPAN_CACHE: GlobalSpanCache = GlobalSpanCache::new();
