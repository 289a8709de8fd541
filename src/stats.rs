//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and not
//! used as synchronization primitives. The allocator's lock-free structures
//! provide the ordering guarantees for correctness; these counters are
//! purely for monitoring, and compile away entirely without the `stats`
//! feature.
//!
//! # Usage
//!
//! ```ignore
//! let snap = spanalloc::stats::snapshot();
//! println!("allocs: {}", snap.alloc_count);
//! ```
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! individually atomic but not globally consistent with each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // ---- Global allocation stats ----
    /// Total calls to allocate with size > 0.
    pub alloc_count: AtomicU64,
    /// Total calls to deallocate with a non-null pointer.
    pub dealloc_count: AtomicU64,
    /// Total calls to reallocate (after null/zero-size guards).
    pub realloc_count: AtomicU64,
    /// Sum of all requested byte sizes passed to allocate.
    pub alloc_bytes: AtomicU64,

    // ---- Thread heap ----
    /// Allocations served from a partial span already in this heap.
    pub heap_partial_hits: AtomicU64,
    /// Allocations that needed to refill a partial list from somewhere.
    pub heap_refills: AtomicU64,
    /// Refills served from this heap's own empty-span cache.
    pub heap_span_cache_hits: AtomicU64,

    // ---- Global span cache ----
    /// Refills served from the global span cache.
    pub gsc_hits: AtomicU64,
    /// Spans handed to the global span cache by a heap trimming its own.
    pub gsc_pushes: AtomicU64,
    /// Spans the global span cache released back to the VMM.
    pub gsc_released: AtomicU64,

    // ---- Deferred deallocation ----
    /// Frees that crossed a heap boundary and were queued instead of applied.
    pub ddq_pushes: AtomicU64,
    /// Deferred blocks reclaimed the next time their heap drained its queue.
    pub ddq_drained: AtomicU64,

    // ---- Oversize path ----
    pub oversize_allocs: AtomicU64,
    pub oversize_deallocs: AtomicU64,

    // ---- Heap lifecycle ----
    pub heaps_created: AtomicU64,
    pub heaps_adopted: AtomicU64,
    pub heaps_donated: AtomicU64,

    // ---- VMM ----
    /// Calls to `platform::span_alloc`.
    pub os_map_count: AtomicU64,
    /// Calls to `platform::span_dealloc`.
    pub os_unmap_count: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            dealloc_count: AtomicU64::new(0),
            realloc_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            heap_partial_hits: AtomicU64::new(0),
            heap_refills: AtomicU64::new(0),
            heap_span_cache_hits: AtomicU64::new(0),
            gsc_hits: AtomicU64::new(0),
            gsc_pushes: AtomicU64::new(0),
            gsc_released: AtomicU64::new(0),
            ddq_pushes: AtomicU64::new(0),
            ddq_drained: AtomicU64::new(0),
            oversize_allocs: AtomicU64::new(0),
            oversize_deallocs: AtomicU64::new(0),
            heaps_created: AtomicU64::new(0),
            heaps_adopted: AtomicU64::new(0),
            heaps_donated: AtomicU64::new(0),
            os_map_count: AtomicU64::new(0),
            os_unmap_count: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all allocation statistics.
///
/// Fields are plain `u64` values loaded from the global atomic counters.
/// Individual fields are each atomically read, but the snapshot as a whole
/// is not globally consistent — concurrent allocations may race between
/// loads. For monitoring purposes this is always sufficient.
///
/// Obtain a snapshot with [`snapshot()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub alloc_count: u64,
    pub dealloc_count: u64,
    pub realloc_count: u64,
    pub alloc_bytes: u64,
    pub heap_partial_hits: u64,
    pub heap_refills: u64,
    pub heap_span_cache_hits: u64,
    pub gsc_hits: u64,
    pub gsc_pushes: u64,
    pub gsc_released: u64,
    pub ddq_pushes: u64,
    pub ddq_drained: u64,
    pub oversize_allocs: u64,
    pub oversize_deallocs: u64,
    pub heaps_created: u64,
    pub heaps_adopted: u64,
    pub heaps_donated: u64,
    pub os_map_count: u64,
    pub os_unmap_count: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        alloc_count: s.alloc_count.load(Ordering::Relaxed),
        dealloc_count: s.dealloc_count.load(Ordering::Relaxed),
        realloc_count: s.realloc_count.load(Ordering::Relaxed),
        alloc_bytes: s.alloc_bytes.load(Ordering::Relaxed),
        heap_partial_hits: s.heap_partial_hits.load(Ordering::Relaxed),
        heap_refills: s.heap_refills.load(Ordering::Relaxed),
        heap_span_cache_hits: s.heap_span_cache_hits.load(Ordering::Relaxed),
        gsc_hits: s.gsc_hits.load(Ordering::Relaxed),
        gsc_pushes: s.gsc_pushes.load(Ordering::Relaxed),
        gsc_released: s.gsc_released.load(Ordering::Relaxed),
        ddq_pushes: s.ddq_pushes.load(Ordering::Relaxed),
        ddq_drained: s.ddq_drained.load(Ordering::Relaxed),
        oversize_allocs: s.oversize_allocs.load(Ordering::Relaxed),
        oversize_deallocs: s.oversize_deallocs.load(Ordering::Relaxed),
        heaps_created: s.heaps_created.load(Ordering::Relaxed),
        heaps_adopted: s.heaps_adopted.load(Ordering::Relaxed),
        heaps_donated: s.heaps_donated.load(Ordering::Relaxed),
        os_map_count: s.os_map_count.load(Ordering::Relaxed),
        os_unmap_count: s.os_unmap_count.load(Ordering::Relaxed),
    }
}
