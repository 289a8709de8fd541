//! Compile-time layout constants.
//!
//! The upstream tool this crate grew out of generated an equivalent module
//! from a TOML file via `build.rs`. That indirection bought nothing here
//! (the class table is derived purely from these constants at const-eval
//! time — see [`crate::size_class`]), so the values just live in source.

/// Base unit of page accounting. Spans are sized in multiples of this.
pub const PAGE_SHIFT: usize = 13;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Span alignment granularity `G`. Every span's base address is a multiple
/// of this, which is what lets [`crate::span::span_base`] recover a span's
/// header from any pointer handed back to a caller by masking the low bits.
pub const SPAN_SHIFT: usize = 16;
pub const SPAN_SIZE: usize = 1 << SPAN_SHIFT;

/// Largest page count a *regular* (non-oversize) span may use. Bounded so
/// that `MAX_SPAN_PAGES * PAGE_SIZE <= SPAN_SIZE`: every block handed out by
/// a regular span therefore lies within the first `SPAN_SIZE` bytes of the
/// mapping, which is the precondition for header recovery by masking.
pub const MAX_SPAN_PAGES: usize = SPAN_SIZE / PAGE_SIZE;

/// Batch size used when moving spans between a thread heap and the global
/// cache, and the high-water mark (in batches) before the global cache
/// releases spans back to the VMM.
pub const SPAN_CACHE_TRANSFER_BATCH: usize = 16;
pub const SPAN_CACHE_RELEASE_THRESHOLD: usize = 4096;

/// Number of buckets in the heap registry's chained hash table.
pub const REGISTRY_BUCKETS: usize = 4096;

const _: () = assert!(MAX_SPAN_PAGES * PAGE_SIZE <= SPAN_SIZE);
