#![no_std]
#![cfg_attr(feature = "nightly", feature(thread_local))]
#![cfg_attr(feature = "nightly", feature(allocator_api))]

//! spanalloc: a multi-threaded, lock-free span-cache allocator.
//!
//! Architecture, leaves first:
//! - [`platform`]: OS virtual-memory mapping, span-aligned (`mmap`/`VirtualAlloc`).
//! - [`global_cache`]: process-wide lock-free cache of empty spans, per page count.
//! - [`heap`]: one per thread — partial-span lists per size class, an
//!   empty-span cache per page count, and a deferred-deallocation queue.
//! - [`size_class`]: the immutable `(block_size, page_count, block_count)` table.
//! - [`deferred`]: per-heap lock-free stack for cross-thread frees.
//! - [`oversize`]: allocations too large for a span, mapped directly.
//! - [`registry`]: finds a block's owning heap by id; orphan-heap adoption.
//! - [`allocator`]: the public API and `GlobalAlloc` surface tying it all together.
//!
//! # Usage
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: spanalloc::SpanAlloc = spanalloc::SpanAlloc;
//! ```

#[cfg(test)]
extern crate alloc;
#[cfg(any(test, feature = "std", feature = "alloc-histogram"))]
extern crate std;

pub mod allocator;
pub mod config;
pub mod deferred;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod global_cache;
pub mod heap;
#[cfg(feature = "alloc-histogram")]
pub mod histogram;
mod macros;
pub mod oversize;
pub mod platform;
pub mod registry;
pub mod size_class;
pub mod span;
#[cfg(feature = "stats")]
pub mod stats;
pub mod sync;

pub use allocator::SpanAlloc;
pub use allocator::{allocate, deallocate, finalize, initialize, reallocate, thread_finalize, thread_initialize, usable_size};

// Panic handler for staticlib builds (no_std has no default panic handler).
// Only active when panic="abort" (i.e., the `fast` profile), not during normal checks.
#[cfg(all(feature = "ffi", not(test), not(feature = "std"), panic = "abort"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    unsafe extern "C" {
        fn abort() -> !;
    }
    unsafe { abort() }
}
