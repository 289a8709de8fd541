//! Heap Registry & Orphan List.
//!
//! The registry answers "which heap owns this span" for the cross-thread
//! free path: a span only stores its owner's `heap_id`, so a foreign thread
//! looks the id up here to find where to queue the deferred free. Heaps are
//! never freed — a thread that exits donates its heap to the orphan stack
//! instead, and the next thread that needs a heap adopts one from there
//! before resorting to building a fresh one. Both the registry bucket chain
//! and the orphan stack are lock-free; only heap creation (the slab bump
//! allocator) takes a spinlock, and only on the rare path where adoption
//! comes up empty.

use crate::config::{REGISTRY_BUCKETS, SPAN_SIZE};
use crate::heap::{self, Heap};
use crate::sync::{SpinMutex, TaggedStack};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
#[cfg(feature = "debug")]
use std::println;

struct SlabState {
    cursor: *mut u8,
    remaining: usize,
}

/// Bump-allocates `Heap` structs out of spans borrowed from the VMM. Heaps
/// are immortal once created, so unlike a general slab there is no free
/// list half — only the forward cursor.
struct HeapSlab {
    state: SpinMutex<SlabState>,
}

impl HeapSlab {
    const fn new() -> Self {
        Self {
            state: SpinMutex::new(SlabState {
                cursor: ptr::null_mut(),
                remaining: 0,
            }),
        }
    }

    fn alloc(&self) -> *mut Heap {
        let size = {
            let raw = core::mem::size_of::<Heap>();
            let align = core::mem::align_of::<Heap>();
            (raw + align - 1) & !(align - 1)
        };
        let mut state = self.state.lock();
        if state.remaining < size {
            let chunk = unsafe { crate::platform::span_alloc(SPAN_SIZE) };
            if chunk.is_null() {
                return ptr::null_mut();
            }
            state.cursor = chunk;
            state.remaining = SPAN_SIZE;
        }
        let ptr = state.cursor as *mut Heap;
        state.cursor = unsafe { state.cursor.add(size) };
        state.remaining -= size;
        ptr
    }
}

pub struct Registry {
    buckets: [AtomicPtr<Heap>; REGISTRY_BUCKETS],
    orphans: TaggedStack<Heap>,
    slab: HeapSlab,
}

impl Registry {
    const fn new() -> Self {
        Self {
            buckets: [const { AtomicPtr::new(ptr::null_mut()) }; REGISTRY_BUCKETS],
            orphans: TaggedStack::new(),
            slab: HeapSlab::new(),
        }
    }

    fn insert(&self, heap: *mut Heap) {
        let id = unsafe { (*heap).id };
        let idx = (id as usize) % REGISTRY_BUCKETS;
        let slot = &self.buckets[idx];
        let mut old = slot.load(Ordering::Relaxed);
        loop {
            unsafe { (*heap).registry_next = old };
            match slot.compare_exchange_weak(old, heap, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return,
                Err(cur) => old = cur,
            }
        }
    }

    /// Find the heap owning `id`. Always succeeds for an id read out of a
    /// live span's header: a span can't publish a `heap_id` before its heap
    /// has already been inserted here, and heaps are never removed.
    pub fn lookup(&self, id: u64) -> Option<*mut Heap> {
        let idx = (id as usize) % REGISTRY_BUCKETS;
        let mut cur = self.buckets[idx].load(Ordering::Acquire);
        while !cur.is_null() {
            if unsafe { (*cur).id } == id {
                return Some(cur);
            }
            cur = unsafe { (*cur).registry_next };
        }
        None
    }

    /// Adopt an orphaned heap if one is available, otherwise build a new
    /// one and register it. Returns null only if the underlying VMM mapping
    /// failed.
    pub fn acquire_for_thread(&self) -> *mut Heap {
        if let Some(adopted) = self.orphans.pop() {
            #[cfg(feature = "debug")]
            println!("[registry] adopted orphan heap {}", unsafe { (*adopted).id });
            crate::stat_inc!(heaps_adopted);
            return adopted;
        }

        let slot = self.slab.alloc();
        if slot.is_null() {
            #[cfg(feature = "debug")]
            println!("[registry] slab allocation failed, no heap available");
            return ptr::null_mut();
        }
        unsafe { slot.write(heap::new_heap(heap::allocate_heap_id())) };
        self.insert(slot);
        crate::stat_inc!(heaps_created);
        #[cfg(feature = "debug")]
        println!("[registry] created heap {}", unsafe { (*slot).id });
        slot
    }

    /// A thread is exiting: drain its heap's cached spans to the global
    /// span cache, then return the heap to the orphan stack for the next
    /// heap-less thread to adopt.
    pub fn donate(&self, heap: *mut Heap) {
        crate::stat_inc!(heaps_donated);
        unsafe { (*heap).drain_span_cache_to_global() };
        self.orphans.push(heap);
    }
}

unsafe impl Sync for Registry {}

pub static REGISTRY: Registry = Registry::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_registers_and_lookup_finds_it() {
        let h = REGISTRY.acquire_for_thread();
        assert!(!h.is_null());
        let id = unsafe { (*h).id };
        let found = REGISTRY.lookup(id).expect("just-registered heap must be found");
        assert_eq!(found, h);
    }

    #[test]
    fn donated_heap_is_adopted_before_a_new_one_is_built() {
        let h = REGISTRY.acquire_for_thread();
        let id = unsafe { (*h).id };
        REGISTRY.donate(h);
        let adopted = REGISTRY.acquire_for_thread();
        assert_eq!(unsafe { (*adopted).id }, id);
    }
}
