//! Deferred-Deallocation Queue (DDQ): where a `free` lands when the calling
//! thread doesn't own the block's span.
//!
//! Every heap owns one. A foreign thread that would otherwise need to touch
//! another heap's private freelists just pushes the pointer here instead —
//! a single lock-free push, no different in cost from freeing locally. The
//! owning heap drains the whole queue in one atomic swap (see
//! [`TaggedStack::take_all`]) the next time it needs more free blocks,
//! folding the deferred frees back into its own per-class freelists.

use crate::sync::{StackNode, TaggedStack};

/// A freed block queued for its owning heap to reclaim. `repr(transparent)`
/// so the node pointer IS the block's address: the link word lives in the
/// block's own first machine word, the same trick a thread-owned freelist
/// already uses for `free_head` chains.
#[repr(transparent)]
pub struct DeferredBlock(*mut u8);

unsafe impl StackNode for DeferredBlock {
    unsafe fn next_slot(node: *mut Self) -> *mut *mut Self {
        node as *mut *mut Self
    }
}

pub struct DeferredQueue {
    stack: TaggedStack<DeferredBlock>,
}

impl DeferredQueue {
    pub const fn new() -> Self {
        Self {
            stack: TaggedStack::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Queue `ptr` for the owning heap to free on its own thread.
    #[inline]
    pub fn push(&self, ptr: *mut u8) {
        self.stack.push(ptr as *mut DeferredBlock);
    }

    /// Drain every block queued so far and hand each to `free_one`, called
    /// on the owning heap's thread. The chain is walked before `free_one`
    /// runs on a given block, since freeing overwrites the block's first
    /// word (the very word this queue was using as its link).
    pub fn drain(&self, mut free_one: impl FnMut(*mut u8)) {
        let Some(mut cur) = self.stack.take_all() else {
            return;
        };
        while !cur.is_null() {
            let next = unsafe { *DeferredBlock::next_slot(cur) };
            free_one(cur as *mut u8);
            cur = next;
        }
    }
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    #[test]
    fn drain_visits_every_pushed_block_once() {
        let queue = DeferredQueue::new();
        let mut blocks: Vec<Box<[u8; 16]>> = (0..4).map(|_| Box::new([0u8; 16])).collect();
        let ptrs: Vec<*mut u8> = blocks
            .iter_mut()
            .map(|b| b.as_mut_ptr())
            .collect();

        for &p in &ptrs {
            queue.push(p);
        }
        assert!(!queue.is_empty());

        let mut seen = Vec::new();
        queue.drain(|p| seen.push(p));

        assert!(queue.is_empty());
        assert_eq!(seen.len(), ptrs.len());
        for p in ptrs {
            assert!(seen.contains(&p));
        }
    }
}
