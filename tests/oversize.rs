//! Oversize path: requests bigger than a single span bypass thread heaps
//! entirely and map straight from the VMM.

use spanalloc::{allocate, deallocate, usable_size};
use spanalloc::SpanAlloc;

#[global_allocator]
static GLOBAL: SpanAlloc = SpanAlloc;

#[test]
fn oversize_allocation_round_trips() {
    let size = 2 * 1024 * 1024; // 2 MiB, well past the medium-class limit
    let p = allocate(size, 8);
    assert!(!p.is_null());
    assert_eq!(p as usize % 16, 0, "oversize blocks are span-granule aligned");
    assert!(usable_size(p) >= size);

    unsafe {
        p.write_bytes(0x5A, size);
        for i in (0..size).step_by(4096) {
            assert_eq!(*p.add(i), 0x5A);
        }
    }
    deallocate(p);
}

#[test]
fn many_oversize_allocations_do_not_overlap() {
    let size = 256 * 1024;
    let count = 16;
    let mut ptrs = Vec::with_capacity(count);

    for i in 0..count {
        let p = allocate(size, 8);
        assert!(!p.is_null());
        unsafe { p.write_bytes((i & 0xFF) as u8, size) };
        ptrs.push(p);
    }

    for (i, &p) in ptrs.iter().enumerate() {
        for off in (0..size).step_by(997) {
            assert_eq!(unsafe { *p.add(off) }, (i & 0xFF) as u8);
        }
    }

    for p in ptrs {
        deallocate(p);
    }
}

#[cfg(feature = "stats")]
#[test]
fn oversize_mapping_counter_returns_to_baseline() {
    let before = spanalloc::stats::snapshot();
    let p = allocate(4 * 1024 * 1024, 8);
    assert!(!p.is_null());
    let during = spanalloc::stats::snapshot();
    assert!(during.os_map_count > before.os_map_count);
    deallocate(p);
    let after = spanalloc::stats::snapshot();
    assert_eq!(after.os_map_count, during.os_map_count);
    assert_eq!(after.os_unmap_count, during.os_unmap_count + 1);
}
