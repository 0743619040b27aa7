//! Integration tests for `UnitPool` and `TypedPool` through the public API only.

use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;

use unit_pool::{
    Boundary, Error, HEADER_SENTINEL, TRAILER_SENTINEL, TeardownPolicy, TypedPool, UnitPool,
};

fn pool(unit_size: usize, units_per_block: usize, guarded: bool) -> UnitPool {
    UnitPool::builder()
        .unit_size(unit_size)
        .units_per_block(NonZero::new(units_per_block).unwrap())
        .guarded(guarded)
        .build()
        .unwrap()
}

fn release_all(pool: &mut UnitPool, units: impl IntoIterator<Item = NonNull<u8>>) {
    for unit in units {
        // SAFETY: Test callers only pass units handed out by this pool and not yet released.
        unsafe { pool.deallocate(unit) }.unwrap();
    }
}

#[test]
fn two_unit_blocks_of_four_bytes() {
    let mut pool = pool(4, 2, false);

    // Each slot is widened to hold a free-list link.
    let slot_size = pool.allocated_unit_size();
    assert_eq!(slot_size, size_of::<usize>());

    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();
    assert_eq!(pool.block_count(), 1);
    assert_eq!(b.addr().get() - a.addr().get(), slot_size);

    let c = pool.allocate().unwrap();
    assert_eq!(pool.block_count(), 2);

    release_all(&mut pool, [b]);
    let d = pool.allocate().unwrap();
    assert_eq!(d, b);

    let e = pool.allocate().unwrap();
    assert_eq!(e.addr().get() - c.addr().get(), slot_size);
    assert_eq!(pool.block_count(), 2);

    release_all(&mut pool, [a, c, d, e]);
    assert!(pool.is_empty());
}

#[test]
fn block_count_follows_net_allocations() {
    for units_per_block in [1, 3, 16] {
        for full_blocks in 0..4 {
            let mut pool = pool(24, units_per_block, false);

            let units: Vec<_> = (0..full_blocks * units_per_block + 1)
                .map(|_| pool.allocate().unwrap())
                .collect();

            assert_eq!(pool.block_count(), full_blocks + 1);
            assert_eq!(pool.capacity(), (full_blocks + 1) * units_per_block);
            assert_eq!(pool.len(), units.len());

            release_all(&mut pool, units);
        }
    }
}

#[test]
fn released_units_return_in_reverse_order_without_growth() {
    let mut pool = pool(32, 8, false);

    let units: Vec<_> = (0..8).map(|_| pool.allocate().unwrap()).collect();
    release_all(&mut pool, units[2..6].iter().copied());

    let reused: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
    let expected: Vec<_> = units[2..6].iter().rev().copied().collect();

    assert_eq!(reused, expected);
    assert_eq!(pool.block_count(), 1);
}

#[test]
fn guarded_slot_leaves_room_for_both_sentinels() {
    for unit_size in [1, 4, 7, 8, 13, 64] {
        let pool = pool(unit_size, 4, true);

        assert!(pool.allocated_unit_size() >= unit_size + 2 * size_of::<u32>());
        assert!(pool.allocated_unit_size() >= size_of::<usize>());
    }
}

#[test]
fn sentinels_surround_the_payload() {
    let mut pool = pool(10, 4, true);
    let unit = pool.allocate().unwrap();

    // SAFETY: Both sentinels lie inside the unit's slot, which the pool owns for its lifetime.
    let (header, trailer) = unsafe {
        (
            unit.byte_sub(size_of::<u32>())
                .cast::<u32>()
                .read_unaligned(),
            unit.byte_add(10).cast::<u32>().read_unaligned(),
        )
    };

    assert_eq!(header, HEADER_SENTINEL);
    assert_eq!(trailer, TRAILER_SENTINEL);

    release_all(&mut pool, [unit]);
}

#[test]
fn corruption_on_both_ends_reports_both() {
    let mut pool = pool(12, 4, true);
    let unit = pool.allocate().unwrap();

    // SAFETY: Deliberately overwrites one byte of each sentinel, both inside the slot.
    unsafe {
        unit.byte_sub(1).write(0);
        unit.byte_add(12).write(0);
    }

    // SAFETY: The unit was handed out by this pool and not released.
    let result = unsafe { pool.deallocate(unit) };

    match result {
        Err(Error::GuardCorruption { boundary, address }) => {
            assert_eq!(boundary, Boundary::Both);
            assert_eq!(address, unit.addr().get());
        }
        other => panic!("expected guard corruption, got {other:?}"),
    }

    // The corrupted unit stays out of circulation.
    assert_eq!(pool.len(), 1);
    assert_ne!(pool.allocate().unwrap(), unit);
}

#[test]
fn payload_is_writable_up_to_requested_size() {
    let mut pool = pool(20, 2, true);
    let unit = pool.allocate().unwrap();

    // SAFETY: Writing exactly the requested number of bytes stays within the payload.
    unsafe { unit.write_bytes(0xEE, 20) };

    // SAFETY: The unit was handed out by this pool and not released.
    unsafe { pool.deallocate(unit) }.unwrap();
}

#[test]
fn typed_pool_hands_out_aligned_storage() {
    #[repr(align(64))]
    struct CacheLine([u8; 64]);

    let mut pool = TypedPool::<CacheLine>::new();

    let units: Vec<_> = (0..20).map(|_| pool.allocate().unwrap()).collect();

    for unit in &units {
        assert_eq!(unit.addr().get() % 64, 0);

        // SAFETY: The unit is storage for one CacheLine that only we access.
        unsafe { unit.write(CacheLine([7; 64])) };
    }

    // SAFETY: Written above.
    assert!(units.iter().all(|unit| unsafe { unit.as_ref().0 } == [7; 64]));

    assert_eq!(
        pool.as_unit_pool().unit_layout(),
        Layout::new::<CacheLine>()
    );
    assert_eq!(pool.as_unit_pool().block_count(), 2);

    for unit in units {
        // SAFETY: Each unit came from this pool and is released once.
        unsafe { pool.deallocate(unit) }.unwrap();
    }
}

#[test]
#[should_panic]
fn must_be_empty_panics_with_outstanding_units() {
    let mut pool = UnitPool::builder()
        .unit_size(8)
        .teardown_policy(TeardownPolicy::MustBeEmpty)
        .build()
        .unwrap();

    _ = pool.allocate().unwrap();

    drop(pool);
}

#[test]
fn must_be_empty_is_quiet_when_empty() {
    let mut pool = UnitPool::builder()
        .unit_size(8)
        .teardown_policy(TeardownPolicy::MustBeEmpty)
        .build()
        .unwrap();

    let unit = pool.allocate().unwrap();
    release_all(&mut pool, [unit]);

    drop(pool);
}
