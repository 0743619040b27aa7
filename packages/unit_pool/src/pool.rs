use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use new_zealand::nz;
use tracing::{debug, error, trace};

use crate::block::{read_link, write_link};
use crate::guard::GuardLayout;
use crate::{Block, Error, Result, SlotCoordinates, TeardownPolicy, UnitPoolBuilder};

/// Number of units in each block unless configured otherwise.
pub const DEFAULT_UNITS_PER_BLOCK: NonZero<usize> = nz!(16);

/// A memory pool that hands out equally-sized units carved from larger blocks.
///
/// The pool starts out empty. The first allocation, and every allocation made while no unit is
/// vacant, acquires exactly one new block of [`units_per_block()`][1] units. Released units are
/// kept on a free list and handed out again in last-in-first-out order, so the most recently
/// released unit is always the next one returned. Blocks are only released when the pool is
/// dropped.
///
/// # Guarded units
///
/// When built with [`guarded(true)`][2], every unit is surrounded by a header and a trailer
/// sentinel. Both are verified when the unit is released and a mismatch is reported as
/// [`Error::GuardCorruption`] instead of returning the unit to the free list. This catches
/// writes past either end of the requested size. Release overwrites both sentinels with a
/// marker, so releasing the same unit a second time is reported as well.
///
/// # Out of band access
///
/// The pool hands out raw pointers and never creates references to the units, so it is up to
/// the caller to decide how unit memory is accessed. A unit's address is stable from allocation
/// until it is released or the pool is dropped.
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]). Callers that share a pool
/// between threads must add their own synchronization.
///
/// # Examples
///
/// ```
/// use unit_pool::UnitPool;
///
/// let mut pool = UnitPool::builder().unit_size(24).build().unwrap();
///
/// let first = pool.allocate().unwrap();
/// let second = pool.allocate().unwrap();
/// assert_eq!(pool.block_count(), 1);
///
/// // SAFETY: Both units came from this pool and are released once.
/// unsafe {
///     pool.deallocate(first).unwrap();
///     pool.deallocate(second).unwrap();
/// }
///
/// // The most recently released unit is reused first.
/// assert_eq!(pool.allocate().unwrap(), second);
/// ```
///
/// [1]: Self::units_per_block
/// [2]: UnitPoolBuilder::guarded
#[derive(Debug)]
pub struct UnitPool {
    /// Size and alignment of the payload the caller asked for.
    unit_layout: Layout,

    /// Size and alignment of one slot. The size is the distance between neighboring slots and
    /// is always large enough for a free-list link and, if enabled, both sentinels.
    slot_layout: Layout,

    /// Layout of one block, i.e. `units_per_block` consecutive slots.
    block_layout: Layout,

    units_per_block: NonZero<usize>,

    /// Present if the units are wrapped in sentinels.
    guard: Option<GuardLayout>,

    teardown_policy: TeardownPolicy,

    /// Flat index of the most recently released (or never used) vacant slot. Think of this as a
    /// stack of vacant slots whose entries are stored in the vacant slots themselves.
    free_head: Option<usize>,

    /// Every block ever acquired, in acquisition order. Only this table moves when it grows;
    /// the blocks it points to stay where they are.
    blocks: Vec<Block>,

    /// `(base address, index into blocks)` for every block, sorted by base address. Lets
    /// `deallocate()` find the owning block with a binary search.
    blocks_by_address: Vec<(usize, usize)>,

    /// Number of units currently handed out.
    length: usize,
}

impl UnitPool {
    /// Creates a builder for configuring and constructing a [`UnitPool`].
    ///
    /// The unit size or layout is mandatory; everything else has a default.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use unit_pool::UnitPool;
    ///
    /// let pool = UnitPool::builder()
    ///     .layout_of::<u64>()
    ///     .units_per_block(nz!(64))
    ///     .guarded(true)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert!(pool.is_guarded());
    /// assert_eq!(pool.units_per_block().get(), 64);
    /// ```
    #[inline]
    pub fn builder() -> UnitPoolBuilder {
        UnitPoolBuilder::new()
    }

    /// Creates a new pool with the specified configuration.
    ///
    /// This is used by the builder to construct the actual pool.
    pub(crate) fn new_inner(
        unit_layout: Layout,
        units_per_block: NonZero<usize>,
        guarded: bool,
        teardown_policy: TeardownPolicy,
    ) -> Result<Self> {
        let guard = guarded.then(|| GuardLayout::new(unit_layout.size(), unit_layout.align()));

        // Every slot must be able to hold a free-list link while it is vacant.
        let payload_size = unit_layout.size().max(size_of::<usize>());

        let slot_size = match guard {
            Some(guard) => payload_size.checked_add(guard.overhead()),
            None => Some(payload_size),
        }
        .ok_or_else(|| Error::InvalidConfiguration {
            problem: format!("guarded slot for {} byte units overflows", unit_layout.size()),
        })?;

        let slot_align = unit_layout.align().max(align_of::<usize>());

        let slot_layout = Layout::from_size_align(slot_size, slot_align)
            .map_err(|layout_error| Error::InvalidConfiguration {
                problem: format!("slot layout cannot be represented: {layout_error}"),
            })?
            .pad_to_align();

        let block_size = slot_layout
            .size()
            .checked_mul(units_per_block.get())
            .ok_or_else(|| Error::InvalidConfiguration {
                problem: format!(
                    "block of {units_per_block} slots of {} bytes overflows",
                    slot_layout.size()
                ),
            })?;

        let block_layout = Layout::from_size_align(block_size, slot_layout.align()).map_err(
            |layout_error| Error::InvalidConfiguration {
                problem: format!("block layout cannot be represented: {layout_error}"),
            },
        )?;

        Ok(Self {
            unit_layout,
            slot_layout,
            block_layout,
            units_per_block,
            guard,
            teardown_policy,
            free_head: None,
            blocks: Vec::new(),
            blocks_by_address: Vec::new(),
            length: 0,
        })
    }

    /// The size and alignment of the payload of each unit, as requested at construction.
    #[must_use]
    #[inline]
    pub fn unit_layout(&self) -> Layout {
        self.unit_layout
    }

    /// The number of bytes each unit occupies inside a block, including any sentinels and
    /// padding. This is never less than the size of one free-list link and, for guarded pools,
    /// never less than the requested size plus two sentinels.
    #[must_use]
    #[inline]
    pub fn allocated_unit_size(&self) -> usize {
        self.slot_layout.size()
    }

    /// The number of units in each block.
    #[must_use]
    #[inline]
    pub fn units_per_block(&self) -> NonZero<usize> {
        self.units_per_block
    }

    /// Whether units are wrapped in guard sentinels that are verified on release.
    #[must_use]
    #[inline]
    pub fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }

    /// The teardown policy the pool was built with.
    #[must_use]
    #[inline]
    pub fn teardown_policy(&self) -> TeardownPolicy {
        self.teardown_policy
    }

    /// The number of blocks acquired so far. This only ever grows.
    #[must_use]
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The number of units the pool can hand out without acquiring another block, including
    /// the ones already handed out.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        // Overflow here would imply capacity is greater than virtual memory - impossible.
        self.blocks.len().wrapping_mul(self.units_per_block.get())
    }

    /// The number of units currently handed out.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether no units are currently handed out.
    ///
    /// An empty pool may still be holding blocks.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Hands out one unit.
    ///
    /// The unit is served from the free list if any unit is vacant. Otherwise the pool first
    /// grows by one block. The returned memory is uninitialized and holds at least
    /// [`unit_layout()`][1] bytes, aligned accordingly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the pool needed to grow and the memory for the new
    /// block or the enlarged block table could not be acquired. The pool is unchanged in that
    /// case.
    ///
    /// # Example
    ///
    /// ```
    /// use unit_pool::UnitPool;
    ///
    /// let mut pool = UnitPool::builder().layout_of::<u32>().build().unwrap();
    ///
    /// let unit = pool.allocate().unwrap().cast::<u32>();
    ///
    /// // SAFETY: The unit is large enough and aligned for a u32 and belongs to us.
    /// unsafe {
    ///     unit.write(42);
    ///     assert_eq!(unit.read(), 42);
    /// }
    ///
    /// assert_eq!(pool.len(), 1);
    /// ```
    ///
    /// [1]: Self::unit_layout
    pub fn allocate(&mut self) -> Result<NonNull<u8>> {
        let flat_index = match self.free_head {
            Some(flat_index) => flat_index,
            None => {
                self.grow()?;
                self.free_head
                    .expect("growing always leaves a vacant slot at the head of the free list")
            }
        };

        let slot = self.slot_ptr(SlotCoordinates::from_flat(flat_index, self.units_per_block));

        // SAFETY: The slot is at the head of the free list, so it is vacant and its first word
        // holds the link written when it was threaded or released.
        self.free_head = unsafe { read_link(slot) };

        // Cannot overflow because we would run out of virtual memory first.
        self.length = self.length.wrapping_add(1);

        let unit = match self.guard {
            // SAFETY: The slot is vacant, exclusively ours and sized for the guard layout.
            Some(guard) => unsafe { guard.arm(slot) },
            None => slot,
        };

        trace!(
            unit = unit.addr().get(),
            slot = flat_index,
            len = self.length,
            "allocated unit"
        );

        Ok(unit)
    }

    /// Returns a unit to the pool, making it the next unit to be handed out.
    ///
    /// For guarded pools, both sentinels are verified before anything else happens.
    ///
    /// # Errors
    ///
    /// * [`Error::GuardCorruption`] if the pool is guarded and either sentinel of the unit was
    ///   overwritten. The unit is not returned to the free list.
    /// * [`Error::ForeignPointer`] if `unit` is not a unit address of this pool.
    ///
    /// # Safety
    ///
    /// If `unit` is a unit address of this pool, it must currently be handed out: it was
    /// returned by [`allocate()`][1] and not released since. The caller must not access the unit
    /// after this call returns `Ok`.
    ///
    /// [1]: Self::allocate
    pub unsafe fn deallocate(&mut self, unit: NonNull<u8>) -> Result<()> {
        let address = unit.addr().get();

        let slot_address = match self.guard {
            Some(guard) => address.checked_sub(guard.payload_offset()),
            None => Some(address),
        }
        .ok_or(Error::ForeignPointer { address })?;

        let coordinates = self
            .locate(slot_address)
            .ok_or(Error::ForeignPointer { address })?;

        // We derive the slot pointer from our own block rather than from the caller's pointer.
        let slot = self.slot_ptr(coordinates);

        if let Some(guard) = self.guard {
            // SAFETY: The slot is one of ours and sized for the guard layout.
            let sentinels = unsafe { guard.read(slot) };

            if let Err(boundary) = sentinels.verify() {
                error!(
                    unit = address,
                    %boundary,
                    requested_size = self.unit_layout.size(),
                    "guard sentinel corrupted, unit not returned to the pool"
                );

                return Err(Error::GuardCorruption { boundary, address });
            }

            // SAFETY: Verified above to be a slot of ours with intact sentinels, which the
            // caller guarantees is no longer accessed.
            unsafe {
                guard.disarm(slot);
            }
        }

        // SAFETY: The caller guarantees the unit was handed out and will no longer be accessed,
        // so the slot is ours to turn into a vacant free-list entry.
        unsafe {
            write_link(slot, self.free_head);
        }

        let flat_index = coordinates.to_flat(self.units_per_block);
        self.free_head = Some(flat_index);

        self.length = self
            .length
            .checked_sub(1)
            .expect("released more units than were handed out - a unit was released twice");

        trace!(
            unit = address,
            slot = flat_index,
            len = self.length,
            "released unit"
        );

        Ok(())
    }

    /// Acquires one more block and makes its slots the free list.
    ///
    /// Both the block and the block table entry are acquired before any state is modified,
    /// so a failure leaves the pool exactly as it was.
    fn grow(&mut self) -> Result<()> {
        debug_assert!(
            self.free_head.is_none(),
            "pool only grows when the free list is exhausted"
        );

        self.blocks
            .try_reserve(1)
            .map_err(|_reserve_error| Error::AllocationFailure {
                layout: Layout::array::<Block>(self.blocks.len().saturating_add(1))
                    .unwrap_or_else(|_layout_error| Layout::new::<Block>()),
            })?;

        self.blocks_by_address
            .try_reserve(1)
            .map_err(|_reserve_error| Error::AllocationFailure {
                layout: Layout::array::<(usize, usize)>(
                    self.blocks_by_address.len().saturating_add(1),
                )
                .unwrap_or_else(|_layout_error| Layout::new::<(usize, usize)>()),
            })?;

        let mut block = Block::acquire(self.block_layout)?;

        let first_flat_index =
            SlotCoordinates::from_parts(self.blocks.len(), 0).to_flat(self.units_per_block);

        block.thread_free_list(
            self.slot_layout.size(),
            self.units_per_block,
            first_flat_index,
        );

        let base = block.base_address();
        let block_index = self.blocks.len();
        let position = self
            .blocks_by_address
            .partition_point(|&(other_base, _)| other_base < base);

        // Capacity was reserved above for both tables, so neither of these reallocates.
        self.blocks_by_address.insert(position, (base, block_index));
        self.blocks.push(block);
        self.free_head = Some(first_flat_index);

        debug!(
            block_count = self.blocks.len(),
            block_size = self.block_layout.size(),
            unit_size = self.unit_layout.size(),
            "acquired pool block"
        );

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    /// Finds the slot that starts at `slot_address`, if any.
    ///
    /// The only candidate is the block with the highest base address not above `slot_address`.
    fn locate(&self, slot_address: usize) -> Option<SlotCoordinates> {
        let candidates = self
            .blocks_by_address
            .partition_point(|&(base, _)| base <= slot_address);

        let &(_, block_index) = self
            .blocks_by_address
            .get(candidates.checked_sub(1)?)?;

        let block = self.blocks.get(block_index)?;

        block
            .slot_index_of(slot_address, self.slot_layout.size())
            .map(|index_in_block| SlotCoordinates::from_parts(block_index, index_in_block))
    }

    fn slot_ptr(&self, coordinates: SlotCoordinates) -> NonNull<u8> {
        let block = self
            .blocks
            .get(coordinates.block_index())
            .expect("free list and locate() only produce coordinates of existing blocks");

        block.slot_ptr(coordinates.index_in_block(), self.slot_layout.size())
    }

    /// Walks the free list and verifies that it is consistent with the number of units handed
    /// out.
    ///
    /// This method is only available in debug builds and is used for testing and validation.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub fn integrity_check(&self) {
        let capacity = self.capacity();
        let mut visited = vec![false; capacity];
        let mut vacant_count: usize = 0;
        let mut cursor = self.free_head;

        while let Some(flat_index) = cursor {
            assert!(
                flat_index < capacity,
                "free list entry {flat_index} is beyond capacity {capacity}"
            );

            let seen = visited
                .get_mut(flat_index)
                .expect("guarded by capacity assertion above");

            assert!(
                !*seen,
                "free list visits slot {flat_index} twice - the list contains a cycle"
            );

            *seen = true;
            vacant_count = vacant_count.wrapping_add(1);

            let slot = self.slot_ptr(SlotCoordinates::from_flat(flat_index, self.units_per_block));

            // SAFETY: Every slot on the free list is vacant and holds a link.
            cursor = unsafe { read_link(slot) };
        }

        assert_eq!(
            self.blocks_by_address.len(),
            self.blocks.len(),
            "address index does not cover every block"
        );

        assert!(
            self.blocks_by_address
                .windows(2)
                .all(|pair| matches!(pair, [(lower, _), (higher, _)] if lower < higher)),
            "address index is not sorted by block base address"
        );

        assert_eq!(
            vacant_count.wrapping_add(self.length),
            capacity,
            "{vacant_count} vacant and {} handed out units do not add up to capacity {capacity}",
            self.length
        );
    }
}

impl Drop for UnitPool {
    fn drop(&mut self) {
        let outstanding = self.length;
        let block_count = self.blocks.len();

        // Release every block, then the table itself.
        self.blocks_by_address.clear();
        self.blocks.clear();
        self.blocks.shrink_to_fit();

        debug!(block_count, outstanding, "released pool blocks");

        // We do this check at the end so we clean up the memory first.
        //
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.teardown_policy == TeardownPolicy::MustBeEmpty && !thread::panicking() {
            assert!(
                outstanding == 0,
                "dropped a UnitPool with {outstanding} units still handed out - this is forbidden by TeardownPolicy::MustBeEmpty"
            );
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::Boundary;

    assert_impl_all!(UnitPool: Send, std::fmt::Debug);
    assert_not_impl_any!(UnitPool: Sync);

    fn pool(unit_size: usize, units_per_block: usize, guarded: bool) -> UnitPool {
        UnitPool::builder()
            .unit_size(unit_size)
            .units_per_block(NonZero::new(units_per_block).unwrap())
            .guarded(guarded)
            .build()
            .unwrap()
    }

    #[test]
    fn new_pool_is_empty_and_has_no_blocks() {
        let pool = pool(4, 2, false);

        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.block_count(), 0);
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn unit_size_is_raised_to_link_size() {
        let pool = pool(1, 2, false);

        assert_eq!(pool.unit_layout().size(), 1);
        assert_eq!(pool.allocated_unit_size(), size_of::<usize>());
    }

    #[test]
    fn guarded_unit_size_includes_two_sentinels() {
        let plain = pool(32, 2, false);
        let guarded = pool(32, 2, true);

        assert_eq!(plain.allocated_unit_size(), 32);
        assert!(guarded.allocated_unit_size() >= 32 + 2 * size_of::<u32>());
        assert_eq!(guarded.allocated_unit_size() % align_of::<usize>(), 0);
    }

    #[test]
    fn concrete_two_unit_block_scenario() {
        let mut pool = pool(4, 2, false);
        let stride = pool.allocated_unit_size();

        let first = pool.allocate().unwrap();
        assert_eq!(pool.block_count(), 1);

        let second = pool.allocate().unwrap();
        assert_eq!(pool.block_count(), 1);
        assert_eq!(second.addr().get() - first.addr().get(), stride);

        let third = pool.allocate().unwrap();
        assert_eq!(pool.block_count(), 2);
        assert_ne!(third, first);
        assert_ne!(third, second);

        unsafe { pool.deallocate(second) }.unwrap();

        let reused = pool.allocate().unwrap();
        assert_eq!(reused, second);
        assert_eq!(pool.block_count(), 2);

        pool.integrity_check();
    }

    #[test]
    fn growth_happens_once_per_block() {
        let units_per_block = 3;
        let mut pool = pool(8, units_per_block, false);

        for allocated in 1..=(4 * units_per_block + 1) {
            _ = pool.allocate().unwrap();

            assert_eq!(pool.block_count(), allocated.div_ceil(units_per_block));
        }

        assert_eq!(pool.block_count(), 5);
        assert_eq!(pool.capacity(), 15);
        assert_eq!(pool.len(), 13);
    }

    #[test]
    fn released_units_are_reused_before_growth_in_reverse_order() {
        let mut pool = pool(16, 4, false);

        let units: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.block_count(), 1);

        for unit in &units[..3] {
            unsafe { pool.deallocate(*unit) }.unwrap();
        }

        assert_eq!(pool.allocate().unwrap(), units[2]);
        assert_eq!(pool.allocate().unwrap(), units[1]);
        assert_eq!(pool.allocate().unwrap(), units[0]);
        assert_eq!(pool.block_count(), 1);

        // Only now does the pool need to grow.
        _ = pool.allocate().unwrap();
        assert_eq!(pool.block_count(), 2);
    }

    #[test]
    fn lifo_reuse() {
        let mut pool = pool(16, 8, false);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe {
            pool.deallocate(a).unwrap();
            pool.deallocate(b).unwrap();
        }

        assert_eq!(pool.allocate().unwrap(), b);
        assert_eq!(pool.allocate().unwrap(), a);
    }

    #[test]
    fn units_stay_put_when_block_table_grows() {
        let mut pool = pool(8, 1, false);

        let first = pool.allocate().unwrap().cast::<u64>();
        unsafe { first.write(0xDEAD_BEEF) };

        for _ in 0..100 {
            _ = pool.allocate().unwrap();
        }

        assert_eq!(pool.block_count(), 101);
        assert_eq!(unsafe { first.read() }, 0xDEAD_BEEF);
    }

    #[test]
    fn units_are_aligned_for_their_layout() {
        #[repr(align(64))]
        #[allow(dead_code, reason = "only the layout of this type matters")]
        struct Aligned([u8; 64]);

        for guarded in [false, true] {
            let mut pool = UnitPool::builder()
                .layout_of::<Aligned>()
                .units_per_block(nz!(3))
                .guarded(guarded)
                .build()
                .unwrap();

            for _ in 0..7 {
                let unit = pool.allocate().unwrap();
                assert_eq!(unit.addr().get() % 64, 0);
            }
        }
    }

    #[test]
    fn guarded_round_trip_with_full_payload_succeeds() {
        let mut pool = pool(10, 4, true);

        let unit = pool.allocate().unwrap();
        unsafe { unit.write_bytes(0xFF, 10) };

        unsafe { pool.deallocate(unit) }.unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn guarded_overrun_is_reported_as_trailer() {
        let mut pool = pool(10, 4, true);

        let unit = pool.allocate().unwrap();
        unsafe { unit.byte_add(10).write(0) };

        let result = unsafe { pool.deallocate(unit) };
        assert!(matches!(
            result,
            Err(Error::GuardCorruption {
                boundary: Boundary::Trailer,
                ..
            })
        ));

        // The corrupted unit was not relinked.
        assert_eq!(pool.len(), 1);
        assert_ne!(pool.allocate().unwrap(), unit);
    }

    #[test]
    fn guarded_underrun_is_reported_as_header() {
        let mut pool = pool(10, 4, true);

        let unit = pool.allocate().unwrap();
        unsafe { unit.byte_sub(1).write(0) };

        let result = unsafe { pool.deallocate(unit) };
        assert!(matches!(
            result,
            Err(Error::GuardCorruption {
                boundary: Boundary::Header,
                ..
            })
        ));
    }

    #[test]
    fn guarded_double_release_is_detected() {
        let mut pool = pool(16, 4, true);

        let unit = pool.allocate().unwrap();
        unsafe { pool.deallocate(unit) }.unwrap();

        let result = unsafe { pool.deallocate(unit) };
        assert!(matches!(result, Err(Error::GuardCorruption { .. })));

        pool.integrity_check();
    }

    #[test]
    fn guarded_double_release_is_detected_for_large_alignment() {
        // With 16-byte alignment the header lies beyond the free-list link of the slot.
        let mut pool = UnitPool::builder()
            .layout(Layout::from_size_align(16, 16).unwrap())
            .guarded(true)
            .build()
            .unwrap();

        let keep = pool.allocate().unwrap();
        let unit = pool.allocate().unwrap();

        unsafe { pool.deallocate(unit) }.unwrap();

        let result = unsafe { pool.deallocate(unit) };
        assert!(matches!(
            result,
            Err(Error::GuardCorruption {
                boundary: Boundary::Both,
                ..
            })
        ));

        assert_eq!(pool.len(), 1);
        pool.integrity_check();

        // The unit is handed out once, not twice.
        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();
        assert_eq!(first, unit);
        assert_ne!(second, unit);
        assert_ne!(second, keep);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn released_unit_is_rearmed_on_reuse() {
        let mut pool = UnitPool::builder()
            .layout(Layout::from_size_align(16, 16).unwrap())
            .guarded(true)
            .build()
            .unwrap();

        let unit = pool.allocate().unwrap();
        unsafe { pool.deallocate(unit) }.unwrap();

        let reused = pool.allocate().unwrap();
        assert_eq!(reused, unit);

        unsafe { pool.deallocate(reused) }.unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn units_of_many_blocks_are_located_in_any_order() {
        let mut pool = pool(8, 1, true);

        let units: Vec<_> = (0..257).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.block_count(), 257);

        // Every other unit first, then the rest from the back.
        for unit in units.iter().step_by(2) {
            unsafe { pool.deallocate(*unit) }.unwrap();
        }

        for unit in units.iter().skip(1).step_by(2).rev() {
            unsafe { pool.deallocate(*unit) }.unwrap();
        }

        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn pointer_past_last_slot_of_block_is_rejected() {
        let mut pool = pool(16, 2, false);
        let units: Vec<_> = (0..6).map(|_| pool.allocate().unwrap()).collect();

        // One slot past the end of a block is either another block's slot or foreign.
        let stride = pool.allocated_unit_size();
        let past_end = units[1].addr().get() + stride;

        if units.iter().all(|unit| unit.addr().get() != past_end) {
            let result =
                unsafe { pool.deallocate(units[1].with_addr(NonZero::new(past_end).unwrap())) };
            assert!(matches!(result, Err(Error::ForeignPointer { .. })));
        }

        assert_eq!(pool.len(), 6);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn failed_growth_leaves_pool_unchanged() {
        // Each block would be 2^60 bytes, which no allocator can provide.
        let mut huge = UnitPool::builder()
            .unit_size(1 << 20)
            .units_per_block(NonZero::new(1 << 40).unwrap())
            .build()
            .unwrap();

        let result = huge.allocate();
        assert!(matches!(result, Err(Error::AllocationFailure { .. })));

        assert_eq!(huge.block_count(), 0);
        assert_eq!(huge.capacity(), 0);
        assert_eq!(huge.len(), 0);
        huge.integrity_check();

        // Failing again is just as clean.
        assert!(matches!(
            huge.allocate(),
            Err(Error::AllocationFailure { .. })
        ));
        assert_eq!(huge.block_count(), 0);

        let mut sane = pool(1 << 20, 1, false);
        let unit = sane.allocate().unwrap();
        unsafe { sane.deallocate(unit) }.unwrap();
    }

    #[test]
    fn foreign_pointer_is_rejected() {
        let mut pool = pool(16, 4, false);
        _ = pool.allocate().unwrap();

        let mut outsider = [0_u64; 4];
        let outsider_ptr = NonNull::from(&mut outsider).cast::<u8>();

        let result = unsafe { pool.deallocate(outsider_ptr) };
        assert!(matches!(result, Err(Error::ForeignPointer { .. })));
    }

    #[test]
    fn misaligned_pointer_into_block_is_rejected() {
        let mut pool = pool(16, 4, false);
        let unit = pool.allocate().unwrap();

        let result = unsafe { pool.deallocate(unit.byte_add(1)) };
        assert!(matches!(result, Err(Error::ForeignPointer { .. })));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn zero_sized_units_are_served() {
        let mut pool = pool(0, 2, true);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a, b);

        unsafe {
            pool.deallocate(a).unwrap();
            pool.deallocate(b).unwrap();
        }
    }

    #[test]
    fn drop_with_outstanding_units_is_fine_by_default() {
        let mut pool = pool(16, 4, false);
        _ = pool.allocate().unwrap();

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn drop_with_outstanding_units_panics_when_forbidden() {
        let mut pool = UnitPool::builder()
            .unit_size(16)
            .teardown_policy(TeardownPolicy::MustBeEmpty)
            .build()
            .unwrap();

        _ = pool.allocate().unwrap();
    }

    #[test]
    fn drop_empty_pool_with_forbidding_policy_is_fine() {
        let mut pool = UnitPool::builder()
            .unit_size(16)
            .teardown_policy(TeardownPolicy::MustBeEmpty)
            .build()
            .unwrap();

        let unit = pool.allocate().unwrap();
        unsafe { pool.deallocate(unit) }.unwrap();
    }

    #[test]
    fn integrity_holds_under_churn() {
        let mut pool = pool(24, 5, true);
        let mut live = Vec::new();

        for round in 0..50_usize {
            if round % 3 == 2 {
                let unit = live.swap_remove(round % live.len());
                unsafe { pool.deallocate(unit) }.unwrap();
            } else {
                live.push(pool.allocate().unwrap());
            }

            pool.integrity_check();
        }

        assert_eq!(pool.len(), live.len());
    }

    #[test]
    fn pool_can_move_between_threads() {
        let mut pool = pool(16, 4, false);
        _ = pool.allocate().unwrap();

        let pool = thread::spawn(move || {
            let mut pool = pool;
            _ = pool.allocate().unwrap();
            pool
        })
        .join()
        .unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.block_count(), 1);
    }
}
