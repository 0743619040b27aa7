use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{Error, Result};

/// Free-list link value meaning "no next free slot".
const END_OF_LIST: usize = usize::MAX;

/// One raw buffer holding a fixed number of equally-sized slots.
///
/// The buffer is acquired once and never moves or resizes, so slot addresses stay valid for
/// the lifetime of the block, no matter what happens to the table that owns the block.
///
/// # Out of band access
///
/// The block does not create or keep references to its memory. Callers receive raw pointers to
/// slots and may access them from unsafe code while the block is alive.
#[derive(Debug)]
pub(crate) struct Block {
    base: NonNull<u8>,
    layout: Layout,
}

impl Block {
    /// Acquires the raw memory for a new block.
    ///
    /// The contents of the block are uninitialized.
    ///
    /// # Panics
    ///
    /// Panics if the layout is zero-sized.
    pub(crate) fn acquire(layout: Layout) -> Result<Self> {
        assert!(layout.size() > 0, "Block must have non-zero size");

        // SAFETY: The layout is valid and not zero-sized (guarded by assertion above).
        let base = NonNull::new(unsafe { alloc(layout) })
            .ok_or(Error::AllocationFailure { layout })?;

        Ok(Self { base, layout })
    }

    /// Writes a free-list link into every slot, chaining slot `k` to slot `k + 1` and giving the
    /// last slot no successor. Links are flat slot indices starting at `first_flat_index`.
    #[allow(
        clippy::needless_pass_by_ref_mut,
        reason = "writes go through raw pointers into memory the block owns"
    )]
    pub(crate) fn thread_free_list(
        &mut self,
        slot_size: usize,
        units: NonZero<usize>,
        first_flat_index: usize,
    ) {
        let last = units.get().wrapping_sub(1);

        for index in 0..units.get() {
            let next = if index == last {
                None
            } else {
                // Cannot overflow: flat indices of existing slots are bounded by virtual memory.
                Some(first_flat_index.wrapping_add(index).wrapping_add(1))
            };

            // SAFETY: We own the block exclusively (&mut self) and the slot is in bounds.
            unsafe {
                write_link(self.slot_ptr(index, slot_size), next);
            }
        }
    }

    /// Returns a pointer to the start of the slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not lie entirely inside the block.
    #[must_use]
    pub(crate) fn slot_ptr(&self, index: usize, slot_size: usize) -> NonNull<u8> {
        let offset = index
            .checked_mul(slot_size)
            .filter(|offset| offset.saturating_add(slot_size) <= self.layout.size())
            .unwrap_or_else(|| {
                panic!(
                    "slot {index} of size {slot_size} is out of bounds in block of {} bytes",
                    self.layout.size()
                )
            });

        // SAFETY: Bounds checked above, so the result is inside our allocation.
        unsafe { self.base.byte_add(offset) }
    }

    /// Address of the first byte of the block.
    #[must_use]
    pub(crate) fn base_address(&self) -> usize {
        self.base.addr().get()
    }

    /// If `address` is the start of a slot of this block, returns the index of that slot.
    #[must_use]
    #[allow(
        clippy::integer_division,
        clippy::modulo_arithmetic,
        reason = "slot position arithmetic, divisor is a non-zero slot size"
    )]
    pub(crate) fn slot_index_of(&self, address: usize, slot_size: usize) -> Option<usize> {
        let offset = address.checked_sub(self.base_address())?;

        if offset >= self.layout.size() || slot_size == 0 || offset % slot_size != 0 {
            return None;
        }

        Some(offset / slot_size)
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: The memory was allocated in `acquire()` with the same layout and is released
        // exactly once, here.
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

// SAFETY: The block is a plain owned allocation with no thread-affine state. Whoever holds the
// block may move it to another thread; access to the slots is governed by the owning pool.
unsafe impl Send for Block {}

/// Stores the free-list successor of a vacant slot in the slot's first word.
///
/// # Safety
///
/// `slot` must point to a vacant slot that is at least one `usize` large and aligned for `usize`.
pub(crate) unsafe fn write_link(slot: NonNull<u8>, next: Option<usize>) {
    // SAFETY: Forwarding the caller's guarantees.
    unsafe {
        slot.cast::<usize>().write(next.unwrap_or(END_OF_LIST));
    }
}

/// Reads the free-list successor of a vacant slot.
///
/// # Safety
///
/// `slot` must point to a vacant slot whose link was written by [`write_link()`].
#[must_use]
pub(crate) unsafe fn read_link(slot: NonNull<u8>) -> Option<usize> {
    // SAFETY: Forwarding the caller's guarantees.
    let raw = unsafe { slot.cast::<usize>().read() };

    (raw != END_OF_LIST).then_some(raw)
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(Block: Send);
    assert_not_impl_any!(Block: Sync);

    const SLOT: usize = 16;
    const UNITS: NonZero<usize> = nz!(4);

    fn block_layout() -> Layout {
        Layout::from_size_align(SLOT * UNITS.get(), align_of::<usize>()).unwrap()
    }

    #[test]
    fn threaded_block_links_slots_in_order() {
        let mut block = Block::acquire(block_layout()).unwrap();
        block.thread_free_list(SLOT, UNITS, 8);

        for index in 0..3 {
            let link = unsafe { read_link(block.slot_ptr(index, SLOT)) };
            assert_eq!(link, Some(8 + index + 1));
        }

        assert_eq!(unsafe { read_link(block.slot_ptr(3, SLOT)) }, None);
    }

    #[test]
    fn slot_index_of_recognizes_slot_starts_only() {
        let block = Block::acquire(block_layout()).unwrap();
        let base = block.slot_ptr(0, SLOT).addr().get();
        assert_eq!(block.base_address(), base);

        assert_eq!(block.slot_index_of(base, SLOT), Some(0));
        assert_eq!(block.slot_index_of(base + 2 * SLOT, SLOT), Some(2));
        assert_eq!(block.slot_index_of(base + 1, SLOT), None);
        assert_eq!(block.slot_index_of(base + 4 * SLOT, SLOT), None);
        assert_eq!(block.slot_index_of(base.wrapping_sub(SLOT), SLOT), None);
    }

    #[test]
    fn slots_do_not_overlap() {
        let block = Block::acquire(block_layout()).unwrap();

        let first = block.slot_ptr(0, SLOT).addr().get();
        let second = block.slot_ptr(1, SLOT).addr().get();

        assert_eq!(second - first, SLOT);
    }

    #[test]
    #[should_panic]
    fn slot_out_of_bounds_panics() {
        let block = Block::acquire(block_layout()).unwrap();

        _ = block.slot_ptr(4, SLOT);
    }

    #[test]
    fn link_round_trips_end_marker() {
        let block = Block::acquire(block_layout()).unwrap();
        let slot = block.slot_ptr(1, SLOT);

        unsafe { write_link(slot, None) };
        assert_eq!(unsafe { read_link(slot) }, None);

        unsafe { write_link(slot, Some(0)) };
        assert_eq!(unsafe { read_link(slot) }, Some(0));
    }
}
