use std::num::NonZero;

/// Location of a slot within the pool, split into the block that holds it and
/// the position of the slot inside that block.
///
/// The free list stores slots as flat indices (`block * units_per_block + slot`), which is
/// what fits into the first word of a vacant slot. Coordinates are the unpacked form.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotCoordinates {
    block_index: usize,
    index_in_block: usize,
}

impl SlotCoordinates {
    #[must_use]
    pub(crate) fn from_parts(block_index: usize, index_in_block: usize) -> Self {
        Self {
            block_index,
            index_in_block,
        }
    }

    /// Unpacks a flat slot index.
    #[must_use]
    #[allow(
        clippy::integer_division,
        clippy::modulo_arithmetic,
        reason = "flat index packing is integer arithmetic by definition"
    )]
    pub(crate) fn from_flat(flat_index: usize, units_per_block: NonZero<usize>) -> Self {
        Self {
            block_index: flat_index / units_per_block,
            index_in_block: flat_index % units_per_block,
        }
    }

    /// Packs the coordinates into a flat slot index.
    ///
    /// # Panics
    ///
    /// Panics if the flat index does not fit into `usize`. This cannot happen for slots that
    /// exist in memory, as that would imply a pool larger than virtual memory.
    #[must_use]
    pub(crate) fn to_flat(self, units_per_block: NonZero<usize>) -> usize {
        self.block_index
            .checked_mul(units_per_block.get())
            .and_then(|base| base.checked_add(self.index_in_block))
            .expect("flat slot index cannot exceed the size of virtual memory")
    }

    /// Index of the block containing the slot.
    #[must_use]
    pub(crate) fn block_index(self) -> usize {
        self.block_index
    }

    /// Index of the slot within its block.
    #[must_use]
    pub(crate) fn index_in_block(self) -> usize {
        self.index_in_block
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;

    const UNITS: NonZero<usize> = nz!(16);

    #[test]
    fn flat_index_unpacks_into_block_and_slot() {
        let coordinates = SlotCoordinates::from_flat(35, UNITS);

        assert_eq!(coordinates.block_index(), 2);
        assert_eq!(coordinates.index_in_block(), 3);
    }

    #[test]
    fn coordinates_pack_back_to_flat_index() {
        let coordinates = SlotCoordinates::from_parts(4, 15);

        assert_eq!(coordinates.to_flat(UNITS), 79);
        assert_eq!(SlotCoordinates::from_flat(79, UNITS), coordinates);
    }

    #[test]
    fn first_slot_of_first_block_is_zero() {
        assert_eq!(SlotCoordinates::from_parts(0, 0).to_flat(UNITS), 0);
    }
}
