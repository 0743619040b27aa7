use std::fmt;
use std::ptr::NonNull;

/// Value written immediately before the payload of every guarded unit.
pub const HEADER_SENTINEL: u32 = 0x5555_5555;

/// Value written immediately after the last requested byte of every guarded unit.
pub const TRAILER_SENTINEL: u32 = 0xAAAA_AAAA;

/// Value written over both sentinels when a guarded unit is released, so that releasing it
/// again fails verification no matter where the free-list link lands in the slot.
pub(crate) const RELEASED_SENTINEL: u32 = 0xDEAD_DEAD;

/// Width in bytes of one sentinel.
pub(crate) const SENTINEL_WIDTH: usize = size_of::<u32>();

/// Identifies which end of a guarded unit failed verification on release.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Boundary {
    /// The sentinel before the payload was overwritten (underrun).
    Header,

    /// The sentinel after the payload was overwritten (overrun).
    Trailer,

    /// Both sentinels were overwritten. Releasing a unit twice produces this, because release
    /// replaces both sentinels with a marker that is neither sentinel value.
    Both,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => f.write_str("header"),
            Self::Trailer => f.write_str("trailer"),
            Self::Both => f.write_str("header and trailer"),
        }
    }
}

/// Placement of the sentinels and the payload inside one guarded slot.
///
/// ```text
/// slot start
/// |
/// [padding][header][payload: requested size][trailer][slack]
///                  ^
///                  payload start = slot start + payload_offset
/// ```
///
/// The padding is empty unless the payload alignment exceeds the sentinel width.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct GuardLayout {
    payload_offset: usize,
    requested_size: usize,
}

impl GuardLayout {
    /// # Panics
    ///
    /// Panics if `payload_align` is not a power of two.
    #[must_use]
    pub(crate) fn new(requested_size: usize, payload_align: usize) -> Self {
        assert!(
            payload_align.is_power_of_two(),
            "payload alignment {payload_align} is not a power of two"
        );

        Self {
            payload_offset: SENTINEL_WIDTH.next_multiple_of(payload_align),
            requested_size,
        }
    }

    /// Distance from the slot start to the payload start.
    #[must_use]
    pub(crate) fn payload_offset(self) -> usize {
        self.payload_offset
    }

    /// Bytes a guarded slot needs on top of its payload storage.
    #[must_use]
    pub(crate) fn overhead(self) -> usize {
        // Cannot overflow: the offset is bounded by the payload alignment, which is bounded by
        // the size of virtual memory, so adding a few bytes is safe.
        self.payload_offset.wrapping_add(SENTINEL_WIDTH)
    }

    /// Writes both sentinels into a slot that is being handed out and returns the payload start.
    ///
    /// # Safety
    ///
    /// `slot` must point to the start of a slot of at least
    /// `requested_size + overhead()` writable bytes that no one else is accessing.
    #[must_use]
    pub(crate) unsafe fn arm(self, slot: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            self.write_sentinels(slot, HEADER_SENTINEL, TRAILER_SENTINEL);
        }

        // SAFETY: The caller guarantees the slot is large enough to contain the payload offset.
        unsafe { slot.byte_add(self.payload_offset) }
    }

    /// Overwrites both sentinels of a slot that is being released with [`RELEASED_SENTINEL`].
    ///
    /// # Safety
    ///
    /// Same requirements as [`arm()`][Self::arm].
    pub(crate) unsafe fn disarm(self, slot: NonNull<u8>) {
        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            self.write_sentinels(slot, RELEASED_SENTINEL, RELEASED_SENTINEL);
        }
    }

    /// Reads both sentinels of the slot that starts at `slot`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`arm()`][Self::arm], except that the bytes need only be readable.
    #[must_use]
    pub(crate) unsafe fn read(self, slot: NonNull<u8>) -> Sentinels {
        // SAFETY: Forwarding the caller's guarantee that the slot is large enough.
        let payload = unsafe { slot.byte_add(self.payload_offset) };

        // SAFETY: The payload is at `payload_offset` inside the slot, which is what the header
        // position requires. Any bit pattern is a valid `u32`.
        let header = unsafe { Self::header_ptr(payload).read_unaligned() };

        // SAFETY: The slot holds the requested size plus the trailer past the payload.
        let trailer = unsafe { self.trailer_ptr(payload).read_unaligned() };

        Sentinels { header, trailer }
    }

    /// # Safety
    ///
    /// Same requirements as [`arm()`][Self::arm].
    unsafe fn write_sentinels(self, slot: NonNull<u8>, header: u32, trailer: u32) {
        // SAFETY: The caller guarantees the slot is large enough to contain the payload offset.
        let payload = unsafe { slot.byte_add(self.payload_offset) };

        // SAFETY: The header sits inside the slot, between the slot start and the payload.
        // Sentinel positions are not necessarily aligned, hence the unaligned write.
        unsafe {
            Self::header_ptr(payload).write_unaligned(header);
        }

        // SAFETY: The trailer ends at `payload_offset + requested_size + SENTINEL_WIDTH`, which
        // the caller guarantees is within the slot.
        unsafe {
            self.trailer_ptr(payload).write_unaligned(trailer);
        }
    }

    /// # Safety
    ///
    /// `payload` must be at least `payload_offset` bytes past the start of a slot of this
    /// layout, so that the header position is still inside the slot.
    unsafe fn header_ptr(payload: NonNull<u8>) -> NonNull<u32> {
        // SAFETY: The payload offset is at least one sentinel wide and the caller guarantees the
        // payload lies that far into the slot.
        unsafe { payload.byte_sub(SENTINEL_WIDTH).cast::<u32>() }
    }

    /// # Safety
    ///
    /// `payload` must be followed by at least `requested_size + SENTINEL_WIDTH` bytes of the
    /// same slot.
    unsafe fn trailer_ptr(self, payload: NonNull<u8>) -> NonNull<u32> {
        // SAFETY: The caller guarantees the trailer position is inside the slot.
        unsafe { payload.byte_add(self.requested_size).cast::<u32>() }
    }
}

/// The sentinel values found around a unit's payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Sentinels {
    header: u32,
    trailer: u32,
}

impl Sentinels {
    /// Checks both boundaries independently.
    pub(crate) fn verify(self) -> Result<(), Boundary> {
        match (self.header == HEADER_SENTINEL, self.trailer == TRAILER_SENTINEL) {
            (true, true) => Ok(()),
            (false, true) => Err(Boundary::Header),
            (true, false) => Err(Boundary::Trailer),
            (false, false) => Err(Boundary::Both),
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
    use super::*;

    #[test]
    fn payload_follows_one_sentinel_for_small_alignment() {
        assert_eq!(GuardLayout::new(4, 1).payload_offset(), SENTINEL_WIDTH);
        assert_eq!(GuardLayout::new(4, 4).payload_offset(), SENTINEL_WIDTH);
        assert_eq!(GuardLayout::new(4, 4).overhead(), 2 * SENTINEL_WIDTH);
    }

    #[test]
    fn payload_offset_respects_large_alignment() {
        assert_eq!(GuardLayout::new(16, 16).payload_offset(), 16);
        assert_eq!(GuardLayout::new(16, 16).overhead(), 20);
    }

    #[test]
    fn armed_slot_verifies() {
        let mut slot = [0_u8; 16];
        let layout = GuardLayout::new(6, 1);
        let slot_ptr = NonNull::from(&mut slot).cast::<u8>();

        let payload = unsafe { layout.arm(slot_ptr) };
        assert_eq!(payload, unsafe { slot_ptr.byte_add(SENTINEL_WIDTH) });

        assert_eq!(unsafe { layout.read(slot_ptr) }.verify(), Ok(()));
    }

    #[test]
    fn overwritten_trailer_is_reported() {
        let mut slot = [0_u8; 16];
        let layout = GuardLayout::new(6, 1);
        let slot_ptr = NonNull::from(&mut slot).cast::<u8>();

        let payload = unsafe { layout.arm(slot_ptr) };
        unsafe {
            payload.byte_add(6).write(0);
        }

        assert_eq!(
            unsafe { layout.read(slot_ptr) }.verify(),
            Err(Boundary::Trailer)
        );
    }

    #[test]
    fn overwritten_header_is_reported() {
        let mut slot = [0_u8; 16];
        let layout = GuardLayout::new(6, 1);
        let slot_ptr = NonNull::from(&mut slot).cast::<u8>();

        let payload = unsafe { layout.arm(slot_ptr) };
        unsafe {
            payload.byte_sub(1).write(0);
        }

        assert_eq!(
            unsafe { layout.read(slot_ptr) }.verify(),
            Err(Boundary::Header)
        );
    }

    #[test]
    fn unarmed_slot_fails_both_boundaries() {
        let slot = [0_u8; 16];
        let layout = GuardLayout::new(6, 1);
        let slot_ptr = NonNull::from(&slot).cast::<u8>();

        assert_eq!(unsafe { layout.read(slot_ptr) }.verify(), Err(Boundary::Both));
    }

    #[test]
    fn disarmed_slot_fails_both_boundaries() {
        let mut slot = [0_u8; 48];
        let layout = GuardLayout::new(16, 16);
        let slot_ptr = NonNull::from(&mut slot).cast::<u8>();

        _ = unsafe { layout.arm(slot_ptr) };
        unsafe { layout.disarm(slot_ptr) };

        assert_eq!(unsafe { layout.read(slot_ptr) }.verify(), Err(Boundary::Both));

        // Re-arming restores a verifiable slot.
        _ = unsafe { layout.arm(slot_ptr) };
        assert_eq!(unsafe { layout.read(slot_ptr) }.verify(), Ok(()));
    }

    #[test]
    fn boundary_display_names() {
        assert_eq!(Boundary::Header.to_string(), "header");
        assert_eq!(Boundary::Trailer.to_string(), "trailer");
        assert_eq!(Boundary::Both.to_string(), "header and trailer");
    }
}
