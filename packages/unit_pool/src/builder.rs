use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{DEFAULT_UNITS_PER_BLOCK, Error, Result, TeardownPolicy, UnitPool};

/// Builder for creating an instance of [`UnitPool`].
///
/// The unit size is mandatory. Use `.unit_size()` for a plain byte count, `.layout()` for a
/// specific layout or `.layout_of::<T>()` to take the layout of a type. Everything else is
/// optional:
///
/// * units per block defaults to [`DEFAULT_UNITS_PER_BLOCK`].
/// * guarding is off by default.
/// * the teardown policy defaults to [`TeardownPolicy::MayReleaseOutstanding`].
///
/// # Examples
///
/// ```
/// use unit_pool::UnitPool;
///
/// let pool = UnitPool::builder().unit_size(48).guarded(true).build().unwrap();
///
/// assert_eq!(pool.unit_layout().size(), 48);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct UnitPoolBuilder {
    unit_layout: Option<Layout>,
    units_per_block: NonZero<usize>,
    guarded: bool,
    teardown_policy: TeardownPolicy,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl UnitPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            unit_layout: None,
            units_per_block: DEFAULT_UNITS_PER_BLOCK,
            guarded: false,
            teardown_policy: TeardownPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the size in bytes of each unit, with no alignment requirement beyond the one every
    /// slot has anyway (that of a `usize`).
    ///
    /// # Panics
    ///
    /// Panics if `size` exceeds `isize::MAX`.
    #[inline]
    pub fn unit_size(mut self, size: usize) -> Self {
        self.unit_layout = Some(
            Layout::from_size_align(size, 1)
                .expect("a byte array layout is valid for any size that fits in isize"),
        );
        self
    }

    /// Sets the memory layout of each unit.
    #[inline]
    pub fn layout(mut self, layout: Layout) -> Self {
        self.unit_layout = Some(layout);
        self
    }

    /// Sets the memory layout of each unit to the layout of `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use unit_pool::UnitPool;
    ///
    /// let pool = UnitPool::builder().layout_of::<[u16; 5]>().build().unwrap();
    ///
    /// assert_eq!(pool.unit_layout(), Layout::new::<[u16; 5]>());
    /// ```
    #[inline]
    pub fn layout_of<T>(mut self) -> Self {
        self.unit_layout = Some(Layout::new::<T>());
        self
    }

    /// Sets how many units each block holds. Every time the pool runs out of vacant units, it
    /// acquires one block of this many units.
    #[inline]
    pub fn units_per_block(mut self, units_per_block: NonZero<usize>) -> Self {
        self.units_per_block = units_per_block;
        self
    }

    /// Enables or disables guard sentinels around every unit.
    ///
    /// Guarded units cost a few extra bytes each and are verified on release. See
    /// [`UnitPool`] for details.
    #[inline]
    pub fn guarded(mut self, guarded: bool) -> Self {
        self.guarded = guarded;
        self
    }

    /// Sets the [teardown policy][TeardownPolicy] for the pool. This governs how to treat
    /// units that are still handed out when the pool is dropped.
    #[inline]
    pub fn teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.teardown_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if no unit size was set or if the resulting slot
    /// or block sizes cannot be represented.
    pub fn build(self) -> Result<UnitPool> {
        let unit_layout = self.unit_layout.ok_or_else(|| Error::InvalidConfiguration {
            problem: "unit size must be set using .unit_size(), .layout() or .layout_of::<T>()"
                .to_string(),
        })?;

        UnitPool::new_inner(
            unit_layout,
            self.units_per_block,
            self.guarded,
            self.teardown_policy,
        )
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(UnitPoolBuilder: Send, std::fmt::Debug);
    assert_not_impl_any!(UnitPoolBuilder: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = UnitPoolBuilder::new();

        assert!(builder.unit_layout.is_none());
        assert_eq!(builder.units_per_block, DEFAULT_UNITS_PER_BLOCK);
        assert!(!builder.guarded);
        assert_eq!(builder.teardown_policy, TeardownPolicy::default());
    }

    #[test]
    fn default_units_per_block_is_sixteen() {
        assert_eq!(DEFAULT_UNITS_PER_BLOCK.get(), 16);
    }

    #[test]
    fn unit_size_sets_byte_layout() {
        let builder = UnitPoolBuilder::new().unit_size(12);

        assert_eq!(builder.unit_layout, Some(Layout::from_size_align(12, 1).unwrap()));
    }

    #[test]
    fn later_layout_setting_wins() {
        let builder = UnitPoolBuilder::new()
            .unit_size(3)
            .layout_of::<u64>()
            .layout(Layout::new::<u16>());

        assert_eq!(builder.unit_layout, Some(Layout::new::<u16>()));
    }

    #[test]
    fn build_applies_every_setting() {
        let pool = UnitPoolBuilder::new()
            .layout_of::<u32>()
            .units_per_block(nz!(5))
            .guarded(true)
            .teardown_policy(TeardownPolicy::MustBeEmpty)
            .build()
            .unwrap();

        assert_eq!(pool.unit_layout(), Layout::new::<u32>());
        assert_eq!(pool.units_per_block().get(), 5);
        assert!(pool.is_guarded());
        assert_eq!(pool.teardown_policy(), TeardownPolicy::MustBeEmpty);
    }

    #[test]
    fn build_without_unit_size_fails() {
        let result = UnitPoolBuilder::new().guarded(true).build();

        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn build_with_overflowing_block_fails() {
        let result = UnitPoolBuilder::new()
            .unit_size(1 << 20)
            .units_per_block(NonZero::new(usize::MAX).unwrap())
            .build();

        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn builder_can_move_between_threads() {
        let builder = UnitPoolBuilder::new().layout_of::<u64>();

        let pool = std::thread::spawn(move || builder.build())
            .join()
            .unwrap()
            .unwrap();

        assert!(pool.is_empty());
    }
}
