use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::{PoolConfig, Result, TeardownPolicy, UnitPool};

/// A [`UnitPool`] whose units are sized and aligned for one element type.
///
/// This adds nothing to the underlying pool beyond fixing its unit layout to that of `T` and
/// typing the unit pointers. Units are uninitialized storage for one `T` each; placing a value
/// into a unit and dropping it again is up to the caller.
///
/// # Examples
///
/// ```
/// use unit_pool::TypedPool;
///
/// let mut pool = TypedPool::<String>::new();
///
/// let unit = pool.allocate().unwrap();
///
/// // SAFETY: The unit is uninitialized storage for one String that only we access.
/// unsafe {
///     unit.write("pooled".to_string());
///     assert_eq!(unit.as_ref(), "pooled");
///     unit.drop_in_place();
///     pool.deallocate(unit).unwrap();
/// }
/// ```
pub struct TypedPool<T> {
    inner: UnitPool,

    _element: PhantomData<T>,
}

impl<T> TypedPool<T> {
    /// Creates a pool for `T` with the default configuration: 16 units per block, no guards.
    ///
    /// # Panics
    ///
    /// Panics if a block of `T` units cannot be represented in the address space. Use
    /// [`with_config()`][Self::with_config] to handle that case as an error.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PoolConfig::new())
            .expect("default pool configuration must be realizable for any reasonably sized type")
    }

    /// Creates a pool for `T` with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`][crate::Error::InvalidConfiguration] if a block of
    /// `T` units cannot be represented in the address space.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        let inner = UnitPool::builder()
            .layout_of::<T>()
            .units_per_block(config.get_units_per_block())
            .guarded(config.is_guarded())
            .teardown_policy(TeardownPolicy::MayReleaseOutstanding)
            .build()?;

        Ok(Self {
            inner,
            _element: PhantomData,
        })
    }

    /// Hands out storage for one `T`.
    ///
    /// # Errors
    ///
    /// See [`UnitPool::allocate()`].
    pub fn allocate(&mut self) -> Result<NonNull<T>> {
        self.inner.allocate().map(NonNull::cast)
    }

    /// Returns storage for one `T` to the pool.
    ///
    /// The value in the unit, if any, is not dropped.
    ///
    /// # Errors
    ///
    /// See [`UnitPool::deallocate()`].
    ///
    /// # Safety
    ///
    /// See [`UnitPool::deallocate()`].
    pub unsafe fn deallocate(&mut self, unit: NonNull<T>) -> Result<()> {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { self.inner.deallocate(unit.cast()) }
    }

    /// The untyped pool that provides the storage.
    #[must_use]
    pub fn as_unit_pool(&self) -> &UnitPool {
        &self.inner
    }
}

impl<T> Default for TypedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPool")
            .field("element_type", &format_args!("{}", type_name::<T>()))
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::alloc::Layout;

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::Error;

    assert_impl_all!(TypedPool<u64>: Send, fmt::Debug);
    assert_not_impl_any!(TypedPool<u64>: Sync);

    #[test]
    fn unit_layout_matches_element_type() {
        let pool = TypedPool::<(u8, u64)>::new();

        assert_eq!(
            pool.as_unit_pool().unit_layout(),
            Layout::new::<(u8, u64)>()
        );
        assert_eq!(pool.as_unit_pool().units_per_block().get(), 16);
        assert!(!pool.as_unit_pool().is_guarded());
    }

    #[test]
    fn config_is_applied() {
        let config = PoolConfig::new()
            .units_per_block(nz!(2))
            .guarded(true);

        let mut pool = TypedPool::<u32>::with_config(config).unwrap();

        let units: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
        assert!(pool.as_unit_pool().is_guarded());
        assert_eq!(pool.as_unit_pool().block_count(), 2);

        for unit in units {
            unsafe { pool.deallocate(unit) }.unwrap();
        }
    }

    #[test]
    fn values_survive_in_units() {
        let mut pool = TypedPool::<String>::new();

        let hello = pool.allocate().unwrap();
        let world = pool.allocate().unwrap();

        unsafe {
            hello.write("hello".to_string());
            world.write("world".to_string());

            assert_eq!(hello.as_ref(), "hello");
            assert_eq!(world.as_ref(), "world");

            hello.drop_in_place();
            world.drop_in_place();

            pool.deallocate(hello).unwrap();
            pool.deallocate(world).unwrap();
        }

        assert!(pool.as_unit_pool().is_empty());
    }

    #[test]
    fn guarded_overrun_of_element_is_detected() {
        let mut pool =
            TypedPool::<[u8; 7]>::with_config(PoolConfig::new().guarded(true)).unwrap();

        let unit = pool.allocate().unwrap();
        unsafe { unit.cast::<u8>().byte_add(7).write(1) };

        let result = unsafe { pool.deallocate(unit) };
        assert!(matches!(result, Err(Error::GuardCorruption { .. })));
    }

    #[test]
    fn debug_output_names_element_type() {
        let pool = TypedPool::<u16>::new();

        assert!(format!("{pool:?}").contains("u16"));
    }
}
