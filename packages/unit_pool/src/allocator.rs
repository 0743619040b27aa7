use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::{Error, PoolConfig, Result, TypedPool, registry};

/// Pointer to a value of the element type of the allocator `A`.
pub type Pointer<A> = NonNull<<A as UnitAllocator>::Value>;

/// The allocator contract a container needs to source its element storage from a pool.
///
/// Sizes and counts are `usize`, pointer differences are `isize` and pointers are
/// [`NonNull<Self::Value>`][Pointer].
///
/// Implementations hand out storage for exactly one value per call. They are not
/// general-purpose allocators: a container that needs contiguous storage for several values
/// (e.g. a growable array) cannot use them, while node-based containers (lists, trees, maps
/// built from individually allocated nodes) can.
pub trait UnitAllocator {
    /// The element type this allocator provides storage for.
    type Value;

    /// The equivalent allocator for a different element type.
    ///
    /// Containers use this when the values they store differ from the element type they were
    /// instantiated with, such as a list allocating nodes that wrap its elements.
    type Rebind<U: 'static>: UnitAllocator<Value = U>;

    /// Returns the equivalent allocator for element type `U`.
    #[must_use]
    fn rebind<U: 'static>(&self) -> Self::Rebind<U>;

    /// Allocates uninitialized storage for `count` values.
    ///
    /// # Errors
    ///
    /// * [`Error::UnsupportedCount`] if `count` is not 1.
    /// * [`Error::AllocationFailure`] if the underlying memory could not be acquired.
    fn allocate(&self, count: usize) -> Result<NonNull<Self::Value>>;

    /// Returns storage obtained from [`allocate()`][Self::allocate].
    ///
    /// The value in the storage, if any, is not dropped. Use [`destroy()`][Self::destroy] first.
    ///
    /// # Errors
    ///
    /// * [`Error::UnsupportedCount`] if `count` is not 1.
    /// * Any error of the underlying pool, such as [`Error::GuardCorruption`].
    ///
    /// # Safety
    ///
    /// `pointer` must have been returned by `allocate(count)` of an allocator equal to this one,
    /// on the same thread, and not deallocated since. The storage must not be accessed after
    /// this call returns `Ok`.
    unsafe fn deallocate(&self, pointer: NonNull<Self::Value>, count: usize) -> Result<()>;

    /// Runs the drop logic of the value at `pointer` in place, leaving the storage allocated.
    ///
    /// Putting a value into storage is the caller's responsibility; this is the reverse step.
    ///
    /// # Safety
    ///
    /// `pointer` must point to an initialized value that is not used again after this call.
    unsafe fn destroy(&self, pointer: NonNull<Self::Value>) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            ptr::drop_in_place(pointer.as_ptr());
        }
    }

    /// Returns the address of `value`.
    ///
    /// The pointer is derived from a shared reference, so it must not be used for writing.
    #[must_use]
    fn address(&self, value: &Self::Value) -> NonNull<Self::Value> {
        NonNull::from(value)
    }

    /// Returns the address of `value`, usable for writing.
    #[must_use]
    fn address_mut(&self, value: &mut Self::Value) -> NonNull<Self::Value> {
        NonNull::from(value)
    }
}

/// A stateless [`UnitAllocator`] backed by the current thread's per-type pool from the
/// [`registry`].
///
/// Every `PoolAllocator<T>` on a thread draws from the same [`TypedPool<T>`]. Because the
/// allocator itself holds no state, any two instances are interchangeable and compare equal,
/// even when their element types differ.
///
/// The allocator is neither [`Send`] nor [`Sync`]: storage must be released on the thread that
/// allocated it, because that thread's registry owns the memory.
///
/// # Examples
///
/// ```
/// use unit_pool::{PoolAllocator, UnitAllocator};
///
/// let allocator = PoolAllocator::<u64>::new();
///
/// let storage = allocator.allocate(1).unwrap();
///
/// // SAFETY: The storage is ours, sized and aligned for a u64.
/// unsafe {
///     storage.write(7);
///     assert_eq!(storage.read(), 7);
///     allocator.deallocate(storage, 1).unwrap();
/// }
///
/// // Requests for anything but exactly one value are refused.
/// assert!(allocator.allocate(2).is_err());
/// ```
pub struct PoolAllocator<T> {
    // Raw pointer marker keeps the allocator on the thread whose registry owns the storage.
    _element: PhantomData<*const T>,
}

impl<T: 'static> PoolAllocator<T> {
    /// Creates an allocator for `T`. This is free; all state lives in the registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _element: PhantomData,
        }
    }

    /// Configures the current thread's pool for `T` before its first use.
    ///
    /// # Errors
    ///
    /// See [`registry::configure()`].
    pub fn configure(config: PoolConfig) -> Result<()> {
        registry::configure::<T>(config)
    }
}

impl<T: 'static> UnitAllocator for PoolAllocator<T> {
    type Value = T;
    type Rebind<U: 'static> = PoolAllocator<U>;

    fn rebind<U: 'static>(&self) -> PoolAllocator<U> {
        PoolAllocator::new()
    }

    fn allocate(&self, count: usize) -> Result<NonNull<T>> {
        if count != 1 {
            return Err(Error::UnsupportedCount { count });
        }

        registry::with_pool::<T, _>(TypedPool::allocate)?
    }

    unsafe fn deallocate(&self, pointer: NonNull<T>, count: usize) -> Result<()> {
        if count != 1 {
            return Err(Error::UnsupportedCount { count });
        }

        // SAFETY: Forwarding safety requirements to the caller. Equal allocators on one thread
        // share the registry pool, so the pointer came from this very pool.
        registry::with_pool::<T, _>(|pool| unsafe { pool.deallocate(pointer) })?
    }
}

impl<T: 'static> Default for PoolAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PoolAllocator<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PoolAllocator<T> {}

impl<T> fmt::Debug for PoolAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("element_type", &format_args!("{}", type_name::<T>()))
            .finish()
    }
}

/// All pool allocators are interchangeable, whatever their element types.
impl<T, U> PartialEq<PoolAllocator<U>> for PoolAllocator<T> {
    fn eq(&self, _other: &PoolAllocator<U>) -> bool {
        true
    }
}

impl<T> Eq for PoolAllocator<T> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(PoolAllocator<u32>: Clone, Copy, fmt::Debug, Default, Eq);
    assert_not_impl_any!(PoolAllocator<u32>: Send, Sync);

    #[test]
    fn allocators_of_same_type_are_equal() {
        assert_eq!(PoolAllocator::<u32>::new(), PoolAllocator::<u32>::new());
    }

    #[test]
    fn allocators_of_different_types_are_equal() {
        let strings = PoolAllocator::<String>::new();
        let numbers = PoolAllocator::<u8>::new();

        assert!(strings == numbers);
        assert!(!(strings != numbers));
    }

    #[test]
    fn rebind_targets_other_element_type() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct Node(u64, u64);

        let allocator = PoolAllocator::<u8>::new();
        let rebound: PoolAllocator<Node> = allocator.rebind::<Node>();

        assert!(allocator == rebound);

        let storage = rebound.allocate(1).unwrap();
        assert_eq!(storage.addr().get() % align_of::<Node>(), 0);
        assert_eq!(registry::block_count::<Node>(), 1);

        unsafe { rebound.deallocate(storage, 1) }.unwrap();
    }

    #[test]
    fn multi_unit_requests_are_refused() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct Refused(u32);

        let allocator = PoolAllocator::<Refused>::new();

        assert!(matches!(
            allocator.allocate(0),
            Err(Error::UnsupportedCount { count: 0 })
        ));
        assert!(matches!(
            allocator.allocate(4),
            Err(Error::UnsupportedCount { count: 4 })
        ));

        // Nothing was allocated, so the pool was never even created.
        assert!(!registry::is_initialized::<Refused>());

        let storage = allocator.allocate(1).unwrap();

        assert!(matches!(
            unsafe { allocator.deallocate(storage, 2) },
            Err(Error::UnsupportedCount { count: 2 })
        ));

        unsafe { allocator.deallocate(storage, 1) }.unwrap();
    }

    #[test]
    fn equal_allocators_share_storage() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct SharedStorage(u64);

        let first = PoolAllocator::<SharedStorage>::new();
        let second = first;

        let storage = first.allocate(1).unwrap();
        unsafe { second.deallocate(storage, 1) }.unwrap();

        // LIFO reuse through the shared pool.
        assert_eq!(second.allocate(1).unwrap(), storage);
    }

    #[test]
    fn destroy_runs_drop_logic_in_place() {
        struct Tracked(Rc<Cell<bool>>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let allocator = PoolAllocator::<Tracked>::new();

        let storage = allocator.allocate(1).unwrap();

        unsafe {
            storage.write(Tracked(Rc::clone(&dropped)));
            allocator.destroy(storage);
        }

        assert!(dropped.get());

        unsafe { allocator.deallocate(storage, 1) }.unwrap();
    }

    #[test]
    fn address_is_identity() {
        let allocator = PoolAllocator::<u32>::new();
        let mut value = 5_u32;

        let expected: Pointer<PoolAllocator<u32>> = NonNull::from(&value);
        assert_eq!(allocator.address(&value), expected);
        assert_eq!(allocator.address_mut(&mut value), expected);
    }

    #[test]
    fn debug_output_names_element_type() {
        let allocator = PoolAllocator::<i16>::new();

        assert!(format!("{allocator:?}").contains("i16"));
    }
}
