//! One [`TypedPool`] per element type, per thread.
//!
//! The [`PoolAllocator`][crate::PoolAllocator] adapter carries no state of its own, so every
//! allocator instance for an element type must reach the same pool. This module is where those
//! pools live. Each thread has its own set of pools, so units never cross threads and no
//! synchronization is needed. A pool is created the first time its type is used on a thread
//! (with [`PoolConfig::default()`] unless [`configure()`] was called first) and is torn down
//! when the thread exits, releasing all of its blocks.

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::rc::Rc;

use foldhash::{HashMap, HashMapExt};
use tracing::debug;

use crate::{Error, PoolConfig, Result, TypedPool};

type SharedPool<T> = Rc<RefCell<TypedPool<T>>>;

thread_local! {
    /// Values are `SharedPool<T>` for the `T` identified by the key.
    ///
    /// We use foldhash for better performance with small hash tables.
    static POOLS: RefCell<HashMap<TypeId, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Sets the configuration of the current thread's pool for `T`, creating the pool.
///
/// # Errors
///
/// * [`Error::AlreadyInitialized`] if the pool for `T` already exists on this thread, either
///   because it was configured before or because it was already used.
/// * [`Error::InvalidConfiguration`] if the configuration cannot be realized for `T`.
///
/// # Examples
///
/// ```
/// use unit_pool::{PoolConfig, registry};
///
/// struct Particle {
///     position: [f32; 3],
/// }
///
/// registry::configure::<Particle>(PoolConfig::new().guarded(true)).unwrap();
///
/// // Too late to change anything now.
/// assert!(registry::configure::<Particle>(PoolConfig::new()).is_err());
/// ```
pub fn configure<T: 'static>(config: PoolConfig) -> Result<()> {
    POOLS.with(|pools| {
        let mut pools = pools.borrow_mut();

        if pools.contains_key(&TypeId::of::<T>()) {
            return Err(Error::AlreadyInitialized {
                type_name: type_name::<T>(),
            });
        }

        let pool: SharedPool<T> = Rc::new(RefCell::new(TypedPool::with_config(config)?));
        pools.insert(TypeId::of::<T>(), Box::new(pool));

        debug!(
            element_type = type_name::<T>(),
            ?config,
            "configured per-type pool"
        );

        Ok(())
    })
}

/// Runs `f` against the current thread's pool for `T`, creating the pool with the default
/// configuration if this is the first use.
///
/// `f` may itself use the registry, including for other element types. Using the pool for `T`
/// again from inside `f` panics.
///
/// # Errors
///
/// Returns [`Error::InvalidConfiguration`] if the pool had to be created and the default
/// configuration cannot be realized for `T`.
///
/// # Panics
///
/// Panics if called from a thread-local destructor after the registry of the thread has been
/// torn down.
pub fn with_pool<T: 'static, R>(f: impl FnOnce(&mut TypedPool<T>) -> R) -> Result<R> {
    let pool = shared_pool::<T>()?;
    let mut pool = pool.borrow_mut();

    Ok(f(&mut *pool))
}

/// Whether the current thread's pool for `T` has been created.
#[must_use]
pub fn is_initialized<T: 'static>() -> bool {
    POOLS.with(|pools| pools.borrow().contains_key(&TypeId::of::<T>()))
}

/// The number of blocks the current thread's pool for `T` has acquired, or zero if the pool
/// has not been created.
#[must_use]
pub fn block_count<T: 'static>() -> usize {
    POOLS.with(|pools| {
        pools
            .borrow()
            .get(&TypeId::of::<T>())
            .map_or(0, |pool| {
                downcast::<T>(pool.as_ref())
                    .borrow()
                    .as_unit_pool()
                    .block_count()
            })
    })
}

/// Gets the pool for `T`, creating it if needed. The registry itself is no longer borrowed when
/// this returns, so the caller is free to use the registry again while holding the pool.
fn shared_pool<T: 'static>() -> Result<SharedPool<T>> {
    POOLS.with(|pools| {
        let mut pools = pools.borrow_mut();

        if let Some(pool) = pools.get(&TypeId::of::<T>()) {
            return Ok(Rc::clone(downcast::<T>(pool.as_ref())));
        }

        let pool: SharedPool<T> =
            Rc::new(RefCell::new(TypedPool::with_config(PoolConfig::new())?));
        pools.insert(TypeId::of::<T>(), Box::new(Rc::clone(&pool)));

        debug!(
            element_type = type_name::<T>(),
            "created per-type pool with default configuration"
        );

        Ok(pool)
    })
}

fn downcast<T: 'static>(pool: &dyn Any) -> &SharedPool<T> {
    pool.downcast_ref::<SharedPool<T>>()
        .expect("registry entries are always keyed by the TypeId of their element type")
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use new_zealand::nz;

    use super::*;

    // Every test uses its own element types so that tests running on the same thread
    // (e.g. under a single-threaded test runner) never see each other's pools.

    #[test]
    fn pool_is_created_on_first_use() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct FirstUse(u64);

        assert!(!is_initialized::<FirstUse>());
        assert_eq!(block_count::<FirstUse>(), 0);

        let unit = with_pool::<FirstUse, _>(TypedPool::allocate).unwrap().unwrap();

        assert!(is_initialized::<FirstUse>());
        assert_eq!(block_count::<FirstUse>(), 1);

        with_pool::<FirstUse, _>(|pool| unsafe { pool.deallocate(unit) })
            .unwrap()
            .unwrap();
    }

    #[test]
    fn same_type_shares_one_pool() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct Shared(u32);

        let first = with_pool::<Shared, _>(TypedPool::allocate).unwrap().unwrap();
        with_pool::<Shared, _>(|pool| unsafe { pool.deallocate(first) })
            .unwrap()
            .unwrap();

        // The second call sees the unit released through the first.
        let second = with_pool::<Shared, _>(TypedPool::allocate).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn configuration_applies_before_first_use() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct Configured(u8);

        configure::<Configured>(
            PoolConfig::new()
                .units_per_block(nz!(1))
                .guarded(true),
        )
        .unwrap();

        with_pool::<Configured, _>(|pool| {
            assert!(pool.as_unit_pool().is_guarded());
            _ = pool.allocate().unwrap();
            _ = pool.allocate().unwrap();
        })
        .unwrap();

        assert_eq!(block_count::<Configured>(), 2);
    }

    #[test]
    fn configuration_after_first_use_fails() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct LateConfig(u8);

        with_pool::<LateConfig, _>(|_| ()).unwrap();

        let result = configure::<LateConfig>(PoolConfig::new());
        assert!(matches!(result, Err(Error::AlreadyInitialized { .. })));
    }

    #[test]
    fn pools_are_per_thread() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct PerThread(u16);

        with_pool::<PerThread, _>(TypedPool::allocate)
            .unwrap()
            .unwrap();

        let other_thread_blocks = std::thread::spawn(block_count::<PerThread>)
            .join()
            .unwrap();

        assert_eq!(other_thread_blocks, 0);
        assert_eq!(block_count::<PerThread>(), 1);
    }

    #[test]
    fn nested_use_of_other_types_is_allowed() {
        #[allow(dead_code, reason = "only the layout matters")]
        struct Outer(u64);
        #[allow(dead_code, reason = "only the layout matters")]
        struct Inner(u32);

        with_pool::<Outer, _>(|outer| {
            _ = outer.allocate().unwrap();

            with_pool::<Inner, _>(|inner| {
                _ = inner.allocate().unwrap();
            })
            .unwrap();
        })
        .unwrap();

        assert_eq!(block_count::<Outer>(), 1);
        assert_eq!(block_count::<Inner>(), 1);
    }
}
