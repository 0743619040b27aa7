/// Determines what happens to units still handed out when a pool is dropped.
///
/// Either way, dropping the pool releases all of its blocks. The policy only decides whether
/// outstanding units at that point are acceptable.
///
/// # Examples
///
/// ```
/// use unit_pool::{TeardownPolicy, UnitPool};
///
/// let pool = UnitPool::builder()
///     .unit_size(32)
///     .teardown_policy(TeardownPolicy::MustBeEmpty)
///     .build()
///     .unwrap();
/// # drop(pool);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum TeardownPolicy {
    /// The pool releases its blocks even if some units are still in use. This is the default.
    ///
    /// Any pointer to such a unit dangles once the pool is gone.
    #[default]
    MayReleaseOutstanding,

    /// The pool panics if any unit is still in use when it is dropped.
    ///
    /// Useful when unsafe code holds pointers into the pool and every unit is expected to be
    /// released before the pool goes away.
    MustBeEmpty,
}
