use std::alloc::Layout;

use thiserror::Error;

use crate::Boundary;

/// Errors that can occur when allocating or releasing pool units.
///
/// None of these are transient: each one signals either memory exhaustion or a defect in the
/// calling code, so nothing in this crate retries after receiving one.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Acquiring a new block or growing the block table failed.
    ///
    /// The pool is left exactly as it was before the failed growth attempt.
    #[error("failed to acquire {} bytes of pool memory", layout.size())]
    AllocationFailure {
        /// The layout of the memory request that could not be satisfied.
        layout: Layout,
    },

    /// A guard sentinel around a unit did not hold its expected value when the unit was released.
    ///
    /// This typically means the caller wrote past either end of the unit or released it twice.
    /// The unit is not returned to the free list.
    #[error("guard sentinel corrupted at the {boundary} of the unit at {address:#x}")]
    GuardCorruption {
        /// Which boundary (or boundaries) of the unit failed verification.
        boundary: Boundary,

        /// The payload address that was passed for release.
        address: usize,
    },

    /// An address was passed for release that is not a unit handed out by this pool.
    #[error("address {address:#x} is not a unit of this pool")]
    ForeignPointer {
        /// The address that was passed for release.
        address: usize,
    },

    /// The allocator adapter was asked to allocate or release anything but exactly one unit.
    #[error("only single-unit requests are supported, got a request for {count} units")]
    UnsupportedCount {
        /// The number of units requested.
        count: usize,
    },

    /// A per-type pool was configured after it had already been created.
    #[error("the pool for {type_name} has already been initialized")]
    AlreadyInitialized {
        /// Name of the element type whose pool was already in use.
        type_name: &'static str,
    },

    /// The requested pool configuration cannot be realized.
    #[error("invalid pool configuration: {problem}")]
    InvalidConfiguration {
        /// A human-readable description of the problem.
        problem: String,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn guard_corruption_names_boundary() {
        let error = Error::GuardCorruption {
            boundary: Boundary::Trailer,
            address: 0x1000,
        };

        let message = error.to_string();
        assert!(message.contains("trailer"));
        assert!(message.contains("0x1000"));
    }

    #[test]
    fn allocation_failure_reports_size() {
        let error = Error::AllocationFailure {
            layout: Layout::from_size_align(64, 8).unwrap(),
        };

        assert!(error.to_string().contains("64 bytes"));
    }

    #[test]
    fn unsupported_count_reports_count() {
        let error = Error::UnsupportedCount { count: 3 };

        let result: Result<()> = Err(error);
        assert!(matches!(result, Err(Error::UnsupportedCount { count: 3 })));
    }
}
