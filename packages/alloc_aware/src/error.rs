use std::alloc::{self, Layout};

use thiserror::Error;

/// An allocator could not satisfy a request for a memory block.
///
/// Containers treat this as fatal unless the caller explicitly opted into a fallible
/// path such as [`SmallVec::try_reserve()`][crate::SmallVec::try_reserve].
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("memory allocation of {} bytes (alignment {}) failed", layout.size(), layout.align())]
#[non_exhaustive]
pub struct AllocError {
    /// The layout of the block that could not be allocated.
    pub layout: Layout,
}

impl AllocError {
    /// Creates an error describing a failed request for `layout`.
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }
}

/// Errors returned by the fallible capacity reservation methods.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum ReserveError {
    /// The requested capacity exceeds what the container can represent.
    #[error("requested capacity {requested} exceeds the container maximum")]
    CapacityOverflow {
        /// The number of elements the caller asked room for.
        requested: usize,
    },

    /// The allocator failed to provide the storage.
    #[error(transparent)]
    AllocFailed(#[from] AllocError),
}

/// Turns a reservation failure on an infallible path into the matching fatal outcome: a panic
/// for a capacity that cannot be represented, process termination for allocation failure.
#[cfg_attr(test, mutants::skip)] // Both outcomes end the test process or thread.
pub(crate) fn fail_reserve(error: ReserveError) -> ! {
    match error {
        ReserveError::CapacityOverflow { requested } => {
            panic!("requested capacity {requested} exceeds the container maximum")
        }
        ReserveError::AllocFailed(error) => alloc::handle_alloc_error(error.layout),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AllocError: Send, Sync, Debug, Copy);
    assert_impl_all!(ReserveError: Send, Sync, Debug, Copy);

    #[test]
    fn alloc_error_mentions_layout() {
        let error = AllocError::new(Layout::from_size_align(64, 16).unwrap());

        let message = error.to_string();
        assert!(message.contains("64 bytes"));
        assert!(message.contains("alignment 16"));
    }

    #[test]
    fn alloc_error_converts_into_reserve_error() {
        let layout = Layout::new::<u64>();
        let error: ReserveError = AllocError::new(layout).into();

        assert_eq!(error, ReserveError::AllocFailed(AllocError { layout }));
        assert_eq!(error.to_string(), AllocError::new(layout).to_string());
    }

    #[test]
    fn capacity_overflow_reports_request() {
        let error = ReserveError::CapacityOverflow { requested: 12345 };
        assert!(error.to_string().contains("12345"));
    }
}
