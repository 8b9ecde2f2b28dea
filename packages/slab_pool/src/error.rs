use thiserror::Error;

/// Errors that can occur when reserving capacity in a pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReserveError {
    /// The requested capacity, rounded up to whole slabs, does not fit in `usize`.
    #[error("cannot reserve capacity for {requested} objects: capacity overflow")]
    CapacityOverflow {
        /// The capacity that was requested.
        requested: usize,
    },

    /// The memory allocator could not provide the storage for another slab.
    #[error("failed to allocate {slab_bytes} bytes of storage for a new slab")]
    AllocationFailed {
        /// Size of the storage of one slab.
        slab_bytes: usize,
    },
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(ReserveError: Send, Sync, Debug);

    #[test]
    fn capacity_overflow_mentions_request() {
        let error = ReserveError::CapacityOverflow { requested: 1234 };

        assert!(error.to_string().contains("1234"));
    }

    #[test]
    fn allocation_failed_mentions_size() {
        let error = ReserveError::AllocationFailed { slab_bytes: 4096 };

        assert!(error.to_string().contains("4096"));
    }
}
