use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use crate::{DropPolicy, ObjectPool, RawPool};

/// Builder for creating an instance of [`RawPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`RawPool::new()`] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use slab_pool::{DropPolicy, RawPool};
///
/// let pool = RawPool::<u32>::builder()
///     .drop_policy(DropPolicy::MayDropItems)
///     .build();
/// ```
#[must_use]
pub struct RawPoolBuilder<T, const CAPACITY: usize> {
    drop_policy: DropPolicy,
    initial_capacity: usize,

    _item: PhantomData<T>,
}

impl<T, const CAPACITY: usize> fmt::Debug for RawPoolBuilder<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("slab_capacity", &CAPACITY)
            .field("drop_policy", &self.drop_policy)
            .field("initial_capacity", &self.initial_capacity)
            .finish()
    }
}

impl<T, const CAPACITY: usize> RawPoolBuilder<T, CAPACITY> {
    pub(crate) fn new() -> Self {
        Self {
            drop_policy: DropPolicy::default(),
            initial_capacity: 0,
            _item: PhantomData,
        }
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining cells in the pool when the pool is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Sets the number of cells to allocate up front, rounded up to whole slabs.
    ///
    /// By default, no memory is allocated until the first cell is needed.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the initial capacity cannot be allocated.
    #[must_use]
    pub fn build(self) -> RawPool<T, CAPACITY> {
        let mut pool = RawPool::new_inner(self.drop_policy);
        pool.reserve(self.initial_capacity);
        pool
    }
}

/// Builder for creating an instance of [`ObjectPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`ObjectPool::new()`] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use slab_pool::{DropPolicy, ObjectPool};
///
/// let pool = ObjectPool::<String, 128>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .initial_capacity(1000)
///     .build();
///
/// assert_eq!(pool.capacity(), 1024);
/// ```
#[must_use]
pub struct ObjectPoolBuilder<T, const CAPACITY: usize> {
    raw: RawPoolBuilder<T, CAPACITY>,
}

impl<T, const CAPACITY: usize> fmt::Debug for ObjectPoolBuilder<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPoolBuilder")
            .field("raw", &self.raw)
            .finish()
    }
}

impl<T, const CAPACITY: usize> ObjectPoolBuilder<T, CAPACITY> {
    pub(crate) fn new() -> Self {
        Self {
            raw: RawPoolBuilder::new(),
        }
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining objects in the pool when the pool is dropped.
    pub fn drop_policy(self, policy: DropPolicy) -> Self {
        Self {
            raw: self.raw.drop_policy(policy),
        }
    }

    /// Sets the number of objects to allocate storage for up front, rounded up to whole slabs.
    ///
    /// By default, no memory is allocated until the first object is created.
    pub fn initial_capacity(self, capacity: usize) -> Self {
        Self {
            raw: self.raw.initial_capacity(capacity),
        }
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the initial capacity cannot be allocated.
    #[must_use]
    pub fn build(self) -> ObjectPool<T, CAPACITY> {
        let drop_policy = self.raw.drop_policy;
        ObjectPool::from_raw(self.raw.build(), drop_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_builder_defaults() {
        let pool = RawPoolBuilder::<u32, 4>::new().build();

        assert_eq!(pool.capacity(), 0);
        assert!(format!("{pool:?}").contains("MayDropItems"));
    }

    #[test]
    fn raw_builder_initial_capacity() {
        let pool = RawPool::<u32, 4>::builder().initial_capacity(9).build();

        assert_eq!(pool.capacity(), 12);
        assert_eq!(pool.slab_count(), 3);
    }

    #[test]
    fn object_builder_passes_configuration_through() {
        let builder = ObjectPool::<u32, 4>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .initial_capacity(1);

        assert!(format!("{builder:?}").contains("MustNotDropItems"));

        let pool = builder.build();
        assert_eq!(pool.capacity(), 4);
        assert!(format!("{pool:?}").contains("MustNotDropItems"));
    }
}
