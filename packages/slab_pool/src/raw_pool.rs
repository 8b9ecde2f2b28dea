use std::any::type_name;
use std::iter::FusedIterator;
use std::ptr::NonNull;
use std::{fmt, mem, thread};

use tracing::{debug, trace};

use crate::directory::Directory;
use crate::slab::{LiveIndices, Slab};
use crate::{DEFAULT_SLAB_CAPACITY, DropPolicy, RawCursorMut, RawPoolBuilder, ReserveError};

/// An untyped allocator that hands out storage for objects of type `T`.
///
/// Storage is organized into slabs of `CAPACITY` cells, allocated from the global allocator one
/// slab at a time as the pool grows. Every pointer returned by [`alloc()`][Self::alloc] remains
/// valid and at the same address until it is given back via [`free()`][Self::free] or the pool
/// is cleared, shrunk away or dropped.
///
/// The pool only manages storage. It does not know whether an allocated cell holds an
/// initialized object, so it never runs destructors on its own. For a pool that owns its objects,
/// see [`ObjectPool`][crate::ObjectPool].
///
/// Both allocation and deallocation take constant time. Deallocation locates the slab that owns a
/// pointer by its address, without any per-object header.
///
/// # Example
///
/// ```rust
/// use slab_pool::RawPool;
///
/// let mut pool = RawPool::<u64>::new();
///
/// let ptr = pool.alloc().expect("out of memory");
///
/// // SAFETY: The cell is freshly allocated, so it is valid for writes of a u64.
/// unsafe {
///     ptr.write(42);
/// }
///
/// assert_eq!(pool.len(), 1);
/// assert!(pool.contains(ptr));
///
/// pool.free(ptr);
/// assert!(pool.is_empty());
/// ```
///
/// # Thread safety
///
/// The pool is `Send` if `T` is `Send`. It is never `Sync` - all access requires an exclusive or
/// shared reference on one thread at a time, the same as for any other collection.
pub struct RawPool<T, const CAPACITY: usize = DEFAULT_SLAB_CAPACITY> {
    /// The position of a slab in this list is its slab index.
    slabs: Vec<Slab<T, CAPACITY>>,

    directory: Directory,

    /// Indices of the slabs that have at least one free cell. Every such slab is in the list
    /// exactly once and the one on top is where we allocate from.
    spare: Vec<usize>,

    /// Cached copy of the top of `spare`, so the fast path does not need to touch the list.
    current: Option<usize>,

    len: usize,

    drop_policy: DropPolicy,
}

impl<T, const CAPACITY: usize> RawPool<T, CAPACITY> {
    /// Creates an empty pool with the default configuration.
    ///
    /// No memory is allocated until the first object is allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::RawPool;
    ///
    /// let pool = RawPool::<String>::new();
    ///
    /// assert_eq!(pool.capacity(), 0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`RawPool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::{DropPolicy, RawPool};
    ///
    /// let pool = RawPool::<u32, 64>::builder()
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .initial_capacity(100)
    ///     .build();
    ///
    /// // Capacity is rounded up to whole slabs.
    /// assert_eq!(pool.capacity(), 128);
    /// ```
    pub fn builder() -> RawPoolBuilder<T, CAPACITY> {
        RawPoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(drop_policy: DropPolicy) -> Self {
        let () = Slab::<T, CAPACITY>::CAPACITY_CHECK;

        Self {
            slabs: Vec::new(),
            directory: Directory::new(Slab::<T, CAPACITY>::storage_bytes()),
            spare: Vec::new(),
            current: None,
            len: 0,
            drop_policy,
        }
    }

    /// Number of allocated cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the pool has no allocated cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of cells the pool can hand out before it needs to allocate another slab.
    ///
    /// This is the total number of cells in all slabs, allocated or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slabs
            .len()
            .checked_mul(CAPACITY)
            .expect("capacity cannot exceed the size of virtual memory")
    }

    /// Number of slabs currently owned by the pool.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Allocates storage for one object.
    ///
    /// The returned pointer is aligned and valid for reads and writes of `T` until it is given
    /// back via [`free()`][Self::free] or the pool is cleared or dropped. The storage is
    /// uninitialized.
    ///
    /// Returns `None` if a new slab was needed and the memory allocator could not provide it.
    /// In that case the pool is unchanged.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::RawPool;
    ///
    /// let mut pool = RawPool::<u32>::new();
    ///
    /// let a = pool.alloc().expect("out of memory");
    /// let b = pool.alloc().expect("out of memory");
    ///
    /// assert_ne!(a, b);
    /// assert_eq!(pool.len(), 2);
    /// # pool.free(a);
    /// # pool.free(b);
    /// ```
    #[must_use]
    pub fn alloc(&mut self) -> Option<NonNull<T>> {
        let slab_index = match self.current {
            Some(slab_index) => slab_index,
            None => self.add_slab()?,
        };

        let slab = self
            .slabs
            .get_mut(slab_index)
            .expect("current slab index must always point to an existing slab");

        let ptr = slab.allocate();

        if slab.is_full() {
            // The current slab is always the top of the spare list.
            self.spare.pop();
            self.current = self.spare.last().copied();
        }

        // Will never wrap because that would mean we have more objects than virtual memory.
        self.len = self.len.wrapping_add(1);

        Some(ptr)
    }

    /// Gives back storage obtained from [`alloc()`][Self::alloc].
    ///
    /// The pool does not run any destructor. Whatever is in the cell is forgotten.
    ///
    /// # Panics
    ///
    /// Panics if the pointer was not allocated from this pool. In debug builds, also panics if the
    /// storage was already given back.
    pub fn free(&mut self, ptr: NonNull<T>) {
        let slab_index = self.slab_index_of(ptr);
        self.release_at(slab_index, ptr);
    }

    /// Allocates storage and moves `value` into it.
    ///
    /// Returns `None` (dropping `value`) if the memory allocator could not provide a new slab.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::RawPool;
    ///
    /// let mut pool = RawPool::<String>::new();
    ///
    /// let ptr = pool.create("Hello".to_string()).expect("out of memory");
    ///
    /// // SAFETY: The object was just created and nobody else has access to it.
    /// assert_eq!(unsafe { ptr.as_ref() }, "Hello");
    ///
    /// // SAFETY: The object is initialized and we do not use the pointer afterwards.
    /// unsafe {
    ///     pool.destroy(ptr);
    /// }
    /// ```
    #[must_use]
    pub fn create(&mut self, value: T) -> Option<NonNull<T>> {
        let ptr = self.alloc()?;

        // SAFETY: The cell was just allocated, so it is valid for writes of T and nobody else
        // can reference it yet.
        unsafe {
            ptr.write(value);
        }

        Some(ptr)
    }

    /// Drops the object in place and gives its storage back to the pool.
    ///
    /// The storage is given back even if the destructor of the object panics.
    ///
    /// # Safety
    ///
    /// The pointer must have been allocated from this pool, must not have been freed yet and must
    /// point to an initialized object that the caller is allowed to drop. No references to the
    /// object may exist.
    ///
    /// # Panics
    ///
    /// Panics if the pointer does not point to the start of a cell of this pool. In debug builds,
    /// also panics if the cell is not allocated. The object is not dropped in either case.
    pub unsafe fn destroy(&mut self, ptr: NonNull<T>) {
        let slab_index = self.slab_index_of(ptr);
        let slab = self.slab(slab_index);

        // Rejects pointers into the middle of a cell before any destructor runs.
        _ = slab.index_of(ptr);

        #[cfg(debug_assertions)]
        assert!(
            slab.is_allocated(ptr),
            "{ptr:?} refers to a cell of this pool of {} that is not allocated",
            type_name::<T>()
        );

        let _release = scopeguard::guard(self, |pool| pool.release_at(slab_index, ptr));

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            ptr.drop_in_place();
        }
    }

    /// Returns a cell to its slab and updates the pool bookkeeping.
    pub(crate) fn release_at(&mut self, slab_index: usize, ptr: NonNull<T>) {
        let slab = self
            .slabs
            .get_mut(slab_index)
            .expect("caller must provide the index of an existing slab");

        slab.release(ptr);

        if slab.free_count() == 1 {
            // The slab was full, so it was not in the spare list. It has become the most
            // recently freed-into slab, so we allocate from it next.
            self.spare.push(slab_index);
            self.current = Some(slab_index);
        }

        // Cannot wrap because the slab accepted the release, so there was an allocated cell.
        self.len = self.len.wrapping_sub(1);
    }

    /// Whether the pointer falls inside the storage of one of the slabs of this pool.
    ///
    /// This is a pure address check. It does not tell whether the cell is currently allocated.
    /// For that, see [`is_allocated()`][Self::is_allocated].
    #[must_use]
    pub fn contains(&self, ptr: NonNull<T>) -> bool {
        self.owning_slab_index(ptr).is_some()
    }

    /// Whether the pointer refers to a cell of this pool that is currently allocated.
    ///
    /// This walks the free list of the owning slab, so it takes O(`CAPACITY`) time.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::RawPool;
    ///
    /// let mut pool = RawPool::<u32>::new();
    ///
    /// let ptr = pool.create(5).expect("out of memory");
    /// assert!(pool.is_allocated(ptr));
    ///
    /// pool.free(ptr);
    /// assert!(!pool.is_allocated(ptr));
    /// assert!(pool.contains(ptr));
    /// ```
    #[must_use]
    pub fn is_allocated(&self, ptr: NonNull<T>) -> bool {
        self.owning_slab_index(ptr)
            .is_some_and(|slab_index| self.slab(slab_index).is_allocated(ptr))
    }

    /// Returns an iterator over the allocated cells, starting at `ptr`.
    ///
    /// Returns `None` if the pointer does not refer to a currently allocated cell of this pool.
    #[must_use]
    pub fn find(&self, ptr: NonNull<T>) -> Option<RawIter<'_, T, CAPACITY>> {
        let (slab_index, index) = self.locate_allocated(ptr)?;

        Some(RawIter::starting_at(self, slab_index, index))
    }

    /// Returns an iterator over all allocated cells, in slab order and then cell order.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::RawPool;
    ///
    /// let mut pool = RawPool::<u32>::new();
    ///
    /// let a = pool.create(1).expect("out of memory");
    /// let b = pool.create(2).expect("out of memory");
    ///
    /// let ptrs = pool.iter().collect::<Vec<_>>();
    /// assert_eq!(ptrs, vec![a, b]);
    /// ```
    pub fn iter(&self) -> RawIter<'_, T, CAPACITY> {
        RawIter::new(self)
    }

    /// Returns a cursor positioned at the first allocated cell, which can free cells while
    /// iterating.
    pub fn cursor_front_mut(&mut self) -> RawCursorMut<'_, T, CAPACITY> {
        RawCursorMut::new(self, 0, None)
    }

    /// Returns a cursor positioned at `ptr`, which can free cells while iterating.
    ///
    /// Returns `None` if the pointer does not refer to a currently allocated cell of this pool.
    pub fn cursor_at(&mut self, ptr: NonNull<T>) -> Option<RawCursorMut<'_, T, CAPACITY>> {
        let (slab_index, index) = self.locate_allocated(ptr)?;

        Some(RawCursorMut::new(self, slab_index, Some(index)))
    }

    /// Releases the memory of all slabs that have no allocated cells.
    ///
    /// Pointers to allocated cells remain valid.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::RawPool;
    ///
    /// let mut pool = RawPool::<u32, 4>::new();
    ///
    /// let ptrs = (0..8).map(|_| pool.alloc().expect("out of memory")).collect::<Vec<_>>();
    /// assert_eq!(pool.slab_count(), 2);
    ///
    /// for ptr in &ptrs[4..] {
    ///     pool.free(*ptr);
    /// }
    ///
    /// pool.shrink();
    /// assert_eq!(pool.slab_count(), 1);
    /// assert_eq!(pool.len(), 4);
    /// ```
    pub fn shrink(&mut self) {
        let slab_count_before = self.slabs.len();

        // New slab index of each retained slab, by old slab index.
        let mut new_indices = Vec::with_capacity(slab_count_before);
        let mut retained_count: usize = 0;

        for (slab_index, slab) in self.slabs.iter().enumerate() {
            if slab.is_empty() {
                self.directory.unregister(slab_index, slab.base_addr());
                trace!(
                    item_type = type_name::<T>(),
                    slab_index,
                    base_addr = slab.base_addr(),
                    "retiring empty slab"
                );
                new_indices.push(None);
            } else {
                new_indices.push(Some(retained_count));

                // Cannot wrap because we count at most the number of existing slabs.
                retained_count = retained_count.wrapping_add(1);
            }
        }

        if retained_count == slab_count_before {
            return;
        }

        self.slabs.retain(|slab| !slab.is_empty());

        let new_index = |old_index: usize| new_indices.get(old_index).copied().flatten();

        self.directory.remap(|old_index| {
            new_index(old_index).expect("slabs remaining in the directory must have been retained")
        });

        self.spare.retain_mut(|slab_index| {
            new_index(*slab_index).is_some_and(|new_slab_index| {
                *slab_index = new_slab_index;
                true
            })
        });

        self.current = self.spare.last().copied();

        debug!(
            item_type = type_name::<T>(),
            slab_count_before,
            slab_count_after = retained_count,
            "shrank pool"
        );
    }

    /// Ensures the pool has room for at least `capacity` objects in total, rounded up to whole
    /// slabs, allocating slabs as needed.
    ///
    /// # Panics
    ///
    /// Panics if the capacity overflows or the memory allocator fails.
    pub fn reserve(&mut self, capacity: usize) {
        if let Err(error) = self.try_reserve(capacity) {
            panic!("{error}");
        }
    }

    /// Ensures the pool has room for at least `capacity` objects in total, rounded up to whole
    /// slabs, allocating slabs as needed.
    ///
    /// If the memory allocator fails part way, the slabs created before the failure remain in
    /// the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested capacity cannot be represented or if the memory
    /// allocator could not provide a new slab.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::{RawPool, ReserveError};
    ///
    /// let mut pool = RawPool::<u64, 16>::new();
    ///
    /// pool.try_reserve(20)?;
    /// assert_eq!(pool.capacity(), 32);
    ///
    /// assert!(matches!(
    ///     pool.try_reserve(usize::MAX),
    ///     Err(ReserveError::CapacityOverflow { .. })
    /// ));
    /// # Ok::<(), ReserveError>(())
    /// ```
    pub fn try_reserve(&mut self, capacity: usize) -> Result<(), ReserveError> {
        let slab_bytes = Slab::<T, CAPACITY>::storage_bytes();
        let required_slabs = capacity.div_ceil(CAPACITY);

        let representable = required_slabs.checked_mul(CAPACITY).is_some()
            && required_slabs
                .checked_mul(slab_bytes)
                .is_some_and(|bytes| bytes <= isize::MAX.unsigned_abs());

        if !representable {
            return Err(ReserveError::CapacityOverflow {
                requested: capacity,
            });
        }

        let additional_slabs = required_slabs.saturating_sub(self.slabs.len());

        if additional_slabs == 0 {
            return Ok(());
        }

        for _ in 0..additional_slabs {
            if self.add_slab().is_none() {
                return Err(ReserveError::AllocationFailed { slab_bytes });
            }
        }

        debug!(
            item_type = type_name::<T>(),
            capacity,
            additional_slabs,
            "reserved capacity"
        );

        Ok(())
    }

    /// Releases all slabs without running any destructors.
    ///
    /// All pointers previously returned by the pool become dangling.
    pub fn clear(&mut self) {
        if self.slabs.is_empty() {
            return;
        }

        debug!(
            item_type = type_name::<T>(),
            len = self.len,
            slab_count = self.slabs.len(),
            "clearing pool"
        );

        self.slabs.clear();
        self.directory.clear();
        self.spare.clear();
        self.current = None;
        self.len = 0;
    }

    /// Drops every allocated object in place, then releases all slabs.
    ///
    /// If a destructor panics, the pool is still cleared and the remaining objects are leaked.
    ///
    /// # Safety
    ///
    /// Every allocated cell must hold an initialized object that the caller is allowed to drop,
    /// with no references to any of them existing.
    pub unsafe fn destroy_and_clear(&mut self) {
        let pool = scopeguard::guard(self, |pool| pool.clear());

        for ptr in pool.iter() {
            // SAFETY: Forwarding guarantees from the caller. Iteration only reads the free list
            // links of free cells, so dropping allocated objects does not disturb it.
            unsafe {
                ptr.drop_in_place();
            }
        }
    }

    /// Swaps the contents of two pools, including their configuration.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Locates the slab of an allocated cell and the index of the cell within it.
    fn locate_allocated(&self, ptr: NonNull<T>) -> Option<(usize, usize)> {
        let slab_index = self.owning_slab_index(ptr)?;
        let slab = self.slab(slab_index);

        slab.is_allocated(ptr)
            .then(|| (slab_index, slab.index_of(ptr)))
    }

    fn owning_slab_index(&self, ptr: NonNull<T>) -> Option<usize> {
        self.directory
            .candidates(ptr.addr().get())
            .find(|slab_index| self.slab(*slab_index).contains(ptr))
    }

    fn slab_index_of(&self, ptr: NonNull<T>) -> usize {
        self.owning_slab_index(ptr).unwrap_or_else(|| {
            panic!(
                "{ptr:?} was not allocated from this pool of {}",
                type_name::<T>()
            )
        })
    }

    pub(crate) fn slab(&self, slab_index: usize) -> &Slab<T, CAPACITY> {
        self.slabs
            .get(slab_index)
            .expect("slab index must point to an existing slab")
    }

    pub(crate) fn try_slab(&self, slab_index: usize) -> Option<&Slab<T, CAPACITY>> {
        self.slabs.get(slab_index)
    }

    /// Creates a new empty slab and makes it the current slab.
    ///
    /// Returns `None` if the memory allocator could not provide the storage.
    fn add_slab(&mut self) -> Option<usize> {
        let Some(slab) = Slab::<T, CAPACITY>::try_new() else {
            debug!(
                item_type = type_name::<T>(),
                slab_bytes = Slab::<T, CAPACITY>::storage_bytes(),
                "failed to allocate storage for a new slab"
            );
            return None;
        };

        let slab_index = self.slabs.len();

        self.directory.register(slab_index, slab.base_addr());

        trace!(
            item_type = type_name::<T>(),
            slab_index,
            base_addr = slab.base_addr(),
            "created slab"
        );

        self.slabs.push(slab);
        self.spare.push(slab_index);
        self.current = Some(slab_index);

        Some(slab_index)
    }

    #[cfg(test)]
    #[mutants::skip] // This is test logic, mutation is meaningless.
    pub(crate) fn integrity_check(&self) {
        let mut total_len: usize = 0;

        for (slab_index, slab) in self.slabs.iter().enumerate() {
            slab.integrity_check();

            total_len = total_len
                .checked_add(slab.len())
                .expect("total object count cannot exceed virtual memory");

            let spare_count = self
                .spare
                .iter()
                .filter(|spare_index| **spare_index == slab_index)
                .count();
            let expected_spare_count = usize::from(!slab.is_full());

            assert_eq!(
                spare_count,
                expected_spare_count,
                "slab {slab_index} of pool of {} appears {spare_count} times in the spare list",
                type_name::<T>()
            );

            assert!(
                self.directory
                    .candidates(slab.base_addr())
                    .any(|candidate| candidate == slab_index),
                "slab {slab_index} of pool of {} is not findable through the directory",
                type_name::<T>()
            );
        }

        assert_eq!(
            total_len,
            self.len,
            "pool of {} has a len that disagrees with its slabs",
            type_name::<T>()
        );

        assert_eq!(
            self.current,
            self.spare.last().copied(),
            "current slab of pool of {} is not the top of the spare list",
            type_name::<T>()
        );

        assert!(
            self.directory.len() <= self.slabs.len().saturating_mul(2),
            "directory of pool of {} has more buckets than its slabs can occupy",
            type_name::<T>()
        );
    }
}

impl<T, const CAPACITY: usize> Default for RawPool<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAPACITY: usize> fmt::Debug for RawPool<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("slab_capacity", &CAPACITY)
            .field("len", &self.len)
            .field("slabs", &self.slabs)
            .field("directory", &self.directory)
            .field("spare", &self.spare)
            .field("current", &self.current)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T, const CAPACITY: usize> Drop for RawPool<T, CAPACITY> {
    fn drop(&mut self) {
        let len = self.len;

        // Memory goes first, the policy check after, so a policy panic leaks nothing.
        self.clear();

        // Panicking again while unwinding would abort and bury the first panic.
        if self.drop_policy == DropPolicy::MustNotDropItems && !thread::panicking() {
            assert!(
                len == 0,
                "dropped a pool of {} with {len} objects still in it - this is forbidden by DropPolicy::MustNotDropItems",
                type_name::<T>()
            );
        }
    }
}

/// Iterator over the allocated cells of a [`RawPool`], yielding a pointer to each.
///
/// Cells are visited in slab order and, within a slab, in ascending address order. The iterator
/// can be consumed from both ends.
///
/// Created by [`RawPool::iter()`] and [`RawPool::find()`].
pub struct RawIter<'p, T, const CAPACITY: usize> {
    pool: &'p RawPool<T, CAPACITY>,

    // Index of the slab we take the next item from at the front.
    // If the iterator is exhausted, this may point past the end.
    front_slab_index: usize,

    // Index of the slab we take the next item from at the back.
    // If the iterator is exhausted, this may point to an undefined value.
    back_slab_index: usize,

    front: Option<LiveIndices>,
    back: Option<LiveIndices>,

    // Number of items the iterator will still yield from both ends combined.
    remaining: usize,
}

impl<'p, T, const CAPACITY: usize> RawIter<'p, T, CAPACITY> {
    fn new(pool: &'p RawPool<T, CAPACITY>) -> Self {
        Self {
            pool,
            front_slab_index: 0,
            // This is allowed to wrap - if the pool is empty, we never use it.
            back_slab_index: pool.slabs.len().wrapping_sub(1),
            front: None,
            back: None,
            remaining: pool.len,
        }
    }

    fn starting_at(pool: &'p RawPool<T, CAPACITY>, slab_index: usize, index: usize) -> Self {
        let first_slab = pool.slab(slab_index);
        let front = first_slab.live_indices_from(index);

        let remaining_in_later_slabs = pool
            .slabs
            .iter()
            .skip(slab_index.saturating_add(1))
            .map(Slab::len)
            .sum::<usize>();

        // Will not wrap because both terms are bounded by the number of objects in the pool.
        let remaining = front.clone().count().wrapping_add(remaining_in_later_slabs);

        Self {
            pool,
            front_slab_index: slab_index,
            back_slab_index: pool.slabs.len().wrapping_sub(1),
            front: Some(front),
            back: None,
            remaining,
        }
    }
}

impl<T, const CAPACITY: usize> Iterator for RawIter<'_, T, CAPACITY> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let pool = self.pool;

        while self.remaining > 0 {
            let slab = pool.try_slab(self.front_slab_index).expect(
                "iterator has items remaining, so there must still be a slab to get them from",
            );

            let live = self.front.get_or_insert_with(|| slab.live_indices());

            if let Some(index) = live.next() {
                // Cannot wrap because we checked above that items remain.
                self.remaining = self.remaining.wrapping_sub(1);
                return Some(slab.object_ptr(index));
            }

            // No more items in this slab, move on to the next one.
            self.front_slab_index = self.front_slab_index.wrapping_add(1);
            self.front = None;
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T, const CAPACITY: usize> DoubleEndedIterator for RawIter<'_, T, CAPACITY> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let pool = self.pool;

        while self.remaining > 0 {
            let slab = pool.try_slab(self.back_slab_index).expect(
                "iterator has items remaining, so there must still be a slab to get them from",
            );

            let live = self.back.get_or_insert_with(|| slab.live_indices());

            if let Some(index) = live.next_back() {
                // Cannot wrap because we checked above that items remain.
                self.remaining = self.remaining.wrapping_sub(1);
                return Some(slab.object_ptr(index));
            }

            // This is allowed to wrap - if the iterator is exhausted, we never use it again.
            self.back_slab_index = self.back_slab_index.wrapping_sub(1);
            self.back = None;
        }

        None
    }
}

impl<T, const CAPACITY: usize> ExactSizeIterator for RawIter<'_, T, CAPACITY> {
    fn len(&self) -> usize {
        self.remaining
    }
}

// Once we return None, we will keep returning None.
impl<T, const CAPACITY: usize> FusedIterator for RawIter<'_, T, CAPACITY> {}

impl<T, const CAPACITY: usize> fmt::Debug for RawIter<'_, T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawIter")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("front_slab_index", &self.front_slab_index)
            .field("back_slab_index", &self.back_slab_index)
            .field("front", &self.front)
            .field("back", &self.back)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl<'p, T, const CAPACITY: usize> IntoIterator for &'p RawPool<T, CAPACITY> {
    type Item = NonNull<T>;
    type IntoIter = RawIter<'p, T, CAPACITY>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
#[allow(
    clippy::indexing_slicing,
    clippy::multiple_unsafe_ops_per_block,
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(RawPool<u32>: Send, Default, fmt::Debug);
    assert_not_impl_any!(RawPool<u32>: Sync, Clone);
    assert_not_impl_any!(RawPool<Rc<u32>>: Send);

    assert_impl_all!(RawIter<'_, u32, 4>: Iterator, DoubleEndedIterator, ExactSizeIterator, FusedIterator);

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn new_pool_is_empty() {
        let pool = RawPool::<u32, 4>::new();

        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.slab_count(), 0);
        assert_eq!(pool.iter().count(), 0);
        pool.integrity_check();
    }

    #[test]
    fn alloc_creates_slabs_on_demand() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..5).map(|_| pool.alloc().unwrap()).collect::<Vec<_>>();

        assert_eq!(pool.len(), 5);
        assert_eq!(pool.slab_count(), 2);
        assert_eq!(pool.capacity(), 8);
        pool.integrity_check();

        for ptr in ptrs {
            pool.free(ptr);
        }

        assert!(pool.is_empty());
        assert_eq!(pool.slab_count(), 2);
        pool.integrity_check();
    }

    #[test]
    fn freed_cell_is_reused() {
        let mut pool = RawPool::<u64, 4>::new();

        let _a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();

        pool.free(b);
        assert_eq!(pool.alloc().unwrap(), b);
        pool.integrity_check();
    }

    #[test]
    fn freeing_into_full_slab_makes_it_current() {
        let mut pool = RawPool::<u32, 2>::new();

        let a = pool.alloc().unwrap();
        let _b = pool.alloc().unwrap();
        let _c = pool.alloc().unwrap();

        // First slab is full, second slab is current.
        pool.free(a);
        pool.integrity_check();

        // The first slab got its free cell back and is now where we allocate from.
        assert_eq!(pool.alloc().unwrap(), a);
        assert_eq!(pool.slab_count(), 2);
        pool.integrity_check();
    }

    #[test]
    fn single_cell_slabs_work() {
        let mut pool = RawPool::<u32, 1>::new();

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_eq!(pool.slab_count(), 2);

        pool.free(a);
        pool.integrity_check();
        assert_eq!(pool.alloc().unwrap(), a);

        pool.free(b);
        pool.free(a);
        pool.integrity_check();
    }

    #[test]
    #[should_panic]
    fn free_foreign_pointer_panics() {
        let mut pool = RawPool::<u32, 4>::new();
        let mut other = RawPool::<u32, 4>::new();

        _ = pool.alloc().unwrap();
        let foreign = other.alloc().unwrap();

        pool.free(foreign);
    }

    #[test]
    #[should_panic]
    fn free_stack_pointer_panics() {
        let mut pool = RawPool::<u32, 4>::new();
        _ = pool.alloc().unwrap();

        let mut local = 5_u32;
        pool.free(NonNull::from(&mut local));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut pool = RawPool::<u32, 4>::new();

        let a = pool.alloc().unwrap();
        let _b = pool.alloc().unwrap();

        pool.free(a);
        pool.free(a);
    }

    #[test]
    #[should_panic]
    fn destroy_interior_pointer_panics() {
        let mut pool = RawPool::<u64, 4>::new();

        let _a = pool.create(1).unwrap();
        let b = pool.create(2).unwrap();

        unsafe {
            pool.destroy(b.byte_add(4));
        }
    }

    #[test]
    fn oversized_items_fail_allocation_gracefully() {
        let mut pool = RawPool::<[u8; 1 << 56], 256>::new();

        assert!(pool.alloc().is_none());
        assert!(pool.is_empty());
        assert_eq!(pool.slab_count(), 0);
        assert!(matches!(
            pool.try_reserve(1),
            Err(ReserveError::CapacityOverflow { requested: 1 })
        ));
    }

    #[test]
    fn contains_and_is_allocated() {
        let mut pool = RawPool::<u32, 4>::new();
        let mut other = RawPool::<u32, 4>::new();

        let a = pool.create(1).unwrap();
        let foreign = other.create(2).unwrap();

        assert!(pool.contains(a));
        assert!(pool.is_allocated(a));
        assert!(!pool.contains(foreign));
        assert!(!pool.is_allocated(foreign));

        pool.free(a);
        assert!(pool.contains(a));
        assert!(!pool.is_allocated(a));
    }

    #[test]
    fn create_and_destroy_run_destructor_once() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = RawPool::<DropCounter, 4>::new();

        let ptr = pool.create(DropCounter(Rc::clone(&drops))).unwrap();
        assert_eq!(drops.get(), 0);

        unsafe {
            pool.destroy(ptr);
        }

        assert_eq!(drops.get(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn destroy_releases_cell_even_if_destructor_panics() {
        struct PanicOnDrop;

        impl Drop for PanicOnDrop {
            fn drop(&mut self) {
                panic!("boom");
            }
        }

        let mut pool = RawPool::<PanicOnDrop, 4>::new();
        let ptr = pool.create(PanicOnDrop).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            pool.destroy(ptr);
        }));

        assert!(result.is_err());
        assert!(pool.is_empty());
        assert!(!pool.is_allocated(ptr));
        pool.integrity_check();
    }

    #[test]
    fn clear_does_not_run_destructors() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = RawPool::<DropCounter, 4>::new();

        for _ in 0..6 {
            _ = pool.create(DropCounter(Rc::clone(&drops))).unwrap();
        }

        pool.clear();

        assert_eq!(drops.get(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.slab_count(), 0);
        pool.integrity_check();

        // The leaked objects still hold their clones.
        assert_eq!(Rc::strong_count(&drops), 7);
    }

    #[test]
    fn destroy_and_clear_runs_every_destructor() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = RawPool::<DropCounter, 4>::new();

        let ptrs = (0..10)
            .map(|_| pool.create(DropCounter(Rc::clone(&drops))).unwrap())
            .collect::<Vec<_>>();

        unsafe {
            pool.destroy(ptrs[3]);
        }
        assert_eq!(drops.get(), 1);

        unsafe {
            pool.destroy_and_clear();
        }

        assert_eq!(drops.get(), 10);
        assert_eq!(pool.slab_count(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn destroy_and_clear_clears_even_if_destructor_panics() {
        struct MaybePanic(bool);

        impl Drop for MaybePanic {
            fn drop(&mut self) {
                assert!(!self.0, "boom");
            }
        }

        let mut pool = RawPool::<MaybePanic, 4>::new();
        _ = pool.create(MaybePanic(false)).unwrap();
        _ = pool.create(MaybePanic(true)).unwrap();
        _ = pool.create(MaybePanic(false)).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            pool.destroy_and_clear();
        }));

        assert!(result.is_err());
        assert!(pool.is_empty());
        assert_eq!(pool.slab_count(), 0);
    }

    #[test]
    fn iter_visits_live_cells_in_order() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..10).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();

        pool.free(ptrs[1]);
        pool.free(ptrs[4]);
        pool.free(ptrs[5]);
        pool.free(ptrs[9]);

        let values = pool
            .iter()
            .map(|ptr| unsafe { *ptr.as_ref() })
            .collect::<Vec<_>>();

        assert_eq!(values, vec![0, 2, 3, 6, 7, 8]);
    }

    #[test]
    fn iter_is_exact_size_and_double_ended() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..7).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();
        pool.free(ptrs[2]);

        let mut iter = pool.iter();
        assert_eq!(iter.len(), 6);

        assert_eq!(iter.next(), Some(ptrs[0]));
        assert_eq!(iter.next_back(), Some(ptrs[6]));
        assert_eq!(iter.len(), 4);

        let rest = iter.collect::<Vec<_>>();
        assert_eq!(rest, vec![ptrs[1], ptrs[3], ptrs[4], ptrs[5]]);
    }

    #[test]
    fn iter_from_both_ends_meets_in_one_slab() {
        let mut pool = RawPool::<u32, 8>::new();

        let ptrs = (0..3).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();

        let mut iter = pool.iter();
        assert_eq!(iter.next(), Some(ptrs[0]));
        assert_eq!(iter.next_back(), Some(ptrs[2]));
        assert_eq!(iter.next(), Some(ptrs[1]));
        assert_eq!(iter.next_back(), None);
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn reverse_iteration_matches_forward() {
        let mut pool = RawPool::<u32, 3>::new();

        let ptrs = (0..11).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();
        pool.free(ptrs[0]);
        pool.free(ptrs[7]);

        let forward = pool.iter().collect::<Vec<_>>();
        let mut backward = pool.iter().rev().collect::<Vec<_>>();
        backward.reverse();

        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 9);
    }

    #[test]
    fn iter_over_empty_slabs_yields_nothing() {
        let mut pool = RawPool::<u32, 4>::new();
        pool.reserve(12);

        assert_eq!(pool.iter().count(), 0);
        assert_eq!(pool.iter().next_back(), None);
    }

    #[test]
    fn into_iterator_for_reference() {
        let mut pool = RawPool::<u32, 4>::new();
        _ = pool.create(1).unwrap();
        _ = pool.create(2).unwrap();

        let mut count = 0;
        for _ptr in &pool {
            count += 1;
        }

        assert_eq!(count, 2);
    }

    #[test]
    fn find_starts_at_pointer() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..9).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();
        pool.free(ptrs[6]);

        let iter = pool.find(ptrs[3]).unwrap();
        assert_eq!(iter.len(), 5);

        let found = iter.collect::<Vec<_>>();
        assert_eq!(found, vec![ptrs[3], ptrs[4], ptrs[5], ptrs[7], ptrs[8]]);
    }

    #[test]
    fn find_from_back_stops_at_pointer() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..6).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();

        let found = pool.find(ptrs[2]).unwrap().rev().collect::<Vec<_>>();
        assert_eq!(found, vec![ptrs[5], ptrs[4], ptrs[3], ptrs[2]]);
    }

    #[test]
    fn find_freed_or_foreign_is_none() {
        let mut pool = RawPool::<u32, 4>::new();
        let mut other = RawPool::<u32, 4>::new();

        let a = pool.create(1).unwrap();
        let _b = pool.create(2).unwrap();
        let foreign = other.create(3).unwrap();

        pool.free(a);

        assert!(pool.find(a).is_none());
        assert!(pool.find(foreign).is_none());
    }

    #[test]
    fn shrink_releases_only_empty_slabs() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..12).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();
        assert_eq!(pool.slab_count(), 3);

        // Empty out the middle slab and part of the last one.
        for ptr in &ptrs[4..10] {
            pool.free(*ptr);
        }

        pool.shrink();
        pool.integrity_check();

        assert_eq!(pool.slab_count(), 2);
        assert_eq!(pool.len(), 6);

        // Pointers into the retained slabs still work.
        for ptr in ptrs[..4].iter().chain(&ptrs[10..]) {
            assert!(pool.is_allocated(*ptr));
        }

        for ptr in &ptrs[10..] {
            pool.free(*ptr);
        }

        pool.integrity_check();
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn shrink_with_nothing_to_release_keeps_everything() {
        let mut pool = RawPool::<u32, 4>::new();

        for i in 0..6 {
            _ = pool.create(i).unwrap();
        }

        pool.shrink();
        pool.integrity_check();

        assert_eq!(pool.slab_count(), 2);
        assert_eq!(pool.len(), 6);
    }

    #[test]
    fn shrink_empty_pool_releases_all_slabs() {
        let mut pool = RawPool::<u32, 4>::new();
        pool.reserve(20);
        assert_eq!(pool.slab_count(), 5);

        pool.shrink();
        pool.integrity_check();

        assert_eq!(pool.slab_count(), 0);
        assert_eq!(pool.capacity(), 0);

        // The pool still works afterwards.
        let ptr = pool.create(1).unwrap();
        assert!(pool.is_allocated(ptr));
        pool.integrity_check();
    }

    #[test]
    fn reserve_rounds_up_to_whole_slabs() {
        let mut pool = RawPool::<u32, 4>::new();

        pool.reserve(5);
        assert_eq!(pool.capacity(), 8);
        pool.integrity_check();

        // Reserving less than we already have does nothing.
        pool.reserve(3);
        assert_eq!(pool.capacity(), 8);

        pool.reserve(0);
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn reserved_capacity_is_used_without_new_slabs() {
        let mut pool = RawPool::<u32, 4>::new();
        pool.reserve(8);

        for i in 0..8 {
            _ = pool.create(i).unwrap();
        }

        assert_eq!(pool.slab_count(), 2);
        pool.integrity_check();
    }

    #[test]
    fn try_reserve_reports_overflow() {
        let mut pool = RawPool::<u64, 256>::new();

        let result = pool.try_reserve(usize::MAX);

        assert!(matches!(
            result,
            Err(ReserveError::CapacityOverflow {
                requested: usize::MAX
            })
        ));
        assert_eq!(pool.slab_count(), 0);
    }

    #[test]
    #[should_panic]
    fn reserve_overflow_panics() {
        let mut pool = RawPool::<u64, 256>::new();

        pool.reserve(usize::MAX);
    }

    #[test]
    fn swap_exchanges_contents() {
        let mut a = RawPool::<u32, 4>::new();
        let mut b = RawPool::<u32, 4>::new();

        let ptr = a.create(1).unwrap();
        a.swap(&mut b);

        assert!(a.is_empty());
        assert_eq!(b.len(), 1);
        assert!(b.is_allocated(ptr));
    }

    #[test]
    fn take_moves_slabs_wholesale() {
        let mut pool = RawPool::<u32, 4>::new();
        let ptr = pool.create(5).unwrap();

        let moved = mem::take(&mut pool);

        assert!(pool.is_empty());
        assert_eq!(pool.slab_count(), 0);
        assert!(moved.is_allocated(ptr));
        assert_eq!(unsafe { *ptr.as_ref() }, 5);
    }

    #[test]
    fn zero_sized_items_are_supported() {
        let mut pool = RawPool::<(), 4>::new();

        let a = pool.create(()).unwrap();
        let b = pool.create(()).unwrap();

        assert_ne!(a, b);
        assert!(pool.is_allocated(a));

        pool.free(a);
        pool.free(b);
        pool.integrity_check();
    }

    #[test]
    fn drop_policy_may_drop_items_allows_non_empty_drop() {
        let mut pool = RawPool::<u32, 4>::builder()
            .drop_policy(DropPolicy::MayDropItems)
            .build();

        _ = pool.create(1).unwrap();

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn drop_policy_must_not_drop_items_panics_on_non_empty_drop() {
        let mut pool = RawPool::<u32, 4>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        _ = pool.create(1).unwrap();

        drop(pool);
    }

    #[test]
    fn drop_policy_must_not_drop_items_allows_empty_drop() {
        let mut pool = RawPool::<u32, 4>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        let ptr = pool.create(1).unwrap();
        pool.free(ptr);

        drop(pool);
    }

    #[test]
    fn debug_output_names_item_type() {
        let pool = RawPool::<u32, 4>::new();

        let output = format!("{pool:?}");

        assert!(output.contains("RawPool"));
        assert!(output.contains("u32"));
    }
}
