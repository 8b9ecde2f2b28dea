use std::any::type_name;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::{fmt, mem};

use crate::{
    CursorMut, DEFAULT_SLAB_CAPACITY, DropPolicy, ObjectPoolBuilder, RawIter, RawPool, ReserveError,
};

/// A pool that owns objects of type `T`, stored in fixed-capacity slabs.
///
/// Objects are created in the pool and stay at the same address until they are destroyed, the
/// pool is cleared or the pool is dropped. The caller refers to an object through the
/// [`NonNull<T>`] returned when it was created.
///
/// Unlike [`RawPool`], every allocated cell of an object pool holds an initialized object, so the
/// pool runs destructors when objects are destroyed and when the pool itself is dropped. The
/// storage is never exposed uninitialized.
///
/// # Example
///
/// ```rust
/// use slab_pool::ObjectPool;
///
/// let mut pool = ObjectPool::<String>::new();
///
/// let hello = pool.create("Hello".to_string()).expect("out of memory");
/// let world = pool.create("world".to_string()).expect("out of memory");
///
/// pool.get_mut(hello).expect("object is alive").push(',');
///
/// let words = pool.iter().map(String::as_str).collect::<Vec<_>>();
/// assert_eq!(words, vec!["Hello,", "world"]);
///
/// // SAFETY: The object belongs to this pool, is still alive and we drop the pointer right away.
/// unsafe {
///     pool.destroy(world);
/// }
///
/// assert_eq!(pool.len(), 1);
/// ```
pub struct ObjectPool<T, const CAPACITY: usize = DEFAULT_SLAB_CAPACITY> {
    // Every allocated cell holds an initialized object.
    raw: RawPool<T, CAPACITY>,

    drop_policy: DropPolicy,
}

impl<T, const CAPACITY: usize> ObjectPool<T, CAPACITY> {
    /// Creates an empty pool with the default configuration.
    ///
    /// No memory is allocated until the first object is created.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`ObjectPool`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::{DropPolicy, ObjectPool};
    ///
    /// let pool = ObjectPool::<u64, 32>::builder()
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .initial_capacity(40)
    ///     .build();
    ///
    /// assert_eq!(pool.capacity(), 64);
    /// ```
    pub fn builder() -> ObjectPoolBuilder<T, CAPACITY> {
        ObjectPoolBuilder::new()
    }

    pub(crate) fn from_raw(raw: RawPool<T, CAPACITY>, drop_policy: DropPolicy) -> Self {
        Self { raw, drop_policy }
    }

    /// Number of objects in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the pool has no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Number of objects the pool can hold before it needs to allocate another slab.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Number of slabs currently owned by the pool.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.raw.slab_count()
    }

    /// Moves `value` into the pool and returns a pointer to it.
    ///
    /// The pointer stays valid until the object is destroyed or the pool is cleared or dropped.
    ///
    /// Returns `None` (dropping `value`) if a new slab was needed and the memory allocator could
    /// not provide it.
    #[must_use]
    pub fn create(&mut self, value: T) -> Option<NonNull<T>> {
        self.raw.create(value)
    }

    /// Creates an object in the pool from the value returned by `f`.
    ///
    /// Storage is obtained before `f` is called, so `f` is not called at all if the memory
    /// allocator fails. If `f` panics, the storage is given back to the pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::ObjectPool;
    ///
    /// let mut pool = ObjectPool::<Vec<u8>>::new();
    ///
    /// let ptr = pool
    ///     .create_with(|| Vec::with_capacity(1024))
    ///     .expect("out of memory");
    ///
    /// assert!(pool.get(ptr).expect("object is alive").capacity() >= 1024);
    /// ```
    #[must_use]
    pub fn create_with(&mut self, f: impl FnOnce() -> T) -> Option<NonNull<T>> {
        let ptr = self.raw.alloc()?;

        let value = {
            let _release = scopeguard::guard_on_unwind(&mut self.raw, |raw| raw.free(ptr));
            f()
        };

        // SAFETY: The cell was just allocated, so it is valid for writes of T and nobody else
        // can reference it yet.
        unsafe {
            ptr.write(value);
        }

        Some(ptr)
    }

    /// Drops the object and gives its storage back to the pool.
    ///
    /// The storage is given back even if the destructor of the object panics.
    ///
    /// # Safety
    ///
    /// The pointer must have been returned by this pool and the object must not have been
    /// destroyed yet. No references to the object may exist.
    ///
    /// # Panics
    ///
    /// Panics if the pointer does not point to the start of a cell of this pool. In debug builds,
    /// also panics if the object was already destroyed. No object is dropped in either case.
    pub unsafe fn destroy(&mut self, ptr: NonNull<T>) {
        // SAFETY: Forwarding guarantees from the caller. Objects in this pool are always
        // initialized, so the caller only needs to vouch for liveness and exclusivity.
        unsafe {
            self.raw.destroy(ptr);
        }
    }

    /// Destroys every object in the pool and releases all slabs.
    ///
    /// If a destructor panics, the pool is still cleared and the remaining objects are leaked.
    pub fn clear(&mut self) {
        // SAFETY: Every allocated cell of an object pool holds an initialized object and we hold
        // an exclusive reference to the pool, so no references to the objects can exist.
        unsafe {
            self.raw.destroy_and_clear();
        }
    }

    /// Returns a reference to the object, or `None` if the pointer does not refer to a live
    /// object of this pool.
    ///
    /// This walks the free list of the owning slab, so it takes O(`CAPACITY`) time.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::ObjectPool;
    ///
    /// let mut pool = ObjectPool::<u32>::new();
    ///
    /// let ptr = pool.create(42).expect("out of memory");
    /// assert_eq!(pool.get(ptr), Some(&42));
    ///
    /// // SAFETY: The object belongs to this pool and is still alive.
    /// unsafe {
    ///     pool.destroy(ptr);
    /// }
    ///
    /// assert_eq!(pool.get(ptr), None);
    /// ```
    #[must_use]
    pub fn get(&self, ptr: NonNull<T>) -> Option<&T> {
        // SAFETY: The cell is allocated, so it holds an initialized object. The reference is
        // bound to a shared borrow of the pool, so nothing can mutate or destroy the object
        // through the pool while the reference exists.
        self.raw
            .is_allocated(ptr)
            .then(|| unsafe { ptr.as_ref() })
    }

    /// Returns an exclusive reference to the object, or `None` if the pointer does not refer to a
    /// live object of this pool.
    ///
    /// This walks the free list of the owning slab, so it takes O(`CAPACITY`) time.
    #[must_use]
    pub fn get_mut(&mut self, mut ptr: NonNull<T>) -> Option<&mut T> {
        // SAFETY: The cell is allocated, so it holds an initialized object. The reference is
        // bound to an exclusive borrow of the pool, so no other reference can be obtained from
        // the pool while this one exists.
        self.raw
            .is_allocated(ptr)
            .then(|| unsafe { ptr.as_mut() })
    }

    /// Whether the pointer falls inside the storage of one of the slabs of this pool.
    ///
    /// This is a pure address check. It does not tell whether the object is still alive.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<T>) -> bool {
        self.raw.contains(ptr)
    }

    /// Whether the pointer refers to a live object of this pool.
    #[must_use]
    pub fn is_allocated(&self, ptr: NonNull<T>) -> bool {
        self.raw.is_allocated(ptr)
    }

    /// Returns an iterator over the objects, starting at the object `ptr` points to.
    ///
    /// Returns `None` if the pointer does not refer to a live object of this pool.
    #[must_use]
    pub fn find(&self, ptr: NonNull<T>) -> Option<Iter<'_, T, CAPACITY>> {
        self.raw.find(ptr).map(Iter::new)
    }

    /// Returns an iterator over shared references to the objects in the pool.
    ///
    /// Objects are visited in slab order and, within a slab, in ascending address order.
    pub fn iter(&self) -> Iter<'_, T, CAPACITY> {
        Iter::new(self.raw.iter())
    }

    /// Returns an iterator over exclusive references to the objects in the pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::ObjectPool;
    ///
    /// let mut pool = ObjectPool::<u32>::new();
    ///
    /// for value in 1..=3 {
    ///     _ = pool.create(value).expect("out of memory");
    /// }
    ///
    /// for value in pool.iter_mut() {
    ///     *value *= 10;
    /// }
    ///
    /// assert_eq!(pool.iter().sum::<u32>(), 60);
    /// ```
    pub fn iter_mut(&mut self) -> IterMut<'_, T, CAPACITY> {
        IterMut::new(self.raw.iter())
    }

    /// Returns a cursor positioned at the first object, which can destroy objects while
    /// iterating.
    pub fn cursor_front_mut(&mut self) -> CursorMut<'_, T, CAPACITY> {
        // SAFETY: Every allocated cell of an object pool holds an initialized object.
        unsafe { CursorMut::new(self.raw.cursor_front_mut()) }
    }

    /// Returns a cursor positioned at the object `ptr` points to, which can destroy objects
    /// while iterating.
    ///
    /// Returns `None` if the pointer does not refer to a live object of this pool.
    pub fn cursor_at(&mut self, ptr: NonNull<T>) -> Option<CursorMut<'_, T, CAPACITY>> {
        self.raw.cursor_at(ptr).map(|raw| {
            // SAFETY: Every allocated cell of an object pool holds an initialized object.
            unsafe { CursorMut::new(raw) }
        })
    }

    /// Keeps only the objects for which `f` returns `true`, destroying the rest.
    ///
    /// # Example
    ///
    /// ```rust
    /// use slab_pool::ObjectPool;
    ///
    /// let mut pool = ObjectPool::<u32>::new();
    ///
    /// for value in 0..10 {
    ///     _ = pool.create(value).expect("out of memory");
    /// }
    ///
    /// pool.retain(|value| *value % 3 == 0);
    ///
    /// assert_eq!(pool.iter().copied().collect::<Vec<_>>(), vec![0, 3, 6, 9]);
    /// ```
    pub fn retain(&mut self, mut f: impl FnMut(&mut T) -> bool) {
        let mut cursor = self.cursor_front_mut();

        while let Some(object) = cursor.current_mut() {
            if f(object) {
                cursor.move_next();
            } else {
                cursor.erase();
            }
        }
    }

    /// Releases the memory of all slabs that hold no objects.
    ///
    /// Pointers to live objects remain valid.
    pub fn shrink(&mut self) {
        self.raw.shrink();
    }

    /// Ensures the pool has room for at least `capacity` objects in total, rounded up to whole
    /// slabs.
    ///
    /// # Panics
    ///
    /// Panics if the capacity overflows or the memory allocator fails.
    pub fn reserve(&mut self, capacity: usize) {
        self.raw.reserve(capacity);
    }

    /// Ensures the pool has room for at least `capacity` objects in total, rounded up to whole
    /// slabs.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested capacity cannot be represented or if the memory
    /// allocator could not provide a new slab.
    pub fn try_reserve(&mut self, capacity: usize) -> Result<(), ReserveError> {
        self.raw.try_reserve(capacity)
    }

    /// Swaps the contents of two pools, including their configuration.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        self.raw.integrity_check();
    }
}

impl<T, const CAPACITY: usize> Default for ObjectPool<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAPACITY: usize> fmt::Debug for ObjectPool<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("raw", &self.raw)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T, const CAPACITY: usize> Drop for ObjectPool<T, CAPACITY> {
    fn drop(&mut self) {
        // With MustNotDropItems we leave the objects alone and let the raw pool complain.
        if self.drop_policy == DropPolicy::MayDropItems {
            self.clear();
        }
    }
}

/// Iterator over shared references to the objects of an [`ObjectPool`].
///
/// Created by [`ObjectPool::iter()`] and [`ObjectPool::find()`].
pub struct Iter<'p, T, const CAPACITY: usize> {
    raw: RawIter<'p, T, CAPACITY>,
}

impl<'p, T, const CAPACITY: usize> Iter<'p, T, CAPACITY> {
    fn new(raw: RawIter<'p, T, CAPACITY>) -> Self {
        Self { raw }
    }
}

impl<'p, T, const CAPACITY: usize> Iterator for Iter<'p, T, CAPACITY> {
    type Item = &'p T;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The raw iterator only yields allocated cells, which in an object pool hold
        // initialized objects. We hold a shared borrow of the pool for 'p.
        self.raw.next().map(|ptr| unsafe { ptr.as_ref() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}

impl<T, const CAPACITY: usize> DoubleEndedIterator for Iter<'_, T, CAPACITY> {
    fn next_back(&mut self) -> Option<Self::Item> {
        // SAFETY: See next().
        self.raw.next_back().map(|ptr| unsafe { ptr.as_ref() })
    }
}

impl<T, const CAPACITY: usize> ExactSizeIterator for Iter<'_, T, CAPACITY> {
    fn len(&self) -> usize {
        self.raw.len()
    }
}

impl<T, const CAPACITY: usize> FusedIterator for Iter<'_, T, CAPACITY> {}

impl<T, const CAPACITY: usize> fmt::Debug for Iter<'_, T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").field("raw", &self.raw).finish()
    }
}

/// Iterator over exclusive references to the objects of an [`ObjectPool`].
///
/// Created by [`ObjectPool::iter_mut()`].
pub struct IterMut<'p, T, const CAPACITY: usize> {
    // Although the raw iterator only borrows the pool shared, IterMut is created from an
    // exclusive borrow and the marker carries that exclusivity.
    raw: RawIter<'p, T, CAPACITY>,

    _exclusive: PhantomData<&'p mut T>,
}

impl<'p, T, const CAPACITY: usize> IterMut<'p, T, CAPACITY> {
    fn new(raw: RawIter<'p, T, CAPACITY>) -> Self {
        Self {
            raw,
            _exclusive: PhantomData,
        }
    }
}

impl<'p, T, const CAPACITY: usize> Iterator for IterMut<'p, T, CAPACITY> {
    type Item = &'p mut T;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The raw iterator only yields allocated cells, which in an object pool hold
        // initialized objects. Each cell is yielded at most once, so references never alias,
        // and we hold an exclusive borrow of the pool for 'p.
        self.raw.next().map(|mut ptr| unsafe { ptr.as_mut() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}

impl<T, const CAPACITY: usize> DoubleEndedIterator for IterMut<'_, T, CAPACITY> {
    fn next_back(&mut self) -> Option<Self::Item> {
        // SAFETY: See next().
        self.raw.next_back().map(|mut ptr| unsafe { ptr.as_mut() })
    }
}

impl<T, const CAPACITY: usize> ExactSizeIterator for IterMut<'_, T, CAPACITY> {
    fn len(&self) -> usize {
        self.raw.len()
    }
}

impl<T, const CAPACITY: usize> FusedIterator for IterMut<'_, T, CAPACITY> {}

impl<T, const CAPACITY: usize> fmt::Debug for IterMut<'_, T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterMut").field("raw", &self.raw).finish()
    }
}

impl<'p, T, const CAPACITY: usize> IntoIterator for &'p ObjectPool<T, CAPACITY> {
    type Item = &'p T;
    type IntoIter = Iter<'p, T, CAPACITY>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'p, T, const CAPACITY: usize> IntoIterator for &'p mut ObjectPool<T, CAPACITY> {
    type Item = &'p mut T;
    type IntoIter = IterMut<'p, T, CAPACITY>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
#[allow(
    clippy::indexing_slicing,
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(ObjectPool<String>: Send, Default, fmt::Debug);
    assert_not_impl_any!(ObjectPool<String>: Sync, Clone);
    assert_not_impl_any!(ObjectPool<Rc<String>>: Send);

    assert_impl_all!(Iter<'_, u32, 4>: Iterator, DoubleEndedIterator, ExactSizeIterator, FusedIterator);
    assert_impl_all!(IterMut<'_, u32, 4>: Iterator, DoubleEndedIterator, ExactSizeIterator, FusedIterator);

    /// Records its id into a shared log when dropped.
    struct Tracked {
        id: u32,
        log: Rc<RefCell<Vec<u32>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.borrow_mut().push(self.id);
        }
    }

    fn tracked(id: u32, log: &Rc<RefCell<Vec<u32>>>) -> Tracked {
        Tracked {
            id,
            log: Rc::clone(log),
        }
    }

    #[test]
    fn create_get_destroy() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pool = ObjectPool::<Tracked, 4>::new();

        let a = pool.create(tracked(1, &log)).unwrap();
        let b = pool.create(tracked(2, &log)).unwrap();

        assert_eq!(pool.get(a).unwrap().id, 1);
        assert_eq!(pool.get(b).unwrap().id, 2);

        unsafe {
            pool.destroy(a);
        }

        assert_eq!(*log.borrow(), vec![1]);
        assert!(pool.get(a).is_none());
        assert!(!pool.is_allocated(a));
        assert_eq!(pool.len(), 1);
        pool.integrity_check();
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut pool = ObjectPool::<u32, 4>::new();

        let ptr = pool.create(1).unwrap();
        *pool.get_mut(ptr).unwrap() = 5;

        assert_eq!(pool.get(ptr), Some(&5));
    }

    #[test]
    fn get_with_foreign_pointer_is_none() {
        let mut pool = ObjectPool::<u32, 4>::new();
        let mut other = ObjectPool::<u32, 4>::new();

        _ = pool.create(1).unwrap();
        let foreign = other.create(2).unwrap();

        assert!(pool.get(foreign).is_none());
        assert!(pool.get_mut(foreign).is_none());
        assert!(!pool.contains(foreign));
    }

    #[test]
    fn create_with_builds_in_place() {
        let mut pool = ObjectPool::<String, 4>::new();

        let ptr = pool.create_with(|| "built".to_string()).unwrap();

        assert_eq!(pool.get(ptr).map(String::as_str), Some("built"));
    }

    #[test]
    fn create_with_releases_storage_if_constructor_panics() {
        let mut pool = ObjectPool::<String, 4>::new();
        _ = pool.create("keep".to_string()).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| {
            _ = pool.create_with(|| panic!("constructor failed"));
        }));

        assert!(result.is_err());
        assert_eq!(pool.len(), 1);
        pool.integrity_check();

        // The pool only contains the object that was fully constructed.
        assert_eq!(pool.iter().collect::<Vec<_>>(), vec!["keep"]);
    }

    #[test]
    fn destroy_releases_storage_if_destructor_panics() {
        struct PanicOnDrop;

        impl Drop for PanicOnDrop {
            fn drop(&mut self) {
                panic!("boom");
            }
        }

        let mut pool = ObjectPool::<PanicOnDrop, 4>::new();
        let ptr = pool.create(PanicOnDrop).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            pool.destroy(ptr);
        }));

        assert!(result.is_err());
        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn destroy_interior_pointer_panics_without_dropping() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pool = ObjectPool::<Tracked, 4>::new();

        let _a = pool.create(tracked(1, &log)).unwrap();
        let b = pool.create(tracked(2, &log)).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            pool.destroy(b.byte_add(8));
        }));

        assert!(result.is_err());
        assert!(log.borrow().is_empty());
        assert_eq!(pool.len(), 2);
        assert!(pool.is_allocated(b));
        pool.integrity_check();
    }

    #[cfg(debug_assertions)]
    #[test]
    fn double_destroy_panics_before_dropping_twice() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pool = ObjectPool::<Tracked, 4>::new();

        let _a = pool.create(tracked(1, &log)).unwrap();
        let b = pool.create(tracked(2, &log)).unwrap();

        unsafe {
            pool.destroy(b);
        }

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            pool.destroy(b);
        }));

        assert!(result.is_err());
        assert_eq!(*log.borrow(), vec![2]);
        assert_eq!(pool.len(), 1);
        pool.integrity_check();
    }

    #[test]
    fn clear_runs_destructors() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pool = ObjectPool::<Tracked, 4>::new();

        for id in 0..6 {
            _ = pool.create(tracked(id, &log)).unwrap();
        }

        pool.clear();

        assert_eq!(log.borrow().len(), 6);
        assert!(pool.is_empty());
        assert_eq!(pool.slab_count(), 0);
    }

    #[test]
    fn drop_runs_destructors_in_iteration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pool = ObjectPool::<Tracked, 4>::new();

        let ptrs = (0..6)
            .map(|id| pool.create(tracked(id, &log)).unwrap())
            .collect::<Vec<_>>();

        unsafe {
            pool.destroy(ptrs[2]);
        }

        drop(pool);

        assert_eq!(*log.borrow(), vec![2, 0, 1, 3, 4, 5]);
    }

    #[test]
    #[should_panic]
    fn drop_with_must_not_drop_items_panics() {
        let mut pool = ObjectPool::<u32, 4>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        _ = pool.create(1).unwrap();

        drop(pool);
    }

    #[test]
    fn drop_with_must_not_drop_items_does_not_run_destructors() {
        struct CountDrop(Rc<Cell<u32>>);

        impl Drop for CountDrop {
            fn drop(&mut self) {
                self.0.set(self.0.get().wrapping_add(1));
            }
        }

        let drops = Rc::new(Cell::new(0_u32));

        let mut pool = ObjectPool::<CountDrop, 4>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        _ = pool.create(CountDrop(Rc::clone(&drops))).unwrap();

        let result = catch_unwind(AssertUnwindSafe(move || drop(pool)));

        assert!(result.is_err());
        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn iter_and_iter_mut() {
        let mut pool = ObjectPool::<u32, 4>::new();

        let ptrs = (0..9).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();
        unsafe {
            pool.destroy(ptrs[4]);
        }

        for value in &mut pool {
            *value += 100;
        }

        let values = pool.iter().copied().collect::<Vec<_>>();
        assert_eq!(values, vec![100, 101, 102, 103, 105, 106, 107, 108]);

        let reversed = (&pool).into_iter().rev().copied().collect::<Vec<_>>();
        assert_eq!(reversed, vec![108, 107, 106, 105, 103, 102, 101, 100]);

        assert_eq!(pool.iter().len(), 8);
        assert_eq!(pool.iter_mut().len(), 8);
    }

    #[test]
    fn find_starts_at_object() {
        let mut pool = ObjectPool::<u32, 4>::new();

        let ptrs = (0..6).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();

        let found = pool.find(ptrs[3]).unwrap().copied().collect::<Vec<_>>();
        assert_eq!(found, vec![3, 4, 5]);

        unsafe {
            pool.destroy(ptrs[3]);
        }

        assert!(pool.find(ptrs[3]).is_none());
    }

    #[test]
    fn cursor_erase_runs_destructor() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pool = ObjectPool::<Tracked, 4>::new();

        for id in 0..5 {
            _ = pool.create(tracked(id, &log)).unwrap();
        }

        let mut cursor = pool.cursor_front_mut();
        cursor.move_next();
        cursor.erase();

        assert_eq!(cursor.current().map(|object| object.id), Some(2));
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn cursor_at_and_current_mut() {
        let mut pool = ObjectPool::<u32, 4>::new();

        let ptrs = (0..3).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();

        let mut cursor = pool.cursor_at(ptrs[1]).unwrap();
        *cursor.current_mut().unwrap() = 50;
        assert_eq!(cursor.current_ptr(), Some(ptrs[1]));

        assert_eq!(pool.get(ptrs[1]), Some(&50));
    }

    #[test]
    fn retain_destroys_rejected_objects() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pool = ObjectPool::<Tracked, 4>::new();

        for id in 0..10 {
            _ = pool.create(tracked(id, &log)).unwrap();
        }

        pool.retain(|object| object.id % 2 == 0);

        assert_eq!(*log.borrow(), vec![1, 3, 5, 7, 9]);
        assert_eq!(
            pool.iter().map(|object| object.id).collect::<Vec<_>>(),
            vec![0, 2, 4, 6, 8]
        );
        pool.integrity_check();
    }

    #[test]
    fn shrink_keeps_live_objects() {
        let mut pool = ObjectPool::<String, 4>::new();

        let ptrs = (0..8)
            .map(|i| pool.create(i.to_string()).unwrap())
            .collect::<Vec<_>>();

        for ptr in &ptrs[..4] {
            unsafe {
                pool.destroy(*ptr);
            }
        }

        pool.shrink();

        assert_eq!(pool.slab_count(), 1);
        assert_eq!(pool.get(ptrs[5]).map(String::as_str), Some("5"));
        pool.integrity_check();
    }

    #[test]
    fn reserve_and_try_reserve() {
        let mut pool = ObjectPool::<u32, 4>::new();

        pool.reserve(6);
        assert_eq!(pool.capacity(), 8);

        assert!(matches!(
            pool.try_reserve(usize::MAX),
            Err(ReserveError::CapacityOverflow { .. })
        ));
    }

    #[test]
    fn take_leaves_empty_pool() {
        let mut pool = ObjectPool::<String, 4>::new();
        let ptr = pool.create("moved".to_string()).unwrap();

        let moved = mem::take(&mut pool);

        assert!(pool.is_empty());
        assert_eq!(moved.get(ptr).map(String::as_str), Some("moved"));
    }

    #[test]
    fn swap_exchanges_objects() {
        let mut a = ObjectPool::<u32, 4>::new();
        let mut b = ObjectPool::<u32, 4>::new();

        _ = a.create(1).unwrap();
        _ = b.create(2).unwrap();
        _ = b.create(3).unwrap();

        a.swap(&mut b);

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn debug_output_names_item_type() {
        let pool = ObjectPool::<String, 4>::new();

        let output = format!("{pool:?}");

        assert!(output.contains("ObjectPool"));
        assert!(output.contains("String"));
    }
}
