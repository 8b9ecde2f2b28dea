use std::any::type_name;
use std::fmt;
use std::ptr::NonNull;

use crate::RawPool;
use crate::slab::LiveIndices;

/// A cursor over the allocated cells of a [`RawPool`] that can free the cell it points to.
///
/// The cursor visits cells in the same order as [`RawPool::iter()`]. It is either positioned at
/// an allocated cell or at the end of the pool.
///
/// Created by [`RawPool::cursor_front_mut()`] and [`RawPool::cursor_at()`].
///
/// # Example
///
/// ```rust
/// use slab_pool::RawPool;
///
/// let mut pool = RawPool::<u32>::new();
///
/// for value in 0..10 {
///     _ = pool.create(value).expect("out of memory");
/// }
///
/// // Free every odd value.
/// let mut cursor = pool.cursor_front_mut();
///
/// while let Some(ptr) = cursor.current() {
///     // SAFETY: Every allocated cell in this pool holds an initialized u32.
///     if unsafe { *ptr.as_ref() } % 2 == 1 {
///         cursor.erase();
///     } else {
///         cursor.move_next();
///     }
/// }
///
/// assert_eq!(pool.len(), 5);
/// ```
pub struct RawCursorMut<'p, T, const CAPACITY: usize> {
    pool: &'p mut RawPool<T, CAPACITY>,

    slab_index: usize,

    // Live cells of the current slab not yet visited. The snapshot stays accurate because we
    // hold the only reference to the pool and only ever free cells we have already passed.
    live: LiveIndices,

    current: Option<NonNull<T>>,
}

impl<'p, T, const CAPACITY: usize> RawCursorMut<'p, T, CAPACITY> {
    /// Positions the cursor at the first allocated cell at or after `start_index` in the slab
    /// `slab_index`, or anywhere in the slabs after it. Starts at the front of the slab if no
    /// index is given.
    pub(crate) fn new(
        pool: &'p mut RawPool<T, CAPACITY>,
        slab_index: usize,
        start_index: Option<usize>,
    ) -> Self {
        let live = pool.try_slab(slab_index).map_or_else(LiveIndices::empty, |slab| {
            slab.live_indices_from(start_index.unwrap_or_default())
        });

        let mut cursor = Self {
            pool,
            slab_index,
            live,
            current: None,
        };

        cursor.advance();
        cursor
    }

    /// The allocated cell the cursor points to, or `None` if the cursor is at the end.
    #[must_use]
    pub fn current(&self) -> Option<NonNull<T>> {
        self.current
    }

    /// Moves the cursor to the next allocated cell. Does nothing if the cursor is at the end.
    pub fn move_next(&mut self) {
        if self.current.is_some() {
            self.advance();
        }
    }

    /// Frees the cell the cursor points to, without running any destructor, and moves the cursor
    /// to the next allocated cell.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is at the end.
    pub fn erase(&mut self) {
        let ptr = self.current.unwrap_or_else(|| {
            panic!(
                "cannot erase at the end of a pool of {}",
                type_name::<T>()
            )
        });

        self.pool.release_at(self.slab_index, ptr);
        self.advance();
    }

    fn advance(&mut self) {
        loop {
            if let Some(index) = self.live.next() {
                self.current = Some(self.pool.slab(self.slab_index).object_ptr(index));
                return;
            }

            // Will not wrap because there cannot be usize::MAX slabs.
            self.slab_index = self.slab_index.wrapping_add(1);

            let Some(slab) = self.pool.try_slab(self.slab_index) else {
                self.current = None;
                self.live = LiveIndices::empty();
                return;
            };

            self.live = slab.live_indices();
        }
    }
}

impl<T, const CAPACITY: usize> fmt::Debug for RawCursorMut<'_, T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCursorMut")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("slab_index", &self.slab_index)
            .field("live", &self.live)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

/// A cursor over the objects of an [`ObjectPool`][crate::ObjectPool] that can destroy the
/// object it points to.
///
/// Created by [`ObjectPool::cursor_front_mut()`][crate::ObjectPool::cursor_front_mut] and
/// [`ObjectPool::cursor_at()`][crate::ObjectPool::cursor_at].
pub struct CursorMut<'p, T, const CAPACITY: usize> {
    // Every allocated cell of the underlying pool holds an initialized object.
    raw: RawCursorMut<'p, T, CAPACITY>,
}

impl<'p, T, const CAPACITY: usize> CursorMut<'p, T, CAPACITY> {
    /// # Safety
    ///
    /// Every allocated cell of the pool the cursor iterates over must hold an initialized object.
    pub(crate) unsafe fn new(raw: RawCursorMut<'p, T, CAPACITY>) -> Self {
        Self { raw }
    }

    /// The object the cursor points to, or `None` if the cursor is at the end.
    #[must_use]
    pub fn current(&self) -> Option<&T> {
        // SAFETY: Allocated cells hold initialized objects and the cursor has exclusive access to
        // the pool, so nobody else can have a mutable reference. The reference is bound to our
        // own borrow, so the object cannot be destroyed while it is alive.
        self.raw.current().map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Exclusive access to the object the cursor points to, or `None` if the cursor is at the end.
    #[must_use]
    pub fn current_mut(&mut self) -> Option<&mut T> {
        // SAFETY: As for current(), and because we borrow the cursor exclusively, nobody else can
        // obtain any reference to the object while this one is alive.
        self.raw.current().map(|mut ptr| unsafe { ptr.as_mut() })
    }

    /// The pointer to the object the cursor points to, or `None` if the cursor is at the end.
    #[must_use]
    pub fn current_ptr(&self) -> Option<NonNull<T>> {
        self.raw.current()
    }

    /// Moves the cursor to the next object. Does nothing if the cursor is at the end.
    pub fn move_next(&mut self) {
        self.raw.move_next();
    }

    /// Drops the object the cursor points to, releases its storage and moves the cursor to the
    /// next object.
    ///
    /// The storage is released and the cursor advances even if the destructor panics.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is at the end.
    pub fn erase(&mut self) {
        let ptr = self.raw.current().unwrap_or_else(|| {
            panic!(
                "cannot erase at the end of a pool of {}",
                type_name::<T>()
            )
        });

        let _release = scopeguard::guard(&mut self.raw, RawCursorMut::erase);

        // SAFETY: The cell is allocated, so it holds an initialized object. We hold exclusive
        // access to the pool and the cell is released right after, so nobody sees the dropped
        // object again.
        unsafe {
            ptr.drop_in_place();
        }
    }
}

impl<T, const CAPACITY: usize> fmt::Debug for CursorMut<'_, T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorMut").field("raw", &self.raw).finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::indexing_slicing,
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(RawCursorMut<'_, u32, 4>: Send, Sync);

    fn values(pool: &RawPool<u32, 4>) -> Vec<u32> {
        pool.iter().map(|ptr| unsafe { *ptr.as_ref() }).collect()
    }

    #[test]
    fn cursor_on_empty_pool_is_at_end() {
        let mut pool = RawPool::<u32, 4>::new();

        let mut cursor = pool.cursor_front_mut();
        assert!(cursor.current().is_none());

        cursor.move_next();
        assert!(cursor.current().is_none());
    }

    #[test]
    fn cursor_skips_empty_slabs() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..9).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();
        for ptr in &ptrs[..8] {
            pool.free(*ptr);
        }

        let cursor = pool.cursor_front_mut();
        assert_eq!(cursor.current(), Some(ptrs[8]));
    }

    #[test]
    fn cursor_visits_in_iteration_order() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..10).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();
        pool.free(ptrs[2]);
        pool.free(ptrs[5]);

        let expected = pool.iter().collect::<Vec<_>>();

        let mut visited = Vec::new();
        let mut cursor = pool.cursor_front_mut();
        while let Some(ptr) = cursor.current() {
            visited.push(ptr);
            cursor.move_next();
        }

        assert_eq!(visited, expected);
    }

    #[test]
    fn erase_frees_and_advances() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..6).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();

        let mut cursor = pool.cursor_front_mut();
        cursor.move_next();
        assert_eq!(cursor.current(), Some(ptrs[1]));

        cursor.erase();
        assert_eq!(cursor.current(), Some(ptrs[2]));

        // Erasing the last cell of a slab moves on to the next slab.
        cursor.move_next();
        cursor.erase();
        assert_eq!(cursor.current(), Some(ptrs[4]));

        assert_eq!(values(&pool), vec![0, 2, 4, 5]);
        pool.integrity_check();
    }

    #[test]
    fn erase_everything_empties_pool() {
        let mut pool = RawPool::<u32, 4>::new();

        for i in 0..11 {
            _ = pool.create(i).unwrap();
        }

        let mut cursor = pool.cursor_front_mut();
        while cursor.current().is_some() {
            cursor.erase();
        }

        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn erase_from_full_slab_returns_it_to_spare_list() {
        let mut pool = RawPool::<u32, 2>::new();

        let ptrs = (0..4).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();

        let mut cursor = pool.cursor_front_mut();
        cursor.erase();

        pool.integrity_check();

        // The cell we erased is the first to be reused.
        assert_eq!(pool.alloc().unwrap(), ptrs[0]);
    }

    #[test]
    fn cursor_at_starts_at_pointer() {
        let mut pool = RawPool::<u32, 4>::new();

        let ptrs = (0..8).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();

        let mut cursor = pool.cursor_at(ptrs[5]).unwrap();
        assert_eq!(cursor.current(), Some(ptrs[5]));

        cursor.erase();
        cursor.erase();
        assert_eq!(cursor.current(), Some(ptrs[7]));

        cursor.move_next();
        assert!(cursor.current().is_none());

        assert_eq!(values(&pool), vec![0, 1, 2, 3, 4, 7]);
    }

    #[test]
    fn cursor_at_freed_pointer_is_none() {
        let mut pool = RawPool::<u32, 4>::new();

        let a = pool.create(1).unwrap();
        let _b = pool.create(2).unwrap();
        pool.free(a);

        assert!(pool.cursor_at(a).is_none());
    }

    #[test]
    #[should_panic]
    fn erase_at_end_panics() {
        let mut pool = RawPool::<u32, 4>::new();
        _ = pool.create(1).unwrap();

        let mut cursor = pool.cursor_front_mut();
        cursor.move_next();
        cursor.erase();
    }
}
