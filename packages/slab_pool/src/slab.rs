use std::alloc::{Layout, alloc, dealloc};
use std::any::type_name;
use std::fmt;
use std::iter::FusedIterator;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use bitvec::array::BitArray;
use num_integer::Integer;

use crate::MAX_SLAB_CAPACITY;

/// Snapshot of which cells of a slab are free, wide enough for the largest permitted slab.
pub(crate) type FreeMask = BitArray<[u32; 8]>;

const _: () = assert!(
    size_of::<[u32; 8]>() * 8 == MAX_SLAB_CAPACITY,
    "free mask must have exactly one bit per cell of the largest slab"
);

/// One unit of slab storage.
///
/// While the cell is free, its first byte is the index of the next free cell in the same slab.
/// While the cell is allocated, all of its bytes belong to the object. The slab itself never
/// knows whether an allocated cell has been initialized - that is the business of the caller.
#[repr(C)]
union Cell<T> {
    next_free: u8,

    #[allow(
        dead_code,
        reason = "only shapes the layout, objects are accessed through casted pointers"
    )]
    object: ManuallyDrop<T>,
}

/// A fixed-capacity block of storage for up to `CAPACITY` objects of type `T`.
///
/// Free cells form an intrusive singly-linked list (a stack of recently freed cells) that lives
/// inside the storage of the free cells themselves. The list is terminated by `free_count`, not
/// by a sentinel value, so the link stored in the last free cell is never followed. This is what
/// allows an 8-bit link to address a 256-cell slab.
///
/// # Out of band access
///
/// The slab does not create or keep references to the cells. The storage is a separate heap
/// allocation, so holding `&mut Slab` does not conflict with pointers that callers hold into
/// allocated cells. The slab only ever reads and writes the link byte of free cells.
///
/// Dropping the slab releases the storage without running any destructors.
pub(crate) struct Slab<T, const CAPACITY: usize> {
    first_cell_ptr: NonNull<Cell<T>>,

    /// Index of the head of the free list. Points out of bounds (`CAPACITY`) if the slab is full.
    top: usize,

    /// Number of cells currently on the free list.
    free_count: usize,
}

impl<T, const CAPACITY: usize> Slab<T, CAPACITY> {
    /// Evaluating this fails compilation if `CAPACITY` is not a supported slab capacity.
    pub(crate) const CAPACITY_CHECK: () = {
        assert!(CAPACITY > 0, "slab capacity must be at least one cell");
        assert!(
            CAPACITY <= MAX_SLAB_CAPACITY,
            "slab capacity cannot exceed 256 cells because free list links are 8 bits wide"
        );
    };

    /// Creates a new slab with every cell free, chained in ascending index order.
    ///
    /// Returns `None` if the storage could not be allocated, including when the cell array is
    /// too large to be described by a [`Layout`].
    #[must_use]
    pub(crate) fn try_new() -> Option<Self> {
        let () = Self::CAPACITY_CHECK;

        let layout = Self::layout()?;

        // SAFETY: Every cell is at least one byte wide, so the layout is never zero-sized.
        let first_cell_ptr = NonNull::new(unsafe { alloc(layout) })?.cast::<Cell<T>>();

        for index in 0..CAPACITY {
            // SAFETY: The allocation holds CAPACITY cells and the loop range keeps us in bounds.
            let cell_ptr = unsafe { first_cell_ptr.add(index) };

            // The last cell links to CAPACITY, which is never followed.
            // Will not wrap because index is below CAPACITY.
            let link = to_link(index.wrapping_add(1));

            // SAFETY: The cell is inside the allocation we just made, so it is valid for writes.
            // The link is the first byte of a `repr(C)` union, so a byte write is aligned.
            unsafe {
                cell_ptr.cast::<u8>().write(link);
            }
        }

        Some(Self {
            first_cell_ptr,
            top: 0,
            free_count: CAPACITY,
        })
    }

    /// Layout of the cell storage, or `None` if it would exceed `isize::MAX` bytes.
    #[must_use]
    pub(crate) fn layout() -> Option<Layout> {
        Layout::array::<Cell<T>>(CAPACITY).ok()
    }

    /// Size of the cell storage of one slab, in bytes.
    ///
    /// Saturates if the storage is too large to allocate. No slab of such a type can exist, so
    /// the value then only sizes directory buckets that stay empty.
    #[must_use]
    pub(crate) fn storage_bytes() -> usize {
        // The size of a type is a multiple of its alignment, so no padding follows the last cell.
        size_of::<Cell<T>>().saturating_mul(CAPACITY)
    }

    /// Number of allocated cells.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        // Cannot wrap because free_count never exceeds CAPACITY.
        CAPACITY.wrapping_sub(self.free_count)
    }

    #[must_use]
    pub(crate) fn free_count(&self) -> usize {
        self.free_count
    }

    /// Whether no cell is allocated.
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.free_count == CAPACITY
    }

    #[must_use]
    pub(crate) fn is_full(&self) -> bool {
        self.free_count == 0
    }

    /// Address of the first byte of the cell storage.
    #[must_use]
    pub(crate) fn base_addr(&self) -> usize {
        self.first_cell_ptr.addr().get()
    }

    /// Whether the pointer falls inside the storage of this slab. Pure address comparison.
    #[must_use]
    pub(crate) fn contains(&self, ptr: NonNull<T>) -> bool {
        // If the pointer is below the base, this wraps to a huge value and fails the comparison.
        ptr.addr().get().wrapping_sub(self.base_addr()) < Self::storage_bytes()
    }

    /// Whether the pointer refers to a cell of this slab that is currently allocated.
    ///
    /// This walks the free list, so it takes O(`CAPACITY`) time.
    #[must_use]
    pub(crate) fn is_allocated(&self, ptr: NonNull<T>) -> bool {
        self.cell_index(ptr)
            .is_some_and(|index| !self.free_mask().get(index).is_some_and(|bit| *bit))
    }

    /// Allocates a cell, returning a pointer to its (uninitialized) storage.
    ///
    /// # Panics
    ///
    /// Panics if the slab is full.
    #[must_use]
    pub(crate) fn allocate(&mut self) -> NonNull<T> {
        assert!(
            !self.is_full(),
            "cannot allocate from a full slab of {}",
            type_name::<T>()
        );

        // Pop the head of the free list.
        let index = self.top;
        let next_free = self.read_link(index);

        // Cannot wrap because we asserted above that the slab is not full.
        self.free_count = self.free_count.wrapping_sub(1);

        self.top = if self.free_count == 0 {
            CAPACITY
        } else {
            usize::from(next_free)
        };

        self.object_ptr(index)
    }

    /// Returns a previously allocated cell to the free list.
    ///
    /// The slab does not run any destructor - whatever is in the cell is simply forgotten.
    ///
    /// # Panics
    ///
    /// Panics if the pointer does not point to the start of a cell in this slab or if the slab has
    /// no allocated cells. In debug builds, also panics if the cell is already free.
    pub(crate) fn release(&mut self, ptr: NonNull<T>) {
        let index = self.index_of(ptr);

        assert!(
            !self.is_empty(),
            "released {ptr:?} into a slab of {} that has no allocated cells",
            type_name::<T>()
        );

        #[cfg(debug_assertions)]
        assert!(
            !self.free_mask().get(index).is_some_and(|bit| *bit),
            "double free of {ptr:?} (cell {index}) in slab of {}",
            type_name::<T>()
        );

        // Push the cell onto the free list.
        self.write_link(index, to_link(self.top));
        self.top = index;

        // Cannot wrap because the slab had at least one allocated cell.
        self.free_count = self.free_count.wrapping_add(1);
    }

    /// Walks the free list once and returns the set of free cell indices.
    #[must_use]
    pub(crate) fn free_mask(&self) -> FreeMask {
        let mut mask = FreeMask::ZERO;
        let mut index = self.top;

        for _ in 0..self.free_count {
            mask.set(index, true);

            // After the last free cell this yields a stale value that the loop never uses.
            index = usize::from(self.read_link(index));
        }

        mask
    }

    /// Indices of the allocated cells, in ascending order.
    #[must_use]
    pub(crate) fn live_indices(&self) -> LiveIndices {
        self.live_indices_from(0)
    }

    /// Indices of the allocated cells at or above `start`, in ascending order.
    #[must_use]
    pub(crate) fn live_indices_from(&self, start: usize) -> LiveIndices {
        LiveIndices {
            free: self.free_mask(),
            front: start.min(CAPACITY),
            back: CAPACITY,
        }
    }

    /// Index of the cell the pointer refers to.
    ///
    /// # Panics
    ///
    /// Panics if the pointer is outside the slab or does not point to the start of a cell.
    #[must_use]
    pub(crate) fn index_of(&self, ptr: NonNull<T>) -> usize {
        self.cell_index(ptr).unwrap_or_else(|| {
            panic!(
                "{ptr:?} does not point to the start of a cell in slab of {}",
                type_name::<T>()
            )
        })
    }

    fn cell_index(&self, ptr: NonNull<T>) -> Option<usize> {
        if !self.contains(ptr) {
            return None;
        }

        // Cannot wrap because contains() verified that ptr is at or above the base.
        let offset = ptr.addr().get().wrapping_sub(self.base_addr());
        let (index, misalignment) = offset.div_rem(&size_of::<Cell<T>>());

        (misalignment == 0).then_some(index)
    }

    /// Pointer to the object storage of the cell at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    #[must_use]
    pub(crate) fn object_ptr(&self, index: usize) -> NonNull<T> {
        // The object lives at offset zero of the `repr(C)` union.
        self.cell_ptr(index).cast::<T>()
    }

    fn cell_ptr(&self, index: usize) -> NonNull<Cell<T>> {
        assert!(
            index < CAPACITY,
            "cell {index} index out of bounds in slab of {}",
            type_name::<T>()
        );

        // SAFETY: Guarded by the bounds check above, so the pointer stays inside the allocation.
        unsafe { self.first_cell_ptr.add(index) }
    }

    fn read_link(&self, index: usize) -> u8 {
        let link_ptr = self.cell_ptr(index).cast::<u8>();

        // SAFETY: Callers only read links of free cells, whose first byte is always an initialized
        // link written by try_new() or release(). The pointer is in bounds via cell_ptr().
        unsafe { link_ptr.read() }
    }

    #[expect(
        clippy::needless_pass_by_ref_mut,
        reason = "writes to cell storage owned by the slab, which the borrow checker cannot see"
    )]
    fn write_link(&mut self, index: usize, link: u8) {
        let link_ptr = self.cell_ptr(index).cast::<u8>();

        // SAFETY: The pointer is in bounds via cell_ptr(). The cell is being released, so the
        // caller has given up the object in it and nobody else may touch these bytes anymore.
        unsafe {
            link_ptr.write(link);
        }
    }

    #[cfg(test)]
    #[mutants::skip] // This is test logic, mutation is meaningless.
    pub(crate) fn integrity_check(&self) {
        assert!(
            self.free_count <= CAPACITY,
            "free count {} exceeds capacity {CAPACITY} in slab of {}",
            self.free_count,
            type_name::<T>()
        );

        assert_eq!(
            self.free_count == 0,
            self.top == CAPACITY,
            "top {} disagrees with free count {} in slab of {}",
            self.top,
            self.free_count,
            type_name::<T>()
        );

        let mut visited = FreeMask::ZERO;
        let mut index = self.top;

        for _ in 0..self.free_count {
            assert!(
                index < CAPACITY,
                "free list leads out of bounds to {index} in slab of {}",
                type_name::<T>()
            );

            assert!(
                !visited.replace(index, true),
                "free list visits cell {index} twice in slab of {}",
                type_name::<T>()
            );

            index = usize::from(self.read_link(index));
        }
    }
}

impl<T, const CAPACITY: usize> Drop for Slab<T, CAPACITY> {
    fn drop(&mut self) {
        // SAFETY: try_new() only creates a slab after validating this exact layout, which
        // storage_bytes() and the cell alignment reproduce.
        let layout =
            unsafe { Layout::from_size_align_unchecked(Self::storage_bytes(), align_of::<Cell<T>>()) };

        // SAFETY: The layout matches the one we allocated with and the memory is still allocated.
        unsafe {
            dealloc(self.first_cell_ptr.as_ptr().cast(), layout);
        }
    }
}

impl<T, const CAPACITY: usize> fmt::Debug for Slab<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("capacity", &CAPACITY)
            .field("base_addr", &format_args!("{:#x}", self.base_addr()))
            .field("top", &self.top)
            .field("free_count", &self.free_count)
            .finish()
    }
}

// SAFETY: The raw pointer is an owned heap allocation with nothing thread-bound about it, so as long
// as T itself can move between threads, the slab can do so, too.
unsafe impl<T: Send, const CAPACITY: usize> Send for Slab<T, CAPACITY> {}

/// Encodes a cell index as a free list link.
///
/// The only index that does not fit is 256, the "out of cells" value of a full 256-cell slab. That
/// value only ever ends up in the last link of the chain, which is never decoded.
#[expect(
    clippy::cast_possible_truncation,
    reason = "the only truncated value is never read back"
)]
fn to_link(index: usize) -> u8 {
    index as u8
}

/// The allocated cell indices of one slab, as seen when the iteration entered the slab.
///
/// Owns its free-set snapshot, so it does not borrow the slab. Whoever holds it must make sure the
/// slab does not gain new allocations in the not-yet-visited range while iterating.
#[derive(Clone, Debug)]
pub(crate) struct LiveIndices {
    free: FreeMask,

    /// Next index to examine from the front.
    front: usize,

    /// One past the next index to examine from the back.
    back: usize,
}

impl LiveIndices {
    /// Yields nothing.
    #[must_use]
    pub(crate) fn empty() -> Self {
        Self {
            free: FreeMask::ZERO,
            front: 0,
            back: 0,
        }
    }
}

impl Iterator for LiveIndices {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.free.get(self.front..self.back)?.first_zero();

        let Some(offset) = offset else {
            self.front = self.back;
            return None;
        };

        // Cannot wrap because both are bounded by the slab capacity.
        let index = self.front.wrapping_add(offset);
        self.front = index.wrapping_add(1);
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.back.saturating_sub(self.front)))
    }
}

impl DoubleEndedIterator for LiveIndices {
    fn next_back(&mut self) -> Option<Self::Item> {
        let offset = self.free.get(self.front..self.back)?.last_zero();

        let Some(offset) = offset else {
            self.back = self.front;
            return None;
        };

        // Cannot wrap because both are bounded by the slab capacity.
        let index = self.front.wrapping_add(offset);
        self.back = index;
        Some(index)
    }
}

impl FusedIterator for LiveIndices {}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::indexing_slicing,
        reason = "we do not need to worry about these things when writing test code"
    )]

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(Slab<u32, 4>: Send);
    assert_not_impl_any!(Slab<u32, 4>: Sync);
    assert_not_impl_any!(Slab<std::rc::Rc<u32>, 4>: Send);

    fn new_slab<T, const CAPACITY: usize>() -> Slab<T, CAPACITY> {
        Slab::try_new().unwrap()
    }

    #[test]
    fn new_slab_is_empty() {
        let slab = new_slab::<u32, 4>();

        assert_eq!(slab.len(), 0);
        assert_eq!(slab.free_count(), 4);
        assert!(slab.is_empty());
        assert!(!slab.is_full());
        assert_eq!(slab.live_indices().count(), 0);
        slab.integrity_check();
    }

    #[test]
    fn allocates_cells_in_ascending_order() {
        let mut slab = new_slab::<u32, 4>();

        let a = slab.allocate();
        let b = slab.allocate();
        let c = slab.allocate();

        assert_eq!(slab.index_of(a), 0);
        assert_eq!(slab.index_of(b), 1);
        assert_eq!(slab.index_of(c), 2);
        assert_eq!(slab.len(), 3);
        slab.integrity_check();
    }

    #[test]
    fn fills_up_to_capacity() {
        let mut slab = new_slab::<u64, 4>();

        for _ in 0..4 {
            _ = slab.allocate();
        }

        assert!(slab.is_full());
        assert_eq!(slab.free_count(), 0);
        slab.integrity_check();
    }

    #[test]
    #[should_panic]
    fn allocate_when_full_panics() {
        let mut slab = new_slab::<u32, 2>();

        _ = slab.allocate();
        _ = slab.allocate();
        _ = slab.allocate();
    }

    #[test]
    fn released_cell_is_reused_first() {
        let mut slab = new_slab::<u32, 4>();

        let _a = slab.allocate();
        let b = slab.allocate();
        let _c = slab.allocate();

        slab.release(b);
        assert_eq!(slab.len(), 2);

        let d = slab.allocate();
        assert_eq!(d, b);
        slab.integrity_check();
    }

    #[test]
    fn release_from_full_slab_makes_room() {
        let mut slab = new_slab::<u32, 3>();

        let a = slab.allocate();
        let b = slab.allocate();
        let c = slab.allocate();
        assert!(slab.is_full());

        slab.release(c);
        slab.release(a);
        assert_eq!(slab.free_count(), 2);
        slab.integrity_check();

        // Most recently released comes back first.
        assert_eq!(slab.allocate(), a);
        assert_eq!(slab.allocate(), c);
        assert!(slab.is_full());

        slab.release(b);
        assert_eq!(slab.allocate(), b);
    }

    #[test]
    fn full_256_cell_slab_round_trips() {
        let mut slab = new_slab::<u16, 256>();

        let ptrs = (0..256).map(|_| slab.allocate()).collect::<Vec<_>>();
        assert!(slab.is_full());
        assert_eq!(slab.index_of(ptrs[255]), 255);
        slab.integrity_check();

        slab.release(ptrs[255]);
        slab.release(ptrs[0]);
        slab.integrity_check();

        assert_eq!(slab.allocate(), ptrs[0]);
        assert_eq!(slab.allocate(), ptrs[255]);
        assert!(slab.is_full());
    }

    #[test]
    fn single_cell_slab_works() {
        let mut slab = new_slab::<u8, 1>();

        let a = slab.allocate();
        assert!(slab.is_full());

        slab.release(a);
        assert!(slab.is_empty());
        assert_eq!(slab.allocate(), a);
    }

    #[test]
    fn contains_is_an_address_range_check() {
        let mut slab = new_slab::<u32, 4>();
        let other = new_slab::<u32, 4>();

        let a = slab.allocate();

        assert!(slab.contains(a));
        assert!(!other.contains(a));

        // A never-allocated cell is still inside the slab.
        assert!(slab.contains(slab.object_ptr(3)));
    }

    #[test]
    fn is_allocated_follows_allocation_state() {
        let mut slab = new_slab::<u32, 4>();

        let a = slab.allocate();
        assert!(slab.is_allocated(a));
        assert!(!slab.is_allocated(slab.object_ptr(1)));

        slab.release(a);
        assert!(!slab.is_allocated(a));
    }

    #[test]
    #[should_panic]
    fn release_foreign_pointer_panics() {
        let mut slab = new_slab::<u32, 4>();
        let mut other = new_slab::<u32, 4>();

        _ = slab.allocate();
        let foreign = other.allocate();

        slab.release(foreign);
    }

    #[test]
    #[should_panic]
    fn release_misaligned_pointer_panics() {
        let mut slab = new_slab::<u32, 4>();

        let a = slab.allocate();

        // SAFETY: Stays within the same cell, we only use the address.
        let misaligned = unsafe { a.byte_add(1) };
        slab.release(misaligned);
    }

    #[test]
    #[should_panic]
    fn release_into_empty_slab_panics() {
        let mut slab = new_slab::<u32, 4>();

        let ptr = slab.object_ptr(0);
        slab.release(ptr);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "double free")]
    fn double_release_panics() {
        let mut slab = new_slab::<u32, 4>();

        let a = slab.allocate();
        let _b = slab.allocate();

        slab.release(a);
        slab.release(a);
    }

    #[test]
    fn free_mask_marks_free_cells() {
        let mut slab = new_slab::<u32, 4>();

        let a = slab.allocate();
        let b = slab.allocate();
        let _c = slab.allocate();
        slab.release(a);
        slab.release(b);

        let mask = slab.free_mask();
        assert!(mask[0]);
        assert!(mask[1]);
        assert!(!mask[2]);
        assert!(mask[3]);
    }

    #[test]
    fn live_indices_skip_free_cells() {
        let mut slab = new_slab::<u32, 8>();

        let ptrs = (0..6).map(|_| slab.allocate()).collect::<Vec<_>>();
        slab.release(ptrs[1]);
        slab.release(ptrs[4]);

        assert_eq!(slab.live_indices().collect::<Vec<_>>(), vec![0, 2, 3, 5]);
        assert_eq!(
            slab.live_indices().rev().collect::<Vec<_>>(),
            vec![5, 3, 2, 0]
        );
        assert_eq!(slab.live_indices_from(3).collect::<Vec<_>>(), vec![3, 5]);
    }

    #[test]
    fn live_indices_from_both_ends_meet_in_the_middle() {
        let mut slab = new_slab::<u32, 8>();

        for _ in 0..5 {
            _ = slab.allocate();
        }

        let mut live = slab.live_indices();
        assert_eq!(live.next(), Some(0));
        assert_eq!(live.next_back(), Some(4));
        assert_eq!(live.next(), Some(1));
        assert_eq!(live.next_back(), Some(3));
        assert_eq!(live.next(), Some(2));
        assert_eq!(live.next_back(), None);
        assert_eq!(live.next(), None);
    }

    #[test]
    fn live_indices_past_the_end_is_empty() {
        let mut slab = new_slab::<u32, 4>();
        _ = slab.allocate();

        assert_eq!(slab.live_indices_from(17).count(), 0);
        assert_eq!(LiveIndices::empty().count(), 0);
    }

    #[test]
    fn dropping_slab_does_not_drop_objects() {
        use std::cell::Cell as StdCell;
        use std::rc::Rc;

        struct Tracked(Rc<StdCell<bool>>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(StdCell::new(false));
        let mut slab = new_slab::<Tracked, 2>();

        let ptr = slab.allocate();
        // SAFETY: Freshly allocated cell with matching layout.
        unsafe {
            ptr.write(Tracked(Rc::clone(&dropped)));
        }

        drop(slab);

        // The slab forgets the object, so the Rc is leaked rather than dropped.
        assert!(!dropped.get());
        assert_eq!(Rc::strong_count(&dropped), 2);
    }

    #[test]
    fn zero_sized_items_occupy_one_byte_cells() {
        let mut slab = new_slab::<(), 4>();

        let a = slab.allocate();
        let b = slab.allocate();

        assert_ne!(a, b);
        assert_eq!(Slab::<(), 4>::storage_bytes(), 4);
    }

    #[test]
    fn storage_bytes_matches_allocated_layout() {
        assert_eq!(
            Slab::<u64, 16>::layout().map(|layout| layout.size()),
            Some(Slab::<u64, 16>::storage_bytes())
        );
        assert_eq!(
            Slab::<(u8, u32), 7>::layout().map(|layout| layout.size()),
            Some(Slab::<(u8, u32), 7>::storage_bytes())
        );
    }

    #[test]
    fn oversized_cells_cannot_form_a_slab() {
        type Huge = [u8; 1 << 56];

        assert!(Slab::<Huge, 256>::layout().is_none());
        assert_eq!(Slab::<Huge, 256>::storage_bytes(), usize::MAX);
        assert!(Slab::<Huge, 256>::try_new().is_none());
    }
}
