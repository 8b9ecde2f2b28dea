use foldhash::{HashMap, HashMapExt};
use num_integer::Integer;

/// The (at most two) slabs whose storage overlaps one bucket of the address space.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct Bucket {
    /// Slab whose storage begins inside this bucket.
    starts_here: Option<usize>,

    /// Slab whose storage begins in the bucket below and spills into this one.
    spills_in: Option<usize>,
}

impl Bucket {
    fn is_empty(&self) -> bool {
        self.starts_here.is_none() && self.spills_in.is_none()
    }
}

/// Maps object addresses to the slabs that may own them.
///
/// The address space is divided into buckets as wide as the storage of one slab. The storage of a
/// slab therefore overlaps at most two adjacent buckets, and any bucket overlaps at most two slabs
/// (storage of different slabs never overlaps). Looking up the bucket of an address yields at most
/// two candidate slabs, one of which is the owner if any slab of the pool owns the address.
///
/// Slabs are identified by their index in the owning pool, which is what the directory stores.
/// Addresses are only ever used as integers here, never turned back into pointers.
#[derive(Debug)]
pub(crate) struct Directory {
    bucket_bytes: usize,

    // foldhash is a good fit for integer keys in a table that is looked up on every free.
    buckets: HashMap<usize, Bucket>,
}

impl Directory {
    /// Creates an empty directory for slabs whose storage is `bucket_bytes` wide.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_bytes` is zero.
    #[must_use]
    pub(crate) fn new(bucket_bytes: usize) -> Self {
        assert!(bucket_bytes > 0, "slab storage cannot be zero-sized");

        Self {
            bucket_bytes,
            buckets: HashMap::new(),
        }
    }

    fn key(&self, addr: usize) -> usize {
        addr.prev_multiple_of(&self.bucket_bytes)
    }

    /// Registers the slab whose storage starts at `base_addr`.
    ///
    /// # Panics
    ///
    /// Panics if another slab already occupies either slot, which would mean two slabs overlap.
    pub(crate) fn register(&mut self, slab_index: usize, base_addr: usize) {
        let (start_key, spill_key) = self.keys_of(base_addr);

        let start_bucket = self.buckets.entry(start_key).or_default();
        assert!(
            start_bucket.starts_here.is_none(),
            "two slabs cannot start in the same address bucket {start_key:#x}"
        );
        start_bucket.starts_here = Some(slab_index);

        let spill_bucket = self.buckets.entry(spill_key).or_default();
        assert!(
            spill_bucket.spills_in.is_none(),
            "two slabs cannot spill into the same address bucket {spill_key:#x}"
        );
        spill_bucket.spills_in = Some(slab_index);
    }

    /// Removes the slab whose storage starts at `base_addr`, dropping buckets that become empty.
    ///
    /// # Panics
    ///
    /// Panics if the slab was not registered under this address.
    pub(crate) fn unregister(&mut self, slab_index: usize, base_addr: usize) {
        let (start_key, spill_key) = self.keys_of(base_addr);

        self.vacate(start_key, slab_index, |bucket| &mut bucket.starts_here);
        self.vacate(spill_key, slab_index, |bucket| &mut bucket.spills_in);
    }

    fn vacate(
        &mut self,
        key: usize,
        slab_index: usize,
        slot: impl FnOnce(&mut Bucket) -> &mut Option<usize>,
    ) {
        let bucket = self
            .buckets
            .get_mut(&key)
            .unwrap_or_else(|| panic!("address bucket {key:#x} of slab {slab_index} is missing"));

        let slot = slot(bucket);
        assert_eq!(
            *slot,
            Some(slab_index),
            "address bucket {key:#x} is not occupied by slab {slab_index}"
        );
        *slot = None;

        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
    }

    /// Slab indices that may own the object at `addr`. The caller must still do a range check.
    #[must_use]
    pub(crate) fn candidates(&self, addr: usize) -> impl Iterator<Item = usize> {
        let bucket = self.buckets.get(&self.key(addr)).copied().unwrap_or_default();

        bucket.starts_here.into_iter().chain(bucket.spills_in)
    }

    /// Rewrites every stored slab index through `map`, typically after slabs were removed.
    pub(crate) fn remap(&mut self, mut map: impl FnMut(usize) -> usize) {
        for bucket in self.buckets.values_mut() {
            bucket.starts_here = bucket.starts_here.map(&mut map);
            bucket.spills_in = bucket.spills_in.map(&mut map);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
    }

    /// Number of occupied buckets.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    fn keys_of(&self, base_addr: usize) -> (usize, usize) {
        let start_key = self.key(base_addr);

        // The bucket past the end of the address space cannot exist because the storage of the
        // slab would have to extend beyond it.
        let spill_key = start_key
            .checked_add(self.bucket_bytes)
            .expect("slab storage cannot extend past the end of the address space");

        (start_key, spill_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(directory: &Directory, addr: usize) -> Vec<usize> {
        directory.candidates(addr).collect()
    }

    #[test]
    fn empty_directory_has_no_candidates() {
        let directory = Directory::new(64);

        assert_eq!(directory.len(), 0);
        assert!(candidates(&directory, 0x1000).is_empty());
    }

    #[test]
    fn aligned_slab_occupies_two_buckets() {
        let mut directory = Directory::new(64);

        directory.register(0, 0x1000);

        assert_eq!(directory.len(), 2);
        assert_eq!(candidates(&directory, 0x1000), vec![0]);
        assert_eq!(candidates(&directory, 0x103f), vec![0]);

        // The spill bucket is registered even if the slab happens to end exactly on a boundary.
        assert_eq!(candidates(&directory, 0x1040), vec![0]);
        assert!(candidates(&directory, 0x0fff).is_empty());
    }

    #[test]
    fn unaligned_slab_is_found_from_either_bucket() {
        let mut directory = Directory::new(64);

        directory.register(3, 0x1010);

        assert_eq!(candidates(&directory, 0x1010), vec![3]);
        assert_eq!(candidates(&directory, 0x1049), vec![3]);
    }

    #[test]
    fn neighboring_slabs_share_a_bucket() {
        let mut directory = Directory::new(64);

        directory.register(0, 0x1010);
        directory.register(1, 0x1050);

        // Bucket 0x1040 holds the start of slab 1 and the spill of slab 0.
        assert_eq!(candidates(&directory, 0x1048), vec![1, 0]);
        assert_eq!(directory.len(), 3);
    }

    #[test]
    fn unregister_removes_empty_buckets() {
        let mut directory = Directory::new(64);

        directory.register(0, 0x1010);
        directory.register(1, 0x1050);

        directory.unregister(0, 0x1010);

        assert_eq!(directory.len(), 2);
        assert!(candidates(&directory, 0x1010).is_empty());
        assert_eq!(candidates(&directory, 0x1048), vec![1]);

        directory.unregister(1, 0x1050);
        assert_eq!(directory.len(), 0);
    }

    #[test]
    #[should_panic]
    fn unregister_unknown_slab_panics() {
        let mut directory = Directory::new(64);

        directory.register(0, 0x1000);
        directory.unregister(1, 0x1000);
    }

    #[test]
    #[should_panic]
    fn overlapping_registration_panics() {
        let mut directory = Directory::new(64);

        directory.register(0, 0x1000);
        directory.register(1, 0x1008);
    }

    #[test]
    fn remap_rewrites_indices() {
        let mut directory = Directory::new(64);

        directory.register(4, 0x1000);
        directory.register(7, 0x2000);

        directory.remap(|index| index.saturating_sub(3));

        assert_eq!(candidates(&directory, 0x1000), vec![1]);
        assert_eq!(candidates(&directory, 0x2040), vec![4]);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut directory = Directory::new(64);

        directory.register(0, 0x1000);
        directory.clear();

        assert_eq!(directory.len(), 0);
        assert!(candidates(&directory, 0x1000).is_empty());
    }
}
