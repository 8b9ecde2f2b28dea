/// Determines what happens to live objects when a pool is dropped.
///
/// By default, the pool drops its objects when it is dropped.
///
/// # Examples
///
/// ```
/// use slab_pool::{DropPolicy, ObjectPool};
///
/// // The drop policy is set at pool creation time.
/// let pool = ObjectPool::<u32>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Dropping the pool disposes of any objects still in it. This is the default.
    ///
    /// An [`ObjectPool`][crate::ObjectPool] runs their destructors, whereas a
    /// [`RawPool`][crate::RawPool] only releases their storage because it does not know which
    /// cells hold initialized objects.
    #[default]
    MayDropItems,

    /// Dropping the pool panics if it still contains objects.
    ///
    /// The storage is released before the panic and no destructors are run. If the thread is
    /// already panicking, the pool does not panic again.
    ///
    /// This is useful when pointers to the objects are held elsewhere and the owner wants to be
    /// told loudly if the pool goes away before all of those pointers were given back.
    MustNotDropItems,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_may_drop_items() {
        assert_eq!(DropPolicy::default(), DropPolicy::MayDropItems);
    }
}
