//! Integration tests for the `slab_pool` package.
//!
//! These exercise the public API the way a user would: whole create/destroy lifecycles,
//! capacity growth and shrinkage, erasure through cursors and moving pools around.

#![allow(
    clippy::indexing_slicing,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::collections::HashSet;
use std::mem;
use std::ptr::NonNull;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slab_pool::{DEFAULT_SLAB_CAPACITY, ObjectPool, RawPool};

#[test]
fn freed_object_is_skipped_by_iteration() {
    let mut pool = ObjectPool::<i32, 256>::new();

    let _first = pool.create(7).unwrap();
    let second = pool.create(25).unwrap();
    let _third = pool.create(1996).unwrap();

    assert_eq!(pool.capacity(), 256);

    unsafe {
        pool.destroy(second);
    }

    let values = pool.iter().copied().collect::<Vec<_>>();
    assert_eq!(values, vec![7, 1996]);
}

#[test]
fn overflowing_one_slab_allocates_another() {
    let mut pool = ObjectPool::<i32, 256>::new();

    for value in 0..257 {
        _ = pool.create(value).unwrap();
    }

    assert_eq!(pool.capacity(), 512);
    assert_eq!(pool.len(), 257);
    assert_eq!(pool.slab_count(), 2);
}

#[test]
fn erase_while_iterating_removes_matching_objects() {
    let mut pool = ObjectPool::<u8>::new();

    for i in 0..100_u8 {
        _ = pool.create(i % 2).unwrap();
    }

    let mut cursor = pool.cursor_front_mut();
    while let Some(value) = cursor.current() {
        if *value == 1 {
            cursor.erase();
        } else {
            cursor.move_next();
        }
    }

    assert_eq!(pool.len(), 50);
    assert!(pool.iter().all(|value| *value == 0));
    assert_eq!(pool.iter().filter(|value| **value == 1).count(), 0);
}

#[test]
fn moving_pool_keeps_objects_in_place() {
    let payload = Rc::new("shared".to_string());

    let mut source = ObjectPool::<Rc<String>, 4>::new();
    let ptrs = (0..10)
        .map(|_| source.create(Rc::clone(&payload)).unwrap())
        .collect::<Vec<_>>();

    assert_eq!(Rc::strong_count(&payload), 11);

    let destination = mem::take(&mut source);

    assert_eq!(source.len(), 0);
    assert_eq!(source.capacity(), 0);
    assert_eq!(destination.len(), 10);

    // Same addresses, no copies made, no destructors run.
    assert_eq!(destination.iter().count(), 10);
    for ptr in &ptrs {
        assert!(destination.is_allocated(*ptr));
    }
    assert_eq!(Rc::strong_count(&payload), 11);

    drop(destination);
    assert_eq!(Rc::strong_count(&payload), 1);
}

#[test]
fn shrink_after_emptying_spare_slab_releases_one_slab() {
    let mut pool = ObjectPool::<u64, 16>::new();

    let ptrs = (0..40).map(|i| pool.create(i).unwrap()).collect::<Vec<_>>();
    assert_eq!(pool.capacity(), 48);

    // The second slab holds objects 16..32.
    for ptr in &ptrs[16..32] {
        unsafe {
            pool.destroy(*ptr);
        }
    }

    let len_before = pool.len();
    pool.shrink();

    assert_eq!(pool.capacity(), 32);
    assert_eq!(pool.len(), len_before);

    let values = pool.iter().copied().collect::<Vec<_>>();
    let expected = (0..16).chain(32..40).collect::<Vec<_>>();
    assert_eq!(values, expected);
}

#[test]
fn destroyed_address_is_reused() {
    let mut pool = ObjectPool::<String>::new();

    let _keep = pool.create("keep".to_string()).unwrap();
    let len_before = pool.len();

    let temporary = pool.create("temporary".to_string()).unwrap();
    unsafe {
        pool.destroy(temporary);
    }

    assert_eq!(pool.len(), len_before);

    let reused = pool.create("reused".to_string()).unwrap();
    assert_eq!(reused, temporary);
}

#[test]
fn default_capacity_is_256() {
    let mut pool = RawPool::<u16>::new();

    _ = pool.alloc().unwrap();

    assert_eq!(pool.capacity(), DEFAULT_SLAB_CAPACITY);
}

#[test]
fn random_churn_keeps_pool_consistent() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut pool = ObjectPool::<u32, 8>::new();

    let mut live: Vec<(NonNull<u32>, u32)> = Vec::new();
    let mut creates = 0_usize;
    let mut destroys = 0_usize;

    for step in 0..5_000_u32 {
        let create = live.is_empty() || rng.random_bool(0.55);

        if create {
            let ptr = pool.create(step).unwrap();
            live.push((ptr, step));
            creates += 1;
        } else {
            let victim = rng.random_range(0..live.len());
            let (ptr, _) = live.swap_remove(victim);
            unsafe {
                pool.destroy(ptr);
            }
            destroys += 1;
        }

        assert_eq!(pool.len(), creates - destroys);
        assert_eq!(pool.capacity() % 8, 0);
        assert!(pool.capacity() >= pool.len());

        if step % 500 == 0 {
            pool.shrink();
        }
    }

    // Every live object is where we left it and iteration yields exactly those.
    for (ptr, value) in &live {
        assert_eq!(pool.get(*ptr), Some(value));
    }

    let expected = live.iter().map(|(_, value)| *value).collect::<HashSet<_>>();
    let iterated = pool.iter().copied().collect::<HashSet<_>>();
    assert_eq!(iterated, expected);
    assert_eq!(pool.iter().count(), live.len());

    for ptr in pool.iter().map(NonNull::from) {
        assert!(pool.contains(ptr));
    }
}

#[test]
fn raw_pool_iteration_only_yields_allocated_cells() {
    let mut pool = RawPool::<u64, 4>::new();

    let ptrs = (0..12).map(|_| pool.alloc().unwrap()).collect::<Vec<_>>();

    for ptr in ptrs.iter().step_by(3) {
        pool.free(*ptr);
    }

    let iterated = pool.iter().collect::<Vec<_>>();
    assert_eq!(iterated.len(), pool.len());

    for ptr in &iterated {
        assert!(pool.is_allocated(*ptr));
    }

    for ptr in ptrs.iter().step_by(3) {
        assert!(!iterated.contains(ptr));
    }
}
